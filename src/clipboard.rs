use anyhow::{Result, anyhow};
use std::thread;
use std::time::Duration;

#[cfg(not(target_os = "linux"))]
use copypasta::{ClipboardContext, ClipboardProvider};

// The clipboard can be briefly held by another process.
const COPY_ATTEMPTS: usize = 10;
const RETRY_DELAY: Duration = Duration::from_millis(100);

/// Copy a code to the clipboard, retrying while it is busy.
pub fn copy_code(code: &str) -> Result<()> {
    let mut last_err = anyhow!("clipboard not attempted");
    for attempt in 1..=COPY_ATTEMPTS {
        match copy_once(code) {
            Ok(()) => return Ok(()),
            Err(e) => {
                tracing::debug!(attempt, error = %e, "clipboard copy failed");
                last_err = e;
            }
        }
        if attempt < COPY_ATTEMPTS {
            thread::sleep(RETRY_DELAY);
        }
    }
    Err(last_err.context("failed to copy code to clipboard"))
}

/// Linux: wl-copy (Wayland) or xclip (X11).
#[cfg(target_os = "linux")]
fn copy_once(value: &str) -> Result<()> {
    let has_wayland = std::env::var("WAYLAND_DISPLAY").is_ok();
    let has_x11 = std::env::var("DISPLAY").is_ok();

    if !has_wayland && !has_x11 {
        return Err(anyhow!(
            "No GUI clipboard detected (no DISPLAY or WAYLAND_DISPLAY). Use `totp list` and copy the code by hand."
        ));
    }

    if has_wayland && pipe_to("wl-copy", &[], value).is_ok() {
        return Ok(());
    }
    if has_x11 && pipe_to("xclip", &["-selection", "clipboard"], value).is_ok() {
        return Ok(());
    }

    Err(anyhow!(
        "wl-copy/xclip not available or failed; install `wl-clipboard` or `xclip`"
    ))
}

#[cfg(target_os = "linux")]
fn pipe_to(cmd: &str, args: &[&str], value: &str) -> Result<()> {
    use std::io::Write;
    use std::process::{Command, Stdio};

    let mut child = Command::new(cmd)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| anyhow!("failed to spawn {cmd}: {e}"))?;

    if let Some(stdin) = child.stdin.as_mut() {
        stdin.write_all(value.as_bytes())?;
    }

    let status = child.wait()?;
    if !status.success() {
        return Err(anyhow!("{cmd} exited with status {status}"));
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn copy_once(value: &str) -> Result<()> {
    let mut ctx =
        ClipboardContext::new().map_err(|e| anyhow!("Failed to initialize clipboard: {e}"))?;
    ctx.set_contents(value.to_string())
        .map_err(|e| anyhow!("Failed to copy to clipboard: {e}"))
}
