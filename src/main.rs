mod clipboard;
mod prompt;

use crate::clipboard::copy_code;
use crate::prompt::confirm_typed;
use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use totp_store::config::{Config, config_path, save_config};
use totp_store::export::{default_export_name, export_to};
use totp_store::store::default_data_root;
use totp_store::{
    EntryId, Error, ImportCandidate, Layout, Projection, Repository, SubsequenceMatcher,
    Transcoder, decode_export_file, decode_query, run_migrations,
};

#[derive(Parser, Debug)]
#[command(name = "totp", version, about = "TOTP codes from an encrypted local store")]
struct Cli {
    /// Data root (defaults to the per-user local data directory)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List current codes
    ///
    /// Examples:
    ///   totp list
    ///   totp list git
    List {
        /// Optional search text matched against names
        query: Option<String>,
    },

    /// Copy the first matching code to the clipboard
    Clip {
        query: String,
    },

    /// Add secrets from an otpauth:// or otpauth-migration:// link
    Add {
        uri: String,
        /// Only show what would be added
        #[arg(long)]
        dry_run: bool,
    },

    /// Rename entry number N (as shown by `list`)
    Rename {
        number: usize,
        name: String,
    },

    /// Delete entry number N (as shown by `list`)
    Delete {
        number: usize,
    },

    /// Write all secrets, unencrypted, to a portable file
    Export {
        file: Option<PathBuf>,
    },

    /// Add secrets from a portable export file
    Import {
        file: PathBuf,
        #[arg(long)]
        dry_run: bool,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let (repo, config) = open(cli.root)?;

    match cli.command {
        Commands::List { query } => cmd_list(&repo, query.as_deref().unwrap_or(""))?,
        Commands::Clip { query } => cmd_clip(&repo, &query)?,
        Commands::Add { uri, dry_run } => cmd_add(&repo, &config, &uri, dry_run)?,
        Commands::Rename { number, name } => cmd_rename(&repo, number, &name)?,
        Commands::Delete { number } => cmd_delete(&repo, number)?,
        Commands::Export { file } => cmd_export(&repo, file)?,
        Commands::Import { file, dry_run } => cmd_import(&repo, &config, &file, dry_run)?,
    }

    Ok(())
}

/// Migrate legacy files, then load the current store.
fn open(root: Option<PathBuf>) -> anyhow::Result<(Repository, Config)> {
    let root = match root {
        Some(root) => root,
        None => default_data_root()?,
    };
    let layout = Layout::new(root);
    let app_dir = layout.app_dir();
    std::fs::create_dir_all(&app_dir)?;

    let cfg_path = config_path(&app_dir);
    let config = Config::load(&cfg_path)
        .with_context(|| format!("cannot read config {}", cfg_path.display()))?;
    if !cfg_path.exists() {
        save_config(&config, &cfg_path)?;
    }

    let transcoder = Transcoder::from_source(config.key_source, &app_dir)
        .context("cannot load the protection key")?;

    let report = run_migrations(&layout, &transcoder, config.migration_policy());
    if report.failed() > 0 {
        tracing::warn!(
            failed = report.failed(),
            "some legacy files could not be migrated and were kept"
        );
    }

    let repo = Repository::open(layout.store_file(), transcoder)
        .context("cannot open the authenticator store")?;
    Ok((repo, config))
}

fn now_unix() -> anyhow::Result<u64> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system time error")?
        .as_secs())
}

/// 1-based position of an entry in the store, as printed by `list`.
fn entry_number(repo: &Repository, id: &EntryId) -> usize {
    repo.with_store(|s| s.entries.iter().position(|e| id.matches(e)))
        .map(|i| i + 1)
        .unwrap_or(0)
}

fn entry_at(repo: &Repository, number: usize) -> anyhow::Result<(EntryId, String)> {
    repo.with_store(|s| {
        number
            .checked_sub(1)
            .and_then(|i| s.entries.get(i))
            .map(|e| (EntryId::of(e), e.name.clone()))
    })
    .with_context(|| format!("no entry number {number}, see `totp list`"))
}

fn cmd_list(repo: &Repository, query: &str) -> anyhow::Result<()> {
    if repo.is_empty() {
        println!("No authenticators yet. Add one with `totp add <otpauth link>`.");
        return Ok(());
    }

    for row in repo.project(query, &SubsequenceMatcher, now_unix()?) {
        let n = entry_number(repo, row.id());
        match row {
            Projection::Live {
                name,
                code,
                remaining_secs,
                ..
            } => println!("{n:>3}  {code}  {name}  ({remaining_secs}s)"),
            Projection::Invalid { name, .. } => {
                println!("{n:>3}  ------  {name}  (invalid secret, remove with `totp delete {n}`)")
            }
        }
    }
    Ok(())
}

fn cmd_clip(repo: &Repository, query: &str) -> anyhow::Result<()> {
    let row = repo
        .project(query, &SubsequenceMatcher, now_unix()?)
        .into_iter()
        .find(Projection::is_live);

    match row {
        Some(Projection::Live {
            name,
            code,
            remaining_secs,
            ..
        }) => {
            copy_code(&code)?;
            println!("Code for {name} copied to clipboard ({remaining_secs}s left).");
            Ok(())
        }
        _ => bail!("No valid authenticator matches '{query}'"),
    }
}

fn print_candidates(candidates: &[ImportCandidate]) {
    for c in candidates {
        println!("  + {}", c.name);
    }
}

fn commit(
    repo: &Repository,
    config: &Config,
    candidates: Vec<ImportCandidate>,
) -> anyhow::Result<()> {
    let summary = repo.commit(candidates, config.dedupe_policy())?;
    println!("Added {} authenticator(s).", summary.added);
    if summary.skipped_duplicates > 0 {
        println!(
            "Skipped {} already stored secret(s).",
            summary.skipped_duplicates
        );
    }
    Ok(())
}

fn cmd_add(repo: &Repository, config: &Config, uri: &str, dry_run: bool) -> anyhow::Result<()> {
    let batch = match decode_query(uri) {
        None => bail!("Expected an otpauth://totp/ or otpauth-migration://offline link"),
        Some(Ok(batch)) => batch,
        Some(Err(Error::InvalidSecret)) => {
            bail!("The secret in this link is not valid base32; check the link and try again")
        }
        Some(Err(e @ Error::MalformedPayload(_))) => {
            return Err(e).context("Invalid authenticator export link");
        }
        Some(Err(e)) => return Err(e).context("Invalid otpauth link"),
    };

    if batch.batch_size > 1 {
        println!(
            "Export part {} of {}:",
            batch.batch_index + 1,
            batch.batch_size
        );
    }
    if batch.candidates.is_empty() {
        println!("Nothing to add.");
        return Ok(());
    }
    print_candidates(&batch.candidates);
    if dry_run {
        return Ok(());
    }
    commit(repo, config, batch.candidates)
}

fn cmd_rename(repo: &Repository, number: usize, name: &str) -> anyhow::Result<()> {
    let (id, old) = entry_at(repo, number)?;
    repo.rename(&id, name)?;
    println!("Renamed '{old}' to '{name}'.");
    Ok(())
}

fn cmd_delete(repo: &Repository, number: usize) -> anyhow::Result<()> {
    let (id, name) = entry_at(repo, number)?;
    let prompt = format!("Type DELETE to remove '{name}': ");
    if !confirm_typed(&prompt, "DELETE")? {
        println!("Not deleted.");
        return Ok(());
    }
    let removed = repo.delete(&id)?;
    println!("Deleted '{}'.", removed.name);
    Ok(())
}

fn cmd_export(repo: &Repository, file: Option<PathBuf>) -> anyhow::Result<()> {
    let path = match file {
        Some(path) => path,
        None => PathBuf::from(default_export_name()?),
    };
    let summary = export_to(repo, &path)?;
    println!(
        "Exported {} authenticator(s) to {}. The file holds secrets in the clear.",
        summary.written,
        path.display()
    );
    if summary.unreadable > 0 {
        println!(
            "{} entry(ies) could not be decrypted and were left out.",
            summary.unreadable
        );
    }
    Ok(())
}

fn cmd_import(
    repo: &Repository,
    config: &Config,
    file: &Path,
    dry_run: bool,
) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("cannot read {}", file.display()))?;
    let candidates = decode_export_file(&text)
        .with_context(|| format!("{} is not a valid export file", file.display()))?;

    if candidates.is_empty() {
        println!("Nothing to import.");
        return Ok(());
    }
    print_candidates(&candidates);
    if dry_run {
        return Ok(());
    }
    commit(repo, config, candidates)
}
