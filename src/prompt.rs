use anyhow::Result;
use std::io::{self, Write};

pub fn prompt_line(prompt: &str) -> Result<String> {
    print!("{prompt}");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Ask the user to type `word` exactly; anything else declines.
pub fn confirm_typed(prompt: &str, word: &str) -> Result<bool> {
    Ok(prompt_line(prompt)? == word)
}
