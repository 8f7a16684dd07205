//! Blocking terminal input, run off the async executor

use std::io::{self, BufRead, Write};

use async_trait::async_trait;
use colored::Colorize;
use parley_client::Confirm;

/// Print `prompt` and read one line. `None` at end of input.
pub async fn read_line(prompt: String) -> anyhow::Result<Option<String>> {
    let line = tokio::task::spawn_blocking(move || -> io::Result<Option<String>> {
        print!("{}", prompt);
        io::stdout().flush()?;
        let mut line = String::new();
        let read = io::stdin().lock().read_line(&mut line)?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    })
    .await??;
    Ok(line)
}

pub fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Asks on the terminal, defaulting to no
pub struct StdinConfirm;

#[async_trait]
impl Confirm for StdinConfirm {
    async fn confirm(&self, prompt: &str) -> bool {
        let question = format!("{} {} ", prompt.yellow(), "[y/N]".dimmed());
        match read_line(question).await {
            Ok(Some(answer)) => is_yes(&answer),
            _ => false,
        }
    }
}

/// Confirms without asking, for `--yes`
pub struct AssumeYes;

#[async_trait]
impl Confirm for AssumeYes {
    async fn confirm(&self, _prompt: &str) -> bool {
        true
    }
}
