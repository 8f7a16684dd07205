//! Interactive chat session with background sync

use std::path::PathBuf;

use colored::Colorize;
use parley_client::{Attachment, ClientError, ParleyClient, SendOutcome};

use crate::prompt::read_line;
use crate::render;

#[derive(Debug, Clone, PartialEq)]
pub enum ChatCommand {
    Quit,
    Help,
    New,
    List,
    Use(String),
    Delete,
    Sync,
    Show,
    Export(Option<PathBuf>),
    Attach(PathBuf),
    Message(String),
    Unknown(String),
}

pub fn parse_command(line: &str) -> Option<ChatCommand> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") {
        return Some(ChatCommand::Quit);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Some(ChatCommand::Message(line.to_string()));
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    let command = match (name, arg) {
        ("quit" | "exit" | "q", _) => ChatCommand::Quit,
        ("help" | "h", _) => ChatCommand::Help,
        ("new", _) => ChatCommand::New,
        ("list" | "ls", _) => ChatCommand::List,
        ("use", arg) if !arg.is_empty() => ChatCommand::Use(arg.to_string()),
        ("delete" | "rm", _) => ChatCommand::Delete,
        ("sync", _) => ChatCommand::Sync,
        ("show", _) => ChatCommand::Show,
        ("export", "") => ChatCommand::Export(None),
        ("export", dir) => ChatCommand::Export(Some(PathBuf::from(dir))),
        ("attach", path) if !path.is_empty() => ChatCommand::Attach(PathBuf::from(path)),
        _ => ChatCommand::Unknown(line.to_string()),
    };
    Some(command)
}

fn print_help() {
    println!("{}", "Commands:".bold());
    for (cmd, what) in [
        ("/new", "start a new conversation"),
        ("/list", "list conversations"),
        ("/use <n|id>", "switch conversation"),
        ("/show", "print the active conversation"),
        ("/delete", "delete the active conversation"),
        ("/attach <path>", "attach a file to the next message"),
        ("/sync", "sync with the server now"),
        ("/export [dir]", "write a transcript"),
        ("/quit", "leave"),
    ] {
        println!("  {:<16} {}", cmd, what.dimmed());
    }
    println!("{}", "Ctrl-C while waiting for a reply cancels it.".dimmed());
}

/// Send with Ctrl-C mapped to cancellation of the pending completion
pub async fn send_interruptible(
    client: &ParleyClient,
    text: &str,
    attachments: Vec<Attachment>,
) -> Result<SendOutcome, ClientError> {
    let controller = client.controller();
    let send = controller.send_message(text, attachments);
    tokio::pin!(send);
    tokio::select! {
        outcome = &mut send => outcome,
        _ = tokio::signal::ctrl_c() => {
            controller.cancel();
            send.await
        }
    }
}

pub fn report_send(outcome: Result<SendOutcome, ClientError>) {
    match outcome {
        Ok(SendOutcome::Replied(reply)) => render::print_message(&reply),
        Ok(SendOutcome::Cancelled) => println!("{}", "Cancelled.".yellow()),
        Ok(SendOutcome::Busy) => println!("{}", "Still waiting for the previous reply.".yellow()),
        Ok(SendOutcome::Empty) => {}
        Err(ClientError::QuotaExhausted) => {
            println!("{}", "Daily quota exhausted, try again tomorrow.".red())
        }
        Err(e) => println!("{}", format!("Error: {}", e).red()),
    }
}

pub async fn run(client: &ParleyClient) -> anyhow::Result<()> {
    let username = client.session().current_session().map(|s| s.username);
    println!("{}", "Parley".cyan().bold());
    match &username {
        Some(name) => println!("{}", format!("Signed in as {}, syncing in the background", name).dimmed()),
        None => println!("{}", "Not signed in, conversations stay on this machine".dimmed()),
    }
    println!("{}", "Type /help for commands, /quit or Ctrl-D to leave".dimmed());

    client.scheduler().set_visible(true);
    if let Some(active) = client.controller().active().await? {
        println!();
        render::print_conversation(&active);
    }

    let mut pending: Vec<Attachment> = Vec::new();
    loop {
        println!();
        let prompt = format!("{} ", "You:".cyan().bold());
        let Some(line) = read_line(prompt).await? else {
            break;
        };
        let Some(command) = parse_command(&line) else {
            continue;
        };
        client.scheduler().on_focus();

        match command {
            ChatCommand::Quit => break,
            ChatCommand::Help => print_help(),
            ChatCommand::New => {
                let conv = client.controller().create_conversation().await?;
                println!("{}", format!("Started {}", conv.id).green());
            }
            ChatCommand::List => {
                let state = client.controller().state().await?;
                for row in render::conversation_rows(&state) {
                    println!("{}", row);
                }
            }
            ChatCommand::Use(selector) => {
                let state = client.controller().state().await?;
                match render::resolve_selector(&state, &selector) {
                    Some(id) => {
                        client.controller().select_conversation(&id).await?;
                        if let Some(active) = client.controller().active().await? {
                            render::print_conversation(&active);
                        }
                    }
                    None => println!("{}", format!("No conversation {}", selector).red()),
                }
            }
            ChatCommand::Delete => match client.controller().delete_conversation().await? {
                Some(id) => println!("{}", format!("Deleted {}", id).green()),
                None => println!("{}", "Kept.".dimmed()),
            },
            ChatCommand::Sync => match client.sync().server_sync_merge().await {
                Ok(outcome) => match outcome.done() {
                    Some(report) => println!("{}", render::merge_summary(&report).green()),
                    None => println!("{}", "Not signed in.".yellow()),
                },
                Err(e) => println!("{}", format!("Sync failed: {}", e).red()),
            },
            ChatCommand::Show => {
                if let Some(active) = client.controller().active().await? {
                    render::print_conversation(&active);
                }
            }
            ChatCommand::Export(dir) => {
                match crate::export_active(client, dir.as_deref()).await {
                    Ok(Some(path)) => println!("{}", format!("Wrote {}", path.display()).green()),
                    Ok(None) => println!("{}", "Nothing to export.".yellow()),
                    Err(e) => println!("{}", format!("Export failed: {}", e).red()),
                }
            }
            ChatCommand::Attach(path) => match Attachment::from_path(&path).await {
                Ok(attachment) => {
                    println!("{}", format!("Attached {}", attachment.name()).dimmed());
                    pending.push(attachment);
                }
                Err(e) => println!("{}", format!("Cannot attach {}: {}", path.display(), e).red()),
            },
            ChatCommand::Message(text) => {
                let attachments = std::mem::take(&mut pending);
                report_send(send_interruptible(client, &text, attachments).await);
            }
            ChatCommand::Unknown(line) => {
                println!("{}", format!("Unknown command: {}", line).yellow());
            }
        }
    }

    client.scheduler().set_visible(false);
    println!("{}", "Goodbye!".cyan());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command("   "), None);
        assert_eq!(parse_command("quit"), Some(ChatCommand::Quit));
        assert_eq!(parse_command("/q"), Some(ChatCommand::Quit));
        assert_eq!(
            parse_command("hello there"),
            Some(ChatCommand::Message("hello there".to_string()))
        );
        assert_eq!(
            parse_command("/use 2"),
            Some(ChatCommand::Use("2".to_string()))
        );
        assert_eq!(
            parse_command("/use"),
            Some(ChatCommand::Unknown("/use".to_string()))
        );
        assert_eq!(parse_command("/export"), Some(ChatCommand::Export(None)));
        assert_eq!(
            parse_command("/export  /tmp/out"),
            Some(ChatCommand::Export(Some(PathBuf::from("/tmp/out"))))
        );
        assert_eq!(
            parse_command("/attach notes.md"),
            Some(ChatCommand::Attach(PathBuf::from("notes.md")))
        );
    }
}
