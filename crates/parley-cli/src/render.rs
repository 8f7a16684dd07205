//! Plain-text rendering of conversations and sync results

use chrono::{Local, TimeZone};
use colored::Colorize;
use parley_client::MergeReport;
use parley_core::{Conversation, LocalState, Message, Role, DEFAULT_TITLE};

pub fn display_title(conversation: &Conversation) -> &str {
    if conversation.title.trim().is_empty() {
        DEFAULT_TITLE
    } else {
        &conversation.title
    }
}

/// `2025-01-31 14:05`, local time
pub fn format_time(ms: i64) -> String {
    match Local.timestamp_millis_opt(ms).single() {
        Some(t) => t.format("%Y-%m-%d %H:%M").to_string(),
        None => "-".to_string(),
    }
}

/// One line per conversation, 1-based, active one starred
pub fn conversation_rows(state: &LocalState) -> Vec<String> {
    state
        .items
        .iter()
        .enumerate()
        .map(|(i, conv)| {
            let marker = if state.active_id.as_deref() == Some(conv.id.as_str()) {
                "*"
            } else {
                " "
            };
            format!(
                "{} {:>2}. {}  ({} messages, {})  [{}]",
                marker,
                i + 1,
                display_title(conv),
                conv.messages.len(),
                format_time(conv.last_activity()),
                conv.id
            )
        })
        .collect()
}

/// Conversation id from a 1-based index or an id
pub fn resolve_selector(state: &LocalState, selector: &str) -> Option<String> {
    if state.contains(selector) {
        return Some(selector.to_string());
    }
    let index: usize = selector.parse().ok()?;
    state
        .items
        .get(index.checked_sub(1)?)
        .map(|c| c.id.clone())
}

pub fn print_message(message: &Message) {
    let body = message.content.to_plain_text();
    match message.role {
        Role::User => println!("{} {}", "You:".cyan().bold(), body),
        Role::Assistant => println!("{} {}", "AI:".green().bold(), body),
    }
}

pub fn print_conversation(conversation: &Conversation) {
    println!("{}", format!("# {}", display_title(conversation)).bold());
    for message in &conversation.messages {
        println!();
        print_message(message);
    }
}

pub fn merge_summary(report: &MergeReport) -> String {
    format!(
        "{} new, {} updated, {} pushed, {} unchanged, {} skipped",
        report.adopted.len(),
        report.updated.len(),
        report.pushed.len(),
        report.unchanged.len(),
        report.skipped.len()
    )
}
