//! Context formatting for the judge AI and reply prompts.
//!
//! History renders oldest-first, each line tagged with timestamp and
//! sender; the bot's own replies carry a loud do-not-repeat warning. The
//! current message sits in a delimiter block after the history so the
//! model weighs it over everything above. Output is deterministic for
//! identical inputs.

use chrono::{Local, TimeZone};

use crate::markers::{CURRENT_MESSAGE_HEADER, DELIMITER_BAR, HISTORY_HEADER, OWN_REPLY_WARNING};

/// One history line, already resolved against the bot's own id.
#[derive(Debug, Clone)]
pub struct ContextEntry {
    pub sender_id: String,
    pub sender_name: String,
    pub content: String,
    /// Unix seconds.
    pub timestamp: f64,
    pub is_bot: bool,
}

/// Render history + current message into the prompt context block.
pub fn format_context_for_ai(
    history: &[ContextEntry],
    current_message: &str,
    include_timestamp: bool,
    include_sender_info: bool,
) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(history.len() + 6);

    if !history.is_empty() {
        parts.push(HISTORY_HEADER.to_string());
        for entry in history {
            parts.push(format_entry(entry, include_timestamp, include_sender_info));
        }
        parts.push(String::new());
    }

    parts.push(String::new());
    parts.push(DELIMITER_BAR.to_string());
    parts.push(CURRENT_MESSAGE_HEADER.to_string());
    parts.push(DELIMITER_BAR.to_string());
    parts.push(current_message.to_string());
    parts.push(DELIMITER_BAR.to_string());

    parts.join("\n")
}

fn format_entry(entry: &ContextEntry, include_timestamp: bool, include_sender_info: bool) -> String {
    let mut prefix_parts: Vec<String> = Vec::with_capacity(2);

    if include_timestamp {
        prefix_parts.push(format!("[{}]", format_time(entry.timestamp)));
    }
    if include_sender_info {
        if entry.is_bot {
            prefix_parts.push(format!(
                "{OWN_REPLY_WARNING} {}(ID:{}):",
                entry.sender_name, entry.sender_id
            ));
        } else {
            prefix_parts.push(format!("{}(ID:{}):", entry.sender_name, entry.sender_id));
        }
    } else if entry.is_bot {
        prefix_parts.push(format!("{OWN_REPLY_WARNING}:"));
    }

    if prefix_parts.is_empty() {
        entry.content.clone()
    } else {
        format!("{} {}", prefix_parts.join(" "), entry.content)
    }
}

fn format_time(unix: f64) -> String {
    Local
        .timestamp_opt(unix as i64, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "unknown time".to_string())
}
