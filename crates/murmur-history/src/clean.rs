//! Persistence-side message cleaning.
//!
//! Prompt assembly wraps user text in scaffolding (history blocks, memory
//! and tool sections, delimiter bars). None of that may leak into either
//! history store, or the next prompt would quote the previous prompt's
//! plumbing. The proactive marker is the one exception: it survives
//! cleaning so the host can distinguish synthetic entries.

use crate::markers::{
    BACKGROUND_FOOTER, BACKGROUND_HEADER, CURRENT_MESSAGE_HEADER, DELIMITER_BAR, POKE_TEXT_MARKER,
    PROACTIVE_MARKER, TOOLS_FOOTER, TOOLS_HEADER,
};

/// Strip every piece of prompt scaffolding from `text`. Returns the bare
/// message (may be empty). The proactive marker is removed too — use
/// [`clean_preserve_proactive`] when it must survive.
pub fn clean_message(text: &str) -> String {
    let preserved = clean_preserve_proactive(text);
    preserved
        .strip_prefix(PROACTIVE_MARKER)
        .map(|rest| rest.trim_start().to_string())
        .unwrap_or(preserved)
}

/// Like [`clean_message`], but a leading proactive marker is kept.
pub fn clean_preserve_proactive(text: &str) -> String {
    let mut out = text.to_string();

    // If the text embeds a full formatted context, keep only the part after
    // the current-message header (and before any trailing delimiter bar).
    if let Some(pos) = out.rfind(CURRENT_MESSAGE_HEADER) {
        out = out[pos + CURRENT_MESSAGE_HEADER.len()..].to_string();
        if let Some(bar) = out.find(DELIMITER_BAR) {
            out.truncate(bar);
        }
    }

    out = remove_section(&out, BACKGROUND_HEADER, BACKGROUND_FOOTER);
    out = remove_section(&out, TOOLS_HEADER, TOOLS_FOOTER);
    out = out.replace(DELIMITER_BAR, "");
    out.trim().to_string()
}

/// Whether this stored text is a synthetic proactive entry.
pub fn is_proactive_message(text: &str) -> bool {
    text.trim_start().starts_with(PROACTIVE_MARKER)
}

/// Prefix text with the proactive marker (idempotent).
pub fn mark_proactive(text: &str) -> String {
    if is_proactive_message(text) {
        return text.to_string();
    }
    format!("{PROACTIVE_MARKER} {text}")
}

/// Remove literal poke markers someone typed to spoof a poke event.
pub fn filter_poke_text_marker(text: &str) -> String {
    text.replace(POKE_TEXT_MARKER, "").trim().to_string()
}

/// True when the text is nothing but poke markers and whitespace.
pub fn is_only_poke_marker(text: &str) -> bool {
    let trimmed = text.trim();
    !trimmed.is_empty() && filter_poke_text_marker(trimmed).is_empty()
}

/// True for a mention of the bot with no content behind it ("@bot" alone).
pub fn is_empty_at_message(text_without_mentions: &str, is_at_message: bool) -> bool {
    is_at_message && text_without_mentions.trim().is_empty()
}

/// Remove `header … footer` blocks; an unterminated block is cut to the end.
fn remove_section(text: &str, header: &str, footer: &str) -> String {
    let mut out = text.to_string();
    while let Some(start) = out.find(header) {
        match out[start..].find(footer) {
            Some(rel_end) => {
                let end = start + rel_end + footer.len();
                out.replace_range(start..end, "");
            }
            None => {
                out.truncate(start);
                break;
            }
        }
    }
    out
}
