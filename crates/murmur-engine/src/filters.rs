//! Early message filters and trigger classification — steps that run
//! before any state is touched, in a fixed order the pipeline enforces.

use murmur_core::config::{CommandConfig, KeywordConfig, MentionConfig, MentionMode, UserFilterConfig};

use crate::event::GroupMessageEvent;

/// Does the text look like a command for some plugin (prefix, exact
/// command, or configured prefix-match)?
pub fn is_command(text: &str, config: &CommandConfig) -> bool {
    if !config.enable_command_filter {
        return false;
    }
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return false;
    }
    if config
        .command_prefixes
        .iter()
        .filter(|p| !p.is_empty())
        .any(|p| trimmed.starts_with(p.as_str()))
    {
        return true;
    }
    if config.enable_full_command_detection
        && config.full_command_list.iter().any(|c| trimmed == c)
    {
        return true;
    }
    if config.enable_command_prefix_match
        && config
            .command_prefix_match_list
            .iter()
            .filter(|p| !p.is_empty())
            .any(|p| trimmed.starts_with(p.as_str()))
    {
        return true;
    }
    false
}

pub fn is_blacklisted_user(sender_id: &str, config: &UserFilterConfig) -> bool {
    config.enable_user_blacklist && config.blacklist_user_ids.iter().any(|id| id == sender_id)
}

pub fn contains_blacklist_keyword(text: &str, config: &KeywordConfig) -> bool {
    config
        .blacklist_keywords
        .iter()
        .filter(|k| !k.is_empty())
        .any(|k| text.contains(k.as_str()))
}

/// The @-others rule: strict mode drops any message mentioning someone
/// else; allow-with-bot lets it through when the bot is mentioned too.
pub fn blocked_by_mention_rules(event: &GroupMessageEvent, config: &MentionConfig) -> bool {
    if !config.enable_ignore_at_others || !event.mentions_others() {
        return false;
    }
    match config.ignore_at_others_mode {
        MentionMode::Strict => true,
        MentionMode::AllowWithBot => !event.mentions_bot(),
    }
}

/// How the message triggers the reply path.
#[derive(Debug, Clone, Default)]
pub struct TriggerClass {
    pub is_at_message: bool,
    pub has_trigger_keyword: bool,
    pub matched_keyword: Option<String>,
    /// Combined disposition: either trigger bypasses the probability gate.
    pub should_treat_as_at: bool,
}

pub fn classify_trigger(
    event: &GroupMessageEvent,
    text: &str,
    config: &KeywordConfig,
) -> TriggerClass {
    let is_at_message = event.mentions_bot();
    let matched_keyword = config
        .trigger_keywords
        .iter()
        .filter(|k| !k.is_empty())
        .find(|k| text.contains(k.as_str()))
        .cloned();
    let has_trigger_keyword = matched_keyword.is_some();
    TriggerClass {
        is_at_message,
        has_trigger_keyword,
        matched_keyword,
        should_treat_as_at: is_at_message || has_trigger_keyword,
    }
}

/// Does the text hit any humanize interest keyword?
pub fn matches_interest(text: &str, keywords: &[String]) -> bool {
    keywords
        .iter()
        .filter(|k| !k.is_empty())
        .any(|k| text.contains(k.as_str()))
}
