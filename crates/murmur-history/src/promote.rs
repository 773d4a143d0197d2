//! Promotion of cached messages into the host's official conversation.
//!
//! Runs as part of every successful reply transaction: the eligible cached
//! user messages, the current user message, and (unless duplicate-blocked)
//! the bot reply are appended to the conversation in timestamp order,
//! deduplicated by content hash, and the history is truncated to the
//! newest 150 rows before the single `update_conversation` write.

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use murmur_core::config::OFFICIAL_HISTORY_CAP;
use murmur_core::host::{multimodal, Content, ConversationStore, ConversationTurn, Role};

use crate::cache::CachedMessage;
use crate::clean;
use crate::error::Result;

#[derive(Debug, Clone, Copy, Default)]
pub struct PromotionReport {
    pub promoted_cached: usize,
    pub skipped_duplicates: usize,
    pub appended_user: bool,
    pub appended_bot: bool,
    pub total_rows: usize,
}

/// Append the promotion batch to the official conversation.
///
/// `user_message = None` covers the pure-proactive path (the synthetic
/// prompt entry travels in `cached`); `bot_message = None` covers the
/// duplicate-block path where the user message must still be saved.
pub async fn promote_to_official(
    conversations: &dyn ConversationStore,
    origin: &str,
    platform_id: &str,
    title: &str,
    cached: &[CachedMessage],
    user_message: Option<&str>,
    bot_message: Option<&str>,
) -> Result<PromotionReport> {
    let conversation_id = match conversations.current_conversation_id(origin).await? {
        Some(id) => id,
        None => {
            let id = conversations
                .new_conversation(origin, platform_id, title)
                .await?;
            debug!(origin, conversation_id = %id, "created official conversation");
            id
        }
    };

    let mut history = conversations
        .conversation_history(origin, &conversation_id)
        .await?;

    let mut seen: std::collections::HashSet<String> =
        history.iter().map(|t| content_hash(&t.content)).collect();

    let mut report = PromotionReport::default();

    // Cached batch, re-sorted so promotion order is timestamp order even if
    // the caller collected entries out of order.
    let mut batch: Vec<&CachedMessage> = cached.iter().collect();
    batch.sort_by(|a, b| {
        a.message_timestamp
            .partial_cmp(&b.message_timestamp)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    for message in batch {
        let text = clean::clean_preserve_proactive(&message.content);
        if text.is_empty() && message.image_urls().is_empty() {
            continue;
        }
        let content = multimodal(&text, message.image_urls());
        let hash = content_hash(&content);
        if seen.contains(&hash) {
            report.skipped_duplicates += 1;
            continue;
        }
        seen.insert(hash);
        history.push(ConversationTurn {
            role: Role::User,
            content,
        });
        report.promoted_cached += 1;
    }

    if let Some(user) = user_message {
        let text = clean::clean_preserve_proactive(user);
        if !text.is_empty() {
            seen.insert(content_hash(&Content::Text(text.clone())));
            history.push(ConversationTurn::user(text));
            report.appended_user = true;
        }
    }

    if let Some(bot) = bot_message {
        let text = clean::clean_message(bot);
        if !text.is_empty() {
            history.push(ConversationTurn::assistant(text));
            report.appended_bot = true;
        }
    }

    if history.len() > OFFICIAL_HISTORY_CAP {
        let excess = history.len() - OFFICIAL_HISTORY_CAP;
        history.drain(0..excess);
        debug!(excess, "official history truncated");
    }
    report.total_rows = history.len();

    conversations
        .update_conversation(origin, &conversation_id, history)
        .await?;

    info!(
        origin,
        promoted = report.promoted_cached,
        skipped = report.skipped_duplicates,
        user = report.appended_user,
        bot = report.appended_bot,
        total = report.total_rows,
        "promotion committed"
    );
    Ok(report)
}

/// Stable content hash used as the dedup key; multimodal lists hash their
/// canonical JSON serialization.
fn content_hash(content: &Content) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.dedup_key().as_bytes());
    hex::encode(hasher.finalize())
}
