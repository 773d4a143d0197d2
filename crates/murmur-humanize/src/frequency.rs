//! Per-chat reply-frequency tuning.
//!
//! Maintains the *base* probability the calculator starts from: right after
//! the bot replies, the chat runs at `after_reply_probability`, decaying
//! linearly back to `initial_probability` over `probability_duration`
//! seconds. Also keeps the bookkeeping humanize mode needs: messages since
//! the last reply, a ring of recent yes/no decisions, and the dynamic
//! message threshold derived from them.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use murmur_core::config::{CoreConfig, HumanizeConfig};
use murmur_core::types::unix_now;
use murmur_core::ChatKey;

/// Decisions remembered per chat for the judge prompt's history block.
const DECISION_RING_CAP: usize = 20;

#[derive(Debug, Default)]
struct ChatRhythm {
    last_reply_time: f64,
    messages_since_reply: u32,
    /// (replied, timestamp), newest at the back.
    recent_decisions: VecDeque<(bool, f64)>,
    /// (entered_at, messages swallowed) while silent mode is engaged.
    silent_since: Option<(f64, u32)>,
}

#[derive(Debug, Default)]
pub struct FrequencyTuner {
    chats: Mutex<HashMap<ChatKey, ChatRhythm>>,
}

impl FrequencyTuner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an inbound user message (counts toward the silent-mode
    /// threshold, and toward its exit when silence is engaged).
    pub fn record_message(&self, chat: &ChatKey) {
        let mut chats = self.chats.lock().unwrap();
        let rhythm = chats.entry(chat.clone()).or_default();
        rhythm.messages_since_reply = rhythm.messages_since_reply.saturating_add(1);
        if let Some((_, messages)) = rhythm.silent_since.as_mut() {
            *messages = messages.saturating_add(1);
        }
    }

    /// Record an outbound bot reply: restarts the after-reply boost window
    /// and ends any silent spell.
    pub fn record_reply(&self, chat: &ChatKey) {
        let mut chats = self.chats.lock().unwrap();
        let rhythm = chats.entry(chat.clone()).or_default();
        rhythm.last_reply_time = unix_now();
        rhythm.messages_since_reply = 0;
        rhythm.silent_since = None;
    }

    /// Record a judge decision for the humanize history block.
    pub fn record_decision(&self, chat: &ChatKey, replied: bool) {
        let mut chats = self.chats.lock().unwrap();
        let rhythm = chats.entry(chat.clone()).or_default();
        rhythm.recent_decisions.push_back((replied, unix_now()));
        while rhythm.recent_decisions.len() > DECISION_RING_CAP {
            rhythm.recent_decisions.pop_front();
        }
    }

    /// The chat's current base probability (before attention et al.).
    pub fn base_probability(&self, chat: &ChatKey, core: &CoreConfig) -> f64 {
        let chats = self.chats.lock().unwrap();
        let Some(rhythm) = chats.get(chat) else {
            return core.initial_probability;
        };
        if rhythm.last_reply_time <= 0.0 || core.probability_duration == 0 {
            return core.initial_probability;
        }
        let elapsed = unix_now() - rhythm.last_reply_time;
        let duration = core.probability_duration as f64;
        if elapsed >= duration {
            return core.initial_probability;
        }
        let progress = (elapsed / duration).clamp(0.0, 1.0);
        core.after_reply_probability
            + (core.initial_probability - core.after_reply_probability) * progress
    }

    /// Messages seen since the bot last replied in this chat.
    pub fn messages_since_reply(&self, chat: &ChatKey) -> u32 {
        let chats = self.chats.lock().unwrap();
        chats.get(chat).map(|r| r.messages_since_reply).unwrap_or(0)
    }

    /// Recent yes/no decisions, oldest first, at most `n`.
    pub fn decision_history(&self, chat: &ChatKey, n: usize) -> Vec<bool> {
        let chats = self.chats.lock().unwrap();
        chats
            .get(chat)
            .map(|r| {
                r.recent_decisions
                    .iter()
                    .rev()
                    .take(n)
                    .rev()
                    .map(|(replied, _)| *replied)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Silent mode: once the room has rolled past the bot for
    /// `humanize_silent_mode_threshold` messages, the bot deliberately
    /// holds back until the spell times out, swallows its message budget,
    /// or a reply (forced or otherwise) breaks it. Engagement and expiry
    /// are both evaluated here, so calls are idempotent within a message.
    pub fn silent_mode_active(&self, chat: &ChatKey, humanize: &HumanizeConfig) -> bool {
        if !humanize.enable_humanize_mode {
            return false;
        }
        let now = unix_now();
        let mut chats = self.chats.lock().unwrap();
        let rhythm = chats.entry(chat.clone()).or_default();
        match rhythm.silent_since {
            Some((entered_at, messages)) => {
                let expired = now - entered_at >= humanize.humanize_silent_max_duration as f64
                    || messages >= humanize.humanize_silent_max_messages;
                if expired {
                    rhythm.silent_since = None;
                    // Start counting afresh so the spell doesn't re-engage
                    // on the very next message.
                    rhythm.messages_since_reply = 0;
                    return false;
                }
                true
            }
            None => {
                // The dynamic threshold stretches the engagement point:
                // a bot that has been declining a lot waits longer before
                // formally going silent (it is effectively silent already).
                let engage_at = if humanize.humanize_enable_dynamic_threshold {
                    humanize
                        .humanize_silent_mode_threshold
                        .max(dynamic_threshold_of(rhythm, humanize))
                } else {
                    humanize.humanize_silent_mode_threshold
                };
                if rhythm.messages_since_reply >= engage_at {
                    rhythm.silent_since = Some((now, 0));
                    return true;
                }
                false
            }
        }
    }

    /// Humanize-mode dynamic threshold: when most recent decisions were
    /// "no", raise the message threshold toward the max so the bot stays
    /// quiet longer; when it has been talkative, fall back to the base.
    pub fn dynamic_message_threshold(&self, chat: &ChatKey, humanize: &HumanizeConfig) -> u32 {
        let chats = self.chats.lock().unwrap();
        chats
            .get(chat)
            .map(|rhythm| dynamic_threshold_of(rhythm, humanize))
            .unwrap_or(humanize.humanize_base_message_threshold)
    }
}

fn dynamic_threshold_of(rhythm: &ChatRhythm, humanize: &HumanizeConfig) -> u32 {
    if !humanize.humanize_enable_dynamic_threshold || rhythm.recent_decisions.is_empty() {
        return humanize.humanize_base_message_threshold;
    }
    let declined = rhythm
        .recent_decisions
        .iter()
        .filter(|(replied, _)| !replied)
        .count() as f64;
    let decline_ratio = declined / rhythm.recent_decisions.len() as f64;
    let base = humanize.humanize_base_message_threshold as f64;
    let max = humanize
        .humanize_max_message_threshold
        .max(humanize.humanize_base_message_threshold) as f64;
    (base + (max - base) * decline_ratio).round() as u32
}
