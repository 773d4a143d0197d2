use serde::{Deserialize, Serialize};

/// Per-(chat, user) attention record.
///
/// `attention_score` and `emotion` are stored raw: they are only correct in
/// combination with `last_interaction` and the configured half-lives, and
/// every read/write first applies the lazy decay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub user_name: String,
    /// [0, 1].
    pub attention_score: f64,
    /// [-1, 1]; 0 is neutral.
    pub emotion: f64,
    /// Unix seconds of the last relevant event.
    pub last_interaction: f64,
    pub interaction_count: u64,
    #[serde(default)]
    pub last_message_preview: String,
    /// Bot replies to this user without a gap ≥ fatigue_reset_threshold.
    #[serde(default)]
    pub consecutive_replies: u32,
    /// Unix seconds of the bot's last reply to this user.
    #[serde(default)]
    pub last_reply_time: f64,
}

impl UserProfile {
    pub fn new(user_id: &str, user_name: &str, now: f64) -> Self {
        Self {
            user_id: user_id.to_string(),
            user_name: user_name.to_string(),
            attention_score: 0.0,
            emotion: 0.0,
            last_interaction: now,
            interaction_count: 0,
            last_message_preview: String::new(),
            consecutive_replies: 0,
            last_reply_time: 0.0,
        }
    }
}

/// Per-chat dialog activity, feeding the spillover mechanism.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatActivity {
    pub activity_score: f64,
    /// Unix seconds of the reply that set the score.
    pub last_bot_reply: f64,
    pub peak_user_id: String,
    pub peak_user_name: String,
    pub peak_attention: f64,
}

/// Read-only view of a profile after lazy decay, handed to the probability
/// calculator.
#[derive(Debug, Clone, Copy)]
pub struct ProfileSnapshot {
    pub attention: f64,
    pub emotion: f64,
    pub consecutive_replies: u32,
}

/// Decayed spillover activity for a chat.
#[derive(Debug, Clone, Copy)]
pub struct ActivitySnapshot {
    /// The stored (undecayed) activity score.
    pub base_activity: f64,
    /// Activity after spillover half-life decay.
    pub decayed_activity: f64,
}

/// Fatigue tier derived from `consecutive_replies`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FatigueLevel {
    #[default]
    None,
    Light,
    Medium,
    Heavy,
}

impl FatigueLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            FatigueLevel::None => "none",
            FatigueLevel::Light => "light",
            FatigueLevel::Medium => "medium",
            FatigueLevel::Heavy => "heavy",
        }
    }
}

/// Transient attention-growth block after a fatigue threshold is crossed.
/// In-memory only; never persisted.
#[derive(Debug, Clone)]
pub struct FatigueBlock {
    pub blocked_at: f64,
    pub level: FatigueLevel,
}

/// One entry of the attention cooldown list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CooldownEntry {
    /// Unix seconds the cooldown started.
    pub start_time: f64,
    pub reason: String,
    pub user_name: String,
}

/// A recently observed poke, kept for the poke-trace prompt hint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PokeTrace {
    pub user_id: String,
    pub user_name: String,
    pub poked_at: f64,
}
