//! Per-chat proactive state.
//!
//! Persisted to `proactive_chat_states.json`. On load, the attempt-flight
//! flags (`proactive_active`, `proactive_outcome_recorded`, cooldown, and
//! the attempt counter) reset so a restart can never produce a stale
//! outcome judgment; scores and failure accumulators survive.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use murmur_core::types::unix_now;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProactiveChatState {
    /// Adapter instance id, captured from the first organic message; sends
    /// must use this, never the platform name.
    #[serde(default)]
    pub platform_id: Option<String>,
    /// Platform (adapter type) name — the ChatKey's platform segment.
    #[serde(default)]
    pub platform_name: Option<String>,
    /// The host's unified session origin for outbound sends.
    #[serde(default)]
    pub origin: Option<String>,

    #[serde(default)]
    pub last_bot_reply_time: f64,
    #[serde(default)]
    pub last_user_message_time: f64,

    /// Failures in the current retry round; drives cooldown entry.
    #[serde(default)]
    pub consecutive_failures: u32,
    /// Accumulated failures for the complaint ladder. Survives cooldowns;
    /// decays on success and over time.
    #[serde(default)]
    pub total_proactive_failures: u32,

    #[serde(default)]
    pub is_in_cooldown: bool,
    #[serde(default)]
    pub cooldown_until: f64,

    /// User messages since the bot's last reply.
    #[serde(default)]
    pub user_message_count: u32,
    #[serde(default)]
    pub last_proactive_time: f64,
    /// Timestamps backing the activity-window check.
    #[serde(default)]
    pub user_message_timestamps: Vec<f64>,

    /// Consecutive proactive attempts since the last reset.
    #[serde(default)]
    pub proactive_attempts_count: u32,
    /// What the bot said last time, for the retry prompt.
    #[serde(default)]
    pub last_proactive_content: Option<String>,

    /// True from send until the outcome is judged.
    #[serde(default)]
    pub proactive_active: bool,
    /// Guards against double-counting an outcome.
    #[serde(default)]
    pub proactive_outcome_recorded: bool,

    /// Adaptive score, initially 50.
    #[serde(default = "default_score")]
    pub interaction_score: i32,
    #[serde(default)]
    pub successful_interactions: u32,
    #[serde(default)]
    pub failed_interactions: u32,
    #[serde(default)]
    pub last_success_time: f64,
    #[serde(default)]
    pub consecutive_successes: u32,
    #[serde(default)]
    pub last_score_decay_time: f64,
    #[serde(default)]
    pub quick_reply_count: u32,
    #[serde(default)]
    pub multi_user_reply_count: u32,

    #[serde(default)]
    pub last_attention_user_id: Option<String>,
    #[serde(default)]
    pub last_attention_user_name: Option<String>,

    #[serde(default)]
    pub last_proactive_success_time: f64,
    #[serde(default)]
    pub last_complaint_decay_time: f64,

    /// Beta-perturbed failure threshold for the current retry round;
    /// -1 = not yet drawn.
    #[serde(default = "default_effective_max")]
    pub current_effective_max_failures: i32,

    /// Users who spoke during the current boost window. Transient.
    #[serde(skip)]
    pub replied_user_ids: HashSet<String>,
}

fn default_score() -> i32 {
    50
}

fn default_effective_max() -> i32 {
    -1
}

impl Default for ProactiveChatState {
    fn default() -> Self {
        Self {
            platform_id: None,
            platform_name: None,
            origin: None,
            last_bot_reply_time: 0.0,
            last_user_message_time: 0.0,
            consecutive_failures: 0,
            total_proactive_failures: 0,
            is_in_cooldown: false,
            cooldown_until: 0.0,
            user_message_count: 0,
            last_proactive_time: 0.0,
            user_message_timestamps: Vec::new(),
            proactive_attempts_count: 0,
            last_proactive_content: None,
            proactive_active: false,
            proactive_outcome_recorded: false,
            interaction_score: default_score(),
            successful_interactions: 0,
            failed_interactions: 0,
            last_success_time: 0.0,
            consecutive_successes: 0,
            last_score_decay_time: unix_now(),
            quick_reply_count: 0,
            multi_user_reply_count: 0,
            last_attention_user_id: None,
            last_attention_user_name: None,
            last_proactive_success_time: 0.0,
            last_complaint_decay_time: unix_now(),
            current_effective_max_failures: default_effective_max(),
            replied_user_ids: HashSet::new(),
        }
    }
}

impl ProactiveChatState {
    /// Clear the in-flight attempt flags after a restart. A boost window
    /// that was open when the process died must not judge stale traffic.
    pub fn reset_transient_on_load(&mut self) {
        self.proactive_active = false;
        self.proactive_outcome_recorded = false;
        self.is_in_cooldown = false;
        self.cooldown_until = 0.0;
        self.proactive_attempts_count = 0;
        self.replied_user_ids.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_score_is_fifty() {
        assert_eq!(ProactiveChatState::default().interaction_score, 50);
    }

    #[test]
    fn transient_reset_clears_flight_flags_only() {
        let mut state = ProactiveChatState {
            proactive_active: true,
            proactive_outcome_recorded: true,
            is_in_cooldown: true,
            cooldown_until: 99.0,
            proactive_attempts_count: 4,
            total_proactive_failures: 7,
            interaction_score: 23,
            ..ProactiveChatState::default()
        };
        state.reset_transient_on_load();
        assert!(!state.proactive_active);
        assert!(!state.proactive_outcome_recorded);
        assert!(!state.is_in_cooldown);
        assert_eq!(state.proactive_attempts_count, 0);
        // Accumulators survive restarts.
        assert_eq!(state.total_proactive_failures, 7);
        assert_eq!(state.interaction_score, 23);
    }

    #[test]
    fn serde_defaults_tolerate_old_files() {
        // A pre-upgrade file with only a couple of fields still loads.
        let state: ProactiveChatState =
            serde_json::from_str(r#"{"last_bot_reply_time": 5.0}"#).unwrap();
        assert_eq!(state.interaction_score, 50);
        assert_eq!(state.current_effective_max_failures, -1);
    }
}
