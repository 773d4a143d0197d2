//! Proactive state manager.
//!
//! Owns every `ProactiveChatState`, the temporary probability boosts, and
//! the per-chat processing flags, all behind one async mutex. The
//! scheduler loop and the decision engine both talk to this type; neither
//! touches the state directly.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use rand::Rng;
use tracing::{debug, error, info, warn};

use murmur_core::config::{ProactiveConfig, TimePeriodConfig};
use murmur_core::types::unix_now;
use murmur_core::ChatKey;
use murmur_probability::time_period::{
    minute_of_day, parse_hhmm, parse_periods, quiet_transition_factor, time_factor, TimePeriod,
};

use crate::complaint::{generate_complaint, ComplaintPrompt};
use crate::error::Result;
use crate::score::{adaptive_parameters, apply_score_delta, perturbed_max_failures, AdaptiveParams};
use crate::state::ProactiveChatState;

/// Seconds within which a reply counts as "quick" for the score bonus.
const QUICK_REPLY_WINDOW: f64 = 30.0;
/// User-message timestamps older than this are pruned.
const ACTIVITY_RETENTION: f64 = 24.0 * 3600.0;
/// Seconds between throttled saves.
const AUTO_SAVE_INTERVAL: f64 = 300.0;
/// Score decay applies after this long without any interaction.
const SCORE_DECAY_INTERVAL: f64 = 24.0 * 3600.0;

/// Where a proactive message for a chat must be sent.
#[derive(Debug, Clone)]
pub struct SendContext {
    pub origin: String,
    pub platform_id: String,
}

/// Context handed to the generation delegate.
#[derive(Debug, Clone, Default)]
pub struct RetryContext {
    /// Consecutive attempts already made in this round (0 = first try).
    pub attempts: u32,
    /// What the bot said last time, when retrying.
    pub last_content: Option<String>,
    pub complaint: Option<ComplaintPrompt>,
    pub last_focus_user: Option<(String, String)>,
}

#[derive(Debug, Clone, Copy)]
pub enum TriggerDecision {
    Trigger { roll: f64, probability: f64 },
    Skip(SkipReason),
}

#[derive(Debug, Clone, Copy)]
pub enum SkipReason {
    NotWhitelisted,
    InCooldown { remaining_secs: u64 },
    SilenceTooShort { elapsed: u64, required: u64 },
    InsufficientActivity,
    QuietPeriod,
    ProbabilityFailed { roll: f64, probability: f64 },
}

#[derive(Debug, Clone, Copy)]
struct TempBoost {
    boost_value: f64,
    boost_until: f64,
}

#[derive(Debug, Default)]
struct ManagerState {
    chats: HashMap<ChatKey, ProactiveChatState>,
    boosts: HashMap<ChatKey, TempBoost>,
    last_save: f64,
}

pub struct ProactiveManager {
    config: ProactiveConfig,
    periods_config: TimePeriodConfig,
    periods: Vec<TimePeriod>,
    quiet_start: i64,
    quiet_end: i64,
    storage_path: Option<PathBuf>,
    state: tokio::sync::Mutex<ManagerState>,
    /// Chats with a proactive generation currently in flight.
    processing: std::sync::Mutex<HashSet<ChatKey>>,
}

impl ProactiveManager {
    pub fn new(
        config: ProactiveConfig,
        periods_config: TimePeriodConfig,
        data_dir: Option<&Path>,
    ) -> Self {
        let storage_path = data_dir.map(|d| d.join("proactive_chat_states.json"));
        let chats = storage_path.as_deref().map(load_states).unwrap_or_default();
        let periods = if periods_config.enable_dynamic_probability {
            parse_periods(&periods_config.time_periods)
        } else {
            Vec::new()
        };
        let quiet_start = parse_hhmm(&config.quiet_start).unwrap_or(23 * 60 + 30);
        let quiet_end = parse_hhmm(&config.quiet_end).unwrap_or(7 * 60);
        Self {
            config,
            periods_config,
            periods,
            quiet_start,
            quiet_end,
            storage_path,
            state: tokio::sync::Mutex::new(ManagerState {
                chats,
                ..ManagerState::default()
            }),
            processing: std::sync::Mutex::new(HashSet::new()),
        }
    }

    pub fn config(&self) -> &ProactiveConfig {
        &self.config
    }

    // --- identity & bookkeeping --------------------------------------------

    /// Capture the adapter identity from an organic message. First write
    /// wins for each field; later messages only fill gaps.
    pub async fn note_platform_identity(
        &self,
        chat: &ChatKey,
        platform_id: &str,
        origin: &str,
    ) {
        let mut state = self.state.lock().await;
        let entry = state.chats.entry(chat.clone()).or_default();
        if entry.platform_id.is_none() {
            entry.platform_id = Some(platform_id.to_string());
        }
        if entry.platform_name.is_none() {
            entry.platform_name = Some(chat.platform.clone());
        }
        if entry.origin.is_none() {
            entry.origin = Some(origin.to_string());
        }
    }

    /// Send routing for a chat, available once an organic message was seen.
    pub async fn send_context(&self, chat: &ChatKey) -> Option<SendContext> {
        let state = self.state.lock().await;
        let entry = state.chats.get(chat)?;
        Some(SendContext {
            origin: entry.origin.clone()?,
            platform_id: entry.platform_id.clone()?,
        })
    }

    /// Record an inbound user message: silence/activity bookkeeping, plus
    /// the replied-users set while a proactive outcome is pending.
    pub async fn record_user_message(&self, chat: &ChatKey, user_id: &str) {
        let now = unix_now();
        let mut state = self.state.lock().await;
        let entry = state.chats.entry(chat.clone()).or_default();
        entry.last_user_message_time = now;
        entry.user_message_timestamps.push(now);
        entry
            .user_message_timestamps
            .retain(|ts| now - ts <= ACTIVITY_RETENTION);
        entry.user_message_count = entry.user_message_timestamps.len() as u32;
        if entry.proactive_active {
            entry.replied_user_ids.insert(user_id.to_string());
        }
    }

    /// Record an outbound bot reply. A proactive reply opens the outcome
    /// window and counts an attempt; an organic reply closes any stale
    /// window without judging it.
    pub async fn record_bot_reply(&self, chat: &ChatKey, is_proactive: bool) {
        let now = unix_now();
        let mut state = self.state.lock().await;
        let entry = state.chats.entry(chat.clone()).or_default();
        entry.last_bot_reply_time = now;
        if is_proactive {
            entry.last_proactive_time = now;
            entry.proactive_active = true;
            entry.proactive_outcome_recorded = false;
            entry.proactive_attempts_count += 1;
            entry.replied_user_ids.clear();
            debug!(chat = %chat, attempts = entry.proactive_attempts_count, "proactive sent, awaiting outcome");
        } else if entry.proactive_active {
            // An organic reply while a window is open: close without
            // judging; the engine's reply decision already handled success.
            entry.proactive_active = false;
        }
        entry.user_message_count = 0;
        entry.user_message_timestamps.clear();
    }

    /// Remember what the proactive message said, for retry prompts.
    pub async fn set_last_proactive_content(&self, chat: &ChatKey, content: &str) {
        let mut state = self.state.lock().await;
        let entry = state.chats.entry(chat.clone()).or_default();
        entry.last_proactive_content = Some(content.to_string());
    }

    /// Remember which user the prompt focused on.
    pub async fn set_last_attention_user(&self, chat: &ChatKey, user_id: &str, user_name: &str) {
        let mut state = self.state.lock().await;
        let entry = state.chats.entry(chat.clone()).or_default();
        entry.last_attention_user_id = Some(user_id.to_string());
        entry.last_attention_user_name = Some(user_name.to_string());
    }

    // --- temp probability boost --------------------------------------------

    pub async fn activate_temp_boost(&self, chat: &ChatKey) {
        let mut state = self.state.lock().await;
        state.boosts.insert(
            chat.clone(),
            TempBoost {
                boost_value: self.config.temp_boost_probability,
                boost_until: unix_now() + self.config.temp_boost_duration as f64,
            },
        );
        info!(
            chat = %chat,
            boost = self.config.temp_boost_probability,
            duration_secs = self.config.temp_boost_duration,
            "temp probability boost activated"
        );
    }

    pub async fn deactivate_temp_boost(&self, chat: &ChatKey, reason: &str) {
        let mut state = self.state.lock().await;
        if state.boosts.remove(chat).is_some() {
            info!(chat = %chat, reason, "temp probability boost deactivated");
        }
    }

    /// Current boost value, expiring lazily.
    pub async fn temp_boost(&self, chat: &ChatKey) -> f64 {
        let now = unix_now();
        let mut state = self.state.lock().await;
        match state.boosts.get(chat) {
            Some(boost) if now < boost.boost_until => boost.boost_value,
            Some(_) => {
                state.boosts.remove(chat);
                0.0
            }
            None => 0.0,
        }
    }

    pub async fn boost_active(&self, chat: &ChatKey) -> bool {
        self.temp_boost(chat).await > 0.0
    }

    // --- outcome judgment ---------------------------------------------------

    /// The engine decided to reply to organic traffic in this chat. While
    /// an outcome is pending this is the success signal; after failures it
    /// resets the retry round.
    pub async fn handle_reply_decision(&self, chat: &ChatKey) {
        let now = unix_now();
        let mut state = self.state.lock().await;
        state.boosts.remove(chat);
        let Some(entry) = state.chats.get_mut(chat) else {
            return;
        };

        if entry.proactive_active && !entry.proactive_outcome_recorded {
            let is_quick = now - entry.last_proactive_time <= QUICK_REPLY_WINDOW;
            let is_multi = entry.replied_user_ids.len() >= 2;
            self.mark_success(chat, entry, now, is_quick, is_multi);
        } else if entry.proactive_attempts_count > 0 {
            entry.consecutive_failures = 0;
            let decayed = entry
                .total_proactive_failures
                .saturating_sub(self.config.complaint_decay_on_success);
            if decayed != entry.total_proactive_failures {
                debug!(
                    chat = %chat,
                    before = entry.total_proactive_failures,
                    after = decayed,
                    "complaint accumulation decayed on reply"
                );
            }
            entry.total_proactive_failures = decayed;
            entry.proactive_attempts_count = 0;
            entry.last_proactive_content = None;
            entry.last_proactive_success_time = now;
        }
        self.save_locked(&mut state, false);
    }

    fn mark_success(
        &self,
        chat: &ChatKey,
        entry: &mut ProactiveChatState,
        now: f64,
        is_quick: bool,
        is_multi: bool,
    ) {
        entry.proactive_active = false;
        entry.proactive_outcome_recorded = true;
        entry.consecutive_failures = 0;
        entry.current_effective_max_failures = -1;
        entry.total_proactive_failures = entry
            .total_proactive_failures
            .saturating_sub(self.config.complaint_decay_on_success);
        entry.consecutive_successes += 1;
        entry.successful_interactions += 1;
        entry.last_success_time = now;
        entry.last_proactive_success_time = now;
        entry.proactive_attempts_count = 0;
        entry.last_proactive_content = None;

        if self.config.enable_adaptive_scoring {
            let mut delta = self.config.score_increase_on_success;
            if is_quick {
                delta += self.config.score_quick_reply_bonus;
                entry.quick_reply_count += 1;
            }
            if is_multi {
                delta += self.config.score_multi_user_bonus;
                entry.multi_user_reply_count += 1;
            }
            if entry.consecutive_successes >= 3 {
                delta += self.config.score_streak_bonus;
            }
            if entry.interaction_score < 30 {
                delta += self.config.score_revival_bonus;
            }
            let (new_score, notable) =
                apply_score_delta(entry.interaction_score, delta, &self.config);
            if notable {
                info!(chat = %chat, from = entry.interaction_score, to = new_score, delta, "interaction score raised");
            } else {
                debug!(chat = %chat, from = entry.interaction_score, to = new_score, delta, "interaction score raised");
            }
            entry.interaction_score = new_score;
        }
        info!(chat = %chat, is_quick, is_multi, "proactive success recorded");
    }

    /// The boost window expired with no reply decision: record a failure.
    /// Idempotent per attempt via `proactive_outcome_recorded`.
    pub async fn record_failure(&self, chat: &ChatKey) {
        let mut state = self.state.lock().await;
        let config = &self.config;
        let Some(entry) = state.chats.get_mut(chat) else {
            return;
        };
        if entry.proactive_outcome_recorded {
            debug!(chat = %chat, "outcome already recorded, skipping failure");
            return;
        }
        entry.proactive_active = false;
        entry.proactive_outcome_recorded = true;

        // Whether this failure joins the consecutive chain.
        let p = config.failure_sequence_probability;
        let counted = if p == 0.0 {
            false
        } else if p < 0.0 {
            true
        } else {
            rand::thread_rng().gen::<f64>() < p
        };

        entry.total_proactive_failures =
            (entry.total_proactive_failures + 1).min(config.complaint_max_accumulation);

        // Score side.
        entry.failed_interactions += 1;
        entry.consecutive_successes = 0;
        if config.enable_adaptive_scoring {
            let (new_score, notable) = apply_score_delta(
                entry.interaction_score,
                -config.score_decrease_on_fail,
                config,
            );
            if notable {
                info!(chat = %chat, from = entry.interaction_score, to = new_score, "interaction score lowered");
            }
            entry.interaction_score = new_score;
        }

        entry.user_message_count = 0;
        entry.user_message_timestamps.clear();

        if !counted {
            debug!(chat = %chat, total = entry.total_proactive_failures, "failure accumulated only");
            self.save_locked(&mut state, false);
            return;
        }

        entry.consecutive_failures += 1;
        let adaptive = adaptive_parameters(entry.interaction_score, config);
        let threshold = Self::effective_max_failures_inner(entry, &adaptive, config);
        info!(
            chat = %chat,
            consecutive = entry.consecutive_failures,
            threshold,
            total = entry.total_proactive_failures,
            "proactive failure recorded"
        );
        if entry.consecutive_failures >= threshold {
            let duration = adaptive.cooldown_duration;
            Self::enter_cooldown_inner(chat, entry, duration);
            state.boosts.remove(chat);
        }
        self.save_locked(&mut state, true);
    }

    fn enter_cooldown_inner(chat: &ChatKey, entry: &mut ProactiveChatState, duration: u64) {
        entry.is_in_cooldown = true;
        entry.cooldown_until = unix_now() + duration as f64;
        entry.consecutive_failures = 0;
        entry.current_effective_max_failures = -1;
        entry.proactive_attempts_count = 0;
        entry.last_proactive_content = None;
        // total_proactive_failures, score and success counters survive.
        warn!(chat = %chat, duration_secs = duration, "proactive cooldown entered");
    }

    /// Per-round failure threshold: drawn once when a round starts, held
    /// until cooldown or success resets it.
    fn effective_max_failures_inner(
        entry: &mut ProactiveChatState,
        adaptive: &AdaptiveParams,
        config: &ProactiveConfig,
    ) -> u32 {
        if config.failure_threshold_perturbation <= 0.0 {
            return adaptive.max_failures;
        }
        // consecutive_failures was just incremented; 1 means a new round.
        if entry.consecutive_failures <= 1 || entry.current_effective_max_failures < 0 {
            let drawn = perturbed_max_failures(
                adaptive.max_failures,
                config.failure_threshold_perturbation,
                &mut rand::thread_rng(),
            );
            entry.current_effective_max_failures = drawn as i32;
        }
        // Re-clamp to the current base every call: the adaptive bucket can
        // tighten mid-round as the score sinks, and the stale draw must not
        // outlive it.
        entry
            .current_effective_max_failures
            .min(adaptive.max_failures as i32)
            .max(1) as u32
    }

    /// Cooldown check with lazy expiry.
    pub async fn is_in_cooldown(&self, chat: &ChatKey) -> bool {
        let now = unix_now();
        let mut state = self.state.lock().await;
        let Some(entry) = state.chats.get_mut(chat) else {
            return false;
        };
        if !entry.is_in_cooldown {
            return false;
        }
        if now >= entry.cooldown_until {
            entry.is_in_cooldown = false;
            entry.cooldown_until = 0.0;
            info!(chat = %chat, "proactive cooldown ended");
            return false;
        }
        true
    }

    // --- trigger evaluation -------------------------------------------------

    /// Full precondition pass for one chat, ending in the uniform draw.
    pub async fn should_trigger(&self, chat: &ChatKey) -> TriggerDecision {
        if !self.group_enabled(chat) {
            return TriggerDecision::Skip(SkipReason::NotWhitelisted);
        }
        if self.is_in_cooldown(chat).await {
            let state = self.state.lock().await;
            let remaining = state
                .chats
                .get(chat)
                .map(|e| (e.cooldown_until - unix_now()).max(0.0) as u64)
                .unwrap_or(0);
            return TriggerDecision::Skip(SkipReason::InCooldown {
                remaining_secs: remaining,
            });
        }

        let now = unix_now();
        let (adaptive, silence_elapsed, activity_ok) = {
            let mut state = self.state.lock().await;
            let entry = state.chats.entry(chat.clone()).or_default();
            let adaptive = adaptive_parameters(entry.interaction_score, &self.config);
            let elapsed = (now - entry.last_bot_reply_time).max(0.0) as u64;
            let activity_ok = self.user_activity_ok(entry, now);
            (adaptive, elapsed, activity_ok)
        };

        if silence_elapsed < adaptive.silence_threshold {
            return TriggerDecision::Skip(SkipReason::SilenceTooShort {
                elapsed: silence_elapsed,
                required: adaptive.silence_threshold,
            });
        }
        if self.config.require_user_activity && !activity_ok {
            return TriggerDecision::Skip(SkipReason::InsufficientActivity);
        }

        let time_adjusted = self.effective_probability_now(self.config.probability);
        if time_adjusted <= 0.0 {
            return TriggerDecision::Skip(SkipReason::QuietPeriod);
        }
        let probability = (time_adjusted * adaptive.prob_multiplier).clamp(0.0, 0.9);

        let roll = rand::thread_rng().gen::<f64>();
        if roll >= probability {
            TriggerDecision::Skip(SkipReason::ProbabilityFailed { roll, probability })
        } else {
            TriggerDecision::Trigger { roll, probability }
        }
    }

    /// A failed probability draw restarts the silence timer so the next
    /// pass has to wait out a full window again.
    pub async fn reset_silence_timer(&self, chat: &ChatKey) {
        let mut state = self.state.lock().await;
        if let Some(entry) = state.chats.get_mut(chat) {
            entry.last_bot_reply_time = unix_now();
        }
    }

    fn user_activity_ok(&self, entry: &ProactiveChatState, now: f64) -> bool {
        if entry.user_message_count == 0 {
            return false;
        }
        if entry.user_message_count < self.config.min_user_messages {
            return false;
        }
        let window = self.config.user_activity_window as f64;
        let recent = entry
            .user_message_timestamps
            .iter()
            .filter(|ts| now - **ts <= window)
            .count();
        recent >= self.config.min_user_messages as usize
    }

    /// Quiet hours (highest priority) then dynamic periods applied to the
    /// base probability.
    pub fn effective_probability_now(&self, base: f64) -> f64 {
        let minute = minute_of_day(&chrono::Local::now().time());
        self.effective_probability_at(base, minute)
    }

    /// Minute-of-day variant, separated for tests.
    pub fn effective_probability_at(&self, base: f64, minute: i64) -> f64 {
        let mut probability = base;
        if self.config.enable_quiet_time {
            let gate = quiet_transition_factor(
                minute,
                self.quiet_start,
                self.quiet_end,
                self.config.quiet_transition_minutes,
            );
            if gate < 1e-9 {
                return 0.0;
            }
            probability *= gate;
        }
        if self.periods_config.enable_dynamic_probability && !self.periods.is_empty() {
            probability *= time_factor(
                minute,
                &self.periods,
                self.periods_config.transition_minutes,
                self.periods_config.min_factor,
                self.periods_config.max_factor,
                self.periods_config.use_smooth_curve,
            );
        }
        probability.clamp(0.0, 1.0)
    }

    pub(crate) fn group_enabled(&self, chat: &ChatKey) -> bool {
        if self.config.enabled_groups.is_empty() {
            return true;
        }
        self.config
            .enabled_groups
            .iter()
            .any(|g| g == &chat.chat_id)
    }

    /// Retry context for the generation delegate, complaint roll included.
    pub async fn retry_context(&self, chat: &ChatKey) -> RetryContext {
        let state = self.state.lock().await;
        let Some(entry) = state.chats.get(chat) else {
            return RetryContext::default();
        };
        let complaint = generate_complaint(
            entry.total_proactive_failures,
            &self.config,
            &mut rand::thread_rng(),
        );
        let last_focus_user = entry
            .last_attention_user_id
            .as_ref()
            .zip(entry.last_attention_user_name.as_ref())
            .map(|(id, name)| (id.clone(), name.clone()));
        RetryContext {
            attempts: entry.proactive_attempts_count,
            last_content: entry.last_proactive_content.clone(),
            complaint,
            last_focus_user,
        }
    }

    // --- scheduler support ---------------------------------------------------

    pub async fn known_chats(&self) -> Vec<ChatKey> {
        let state = self.state.lock().await;
        state.chats.keys().cloned().collect()
    }

    /// (attempts, last_proactive_time, outcome_recorded) for the retry loop.
    pub async fn retry_probe(&self, chat: &ChatKey) -> (u32, f64, bool) {
        let state = self.state.lock().await;
        state
            .chats
            .get(chat)
            .map(|e| {
                (
                    e.proactive_attempts_count,
                    e.last_proactive_time,
                    e.proactive_outcome_recorded,
                )
            })
            .unwrap_or((0, 0.0, false))
    }

    pub async fn state_view(&self, chat: &ChatKey) -> Option<ProactiveChatState> {
        let state = self.state.lock().await;
        state.chats.get(chat).cloned()
    }

    /// Mark a proactive generation in flight (consulted by the post-send
    /// hook and the decision engine's concurrency gate).
    pub fn begin_processing(&self, chat: &ChatKey) -> bool {
        self.processing.lock().unwrap().insert(chat.clone())
    }

    pub fn end_processing(&self, chat: &ChatKey) {
        self.processing.lock().unwrap().remove(chat);
    }

    pub fn is_processing(&self, chat: &ChatKey) -> bool {
        self.processing.lock().unwrap().contains(chat)
    }

    // --- periodic maintenance ------------------------------------------------

    /// 24h-no-interaction score decay.
    pub async fn apply_score_decay(&self) {
        if !self.config.enable_adaptive_scoring {
            return;
        }
        let now = unix_now();
        let mut state = self.state.lock().await;
        let mut decayed = 0usize;
        for entry in state.chats.values_mut() {
            if now - entry.last_score_decay_time < SCORE_DECAY_INTERVAL {
                continue;
            }
            let last_activity = entry.last_success_time.max(entry.last_user_message_time);
            if now - last_activity >= SCORE_DECAY_INTERVAL {
                let (new_score, _) = apply_score_delta(
                    entry.interaction_score,
                    -self.config.interaction_score_decay_rate,
                    &self.config,
                );
                entry.interaction_score = new_score;
                decayed += 1;
            }
            entry.last_score_decay_time = now;
        }
        if decayed > 0 {
            info!(chats = decayed, "24h-idle interaction score decay applied");
        }
    }

    /// Time decay for the complaint accumulator.
    pub async fn apply_complaint_decay(&self) {
        if !self.config.enable_complaint_system {
            return;
        }
        let now = unix_now();
        let mut state = self.state.lock().await;
        for entry in state.chats.values_mut() {
            if now - entry.last_complaint_decay_time
                < self.config.complaint_decay_check_interval as f64
            {
                continue;
            }
            if entry.total_proactive_failures > 0 {
                let last_activity = entry
                    .last_proactive_time
                    .max(entry.last_proactive_success_time);
                if now - last_activity >= self.config.complaint_decay_no_failure_threshold as f64 {
                    entry.total_proactive_failures = entry
                        .total_proactive_failures
                        .saturating_sub(self.config.complaint_decay_amount);
                }
            }
            entry.last_complaint_decay_time = now;
        }
    }

    /// Force a write regardless of the save throttle.
    pub async fn flush(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.save_locked(&mut state, true);
        Ok(())
    }

    fn save_locked(&self, state: &mut ManagerState, force: bool) {
        let Some(path) = &self.storage_path else {
            return;
        };
        let now = unix_now();
        if !force && now - state.last_save < AUTO_SAVE_INTERVAL {
            return;
        }
        let by_key: HashMap<String, &ProactiveChatState> = state
            .chats
            .iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        match serde_json::to_vec_pretty(&by_key) {
            Ok(bytes) => {
                if let Some(parent) = path.parent() {
                    let _ = std::fs::create_dir_all(parent);
                }
                if let Err(e) = std::fs::write(path, bytes) {
                    error!(path = %path.display(), "proactive save failed: {e}");
                    return;
                }
                state.last_save = now;
            }
            Err(e) => error!("proactive serialize failed: {e}"),
        }
    }
}

/// Load persisted states, resetting in-flight flags.
fn load_states(path: &Path) -> HashMap<ChatKey, ProactiveChatState> {
    let Ok(bytes) = std::fs::read(path) else {
        return HashMap::new();
    };
    let parsed: HashMap<String, ProactiveChatState> = match serde_json::from_slice(&bytes) {
        Ok(p) => p,
        Err(e) => {
            error!(path = %path.display(), "proactive data corrupt, starting fresh: {e}");
            return HashMap::new();
        }
    };
    parsed
        .into_iter()
        .filter_map(|(k, mut v)| {
            v.reset_transient_on_load();
            k.parse::<ChatKey>().ok().map(|key| (key, v))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager_with(config: ProactiveConfig) -> ProactiveManager {
        ProactiveManager::new(config, TimePeriodConfig::default(), None)
    }

    fn base_config() -> ProactiveConfig {
        ProactiveConfig {
            enable_proactive_chat: true,
            enable_quiet_time: false,
            failure_sequence_probability: -1.0,
            failure_threshold_perturbation: 0.0,
            max_consecutive_failures: 3,
            enable_adaptive_scoring: true,
            ..ProactiveConfig::default()
        }
    }

    fn chat() -> ChatKey {
        ChatKey::group("qq", "879646332")
    }

    async fn open_window(m: &ProactiveManager) {
        m.record_bot_reply(&chat(), true).await;
        m.activate_temp_boost(&chat()).await;
    }

    #[tokio::test]
    async fn success_awards_bonuses_and_resets_failures() {
        let m = manager_with(base_config());
        // Pre-existing failures to observe the decay.
        m.record_bot_reply(&chat(), true).await;
        m.record_failure(&chat()).await;

        open_window(&m).await;
        m.record_user_message(&chat(), "u1").await;
        m.record_user_message(&chat(), "u2").await;
        m.handle_reply_decision(&chat()).await;

        let state = m.state_view(&chat()).await.unwrap();
        assert!(!state.proactive_active);
        assert!(state.proactive_outcome_recorded);
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(state.proactive_attempts_count, 0);
        assert_eq!(state.consecutive_successes, 1);
        // 50 − 10 (fail) = 40, then +15 base +5 quick +10 multi = 70.
        assert_eq!(state.interaction_score, 70);
    }

    #[tokio::test]
    async fn outcome_is_recorded_only_once() {
        let m = manager_with(base_config());
        open_window(&m).await;
        m.record_failure(&chat()).await;
        let after_first = m.state_view(&chat()).await.unwrap();
        m.record_failure(&chat()).await;
        let after_second = m.state_view(&chat()).await.unwrap();
        assert_eq!(
            after_first.total_proactive_failures,
            after_second.total_proactive_failures
        );
        assert_eq!(
            after_first.failed_interactions,
            after_second.failed_interactions
        );
    }

    #[tokio::test]
    async fn three_failures_enter_cooldown_and_preserve_totals() {
        let m = manager_with(base_config());
        for _ in 0..3 {
            open_window(&m).await;
            m.record_failure(&chat()).await;
        }
        assert!(m.is_in_cooldown(&chat()).await);
        let state = m.state_view(&chat()).await.unwrap();
        assert_eq!(state.total_proactive_failures, 3);
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(state.proactive_attempts_count, 0);
        assert!(state.last_proactive_content.is_none());
        assert_eq!(m.temp_boost(&chat()).await, 0.0);
    }

    #[tokio::test]
    async fn failure_sequence_probability_zero_never_chains() {
        let mut config = base_config();
        config.failure_sequence_probability = 0.0;
        let m = manager_with(config);
        for _ in 0..5 {
            open_window(&m).await;
            m.record_failure(&chat()).await;
        }
        assert!(!m.is_in_cooldown(&chat()).await);
        let state = m.state_view(&chat()).await.unwrap();
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(state.total_proactive_failures, 5);
    }

    #[tokio::test]
    async fn total_failures_cap_at_complaint_max() {
        let mut config = base_config();
        config.complaint_max_accumulation = 4;
        let m = manager_with(config);
        for _ in 0..8 {
            open_window(&m).await;
            m.record_failure(&chat()).await;
        }
        let state = m.state_view(&chat()).await.unwrap();
        assert!(state.total_proactive_failures <= 4);
    }

    #[tokio::test]
    async fn temp_boost_expires() {
        let mut config = base_config();
        config.temp_boost_duration = 0;
        let m = manager_with(config);
        m.activate_temp_boost(&chat()).await;
        assert_eq!(m.temp_boost(&chat()).await, 0.0);
    }

    #[tokio::test]
    async fn temp_boost_reports_value_while_active() {
        let m = manager_with(base_config());
        m.activate_temp_boost(&chat()).await;
        assert!((m.temp_boost(&chat()).await - 0.35).abs() < 1e-9);
        m.deactivate_temp_boost(&chat(), "test").await;
        assert_eq!(m.temp_boost(&chat()).await, 0.0);
    }

    #[tokio::test]
    async fn should_trigger_respects_whitelist() {
        let mut config = base_config();
        config.enabled_groups = vec!["someone-else".to_string()];
        let m = manager_with(config);
        m.record_user_message(&chat(), "u1").await;
        match m.should_trigger(&chat()).await {
            TriggerDecision::Skip(SkipReason::NotWhitelisted) => {}
            other => panic!("expected whitelist skip, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn should_trigger_requires_silence() {
        let m = manager_with(base_config());
        m.record_user_message(&chat(), "u1").await;
        m.record_bot_reply(&chat(), false).await;
        match m.should_trigger(&chat()).await {
            TriggerDecision::Skip(SkipReason::SilenceTooShort { .. }) => {}
            other => panic!("expected silence skip, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn should_trigger_requires_activity() {
        let mut config = base_config();
        config.silence_threshold = 0;
        config.min_user_messages = 3;
        let m = manager_with(config);
        m.record_user_message(&chat(), "u1").await;
        match m.should_trigger(&chat()).await {
            TriggerDecision::Skip(SkipReason::InsufficientActivity) => {}
            other => panic!("expected activity skip, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn quiet_hours_zero_out_probability() {
        let mut config = base_config();
        config.enable_quiet_time = true;
        config.quiet_start = "23:00".to_string();
        config.quiet_end = "07:00".to_string();
        let m = manager_with(config);
        assert_eq!(m.effective_probability_at(0.5, 23 * 60 + 30), 0.0);
        assert_eq!(m.effective_probability_at(0.5, 12 * 60), 0.5);
    }

    #[tokio::test]
    async fn dynamic_periods_scale_probability() {
        let mut config = base_config();
        config.enable_quiet_time = false;
        let periods = TimePeriodConfig {
            enable_dynamic_probability: true,
            time_periods: r#"[{"name":"evening","start":"19:00","end":"22:00","factor":1.5}]"#
                .to_string(),
            ..TimePeriodConfig::default()
        };
        let m = ProactiveManager::new(config, periods, None);
        let p = m.effective_probability_at(0.4, 20 * 60);
        assert!((p - 0.6).abs() < 1e-9, "got {p}");
    }

    #[tokio::test]
    async fn platform_identity_first_write_wins() {
        let m = manager_with(base_config());
        m.note_platform_identity(&chat(), "adapter-1", "origin-1").await;
        m.note_platform_identity(&chat(), "adapter-2", "origin-2").await;
        let ctx = m.send_context(&chat()).await.unwrap();
        assert_eq!(ctx.platform_id, "adapter-1");
        assert_eq!(ctx.origin, "origin-1");
    }

    #[tokio::test]
    async fn persistence_resets_flight_flags() {
        let dir = tempfile::tempdir().unwrap();
        {
            let m = ProactiveManager::new(
                base_config(),
                TimePeriodConfig::default(),
                Some(dir.path()),
            );
            open_window(&m).await;
            m.flush().await.unwrap();
        }
        let m = ProactiveManager::new(
            base_config(),
            TimePeriodConfig::default(),
            Some(dir.path()),
        );
        let state = m.state_view(&chat()).await.unwrap();
        assert!(!state.proactive_active);
        assert_eq!(state.proactive_attempts_count, 0);
    }

    #[tokio::test]
    async fn processing_flag_round_trip() {
        let m = manager_with(base_config());
        assert!(!m.is_processing(&chat()));
        assert!(m.begin_processing(&chat()));
        assert!(m.is_processing(&chat()));
        m.end_processing(&chat());
        assert!(!m.is_processing(&chat()));
    }
}
