//! The attention tracker: per-(chat, user) scores with lazy decay, reply
//! bookkeeping, fatigue streaks, spillover activity and poke traces.
//!
//! One async mutex guards all of it. The cooldown membership test happens
//! *before* that lock is taken (never nested with the cooldown manager's
//! lock); a cooldown release racing that read costs at most one cycle of
//! stale suppression.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info};

use murmur_core::config::{
    AttentionConfig, EmotionConfig, FatigueConfig, PokeConfig, SpilloverConfig,
};
use murmur_core::types::unix_now;
use murmur_core::ChatKey;

use crate::cooldown::CooldownManager;
use crate::decay::decay_factor;
use crate::error::Result;
use crate::sentiment::{self, Polarity};
use crate::types::{
    ActivitySnapshot, ChatActivity, FatigueBlock, FatigueLevel, PokeTrace, ProfileSnapshot,
    UserProfile,
};

/// Seconds between throttled disk writes.
const AUTO_SAVE_INTERVAL: f64 = 60.0;
/// Profiles below this attention are eligible for inactivity cleanup.
const CLEANUP_ATTENTION_FLOOR: f64 = 0.05;
/// Seconds without interaction before a near-zero profile is dropped.
const CLEANUP_INACTIVE_SECS: f64 = 1800.0;
/// Message preview length stored on the profile.
const PREVIEW_CHARS: usize = 50;

#[derive(Debug, Default)]
struct AttentionState {
    profiles: HashMap<ChatKey, HashMap<String, UserProfile>>,
    activity: HashMap<ChatKey, ChatActivity>,
    fatigue_blocks: HashMap<(ChatKey, String), FatigueBlock>,
    poke_traces: HashMap<ChatKey, Vec<PokeTrace>>,
    last_save: f64,
}

pub struct AttentionTracker {
    attention: AttentionConfig,
    emotion: EmotionConfig,
    spillover: SpilloverConfig,
    fatigue: FatigueConfig,
    poke: PokeConfig,
    storage_path: Option<PathBuf>,
    cooldowns: Arc<CooldownManager>,
    state: Mutex<AttentionState>,
}

impl AttentionTracker {
    pub fn new(
        attention: AttentionConfig,
        emotion: EmotionConfig,
        spillover: SpilloverConfig,
        fatigue: FatigueConfig,
        poke: PokeConfig,
        data_dir: Option<&Path>,
        cooldowns: Arc<CooldownManager>,
    ) -> Self {
        let storage_path = data_dir.map(|d| d.join("attention_data.json"));
        let profiles = storage_path.as_deref().map(load_profiles).unwrap_or_default();
        Self {
            attention,
            emotion,
            spillover,
            fatigue,
            poke,
            storage_path,
            cooldowns,
            state: Mutex::new(AttentionState {
                profiles,
                ..AttentionState::default()
            }),
        }
    }

    pub fn cooldowns(&self) -> &Arc<CooldownManager> {
        &self.cooldowns
    }

    /// Record that the bot replied to `user_id`.
    ///
    /// Applies the full update sequence: lazy decay, suppressed-or-boosted
    /// attention, sentiment-adjusted emotion, consecutive-reply streak and
    /// fatigue blocks, attention bleed for bystanders, eviction, and the
    /// spillover activity update.
    pub async fn record_replied_user(
        &self,
        chat: &ChatKey,
        user_id: &str,
        user_name: &str,
        message_text: &str,
    ) {
        if !self.attention.enable_attention_mechanism {
            return;
        }
        // Membership read happens outside our own lock; see module docs.
        let in_cooldown = self.cooldowns.is_in_cooldown(chat, user_id).await;
        let now = unix_now();
        let mut evicted: Vec<String> = Vec::new();

        {
            let mut state = self.state.lock().await;
            let block_key = (chat.clone(), user_id.to_string());

            let fatigue_blocked = self.fatigue.enable_conversation_fatigue
                && self.is_fatigue_blocked_locked(&mut state, &block_key, now);

            let chat_users = state.profiles.entry(chat.clone()).or_default();
            let profile = chat_users
                .entry(user_id.to_string())
                .or_insert_with(|| UserProfile::new(user_id, user_name, now));
            self.decay_profile(profile, now);

            let old_attention = profile.attention_score;
            let suppressed = in_cooldown || fatigue_blocked;
            if !suppressed {
                profile.attention_score =
                    (profile.attention_score + self.attention.attention_boost_step).min(1.0);
            } else {
                info!(
                    chat = %chat,
                    user_id,
                    attention = old_attention,
                    reason = if in_cooldown { "cooldown" } else { "fatigue_block" },
                    "attention increase suppressed"
                );
            }

            match sentiment::detect(message_text, &self.emotion) {
                Some(Polarity::Positive) => {
                    let delta = self.attention.emotion_boost_step
                        + self.emotion.attention_positive_emotion_boost;
                    profile.emotion = (profile.emotion + delta).min(1.0);
                }
                Some(Polarity::Negative) => {
                    profile.emotion = (profile.emotion
                        - self.emotion.attention_negative_emotion_decrease)
                        .max(-1.0);
                }
                None => {
                    profile.emotion =
                        (profile.emotion + self.attention.emotion_boost_step).min(1.0);
                }
            }

            profile.last_interaction = now;
            profile.interaction_count += 1;
            profile.user_name = user_name.to_string();
            if !message_text.is_empty() {
                profile.last_message_preview = message_text.chars().take(PREVIEW_CHARS).collect();
            }

            // Consecutive-reply streak for fatigue.
            let mut release_block = false;
            if now - profile.last_reply_time < self.fatigue.fatigue_reset_threshold as f64 {
                profile.consecutive_replies += 1;
            } else {
                profile.consecutive_replies = 1;
                release_block = true;
            }
            profile.last_reply_time = now;
            let consecutive = profile.consecutive_replies;
            let new_attention = profile.attention_score;

            if release_block && self.fatigue.enable_conversation_fatigue {
                if state.fatigue_blocks.remove(&block_key).is_some() {
                    info!(chat = %chat, user_id, "fatigue block released: streak reset");
                }
            }
            if self.fatigue.enable_conversation_fatigue {
                let level = self.classify_fatigue(consecutive);
                if level != FatigueLevel::None && !state.fatigue_blocks.contains_key(&block_key) {
                    info!(chat = %chat, user_id, level = level.as_str(), consecutive, "fatigue block added");
                    state.fatigue_blocks.insert(
                        block_key,
                        FatigueBlock {
                            blocked_at: now,
                            level,
                        },
                    );
                }
            }

            // Bleed attention from every other tracked user in the chat.
            let chat_users = state.profiles.entry(chat.clone()).or_default();
            for (other_id, other) in chat_users.iter_mut() {
                if other_id != user_id {
                    self.decay_profile(other, now);
                    other.attention_score = (other.attention_score
                        - self.attention.attention_decrease_step)
                        .max(0.0);
                }
            }

            // Inactivity cleanup, then cap eviction by lowest attention and
            // oldest interaction.
            evicted.extend(cleanup_inactive(chat_users, now));
            if chat_users.len() > self.attention.attention_max_tracked_users {
                let mut ranked: Vec<(String, f64, f64)> = chat_users
                    .iter()
                    .map(|(id, p)| (id.clone(), p.attention_score, p.last_interaction))
                    .collect();
                ranked.sort_by(|a, b| {
                    a.1.partial_cmp(&b.1)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then(a.2.partial_cmp(&b.2).unwrap_or(std::cmp::Ordering::Equal))
                });
                let excess = chat_users.len() - self.attention.attention_max_tracked_users;
                for (id, _, _) in ranked.into_iter().take(excess) {
                    chat_users.remove(&id);
                    debug!(chat = %chat, user_id = %id, "evicted lowest-priority profile");
                    evicted.push(id);
                }
            }

            info!(
                chat = %chat,
                user_id,
                attention_before = old_attention,
                attention = new_attention,
                consecutive,
                "reply recorded"
            );

            // Spillover: a hot dialog raises the whole room's activity.
            if self.spillover.enable_attention_spillover
                && new_attention >= self.spillover.attention_spillover_min_trigger
            {
                state.activity.insert(
                    chat.clone(),
                    ChatActivity {
                        activity_score: new_attention,
                        last_bot_reply: now,
                        peak_user_id: user_id.to_string(),
                        peak_user_name: user_name.to_string(),
                        peak_attention: new_attention,
                    },
                );
            }

            self.save_locked(&mut state, false);
        }

        // Evicted users lose their cooldown entries too (outside our lock).
        for user in evicted {
            self.cooldowns.on_attention_user_removed(chat, &user).await;
        }
    }

    /// Decayed snapshot of a user's profile, or `None` when the user is
    /// untracked. Also drops profiles stale beyond 3× `attention_duration`.
    ///
    /// The stored values are left untouched — decay is applied to the view
    /// only, so repeated reads never compound it.
    pub async fn profile_snapshot(&self, chat: &ChatKey, user_id: &str) -> Option<ProfileSnapshot> {
        let now = unix_now();
        let cutoff = now - (self.attention.attention_duration as f64) * 3.0;
        let mut state = self.state.lock().await;
        let chat_users = state.profiles.get_mut(chat)?;
        chat_users.retain(|_, p| p.last_interaction >= cutoff);

        let profile = chat_users.get(user_id)?;
        let elapsed = (now - profile.last_interaction).max(0.0);
        Some(ProfileSnapshot {
            attention: profile.attention_score
                * decay_factor(elapsed, self.attention.attention_decay_halflife),
            emotion: profile.emotion * decay_factor(elapsed, self.attention.emotion_decay_halflife),
            consecutive_replies: profile.consecutive_replies,
        })
    }

    /// Decayed spillover activity for the chat, if any.
    pub async fn spillover_snapshot(&self, chat: &ChatKey) -> Option<ActivitySnapshot> {
        if !self.spillover.enable_attention_spillover {
            return None;
        }
        let now = unix_now();
        let state = self.state.lock().await;
        let activity = state.activity.get(chat)?;
        let elapsed = (now - activity.last_bot_reply).max(0.0);
        let decay = decay_factor(elapsed, self.spillover.attention_spillover_decay_halflife);
        Some(ActivitySnapshot {
            base_activity: activity.activity_score,
            decayed_activity: activity.activity_score * decay,
        })
    }

    /// React to a judge-AI "no reply": subtract attention when the user is
    /// above the floor, and push them into cooldown when they were above
    /// the trigger threshold before the decrement.
    pub async fn decrease_attention_on_no_reply(
        &self,
        chat: &ChatKey,
        user_id: &str,
        user_name: &str,
    ) {
        if !self.attention.enable_attention_mechanism {
            return;
        }
        let now = unix_now();
        let mut old_attention: Option<f64> = None;

        {
            let mut state = self.state.lock().await;
            let Some(chat_users) = state.profiles.get_mut(chat) else {
                return;
            };
            let Some(profile) = chat_users.get_mut(user_id) else {
                return;
            };
            self.decay_profile(profile, now);

            let current = profile.attention_score;
            if current < self.attention.attention_decrease_threshold {
                debug!(chat = %chat, user_id, attention = current, "below decrease threshold, skipping");
                return;
            }
            profile.attention_score =
                (current - self.attention.attention_decrease_on_no_reply_step).max(0.0);
            profile.last_interaction = now;
            old_attention = Some(current);

            info!(
                chat = %chat,
                user_id,
                attention_before = current,
                attention = profile.attention_score,
                "attention decreased on no-reply"
            );

            self.save_locked(&mut state, false);
        }

        // Cooldown insertion happens outside our lock.
        if let Some(before) = old_attention {
            if before > self.cooldowns.config().cooldown_trigger_threshold {
                self.cooldowns
                    .add(chat, user_id, user_name, "decision_ai_no_reply")
                    .await;
            }
        }
    }

    /// Current fatigue tier for a user (None when the streak is stale).
    pub async fn fatigue_level(&self, chat: &ChatKey, user_id: &str) -> FatigueLevel {
        if !self.fatigue.enable_conversation_fatigue {
            return FatigueLevel::None;
        }
        let now = unix_now();
        let state = self.state.lock().await;
        let Some(profile) = state.profiles.get(chat).and_then(|m| m.get(user_id)) else {
            return FatigueLevel::None;
        };
        if now - profile.last_reply_time >= self.fatigue.fatigue_reset_threshold as f64 {
            return FatigueLevel::None;
        }
        self.classify_fatigue(profile.consecutive_replies)
    }

    /// Reset a user's consecutive-reply streak and lift any fatigue block.
    pub async fn reset_consecutive_replies(&self, chat: &ChatKey, user_id: &str) {
        let mut state = self.state.lock().await;
        if let Some(profile) = state
            .profiles
            .get_mut(chat)
            .and_then(|m| m.get_mut(user_id))
        {
            profile.consecutive_replies = 0;
        }
        if state
            .fatigue_blocks
            .remove(&(chat.clone(), user_id.to_string()))
            .is_some()
        {
            info!(chat = %chat, user_id, "fatigue block released: explicit reset");
        }
    }

    /// Top-N users by decayed attention, highest first.
    pub async fn top_attention_users(
        &self,
        chat: &ChatKey,
        n: usize,
    ) -> Vec<(String, String, f64)> {
        let now = unix_now();
        let mut state = self.state.lock().await;
        let Some(chat_users) = state.profiles.get_mut(chat) else {
            return Vec::new();
        };
        let mut users: Vec<(String, String, f64)> = chat_users
            .values_mut()
            .map(|p| {
                let elapsed = (now - p.last_interaction).max(0.0);
                let att =
                    p.attention_score * decay_factor(elapsed, self.attention.attention_decay_halflife);
                (p.user_id.clone(), p.user_name.clone(), att)
            })
            .collect();
        users.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));
        users.truncate(n);
        users
    }

    /// Ids of every tracked user in the chat (for cooldown syncing).
    pub async fn attention_user_ids(&self, chat: &ChatKey) -> Vec<String> {
        let state = self.state.lock().await;
        state
            .profiles
            .get(chat)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Record a poke toward the bot, for the poke-trace prompt hint.
    pub async fn record_poke(&self, chat: &ChatKey, user_id: &str, user_name: &str) {
        if !self.poke.enable_poke_trace_prompt {
            return;
        }
        let now = unix_now();
        let ttl = self.poke.poke_trace_ttl_seconds as f64;
        let cap = self.poke.poke_trace_max_tracked_users;
        let mut state = self.state.lock().await;
        let traces = state.poke_traces.entry(chat.clone()).or_default();
        traces.retain(|t| now - t.poked_at < ttl && t.user_id != user_id);
        traces.push(PokeTrace {
            user_id: user_id.to_string(),
            user_name: user_name.to_string(),
            poked_at: now,
        });
        let len = traces.len();
        if len > cap {
            traces.drain(0..len - cap);
        }
    }

    /// One prompt line naming who poked the bot recently, or `None`.
    pub async fn poke_trace_hint(&self, chat: &ChatKey) -> Option<String> {
        if !self.poke.enable_poke_trace_prompt {
            return None;
        }
        let now = unix_now();
        let ttl = self.poke.poke_trace_ttl_seconds as f64;
        let mut state = self.state.lock().await;
        let traces = state.poke_traces.get_mut(chat)?;
        traces.retain(|t| now - t.poked_at < ttl);
        if traces.is_empty() {
            return None;
        }
        let names: Vec<&str> = traces.iter().map(|t| t.user_name.as_str()).collect();
        Some(format!("Recently poked you: {}.", names.join(", ")))
    }

    /// Clear one user's state, or the whole chat when `user_id` is None.
    pub async fn clear(&self, chat: &ChatKey, user_id: Option<&str>) {
        let mut state = self.state.lock().await;
        match user_id {
            Some(id) => {
                if let Some(m) = state.profiles.get_mut(chat) {
                    m.remove(id);
                }
                state.fatigue_blocks.remove(&(chat.clone(), id.to_string()));
                info!(chat = %chat, user_id = id, "attention cleared for user");
            }
            None => {
                state.profiles.remove(chat);
                state.activity.remove(chat);
                state.poke_traces.remove(chat);
                state.fatigue_blocks.retain(|(c, _), _| c != chat);
                info!(chat = %chat, "attention cleared for chat");
            }
        }
        self.save_locked(&mut state, true);
    }

    /// Force a write regardless of the autosave throttle.
    pub async fn flush(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.save_locked(&mut state, true);
        Ok(())
    }

    /// Periodic autosave loop; ticks every [`AUTO_SAVE_INTERVAL`] until the
    /// shutdown channel flips, then flushes one last time.
    pub async fn run_autosave(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(AUTO_SAVE_INTERVAL as u64));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let mut state = self.state.lock().await;
                    self.save_locked(&mut state, true);
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        let mut state = self.state.lock().await;
                        self.save_locked(&mut state, true);
                        info!("attention autosave loop stopped");
                        break;
                    }
                }
            }
        }
    }

    // --- private helpers ---------------------------------------------------

    fn decay_profile(&self, profile: &mut UserProfile, now: f64) {
        let elapsed = (now - profile.last_interaction).max(0.0);
        profile.attention_score *= decay_factor(elapsed, self.attention.attention_decay_halflife);
        profile.emotion *= decay_factor(elapsed, self.attention.emotion_decay_halflife);
    }

    fn classify_fatigue(&self, consecutive: u32) -> FatigueLevel {
        if consecutive >= self.fatigue.fatigue_threshold_heavy {
            FatigueLevel::Heavy
        } else if consecutive >= self.fatigue.fatigue_threshold_medium {
            FatigueLevel::Medium
        } else if consecutive >= self.fatigue.fatigue_threshold_light {
            FatigueLevel::Light
        } else {
            FatigueLevel::None
        }
    }

    /// Fatigue-block check with expiry: blocks older than the reset
    /// threshold fall away on read.
    fn is_fatigue_blocked_locked(
        &self,
        state: &mut AttentionState,
        key: &(ChatKey, String),
        now: f64,
    ) -> bool {
        if let Some(block) = state.fatigue_blocks.get(key) {
            if now - block.blocked_at >= self.fatigue.fatigue_reset_threshold as f64 {
                state.fatigue_blocks.remove(key);
                return false;
            }
            return true;
        }
        false
    }

    fn save_locked(&self, state: &mut AttentionState, force: bool) {
        let Some(path) = &self.storage_path else {
            return;
        };
        let now = unix_now();
        if !force && now - state.last_save < AUTO_SAVE_INTERVAL {
            return;
        }
        let by_key: HashMap<String, &HashMap<String, UserProfile>> = state
            .profiles
            .iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        match serde_json::to_vec_pretty(&by_key) {
            Ok(bytes) => {
                if let Some(parent) = path.parent() {
                    let _ = std::fs::create_dir_all(parent);
                }
                if let Err(e) = std::fs::write(path, bytes) {
                    error!(path = %path.display(), "attention save failed: {e}");
                    return;
                }
                state.last_save = now;
            }
            Err(e) => error!("attention serialize failed: {e}"),
        }
    }
}

/// Drop profiles that are both nearly forgotten and long inactive.
fn cleanup_inactive(chat_users: &mut HashMap<String, UserProfile>, now: f64) -> Vec<String> {
    let stale: Vec<String> = chat_users
        .iter()
        .filter(|(_, p)| {
            now - p.last_interaction > CLEANUP_INACTIVE_SECS
                && p.attention_score < CLEANUP_ATTENTION_FLOOR
        })
        .map(|(id, _)| id.clone())
        .collect();
    for id in &stale {
        chat_users.remove(id);
        debug!(user_id = %id, "dropped inactive profile");
    }
    stale
}

/// Load `attention_data.json`; corrupt entries fall back to fresh state.
fn load_profiles(path: &Path) -> HashMap<ChatKey, HashMap<String, UserProfile>> {
    let Ok(bytes) = std::fs::read(path) else {
        return HashMap::new();
    };
    let parsed: HashMap<String, HashMap<String, UserProfile>> =
        match serde_json::from_slice(&bytes) {
            Ok(p) => p,
            Err(e) => {
                error!(path = %path.display(), "attention data corrupt, starting fresh: {e}");
                return HashMap::new();
            }
        };
    parsed
        .into_iter()
        .filter_map(|(k, v)| k.parse::<ChatKey>().ok().map(|key| (key, v)))
        .collect()
}
