//! Attention cooldown list.
//!
//! When the judge AI declines to reply to a user whose attention is still
//! high, the user lands here and `record_replied_user` stops raising their
//! attention. Entries release on timeout, on a triggered reply to the
//! user, or when the user's attention profile is evicted.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::{debug, error, info};

use murmur_core::config::CooldownConfig;
use murmur_core::types::unix_now;
use murmur_core::ChatKey;

use crate::error::Result;
use crate::types::CooldownEntry;

/// Seconds between throttled disk writes.
const AUTO_SAVE_INTERVAL: f64 = 60.0;

/// What kind of reply released a cooldown entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseTrigger {
    At,
    Keyword,
    Normal,
}

impl ReleaseTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseTrigger::At => "at",
            ReleaseTrigger::Keyword => "keyword",
            ReleaseTrigger::Normal => "normal",
        }
    }
}

#[derive(Debug, Default)]
struct CooldownState {
    map: HashMap<ChatKey, HashMap<String, CooldownEntry>>,
    last_save: f64,
}

pub struct CooldownManager {
    config: CooldownConfig,
    storage_path: Option<PathBuf>,
    state: Mutex<CooldownState>,
}

impl CooldownManager {
    /// Create the manager, loading any existing `cooldown_data.json` under
    /// `data_dir`. Pass `None` to run memory-only (tests, ephemeral hosts).
    pub fn new(config: CooldownConfig, data_dir: Option<&Path>) -> Self {
        let storage_path = data_dir.map(|d| d.join("cooldown_data.json"));
        let map = storage_path
            .as_deref()
            .map(load_map)
            .unwrap_or_default();
        Self {
            config,
            storage_path,
            state: Mutex::new(CooldownState {
                map,
                last_save: 0.0,
            }),
        }
    }

    pub fn config(&self) -> &CooldownConfig {
        &self.config
    }

    /// Add a user to the cooldown list. Returns false if already present.
    pub async fn add(
        &self,
        chat: &ChatKey,
        user_id: &str,
        user_name: &str,
        reason: &str,
    ) -> bool {
        if !self.config.enable_attention_cooldown {
            return false;
        }
        let mut state = self.state.lock().await;
        let chat_map = state.map.entry(chat.clone()).or_default();
        if chat_map.contains_key(user_id) {
            debug!(chat = %chat, user_id, "already in cooldown, skipping");
            return false;
        }
        chat_map.insert(
            user_id.to_string(),
            CooldownEntry {
                start_time: unix_now(),
                reason: reason.to_string(),
                user_name: user_name.to_string(),
            },
        );
        info!(chat = %chat, user_id, user_name, reason, "user added to attention cooldown");
        self.save_locked(&mut state, false);
        true
    }

    /// Remove a user. Returns false when not present.
    pub async fn remove(&self, chat: &ChatKey, user_id: &str, reason: &str) -> bool {
        let mut state = self.state.lock().await;
        let removed = remove_entry(&mut state.map, chat, user_id);
        if let Some(entry) = removed {
            info!(
                chat = %chat,
                user_id,
                reason,
                held_secs = (unix_now() - entry.start_time) as u64,
                "user removed from attention cooldown"
            );
            self.save_locked(&mut state, true);
            true
        } else {
            false
        }
    }

    pub async fn is_in_cooldown(&self, chat: &ChatKey, user_id: &str) -> bool {
        let state = self.state.lock().await;
        state
            .map
            .get(chat)
            .map(|m| m.contains_key(user_id))
            .unwrap_or(false)
    }

    /// Release every entry in the chat older than `cooldown_max_duration`.
    /// Returns the released user ids.
    pub async fn check_and_release_expired(&self, chat: &ChatKey) -> Vec<String> {
        let now = unix_now();
        let max = self.config.cooldown_max_duration as f64;
        let mut released = Vec::new();

        let mut state = self.state.lock().await;
        let mut now_empty = false;
        if let Some(chat_map) = state.map.get_mut(chat) {
            let expired: Vec<String> = chat_map
                .iter()
                .filter(|(_, e)| now - e.start_time >= max)
                .map(|(id, _)| id.clone())
                .collect();
            for user_id in expired {
                if let Some(entry) = chat_map.remove(&user_id) {
                    info!(
                        chat = %chat,
                        user_id,
                        user_name = %entry.user_name,
                        held_secs = (now - entry.start_time) as u64,
                        "attention cooldown expired"
                    );
                    released.push(user_id);
                }
            }
            now_empty = chat_map.is_empty();
        }
        if now_empty {
            state.map.remove(chat);
        }
        if !released.is_empty() {
            self.save_locked(&mut state, true);
        }
        released
    }

    /// Release a user's cooldown because the bot just replied to them.
    ///
    /// Validates the user is actually in cooldown and, when an attention
    /// list is supplied, that the user still has a profile.
    pub async fn try_release_on_reply(
        &self,
        chat: &ChatKey,
        user_id: &str,
        trigger: ReleaseTrigger,
        attention_user_ids: Option<&[String]>,
    ) -> bool {
        let mut state = self.state.lock().await;
        let present = state
            .map
            .get(chat)
            .map(|m| m.contains_key(user_id))
            .unwrap_or(false);
        if !present {
            return false;
        }
        if let Some(ids) = attention_user_ids {
            if !ids.iter().any(|id| id == user_id) {
                debug!(chat = %chat, user_id, "not in attention list, keeping cooldown");
                return false;
            }
        }
        let entry = remove_entry(&mut state.map, chat, user_id);
        if let Some(entry) = entry {
            info!(
                chat = %chat,
                user_id,
                trigger = trigger.as_str(),
                held_secs = (unix_now() - entry.start_time) as u64,
                "attention cooldown released by reply"
            );
            self.save_locked(&mut state, true);
            true
        } else {
            false
        }
    }

    /// Drop every cooldown entry whose user is not in the attention list
    /// anymore. Returns the removed user ids.
    pub async fn sync_with_attention_list(
        &self,
        chat: &ChatKey,
        attention_user_ids: &[String],
    ) -> Vec<String> {
        let mut state = self.state.lock().await;
        let mut removed = Vec::new();
        let mut now_empty = false;
        if let Some(chat_map) = state.map.get_mut(chat) {
            let stale: Vec<String> = chat_map
                .keys()
                .filter(|id| !attention_user_ids.iter().any(|a| a == *id))
                .cloned()
                .collect();
            for user_id in stale {
                chat_map.remove(&user_id);
                info!(chat = %chat, user_id, "cooldown entry dropped: no attention profile");
                removed.push(user_id);
            }
            now_empty = chat_map.is_empty();
        }
        if now_empty {
            state.map.remove(chat);
        }
        if !removed.is_empty() {
            self.save_locked(&mut state, true);
        }
        removed
    }

    /// Callback when an attention profile is evicted.
    pub async fn on_attention_user_removed(&self, chat: &ChatKey, user_id: &str) -> bool {
        self.remove(chat, user_id, "attention profile evicted").await
    }

    /// Clear the whole chat. Returns how many entries were dropped.
    pub async fn clear_chat(&self, chat: &ChatKey) -> usize {
        let mut state = self.state.lock().await;
        let count = state.map.remove(chat).map(|m| m.len()).unwrap_or(0);
        if count > 0 {
            info!(chat = %chat, count, "cleared chat cooldown entries");
            self.save_locked(&mut state, true);
        }
        count
    }

    /// Clear everything. Returns the total entry count removed.
    pub async fn clear_all(&self) -> usize {
        let mut state = self.state.lock().await;
        let count: usize = state.map.values().map(|m| m.len()).sum();
        state.map.clear();
        if count > 0 {
            info!(count, "cleared all cooldown entries");
        }
        self.save_locked(&mut state, true);
        count
    }

    /// Force a write regardless of the autosave throttle.
    pub async fn flush(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.save_locked(&mut state, true);
        Ok(())
    }

    /// Throttled save; `force` skips the interval check. Write failures are
    /// logged and the data stays in memory for the next attempt.
    fn save_locked(&self, state: &mut CooldownState, force: bool) {
        let Some(path) = &self.storage_path else {
            return;
        };
        let now = unix_now();
        if !force && now - state.last_save < AUTO_SAVE_INTERVAL {
            return;
        }
        let by_key: HashMap<String, &HashMap<String, CooldownEntry>> = state
            .map
            .iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        match serde_json::to_vec_pretty(&by_key) {
            Ok(bytes) => {
                if let Some(parent) = path.parent() {
                    let _ = std::fs::create_dir_all(parent);
                }
                if let Err(e) = std::fs::write(path, bytes) {
                    error!(path = %path.display(), "cooldown save failed: {e}");
                    return;
                }
                state.last_save = now;
            }
            Err(e) => error!("cooldown serialize failed: {e}"),
        }
    }
}

fn remove_entry(
    map: &mut HashMap<ChatKey, HashMap<String, CooldownEntry>>,
    chat: &ChatKey,
    user_id: &str,
) -> Option<CooldownEntry> {
    let chat_map = map.get_mut(chat)?;
    let entry = chat_map.remove(user_id);
    if chat_map.is_empty() {
        map.remove(chat);
    }
    entry
}

/// Load the persisted map; corrupt or missing files start empty.
fn load_map(path: &Path) -> HashMap<ChatKey, HashMap<String, CooldownEntry>> {
    let Ok(bytes) = std::fs::read(path) else {
        return HashMap::new();
    };
    let parsed: HashMap<String, HashMap<String, CooldownEntry>> =
        match serde_json::from_slice(&bytes) {
            Ok(p) => p,
            Err(e) => {
                error!(path = %path.display(), "cooldown data corrupt, starting fresh: {e}");
                return HashMap::new();
            }
        };
    parsed
        .into_iter()
        .filter_map(|(k, v)| k.parse::<ChatKey>().ok().map(|key| (key, v)))
        .collect()
}
