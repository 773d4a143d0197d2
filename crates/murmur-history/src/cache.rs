//! Pending-message cache.
//!
//! Every message that survives the early filters is tentatively cached
//! here, whether or not a reply follows. On the next successful reply in
//! the chat, eligible entries are promoted into the official conversation
//! and cleared. TTL purging happens on every append; when the cap would be
//! exceeded, the oldest entries by `message_timestamp` are dropped first.
//!
//! A per-message-id snapshot map deep-copies the entry a handler is
//! working on, so the post-send hook can persist it even after concurrent
//! traffic has rotated the shared ring.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::debug;

use murmur_core::config::CacheConfig;
use murmur_core::types::unix_now;
use murmur_core::ChatKey;

/// One tentatively-cached user message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedMessage {
    pub content: String,
    /// Unix seconds the entry was cached.
    pub timestamp: f64,
    /// Unix seconds the platform stamped on the message. Ordering key.
    pub message_timestamp: f64,
    pub message_id: String,
    pub sender_id: String,
    pub sender_name: String,
    #[serde(flatten)]
    pub detail: CachedDetail,
}

/// Minimal vs. full cache entries share the base fields above.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CachedDetail {
    /// The probability gate dropped this message before full processing.
    ProbabilityFiltered,
    /// Full snapshot taken on the reply path.
    Processed {
        #[serde(default)]
        mention_info: Option<String>,
        #[serde(default)]
        poke_info: Option<String>,
        #[serde(default)]
        image_urls: Vec<String>,
        is_at_message: bool,
        has_trigger_keyword: bool,
    },
}

impl CachedMessage {
    pub fn is_probability_filtered(&self) -> bool {
        matches!(self.detail, CachedDetail::ProbabilityFiltered)
    }

    pub fn image_urls(&self) -> &[String] {
        match &self.detail {
            CachedDetail::Processed { image_urls, .. } => image_urls,
            CachedDetail::ProbabilityFiltered => &[],
        }
    }
}

#[derive(Debug, Default)]
struct CacheState {
    pending: HashMap<ChatKey, Vec<CachedMessage>>,
    snapshots: HashMap<String, CachedMessage>,
}

#[derive(Debug)]
pub struct PendingCache {
    config: CacheConfig,
    state: Mutex<CacheState>,
}

impl PendingCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Append a message, purging expired entries first and evicting the
    /// oldest (by `message_timestamp`) when over the cap.
    pub fn append(&self, chat: &ChatKey, message: CachedMessage) {
        let now = unix_now();
        let ttl = self.config.pending_cache_ttl_seconds as f64;
        let mut state = self.state.lock().unwrap();
        let ring = state.pending.entry(chat.clone()).or_default();

        ring.retain(|m| now - m.timestamp < ttl);
        ring.push(message);
        if ring.len() > self.config.pending_cache_max_count {
            ring.sort_by(|a, b| {
                a.message_timestamp
                    .partial_cmp(&b.message_timestamp)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            let excess = ring.len() - self.config.pending_cache_max_count;
            ring.drain(0..excess);
            debug!(chat = %chat, dropped = excess, "pending cache over cap, dropped oldest");
        }
    }

    /// Deep-copy the entry for `message_id` into the snapshot map so it
    /// survives cache rotation during a long judge/LLM call.
    pub fn snapshot(&self, chat: &ChatKey, message_id: &str) {
        let mut state = self.state.lock().unwrap();
        let found = state
            .pending
            .get(chat)
            .and_then(|ring| ring.iter().find(|m| m.message_id == message_id))
            .cloned();
        if let Some(message) = found {
            state.snapshots.insert(message_id.to_string(), message);
        }
    }

    /// Remove and return a snapshot.
    pub fn take_snapshot(&self, message_id: &str) -> Option<CachedMessage> {
        self.state.lock().unwrap().snapshots.remove(message_id)
    }

    pub fn drop_snapshot(&self, message_id: &str) {
        self.state.lock().unwrap().snapshots.remove(message_id);
    }

    /// Cached messages older than `before_timestamp` whose id is not
    /// excluded, sorted by `message_timestamp` — the promotion batch.
    pub fn promotable(
        &self,
        chat: &ChatKey,
        before_timestamp: f64,
        excluded_ids: &HashSet<String>,
    ) -> Vec<CachedMessage> {
        let state = self.state.lock().unwrap();
        let mut batch: Vec<CachedMessage> = state
            .pending
            .get(chat)
            .map(|ring| {
                ring.iter()
                    .filter(|m| {
                        m.message_timestamp < before_timestamp
                            && !excluded_ids.contains(&m.message_id)
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        batch.sort_by(|a, b| {
            a.message_timestamp
                .partial_cmp(&b.message_timestamp)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        batch
    }

    /// Clear exactly the entries with `message_timestamp ≤ upto` whose id
    /// is not excluded. Returns how many were removed.
    pub fn clear_promoted(
        &self,
        chat: &ChatKey,
        upto: f64,
        excluded_ids: &HashSet<String>,
    ) -> usize {
        let mut state = self.state.lock().unwrap();
        let Some(ring) = state.pending.get_mut(chat) else {
            return 0;
        };
        let before = ring.len();
        ring.retain(|m| m.message_timestamp > upto || excluded_ids.contains(&m.message_id));
        before - ring.len()
    }

    /// Every cached message for the chat, sorted by `message_timestamp`.
    pub fn all(&self, chat: &ChatKey) -> Vec<CachedMessage> {
        self.promotable(chat, f64::INFINITY, &HashSet::new())
    }

    pub fn len(&self, chat: &ChatKey) -> usize {
        let state = self.state.lock().unwrap();
        state.pending.get(chat).map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, chat: &ChatKey) -> bool {
        self.len(chat) == 0
    }

    pub fn clear_chat(&self, chat: &ChatKey) {
        self.state.lock().unwrap().pending.remove(chat);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: &str, ts: f64) -> CachedMessage {
        CachedMessage {
            content: format!("msg {id}"),
            timestamp: unix_now(),
            message_timestamp: ts,
            message_id: id.to_string(),
            sender_id: "u1".to_string(),
            sender_name: "alice".to_string(),
            detail: CachedDetail::Processed {
                mention_info: None,
                poke_info: None,
                image_urls: Vec::new(),
                is_at_message: false,
                has_trigger_keyword: false,
            },
        }
    }

    fn cache(max: usize) -> PendingCache {
        PendingCache::new(CacheConfig {
            pending_cache_max_count: max,
            pending_cache_ttl_seconds: 600,
        })
    }

    fn chat() -> ChatKey {
        ChatKey::group("qq", "1")
    }

    #[test]
    fn append_and_length() {
        let c = cache(10);
        c.append(&chat(), message("a", 1.0));
        c.append(&chat(), message("b", 2.0));
        assert_eq!(c.len(&chat()), 2);
    }

    #[test]
    fn cap_drops_oldest_by_message_timestamp() {
        let c = cache(2);
        c.append(&chat(), message("mid", 2.0));
        c.append(&chat(), message("old", 1.0));
        c.append(&chat(), message("new", 3.0));
        let remaining = c.all(&chat());
        let ids: Vec<&str> = remaining.iter().map(|m| m.message_id.as_str()).collect();
        assert_eq!(ids, vec!["mid", "new"]);
    }

    #[test]
    fn ttl_purges_expired_entries() {
        let c = PendingCache::new(CacheConfig {
            pending_cache_max_count: 10,
            pending_cache_ttl_seconds: 0,
        });
        c.append(&chat(), message("a", 1.0));
        // The next append purges everything older than 0 seconds.
        c.append(&chat(), message("b", 2.0));
        assert_eq!(c.len(&chat()), 1);
    }

    #[test]
    fn promotable_filters_by_timestamp_and_exclusion() {
        let c = cache(10);
        c.append(&chat(), message("t1", 1.0));
        c.append(&chat(), message("t2", 2.0));
        c.append(&chat(), message("t3", 3.0));
        let mut excluded = HashSet::new();
        excluded.insert("t3".to_string());
        let batch = c.promotable(&chat(), 2.5, &excluded);
        let ids: Vec<&str> = batch.iter().map(|m| m.message_id.as_str()).collect();
        assert_eq!(ids, vec!["t1", "t2"]);
    }

    #[test]
    fn clear_promoted_spares_excluded_and_newer() {
        let c = cache(10);
        c.append(&chat(), message("t1", 1.0));
        c.append(&chat(), message("t2", 2.0));
        c.append(&chat(), message("t3", 3.0));
        let mut excluded = HashSet::new();
        excluded.insert("t1".to_string());
        let removed = c.clear_promoted(&chat(), 2.0, &excluded);
        assert_eq!(removed, 1); // only t2
        let ids: Vec<String> = c.all(&chat()).into_iter().map(|m| m.message_id).collect();
        assert_eq!(ids, vec!["t1".to_string(), "t3".to_string()]);
    }

    #[test]
    fn snapshot_survives_cache_rotation() {
        let c = cache(1);
        c.append(&chat(), message("a", 1.0));
        c.snapshot(&chat(), "a");
        // Rotation pushes "a" out of the shared ring.
        c.append(&chat(), message("b", 2.0));
        assert_eq!(c.len(&chat()), 1);
        let snap = c.take_snapshot("a").expect("snapshot kept a copy");
        assert_eq!(snap.message_id, "a");
        // Taking consumes it.
        assert!(c.take_snapshot("a").is_none());
    }

    #[test]
    fn serde_round_trip_preserves_detail() {
        let full = message("a", 1.0);
        let json = serde_json::to_string(&full).unwrap();
        let back: CachedMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, full);

        let minimal = CachedMessage {
            detail: CachedDetail::ProbabilityFiltered,
            ..message("b", 2.0)
        };
        let json = serde_json::to_string(&minimal).unwrap();
        let back: CachedMessage = serde_json::from_str(&json).unwrap();
        assert!(back.is_probability_filtered());
        // Round trip is byte-stable.
        assert_eq!(serde_json::to_string(&back).unwrap(), json);
    }
}
