//! Send-time duplicate suppression.
//!
//! Every outbound reply (organic or proactive) is recorded per chat id;
//! before sending, the candidate text is checked against the last
//! `duplicate_filter_check_count` entries inside the time window. The ring
//! holds twice the check window, hard-capped at 100.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use tracing::debug;

use murmur_core::config::DuplicateConfig;
use murmur_core::types::unix_now;

#[derive(Debug, Clone)]
struct ReplyRecord {
    content: String,
    timestamp: f64,
}

#[derive(Debug)]
pub struct RecentReplies {
    config: DuplicateConfig,
    /// Keyed by chat id (not ChatKey): the normal and proactive paths must
    /// share one window even when their session plumbing differs.
    rings: Mutex<HashMap<String, VecDeque<ReplyRecord>>>,
}

impl RecentReplies {
    pub fn new(config: DuplicateConfig) -> Self {
        Self {
            config,
            rings: Mutex::new(HashMap::new()),
        }
    }

    /// Record an outbound reply.
    pub fn record(&self, chat_id: &str, content: &str) {
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return;
        }
        let capacity = self.config.recent_replies_capacity();
        let mut rings = self.rings.lock().unwrap();
        let ring = rings.entry(chat_id.to_string()).or_default();
        ring.push_back(ReplyRecord {
            content: trimmed.to_string(),
            timestamp: unix_now(),
        });
        while ring.len() > capacity {
            ring.pop_front();
        }
    }

    /// Would sending `content` repeat a recent reply?
    pub fn is_duplicate(&self, chat_id: &str, content: &str) -> bool {
        if !self.config.enable_duplicate_filter {
            return false;
        }
        let candidate = content.trim();
        if candidate.is_empty() {
            return false;
        }
        let now = unix_now();
        let window = self.config.duplicate_filter_time_limit as f64;
        let rings = self.rings.lock().unwrap();
        let Some(ring) = rings.get(chat_id) else {
            return false;
        };
        let duplicate = ring
            .iter()
            .rev()
            .take(self.config.duplicate_filter_check_count)
            .filter(|r| !self.config.enable_duplicate_time_limit || now - r.timestamp <= window)
            .any(|r| r.content == candidate);
        if duplicate {
            debug!(chat_id, "duplicate reply suppressed");
        }
        duplicate
    }

    /// Number of records held for a chat (diagnostics and tests).
    pub fn len(&self, chat_id: &str) -> usize {
        let rings = self.rings.lock().unwrap();
        rings.get(chat_id).map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, chat_id: &str) -> bool {
        self.len(chat_id) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replies() -> RecentReplies {
        RecentReplies::new(DuplicateConfig::default())
    }

    #[test]
    fn fresh_text_is_not_duplicate() {
        let r = replies();
        assert!(!r.is_duplicate("1", "hello everyone"));
    }

    #[test]
    fn recorded_text_is_duplicate() {
        let r = replies();
        r.record("1", "hello everyone");
        assert!(r.is_duplicate("1", "hello everyone"));
        assert!(r.is_duplicate("1", "  hello everyone  "));
    }

    #[test]
    fn chats_are_isolated() {
        let r = replies();
        r.record("1", "hello");
        assert!(!r.is_duplicate("2", "hello"));
    }

    #[test]
    fn check_window_bounds_lookback() {
        let r = RecentReplies::new(DuplicateConfig {
            duplicate_filter_check_count: 2,
            ..DuplicateConfig::default()
        });
        r.record("1", "a");
        r.record("1", "b");
        r.record("1", "c");
        // "a" is outside the 2-entry check window.
        assert!(!r.is_duplicate("1", "a"));
        assert!(r.is_duplicate("1", "c"));
    }

    #[test]
    fn ring_is_capped_at_twice_check_count() {
        let r = RecentReplies::new(DuplicateConfig {
            duplicate_filter_check_count: 3,
            ..DuplicateConfig::default()
        });
        for i in 0..20 {
            r.record("1", &format!("reply {i}"));
        }
        assert_eq!(r.len("1"), 6);
    }

    #[test]
    fn disabled_filter_never_matches() {
        let r = RecentReplies::new(DuplicateConfig {
            enable_duplicate_filter: false,
            ..DuplicateConfig::default()
        });
        r.record("1", "hello");
        assert!(!r.is_duplicate("1", "hello"));
    }
}
