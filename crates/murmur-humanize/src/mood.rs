//! Keyword-driven mood state. Incoming messages nudge a single valence
//! value; the current mood renders as one prompt line so the persona reacts
//! to the room's tone. Valence halves every `mood_decay_halflife` seconds.

use std::collections::HashMap;
use std::sync::Mutex;

use murmur_core::config::MoodConfig;
use murmur_core::types::unix_now;
use murmur_core::ChatKey;

#[derive(Debug, Clone, Copy)]
struct MoodState {
    /// [-1, 1]; 0 is neutral.
    valence: f64,
    last_update: f64,
}

#[derive(Debug)]
pub struct MoodTracker {
    config: MoodConfig,
    moods: Mutex<HashMap<ChatKey, MoodState>>,
}

impl MoodTracker {
    pub fn new(config: MoodConfig) -> Self {
        Self {
            config,
            moods: Mutex::new(HashMap::new()),
        }
    }

    /// Decay the stored valence to the present moment.
    fn decayed(&self, state: MoodState, now: f64) -> f64 {
        let elapsed = (now - state.last_update).max(0.0);
        if self.config.mood_decay_halflife <= 0.0 {
            return state.valence;
        }
        state.valence * 0.5f64.powf(elapsed / self.config.mood_decay_halflife)
    }

    /// Score a message against the positive/negative keyword lists and fold
    /// the result into the chat's mood.
    pub fn observe(&self, chat: &ChatKey, text: &str) {
        if !self.config.enable_mood_tracking || text.is_empty() {
            return;
        }
        let positive = count_hits(text, &self.config.mood_positive_keywords);
        let negative = count_hits(text, &self.config.mood_negative_keywords);
        if positive == 0 && negative == 0 {
            return;
        }
        let delta = (positive as f64 - negative as f64) * self.config.mood_intensity_step;

        let now = unix_now();
        let mut moods = self.moods.lock().unwrap();
        let state = moods.entry(chat.clone()).or_insert(MoodState {
            valence: 0.0,
            last_update: now,
        });
        let current = {
            let elapsed = (now - state.last_update).max(0.0);
            if self.config.mood_decay_halflife > 0.0 {
                state.valence * 0.5f64.powf(elapsed / self.config.mood_decay_halflife)
            } else {
                state.valence
            }
        };
        state.valence = (current + delta).clamp(-1.0, 1.0);
        state.last_update = now;
    }

    /// One prompt line describing the current mood, or `None` when neutral
    /// or disabled.
    pub fn describe(&self, chat: &ChatKey) -> Option<String> {
        if !self.config.enable_mood_tracking {
            return None;
        }
        let now = unix_now();
        let moods = self.moods.lock().unwrap();
        let state = moods.get(chat)?;
        let valence = self.decayed(*state, now);
        let label = match valence {
            v if v >= 0.6 => "cheerful and talkative",
            v if v >= 0.2 => "in a good mood",
            v if v > -0.2 => return None,
            v if v > -0.6 => "a little subdued",
            _ => "noticeably grumpy",
        };
        Some(format!("Current mood: you are feeling {label}."))
    }

    /// Current decayed valence, for tests and diagnostics.
    pub fn valence(&self, chat: &ChatKey) -> f64 {
        let now = unix_now();
        let moods = self.moods.lock().unwrap();
        moods.get(chat).map(|s| self.decayed(*s, now)).unwrap_or(0.0)
    }
}

fn count_hits(text: &str, keywords: &[String]) -> usize {
    keywords
        .iter()
        .filter(|k| !k.is_empty())
        .map(|k| text.matches(k.as_str()).count())
        .sum()
}
