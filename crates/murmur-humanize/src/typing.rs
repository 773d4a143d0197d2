//! Typing-delay simulation — the reply is held back for roughly as long as
//! a person would need to type it, so the bot never answers instantly.

use rand::Rng;
use std::time::Duration;
use tracing::debug;

use murmur_core::config::TypingConfig;

/// Tokens that mark structured output (code, commands, tool dumps) which
/// should never be delayed.
const STRUCTURAL_TOKENS: [&str; 5] = ["```", "[", "]", "{", "}"];

#[derive(Debug, Clone)]
pub struct TypingSimulator {
    config: TypingConfig,
}

impl TypingSimulator {
    pub fn new(config: TypingConfig) -> Self {
        Self { config }
    }

    /// Delay for `text`: `len / speed`, jittered by ±`random_factor`,
    /// clamped to `[min_delay, max_delay]`.
    pub fn calculate_delay(&self, text: &str) -> Duration {
        if text.is_empty() {
            return Duration::from_secs_f64(self.config.min_delay);
        }
        let chars = text.chars().count() as f64;
        let base = chars / self.config.typing_speed.max(0.1);
        let jitter = 1.0
            + rand::thread_rng().gen_range(-self.config.random_factor..=self.config.random_factor);
        let delay = (base * jitter).clamp(self.config.min_delay, self.config.max_delay);
        Duration::from_secs_f64(delay)
    }

    /// Very short replies and structured output go out immediately.
    pub fn should_simulate(&self, text: &str) -> bool {
        if text.chars().count() <= 3 {
            return false;
        }
        !STRUCTURAL_TOKENS.iter().any(|t| text.contains(t))
    }

    /// Sleep for the computed delay when the text qualifies; otherwise a
    /// half-minimum pause so even skipped messages aren't instant.
    pub async fn simulate_if_needed(&self, text: &str) {
        if !self.config.enable_typing_simulation {
            return;
        }
        if self.should_simulate(text) {
            let delay = self.calculate_delay(text);
            debug!(delay_ms = delay.as_millis() as u64, len = text.chars().count(), "typing delay");
            tokio::time::sleep(delay).await;
        } else {
            tokio::time::sleep(Duration::from_secs_f64(self.config.min_delay * 0.5)).await;
        }
    }
}
