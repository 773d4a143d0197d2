//! The proactive background loop.
//!
//! Ticks every `check_interval`, walks every known chat, and either
//! advances the retry/failure machinery or rolls for a fresh trigger.
//! Generation itself is delegated back to the engine through
//! [`ProactiveChatDelegate`] so the dependency cycle between scheduler and
//! decision engine stays broken at a single thin interface.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use murmur_core::types::unix_now;
use murmur_core::ChatKey;

use crate::manager::{ProactiveManager, RetryContext, SkipReason, TriggerDecision};

/// Seconds between forced state saves inside the loop.
const SAVE_INTERVAL: f64 = 300.0;
/// Seconds between score/complaint decay sweeps.
const DECAY_INTERVAL: f64 = 3600.0;

/// Implemented by the engine: build the prompt, call the LLM, filter and
/// send. Returns the generated text (even when the send itself was
/// duplicate-suppressed — the attempt still counts), or `None` when
/// generation aborted before anything was produced.
#[async_trait]
pub trait ProactiveChatDelegate: Send + Sync {
    async fn generate_proactive(
        &self,
        chat: &ChatKey,
        retry: RetryContext,
    ) -> murmur_core::Result<Option<String>>;
}

pub struct ProactiveScheduler {
    manager: Arc<ProactiveManager>,
    delegate: Arc<dyn ProactiveChatDelegate>,
}

impl ProactiveScheduler {
    pub fn new(manager: Arc<ProactiveManager>, delegate: Arc<dyn ProactiveChatDelegate>) -> Self {
        Self { manager, delegate }
    }

    /// Main loop. Ticks until the shutdown channel flips, then saves state
    /// one last time.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        if !self.manager.config().enable_proactive_chat {
            info!("proactive chat disabled, scheduler not running");
            return;
        }
        info!(
            check_interval = self.manager.config().check_interval,
            "proactive scheduler started"
        );
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(
            self.manager.config().check_interval.max(1),
        ));
        // The first tick fires immediately; skip it so a restart doesn't
        // trigger before any state has settled.
        interval.tick().await;

        let mut last_save = unix_now();
        let mut last_decay = unix_now();

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick(&mut last_save, &mut last_decay).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        if let Err(e) = self.manager.flush().await {
                            error!("final proactive state save failed: {e}");
                        }
                        info!("proactive scheduler shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn tick(&self, last_save: &mut f64, last_decay: &mut f64) {
        let now = unix_now();
        if now - *last_save >= SAVE_INTERVAL {
            if let Err(e) = self.manager.flush().await {
                error!("periodic proactive state save failed: {e}");
            }
            *last_save = now;
        }
        if now - *last_decay >= DECAY_INTERVAL {
            self.manager.apply_score_decay().await;
            self.manager.apply_complaint_decay().await;
            *last_decay = now;
        }

        for chat in self.manager.known_chats().await {
            self.check_chat(&chat).await;
        }
    }

    async fn check_chat(&self, chat: &ChatKey) {
        let (attempts, last_proactive_time, _) = self.manager.retry_probe(chat).await;
        let boost_active = self.manager.boost_active(chat).await;
        let in_retry = attempts > 0;

        // Holding period: a boost window is open, nothing to do yet.
        if in_retry && boost_active {
            debug!(chat = %chat, attempts, "boost window open, waiting");
            return;
        }

        if in_retry {
            // The window expired without a reply decision: that is a
            // failure, and unless it tipped the chat into cooldown the
            // silence is already established — retry immediately.
            let window = self.manager.config().temp_boost_duration as f64;
            if last_proactive_time > 0.0 && unix_now() >= last_proactive_time + window {
                self.manager.record_failure(chat).await;
                if self.manager.is_in_cooldown(chat).await {
                    self.manager.deactivate_temp_boost(chat, "cooldown entered").await;
                    return;
                }
                if !self.manager.group_enabled(chat) {
                    return;
                }
                let base = self.manager.config().probability;
                if self.manager.effective_probability_now(base) <= 0.0 {
                    debug!(chat = %chat, "quiet period, retry postponed");
                    return;
                }
                self.attempt(chat).await;
            }
            return;
        }

        match self.manager.should_trigger(chat).await {
            TriggerDecision::Trigger { roll, probability } => {
                debug!(chat = %chat, roll, probability, "proactive trigger fired");
                self.attempt(chat).await;
            }
            TriggerDecision::Skip(SkipReason::ProbabilityFailed { roll, probability }) => {
                debug!(chat = %chat, roll, probability, "probability failed, silence timer reset");
                self.manager.reset_silence_timer(chat).await;
            }
            TriggerDecision::Skip(reason) => {
                debug!(chat = %chat, ?reason, "proactive trigger skipped");
            }
        }
    }

    /// One generation attempt, guarded by the per-chat processing flag.
    async fn attempt(&self, chat: &ChatKey) {
        if !self.manager.begin_processing(chat) {
            warn!(chat = %chat, "proactive generation already in flight, skipping");
            return;
        }
        let retry = self.manager.retry_context(chat).await;
        let result = self.delegate.generate_proactive(chat, retry).await;
        match result {
            Ok(Some(text)) => {
                self.manager.record_bot_reply(chat, true).await;
                self.manager.set_last_proactive_content(chat, &text).await;
                self.manager.activate_temp_boost(chat).await;
            }
            Ok(None) => {
                debug!(chat = %chat, "proactive generation produced nothing");
            }
            Err(e) => {
                warn!(chat = %chat, "proactive generation failed: {e}");
            }
        }
        self.manager.end_processing(chat);
    }
}
