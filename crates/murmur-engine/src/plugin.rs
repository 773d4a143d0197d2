//! Plugin lifecycle: builds the managers, wires the engine, runs the
//! background tasks, and tears everything down with a final state flush.
//!
//! Managers are constructed once with a config snapshot and a data
//! directory — nothing here relies on process-global singletons.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use murmur_attention::{AttentionTracker, CooldownManager};
use murmur_core::config::MurmurConfig;
use murmur_core::{ChatKey, Result};
use murmur_history::{HistoryStore, PendingCache, RecentReplies};
use murmur_humanize::{FrequencyTuner, MoodTracker};
use murmur_proactive::{ProactiveChatDelegate, ProactiveManager, ProactiveScheduler, RetryContext};

use crate::decision::{DecisionEngine, EngineDeps};
use crate::event::GroupMessageEvent;
use crate::MessageDisposition;

pub struct MurmurPlugin {
    config: Arc<MurmurConfig>,
    engine: Arc<DecisionEngine>,
    attention: Arc<AttentionTracker>,
    cooldowns: Arc<CooldownManager>,
    proactive: Arc<ProactiveManager>,
    history: Arc<HistoryStore>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MurmurPlugin {
    /// Assemble the full stack. `data_dir` is the plugin's persistent
    /// directory; tests may pass a temp dir.
    pub fn new(config: MurmurConfig, deps: EngineDeps, data_dir: &Path) -> Self {
        let config = Arc::new(config.validated());

        let cooldowns = Arc::new(CooldownManager::new(
            config.cooldown.clone(),
            Some(data_dir),
        ));
        let attention = Arc::new(AttentionTracker::new(
            config.attention.clone(),
            config.emotion.clone(),
            config.spillover.clone(),
            config.fatigue.clone(),
            config.poke.clone(),
            Some(data_dir),
            Arc::clone(&cooldowns),
        ));
        let proactive = Arc::new(ProactiveManager::new(
            config.proactive.clone(),
            config.proactive_periods.clone(),
            Some(data_dir),
        ));
        let tuner = Arc::new(FrequencyTuner::new());
        let mood = Arc::new(MoodTracker::new(config.mood.clone()));
        let cache = Arc::new(PendingCache::new(config.cache.clone()));
        let recent = Arc::new(RecentReplies::new(config.duplicate.clone()));
        let history = Arc::new(HistoryStore::new(data_dir));

        let engine = Arc::new(DecisionEngine::new(
            Arc::clone(&config),
            deps,
            Arc::clone(&attention),
            Arc::clone(&proactive),
            tuner,
            mood,
            cache,
            recent,
            Arc::clone(&history),
        ));

        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            engine,
            attention,
            cooldowns,
            proactive,
            history,
            shutdown,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn engine(&self) -> &Arc<DecisionEngine> {
        &self.engine
    }

    pub fn config(&self) -> &Arc<MurmurConfig> {
        &self.config
    }

    /// Start the background tasks: attention autosave and the proactive
    /// scheduler. Call once after construction.
    pub async fn initialize(&self) {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            warn!("initialize called twice, ignoring");
            return;
        }

        tasks.push(tokio::spawn(
            Arc::clone(&self.attention).run_autosave(self.shutdown.subscribe()),
        ));

        let scheduler = ProactiveScheduler::new(
            Arc::clone(&self.proactive),
            Arc::clone(&self.engine) as Arc<dyn ProactiveChatDelegate>,
        );
        tasks.push(tokio::spawn(scheduler.run(self.shutdown.subscribe())));

        info!("murmur plugin initialized");
    }

    /// Stop the background tasks and flush every persisted store.
    pub async fn terminate(&self) {
        let _ = self.shutdown.send(true);
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            if let Err(e) = task.await {
                warn!("background task join failed: {e}");
            }
        }
        if let Err(e) = self.attention.flush().await {
            warn!("attention flush failed: {e}");
        }
        if let Err(e) = self.cooldowns.flush().await {
            warn!("cooldown flush failed: {e}");
        }
        if let Err(e) = self.proactive.flush().await {
            warn!("proactive flush failed: {e}");
        }
        info!("murmur plugin terminated");
    }

    /// Host hook: one inbound group message.
    pub async fn on_group_message(&self, event: &GroupMessageEvent) -> MessageDisposition {
        self.engine.on_group_message(event).await
    }

    /// Reset every chat's attention/cooldown state. Allowlisted users
    /// only; returns the acknowledgement line to send back, or `None`
    /// when the caller may not run this.
    pub async fn reset_all(&self, user_id: &str) -> Option<String> {
        if !self
            .config
            .reset
            .reset_allowed_user_ids
            .iter()
            .any(|id| id == user_id)
        {
            return None;
        }
        let cleared = self.cooldowns.clear_all().await;
        // Dropping every chat's attention state: iterate known proactive
        // chats plus whatever attention knows about via the cooldown sync.
        for chat in self.proactive.known_chats().await {
            self.attention.clear(&chat, None).await;
        }
        info!(user_id, cleared_cooldowns = cleared, "global reset executed");
        Some("All attention and cooldown state has been reset. (This notice is not part of the conversation.)".to_string())
    }

    /// Reset one chat's state (attention, cooldowns, shadow history).
    pub async fn reset_here(&self, user_id: &str, chat: &ChatKey) -> Option<String> {
        if !self
            .config
            .reset
            .reset_here_allowed_user_ids
            .iter()
            .any(|id| id == user_id)
        {
            return None;
        }
        self.attention.clear(chat, None).await;
        self.cooldowns.clear_chat(chat).await;
        self.engine.cache().clear_chat(chat);
        if let Err(e) = self.history.clear_chat(chat).await {
            warn!(chat = %chat, "shadow history reset failed: {e}");
            return Some("Reset failed while clearing history. (This notice is not part of the conversation.)".to_string());
        }
        info!(user_id, chat = %chat, "chat reset executed");
        Some("This chat's state has been reset. (This notice is not part of the conversation.)".to_string())
    }
}

/// The thin handle breaking the scheduler ↔ engine cycle: the scheduler
/// only ever sees this trait.
#[async_trait]
impl ProactiveChatDelegate for DecisionEngine {
    async fn generate_proactive(
        &self,
        chat: &ChatKey,
        retry: RetryContext,
    ) -> Result<Option<String>> {
        self.generate_proactive_message(chat, retry).await
    }
}
