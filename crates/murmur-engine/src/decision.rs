//! The decision engine — single entry point per inbound group message.
//!
//! Filter order is strict and earlier steps are never bypassed by later
//! ones: global gate → command detection → @all → blacklists → poke spoof
//! → @-others → poke handling → trigger classification → probability gate
//! → content processing → judge AI → concurrency gate → reply
//! orchestration. Errors never propagate to the host; every failure path
//! degrades to "no reply, state untouched".

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;
use tracing::{debug, error, info, warn};

use murmur_attention::cooldown::ReleaseTrigger;
use murmur_attention::{AttentionTracker, FatigueLevel};
use murmur_core::config::{MemoryTiming, MurmurConfig};
use murmur_core::host::{
    ChatProvider, ConversationStore, ImageCaptioner, MemoryProvider, MessageHistory,
    PersonaSource, PlatformLink, ToolRegistry,
};
use murmur_core::types::unix_now;
use murmur_core::ChatKey;
use murmur_history::cache::{CachedDetail, CachedMessage};
use murmur_history::clean;
use murmur_history::format::{format_context_for_ai, ContextEntry};
use murmur_history::store::StoredMessage;
use murmur_history::{promote_to_official, HistoryStore, PendingCache, RecentReplies};
use murmur_humanize::{FrequencyTuner, MoodTracker};
use murmur_proactive::ProactiveManager;
use murmur_probability::calculator::{effective_probability, ProbabilityInputs};
use murmur_probability::time_period::{minute_of_day, parse_periods, TimePeriod};

use crate::event::GroupMessageEvent;
use crate::filters::{self, TriggerClass};
use crate::judge::{JudgeAi, JudgeHints, JudgeVerdict};
use crate::memory::MemoryInjector;
use crate::orchestrator::{ReplyOrchestrator, ReplyRequest};

/// A "command" mark stays valid this long across handlers.
const COMMAND_MARK_TTL: f64 = 10.0;
/// Stale processing marks (crashed peer) are reaped after this long.
const PROCESSING_MARK_TTL: f64 = 300.0;
/// Bounded wait for a proactive generation holding the pending cache.
const PROACTIVE_WAIT_LOOPS: u32 = 10;
const PROACTIVE_WAIT_INTERVAL: f64 = 0.5;

/// Host collaborators, injected at construction.
pub struct EngineDeps {
    pub provider: Arc<dyn ChatProvider>,
    pub conversations: Arc<dyn ConversationStore>,
    pub message_history: Arc<dyn MessageHistory>,
    pub tools: Arc<dyn ToolRegistry>,
    pub personas: Arc<dyn PersonaSource>,
    pub memory: Option<Arc<dyn MemoryProvider>>,
    pub captions: Option<Arc<dyn ImageCaptioner>>,
    pub platform: Arc<dyn PlatformLink>,
}

/// What the pipeline did with one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDisposition {
    Disabled,
    NotWhitelisted,
    Command,
    AtAllIgnored,
    BlacklistedUser,
    BlacklistedKeyword,
    PokeSpoof,
    MentionFiltered,
    PokeHandled,
    ImageDiscarded,
    ProbabilityFiltered,
    JudgeDeclined,
    JudgeError,
    Replied,
    ReplySuppressed,
    Errored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MarkKind {
    Command,
    Processing,
}

#[derive(Debug, Clone, Copy)]
struct Mark {
    kind: MarkKind,
    at: f64,
}

pub struct DecisionEngine {
    config: Arc<MurmurConfig>,
    deps: EngineDeps,
    attention: Arc<AttentionTracker>,
    proactive: Arc<ProactiveManager>,
    tuner: Arc<FrequencyTuner>,
    mood: Arc<MoodTracker>,
    cache: Arc<PendingCache>,
    recent: Arc<RecentReplies>,
    history: Arc<HistoryStore>,
    orchestrator: ReplyOrchestrator,
    judge: JudgeAi,
    memory_injector: MemoryInjector,
    /// Per-message-id coordination across the four host hooks.
    marks: DashMap<String, Mark>,
    /// Chats with a handler currently in the reply section.
    busy_chats: DashMap<ChatKey, f64>,
    reply_periods: Vec<TimePeriod>,
}

impl DecisionEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<MurmurConfig>,
        deps: EngineDeps,
        attention: Arc<AttentionTracker>,
        proactive: Arc<ProactiveManager>,
        tuner: Arc<FrequencyTuner>,
        mood: Arc<MoodTracker>,
        cache: Arc<PendingCache>,
        recent: Arc<RecentReplies>,
        history: Arc<HistoryStore>,
    ) -> Self {
        let orchestrator = ReplyOrchestrator::new(Arc::clone(&config));
        let judge = JudgeAi::new(config.judge.clone());
        let memory_injector = MemoryInjector::new(config.memory.clone());
        let reply_periods = if config.reply_periods.enable_dynamic_probability {
            parse_periods(&config.reply_periods.time_periods)
        } else {
            Vec::new()
        };
        Self {
            config,
            deps,
            attention,
            proactive,
            tuner,
            mood,
            cache,
            recent,
            history,
            orchestrator,
            judge,
            memory_injector,
            marks: DashMap::new(),
            busy_chats: DashMap::new(),
            reply_periods,
        }
    }

    pub fn attention(&self) -> &Arc<AttentionTracker> {
        &self.attention
    }

    pub fn proactive(&self) -> &Arc<ProactiveManager> {
        &self.proactive
    }

    pub fn cache(&self) -> &Arc<PendingCache> {
        &self.cache
    }

    pub fn recent(&self) -> &Arc<RecentReplies> {
        &self.recent
    }

    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.history
    }

    /// Whether a message id was recently classified as a command.
    pub fn is_command_marked(&self, message_id: &str) -> bool {
        self.marks
            .get(message_id)
            .map(|m| m.kind == MarkKind::Command && unix_now() - m.at < COMMAND_MARK_TTL)
            .unwrap_or(false)
    }

    /// The inbound handler. Never panics the host: every internal failure
    /// logs and returns a terminal disposition.
    pub async fn on_group_message(&self, event: &GroupMessageEvent) -> MessageDisposition {
        // 1. Global gate — no side effects at all when disabled.
        if !self.config.core.enable_group_chat {
            return MessageDisposition::Disabled;
        }
        if !self.config.core.enabled_groups.is_empty()
            && !self
                .config
                .core
                .enabled_groups
                .iter()
                .any(|g| g == &event.chat_id)
        {
            return MessageDisposition::NotWhitelisted;
        }

        let chat = event.chat_key();
        let text = event.text();
        self.prune_marks();

        // 2. Command detection: mark and step aside for the command layer.
        if filters::is_command(&text, &self.config.commands) {
            self.marks.insert(
                event.message_id.clone(),
                Mark {
                    kind: MarkKind::Command,
                    at: unix_now(),
                },
            );
            return MessageDisposition::Command;
        }

        // Ambient bookkeeping for every organic non-command message.
        self.proactive
            .note_platform_identity(&chat, &event.platform_id, &event.origin)
            .await;
        self.proactive
            .record_user_message(&chat, &event.sender_id)
            .await;
        self.tuner.record_message(&chat);
        self.mood.observe(&chat, &text);
        self.attention
            .cooldowns()
            .check_and_release_expired(&chat)
            .await;

        // 3. @all filter.
        if self.config.mention.enable_ignore_at_all && event.has_at_all() {
            return MessageDisposition::AtAllIgnored;
        }
        // 4. Sender / keyword blacklists.
        if filters::is_blacklisted_user(&event.sender_id, &self.config.user_filter) {
            return MessageDisposition::BlacklistedUser;
        }
        if filters::contains_blacklist_keyword(&text, &self.config.keywords) {
            return MessageDisposition::BlacklistedKeyword;
        }
        // 5. A typed poke marker is a spoof, not a poke.
        if clean::is_only_poke_marker(&text) {
            return MessageDisposition::PokeSpoof;
        }
        // 6. @-others rules.
        if filters::blocked_by_mention_rules(event, &self.config.mention) {
            return MessageDisposition::MentionFiltered;
        }

        // 7. Native poke handling.
        let mut poke_boost_reference = 0.0;
        if let Some((poke_sender, poke_target)) = event.poke() {
            match self.handle_poke(event, &chat, poke_sender, poke_target).await {
                Some(boost) => poke_boost_reference = boost,
                None => return MessageDisposition::PokeHandled,
            }
        }

        // 8. Trigger classification.
        let trigger = filters::classify_trigger(event, &text, &self.config.keywords);
        let empty_at = clean::is_empty_at_message(&text, trigger.is_at_message);
        let fatigue_level = self
            .attention
            .fatigue_level(&chat, &event.sender_id)
            .await;
        let silent_mode = self
            .tuner
            .silent_mode_active(&chat, &self.config.humanize);

        // 9. Probability gate — bypassed by @ / keyword; a poke boost
        //    feeds into the composition rather than around it.
        if !trigger.should_treat_as_at {
            let passed = self
                .probability_gate(
                    &chat,
                    event,
                    &text,
                    fatigue_level,
                    poke_boost_reference,
                    silent_mode,
                )
                .await;
            if !passed {
                self.cache_minimal(&chat, event, &text);
                return MessageDisposition::ProbabilityFiltered;
            }
        }

        // 10. Content processing (images), then the full cache entry.
        let resolved_text = match self.resolve_content(event, &text).await {
            Some(resolved) => resolved,
            None => return MessageDisposition::ImageDiscarded,
        };
        self.cache_full(&chat, event, &resolved_text, &trigger);
        self.cache.snapshot(&chat, &event.message_id);

        // 11. Judge AI, unless the trigger forces the reply.
        let forced = trigger.is_at_message
            || (trigger.has_trigger_keyword && !self.config.keywords.keyword_smart_mode);
        if !forced {
            match self
                .consult_judge(
                    &chat,
                    event,
                    &resolved_text,
                    &trigger,
                    empty_at,
                    fatigue_level,
                    silent_mode,
                )
                .await
            {
                JudgeVerdict::Reply => {
                    self.tuner.record_decision(&chat, true);
                }
                JudgeVerdict::NoReply => {
                    self.tuner.record_decision(&chat, false);
                    self.persist_declined_user_message(&chat, event, &resolved_text)
                        .await;
                    self.attention
                        .decrease_attention_on_no_reply(&chat, &event.sender_id, &event.sender_name)
                        .await;
                    self.cache.drop_snapshot(&event.message_id);
                    return MessageDisposition::JudgeDeclined;
                }
                JudgeVerdict::Error => {
                    // Tagged error: keep continuity, but no attention
                    // decrement and no decision statistics.
                    self.persist_declined_user_message(&chat, event, &resolved_text)
                        .await;
                    self.cache.drop_snapshot(&event.message_id);
                    return MessageDisposition::JudgeError;
                }
            }
        }

        // The decision to reply is the proactive success signal.
        self.proactive.handle_reply_decision(&chat).await;

        // 12. Concurrency gate.
        self.wait_for_chat(&chat).await;
        self.busy_chats.insert(chat.clone(), unix_now());
        self.marks.insert(
            event.message_id.clone(),
            Mark {
                kind: MarkKind::Processing,
                at: unix_now(),
            },
        );

        // 13. Orchestrate, then always release the chat.
        let disposition = self
            .reply_flow(event, &chat, &resolved_text, &trigger, empty_at)
            .await;
        self.busy_chats.remove(&chat);
        disposition
    }

    // --- step helpers -------------------------------------------------------

    /// Returns `Some(boost)` to continue the pipeline with a poke boost, or
    /// `None` when the poke was fully handled here.
    async fn handle_poke(
        &self,
        event: &GroupMessageEvent,
        chat: &ChatKey,
        poke_sender: &str,
        poke_target: &str,
    ) -> Option<f64> {
        use murmur_core::config::PokeMode;
        let config = &self.config.poke;
        match config.poke_message_mode {
            PokeMode::Ignore => return None,
            PokeMode::BotOnly if poke_target != event.self_id => return None,
            _ => {}
        }
        if !config.poke_enabled_groups.is_empty()
            && !config.poke_enabled_groups.iter().any(|g| g == &event.chat_id)
        {
            return None;
        }
        if poke_target != event.self_id {
            // Watching others poke each other never triggers a reply.
            return None;
        }
        if rand::thread_rng().gen::<f64>() < config.poke_bot_skip_probability {
            debug!(chat = %chat, "poke ignored by skip probability");
            return None;
        }
        self.attention
            .record_poke(chat, poke_sender, &event.sender_name)
            .await;
        if rand::thread_rng().gen::<f64>() < config.poke_reverse_on_poke_probability {
            if let Err(e) = self
                .deps
                .platform
                .send_poke(&event.origin, poke_sender)
                .await
            {
                warn!(chat = %chat, "reverse poke failed: {e}");
            }
            return None;
        }
        Some(config.poke_bot_probability_boost_reference)
    }

    /// Compose the effective probability and draw. True = proceed.
    async fn probability_gate(
        &self,
        chat: &ChatKey,
        event: &GroupMessageEvent,
        text: &str,
        fatigue_level: FatigueLevel,
        poke_boost_reference: f64,
        silent_mode: bool,
    ) -> bool {
        let in_cooldown = self
            .attention
            .cooldowns()
            .is_in_cooldown(chat, &event.sender_id)
            .await;
        let profile = self
            .attention
            .profile_snapshot(chat, &event.sender_id)
            .await;
        let spillover = if profile.is_none() {
            self.attention.spillover_snapshot(chat).await
        } else {
            None
        };
        let mut base = self.tuner.base_probability(chat, &self.config.core)
            + self.proactive.temp_boost(chat).await;
        // A silent spell halves the urge to speak up.
        if silent_mode {
            base *= 0.5;
        }
        let interest_match = self.config.humanize.enable_humanize_mode
            && filters::matches_interest(text, &self.config.humanize.humanize_interest_keywords);

        let inputs = ProbabilityInputs {
            base_probability: base,
            profile,
            in_cooldown,
            spillover,
            poke_boost_reference,
            interest_match,
            fatigue_level,
        };
        let probability = effective_probability(&inputs, &self.config);
        let roll = rand::thread_rng().gen::<f64>();
        debug!(chat = %chat, sender = %event.sender_id, roll, probability, "probability gate");
        roll < probability
    }

    /// Image resolution per the caption contract. `None` = discard message.
    async fn resolve_content(&self, event: &GroupMessageEvent, text: &str) -> Option<String> {
        if !event.has_images() {
            return Some(text.to_string());
        }
        let captioner = match self.deps.captions.as_ref() {
            Some(captioner) if self.config.image.enable_image_processing => captioner,
            _ => {
                if event.is_image_only() {
                    debug!(message_id = %event.message_id, "image-only message without captioner, discarded");
                    return None;
                }
                return Some(text.to_string());
            }
        };

        let mut parts: Vec<String> = Vec::new();
        if !text.is_empty() {
            parts.push(text.to_string());
        }
        for url in event.image_urls() {
            if let Some(caption) = self.await_caption(captioner.as_ref(), &url).await {
                parts.push(format!("[image: {caption}]"));
            }
        }
        if parts.is_empty() {
            // Captions never arrived for a pure-image message.
            return None;
        }
        Some(parts.join(" "))
    }

    /// Poll for an async caption: a few fast checks, then the configured
    /// retry interval, bounded by the max wait.
    async fn await_caption(&self, captioner: &dyn ImageCaptioner, url: &str) -> Option<String> {
        let config = &self.config.image;
        let deadline = unix_now() + config.platform_image_caption_max_wait;
        let mut checks: u32 = 0;
        loop {
            match captioner.caption(url).await {
                Ok(Some(caption)) => return Some(caption),
                Ok(None) => {}
                Err(e) => {
                    debug!("caption lookup failed: {e}");
                    return None;
                }
            }
            checks += 1;
            if unix_now() >= deadline {
                return None;
            }
            let sleep_ms = if checks <= config.platform_image_caption_fast_check_count {
                50
            } else {
                config.platform_image_caption_retry_interval
            };
            tokio::time::sleep(Duration::from_millis(sleep_ms)).await;
        }
    }

    fn cache_minimal(&self, chat: &ChatKey, event: &GroupMessageEvent, text: &str) {
        self.cache.append(
            chat,
            CachedMessage {
                content: format!("{}: {}", event.sender_name, text),
                timestamp: unix_now(),
                message_timestamp: event.timestamp,
                message_id: event.message_id.clone(),
                sender_id: event.sender_id.clone(),
                sender_name: event.sender_name.clone(),
                detail: CachedDetail::ProbabilityFiltered,
            },
        );
    }

    fn cache_full(
        &self,
        chat: &ChatKey,
        event: &GroupMessageEvent,
        resolved_text: &str,
        trigger: &TriggerClass,
    ) {
        self.cache.append(
            chat,
            CachedMessage {
                content: format!("{}: {}", event.sender_name, resolved_text),
                timestamp: unix_now(),
                message_timestamp: event.timestamp,
                message_id: event.message_id.clone(),
                sender_id: event.sender_id.clone(),
                sender_name: event.sender_name.clone(),
                detail: CachedDetail::Processed {
                    mention_info: event.mention_summary(),
                    poke_info: event.poke().map(|(s, t)| format!("{s} poked {t}")),
                    image_urls: event.image_urls(),
                    is_at_message: trigger.is_at_message,
                    has_trigger_keyword: trigger.has_trigger_keyword,
                },
            },
        );
    }

    #[allow(clippy::too_many_arguments)]
    async fn consult_judge(
        &self,
        chat: &ChatKey,
        event: &GroupMessageEvent,
        resolved_text: &str,
        trigger: &TriggerClass,
        empty_at: bool,
        fatigue_level: FatigueLevel,
        silent_mode: bool,
    ) -> JudgeVerdict {
        let mut context_block = self
            .build_context_block(chat, event, resolved_text)
            .await;

        // Pre-decision memory timing feeds the judge too.
        if self.config.memory.memory_injection_timing == MemoryTiming::PreDecision {
            if let Some(memory) = &self.deps.memory {
                context_block = self
                    .memory_injector
                    .inject(
                        memory.as_ref(),
                        self.deps.personas.as_ref(),
                        &event.origin,
                        resolved_text,
                        &context_block,
                    )
                    .await;
            }
        }

        let suggest_closing = fatigue_level == FatigueLevel::Heavy
            && rand::thread_rng().gen::<f64>() < self.config.fatigue.fatigue_closing_probability;
        let decision_history = if self.config.humanize.enable_humanize_mode
            && self.config.humanize.humanize_include_decision_history
        {
            self.tuner.decision_history(chat, 10)
        } else {
            Vec::new()
        };
        let hints = JudgeHints {
            trigger_tag: if trigger.has_trigger_keyword {
                Some("keyword")
            } else if trigger.is_at_message {
                Some("at")
            } else {
                None
            },
            matched_keyword: trigger.matched_keyword.clone(),
            time_label: self.current_period_label(),
            decision_history,
            fatigue: fatigue_level,
            suggest_closing,
            empty_at,
            silent_mode,
        };
        self.judge
            .should_reply(
                self.deps.provider.as_ref(),
                &event.origin,
                &context_block,
                &hints,
            )
            .await
    }

    fn current_period_label(&self) -> Option<String> {
        if self.reply_periods.is_empty() {
            return None;
        }
        let minute = minute_of_day(&chrono::Local::now().time());
        self.reply_periods
            .iter()
            .find(|p| {
                if p.start_minutes <= p.end_minutes {
                    p.start_minutes <= minute && minute < p.end_minutes
                } else {
                    minute >= p.start_minutes || minute < p.end_minutes
                }
            })
            .map(|p| p.name.clone())
    }

    /// Shadow history (falling back to the host's raw message history),
    /// merged with pending cache entries, deduplicated, sorted, truncated.
    async fn build_context_block(
        &self,
        chat: &ChatKey,
        event: &GroupMessageEvent,
        current_text: &str,
    ) -> String {
        let limit = self.config.context.effective_context_limit();
        let mut entries: Vec<ContextEntry> = Vec::new();

        if limit > 0 {
            let stored = self.history.recent(chat, limit).await.unwrap_or_default();
            if stored.is_empty() {
                // Fresh install: pull what the platform remembers.
                if let Ok(records) = self
                    .deps
                    .message_history
                    .page(&event.platform_id, &event.chat_id, 0, limit)
                    .await
                {
                    for record in records {
                        entries.push(ContextEntry {
                            is_bot: record.sender_id == event.self_id,
                            sender_id: record.sender_id,
                            sender_name: record.sender_name,
                            content: record.content,
                            timestamp: record.created_at,
                        });
                    }
                }
            } else {
                for message in stored {
                    entries.push(ContextEntry {
                        is_bot: message.role == murmur_core::host::Role::Assistant,
                        sender_id: message.sender_id,
                        sender_name: message.sender_name,
                        content: message.content,
                        timestamp: message.timestamp,
                    });
                }
            }

            // Pending cache entries are context too (they were never saved).
            let mut seen: HashSet<String> = entries.iter().map(|e| e.content.clone()).collect();
            for cached in self.cache.all(chat) {
                if cached.message_id == event.message_id {
                    continue;
                }
                if seen.insert(cached.content.clone()) {
                    entries.push(ContextEntry {
                        sender_id: cached.sender_id,
                        sender_name: cached.sender_name,
                        content: cached.content,
                        timestamp: cached.message_timestamp,
                        is_bot: false,
                    });
                }
            }
            entries.sort_by(|a, b| {
                a.timestamp
                    .partial_cmp(&b.timestamp)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            if entries.len() > limit {
                let excess = entries.len() - limit;
                entries.drain(0..excess);
            }
        }

        let current = format!(
            "{}(ID:{}): {}",
            event.sender_name, event.sender_id, current_text
        );
        format_context_for_ai(
            &entries,
            &current,
            self.config.context.include_timestamp,
            self.config.context.include_sender_info,
        )
    }

    /// Judge said no: the user message still goes into the shadow history
    /// so the next context window doesn't have a hole in it.
    async fn persist_declined_user_message(
        &self,
        chat: &ChatKey,
        event: &GroupMessageEvent,
        resolved_text: &str,
    ) {
        let message = StoredMessage::user(
            &event.sender_id,
            &event.sender_name,
            resolved_text,
            event.timestamp,
        );
        if let Err(e) = self.history.append(chat, message).await {
            error!(chat = %chat, "failed to persist declined message: {e}");
        }
    }

    /// Bounded wait on peers working the same chat (including an active
    /// proactive generation). On expiry, warn and proceed.
    async fn wait_for_chat(&self, chat: &ChatKey) {
        let max_loops = self.config.core.concurrent_wait_max_loops;
        let interval = Duration::from_secs_f64(self.config.core.concurrent_wait_interval.max(0.01));
        for _ in 0..max_loops {
            let busy = self.busy_chats.contains_key(chat) || self.proactive.is_processing(chat);
            if !busy {
                return;
            }
            tokio::time::sleep(interval).await;
        }
        warn!(chat = %chat, "concurrent wait expired, proceeding anyway");
    }

    // --- reply & post-send ---------------------------------------------------

    async fn reply_flow(
        &self,
        event: &GroupMessageEvent,
        chat: &ChatKey,
        resolved_text: &str,
        trigger: &TriggerClass,
        empty_at: bool,
    ) -> MessageDisposition {
        let system_prompt = match self.deps.personas.system_prompt(&event.origin).await {
            Ok(prompt) => prompt,
            Err(e) => {
                warn!(chat = %chat, "persona lookup failed, replying without persona: {e}");
                String::new()
            }
        };
        let mut user_prompt = self.build_context_block(chat, event, resolved_text).await;
        if empty_at {
            user_prompt.push_str(
                "\n(The user just pinged you without content — greet them briefly.)",
            );
        }
        if let Some(hint) = self.attention.poke_trace_hint(chat).await {
            user_prompt.push_str(&format!("\n({hint})"));
        }

        let request = ReplyRequest {
            chat: chat.clone(),
            origin: event.origin.clone(),
            session_id: event.origin.clone(),
            system_prompt,
            user_prompt,
            memory_query: resolved_text.to_string(),
            image_urls: event.image_urls(),
        };

        let outcome = self
            .orchestrator
            .generate_and_send(
                self.deps.provider.as_ref(),
                self.deps.memory.as_deref(),
                self.deps.personas.as_ref(),
                self.deps.tools.as_ref(),
                self.deps.platform.as_ref(),
                &self.recent,
                &self.mood,
                request,
            )
            .await;

        match outcome {
            Ok(Some(outcome)) => {
                let duplicate = outcome.duplicate_blocked;
                self.after_send(event, chat, trigger, resolved_text, &outcome.save_text, duplicate)
                    .await;
                if duplicate {
                    MessageDisposition::ReplySuppressed
                } else {
                    MessageDisposition::Replied
                }
            }
            Ok(None) => {
                self.marks.remove(&event.message_id);
                self.cache.drop_snapshot(&event.message_id);
                MessageDisposition::ReplySuppressed
            }
            Err(e) => {
                // AI-error path: no success/failure bookkeeping, no
                // attention changes — just clean up the coordination state.
                error!(chat = %chat, "reply generation failed: {e}");
                self.marks.remove(&event.message_id);
                self.cache.drop_snapshot(&event.message_id);
                MessageDisposition::Errored
            }
        }
    }

    /// The post-send transaction: shadow saves, cache promotion, attention
    /// and frequency bookkeeping. `bot_text = None` side effects still run
    /// on a duplicate block (the attempt counts; only the bot row is
    /// skipped).
    async fn after_send(
        &self,
        event: &GroupMessageEvent,
        chat: &ChatKey,
        trigger: &TriggerClass,
        resolved_text: &str,
        save_text: &str,
        duplicate_blocked: bool,
    ) {
        // Wait out a proactive generation racing on the same cache.
        for _ in 0..PROACTIVE_WAIT_LOOPS {
            if !self.proactive.is_processing(chat) {
                break;
            }
            tokio::time::sleep(Duration::from_secs_f64(PROACTIVE_WAIT_INTERVAL)).await;
        }

        // Shadow history: user message (from the snapshot) then bot reply.
        let user_snapshot = self.cache.take_snapshot(&event.message_id);
        let user_content = user_snapshot
            .as_ref()
            .map(|m| m.content.clone())
            .unwrap_or_else(|| format!("{}: {}", event.sender_name, resolved_text));
        if let Err(e) = self
            .history
            .append(
                chat,
                StoredMessage::user(&event.sender_id, &event.sender_name, &user_content, event.timestamp),
            )
            .await
        {
            error!(chat = %chat, "shadow user save failed: {e}");
        }
        if !duplicate_blocked {
            if let Err(e) = self
                .history
                .append(
                    chat,
                    StoredMessage::bot(&event.self_id, "murmur", save_text, unix_now()),
                )
                .await
            {
                error!(chat = %chat, "shadow bot save failed: {e}");
            }
        }

        // Promotion batch: everything older than the current message whose
        // id is not being processed by a peer handler.
        self.marks.remove(&event.message_id);
        let excluded: HashSet<String> = self
            .marks
            .iter()
            .filter(|entry| entry.value().kind == MarkKind::Processing)
            .map(|entry| entry.key().clone())
            .collect();
        let batch = self.cache.promotable(chat, event.timestamp, &excluded);
        let bot_row = if duplicate_blocked { None } else { Some(save_text) };
        let title = format!("Group {}", event.chat_id);
        if let Err(e) = promote_to_official(
            self.deps.conversations.as_ref(),
            &event.origin,
            &event.platform_id,
            &title,
            &batch,
            Some(&user_content),
            bot_row,
        )
        .await
        {
            // Keep the cache on failure; the next reply retries promotion.
            error!(chat = %chat, "promotion failed, cache retained: {e}");
        } else {
            self.cache.clear_promoted(chat, event.timestamp, &excluded);
        }

        // Attention: a forced trigger breaks any fatigue streak first.
        if trigger.should_treat_as_at {
            self.attention
                .reset_consecutive_replies(chat, &event.sender_id)
                .await;
        }
        self.attention
            .record_replied_user(chat, &event.sender_id, &event.sender_name, resolved_text)
            .await;

        // Release the sender's cooldown for the trigger that reached them.
        let release = if trigger.is_at_message {
            ReleaseTrigger::At
        } else if trigger.has_trigger_keyword {
            ReleaseTrigger::Keyword
        } else {
            ReleaseTrigger::Normal
        };
        let attention_ids = self.attention.attention_user_ids(chat).await;
        self.attention
            .cooldowns()
            .sync_with_attention_list(chat, &attention_ids)
            .await;
        self.attention
            .cooldowns()
            .try_release_on_reply(chat, &event.sender_id, release, Some(&attention_ids))
            .await;

        // Frequency + proactive bookkeeping.
        self.tuner.record_reply(chat);
        self.proactive.record_bot_reply(chat, false).await;

        // Optional follow-up poke.
        let poke = &self.config.poke;
        if poke.enable_poke_after_reply
            && !duplicate_blocked
            && rand::thread_rng().gen::<f64>() < poke.poke_after_reply_probability
        {
            let platform = Arc::clone(&self.deps.platform);
            let origin = event.origin.clone();
            let target = event.sender_id.clone();
            let delay = Duration::from_secs_f64(poke.poke_after_reply_delay.max(0.0));
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Err(e) = platform.send_poke(&origin, &target).await {
                    debug!("post-reply poke failed: {e}");
                }
            });
        }

        info!(
            chat = %chat,
            sender = %event.sender_id,
            duplicate_blocked,
            "reply transaction complete"
        );
    }

    // --- proactive generation ------------------------------------------------

    /// Generate and send a proactive message for a silent chat. Called by
    /// the scheduler through the delegate interface; the scheduler owns
    /// the outcome bookkeeping around it.
    ///
    /// Returns the generated text even when the send was
    /// duplicate-suppressed (the attempt still counts), `None` when
    /// generation aborted before producing anything.
    pub async fn generate_proactive_message(
        &self,
        chat: &ChatKey,
        retry: murmur_proactive::RetryContext,
    ) -> murmur_core::Result<Option<String>> {
        let Some(send) = self.proactive.send_context(chat).await else {
            warn!(chat = %chat, "no send context yet (no organic message seen), skipping");
            return Ok(None);
        };

        // Instruction text: complaint with priority replaces the base
        // prompt; a retry prepends what was said before.
        let config = self.proactive.config();
        let mut instruction = match &retry.complaint {
            Some(complaint) if complaint.priority => complaint.prompt.trim().to_string(),
            Some(complaint) => format!("{}{}", config.proactive_prompt, complaint.prompt),
            None => config.proactive_prompt.clone(),
        };
        if retry.attempts > 0 {
            if let Some(last) = &retry.last_content {
                instruction = format!(
                    "You already tried to start a conversation with: \
                     \"{last}\" — nobody responded. Say something different \
                     this time.\n{instruction}"
                );
            }
        }

        // Attention focus: name a user or two the bot currently cares about.
        if config.enable_attention_focus {
            let ranked = self.attention.top_attention_users(chat, 4).await;
            if !ranked.is_empty() {
                let weights =
                    murmur_proactive::focus::parse_rank_weights(&config.attention_rank_weights);
                let picked = murmur_proactive::focus::pick_focus_users(
                    &ranked,
                    &weights,
                    config.attention_max_selected_users,
                    &mut rand::thread_rng(),
                );
                if let Some((id, name)) = picked.first() {
                    self.proactive.set_last_attention_user(chat, id, name).await;
                }
                if !picked.is_empty() {
                    let names: Vec<&str> = picked.iter().map(|(_, n)| n.as_str()).collect();
                    instruction.push_str(&format!(
                        "\nYou have been paying attention to: {}. You may \
                         address them directly if it feels natural.",
                        names.join(", ")
                    ));
                }
            }
            if let Some((_, name)) = &retry.last_focus_user {
                if rand::thread_rng().gen::<f64>() < config.focus_last_user_probability {
                    instruction.push_str(&format!(
                        "\nLast time you were focused on {name}; continuing \
                         with them is a good option."
                    ));
                }
            }
        }

        // Context: shadow history + pending cache, like the organic path,
        // with the instruction standing in for the current message.
        let limit = self.config.context.effective_context_limit();
        let mut entries: Vec<ContextEntry> = Vec::new();
        if limit > 0 {
            for message in self.history.recent(chat, limit).await.unwrap_or_default() {
                entries.push(ContextEntry {
                    is_bot: message.role == murmur_core::host::Role::Assistant,
                    sender_id: message.sender_id,
                    sender_name: message.sender_name,
                    content: message.content,
                    timestamp: message.timestamp,
                });
            }
            let mut seen: HashSet<String> = entries.iter().map(|e| e.content.clone()).collect();
            for cached in self.cache.all(chat) {
                if seen.insert(cached.content.clone()) {
                    entries.push(ContextEntry {
                        sender_id: cached.sender_id,
                        sender_name: cached.sender_name,
                        content: cached.content,
                        timestamp: cached.message_timestamp,
                        is_bot: false,
                    });
                }
            }
            entries.sort_by(|a, b| {
                a.timestamp
                    .partial_cmp(&b.timestamp)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            if entries.len() > limit {
                let excess = entries.len() - limit;
                entries.drain(0..excess);
            }
        }
        let user_prompt = format_context_for_ai(
            &entries,
            &format!("(No new message — you are opening the conversation.)\n{instruction}"),
            self.config.context.include_timestamp,
            self.config.context.include_sender_info,
        );

        let system_prompt = self
            .deps
            .personas
            .system_prompt(&send.origin)
            .await
            .unwrap_or_default();

        let request = ReplyRequest {
            chat: chat.clone(),
            origin: send.origin.clone(),
            session_id: send.origin.clone(),
            system_prompt,
            user_prompt,
            memory_query: instruction.clone(),
            image_urls: Vec::new(),
        };
        let outcome = self
            .orchestrator
            .generate_and_send(
                self.deps.provider.as_ref(),
                self.deps.memory.as_deref(),
                self.deps.personas.as_ref(),
                self.deps.tools.as_ref(),
                self.deps.platform.as_ref(),
                &self.recent,
                &self.mood,
                request,
            )
            .await?;

        let Some(outcome) = outcome else {
            return Ok(None);
        };

        // Transactional promotion: pending cache + the marked synthetic
        // prompt entry + the reply. The proactive marker survives so the
        // host can tell this entry from organic traffic.
        let batch = self.cache.all(chat);
        let marked_prompt = clean::mark_proactive(&instruction);
        let bot_row = if outcome.duplicate_blocked {
            None
        } else {
            Some(outcome.save_text.as_str())
        };
        let title = format!("Group {}", chat.chat_id);
        match promote_to_official(
            self.deps.conversations.as_ref(),
            &send.origin,
            &send.platform_id,
            &title,
            &batch,
            Some(&marked_prompt),
            bot_row,
        )
        .await
        {
            Ok(_) => {
                self.cache
                    .clear_promoted(chat, f64::INFINITY, &HashSet::new());
            }
            Err(e) => {
                error!(chat = %chat, "proactive promotion failed, cache retained: {e}");
            }
        }
        if !outcome.duplicate_blocked {
            if let Err(e) = self
                .history
                .append(chat, StoredMessage::bot("self", "murmur", &outcome.save_text, unix_now()))
                .await
            {
                error!(chat = %chat, "proactive shadow save failed: {e}");
            }
        }

        info!(chat = %chat, duplicate_blocked = outcome.duplicate_blocked, "proactive message generated");
        Ok(Some(outcome.save_text))
    }

    /// Drop expired command marks and reap processing marks from crashed
    /// handlers.
    fn prune_marks(&self) {
        let now = unix_now();
        self.marks.retain(|_, mark| match mark.kind {
            MarkKind::Command => now - mark.at < COMMAND_MARK_TTL,
            MarkKind::Processing => now - mark.at < PROCESSING_MARK_TTL,
        });
    }
}
