//! Reply orchestration: prompt assembly extras (memory, tools, mood), the
//! LLM call, and the post-LLM transformation chain — typo injection,
//! typing delay, output filtering, duplicate suppression, send, and the
//! independent save-side filter.

use std::sync::Arc;

use tracing::{debug, info, warn};

use murmur_core::config::{MemoryTiming, MurmurConfig};
use murmur_core::host::{ChatProvider, ChatRequest, MemoryProvider, PersonaSource, PlatformLink, ToolRegistry};
use murmur_core::{ChatKey, Result};
use murmur_history::RecentReplies;
use murmur_humanize::{FilterSet, MoodTracker, TypingSimulator, TypoGenerator};

use crate::memory::MemoryInjector;
use crate::tools::inject_tools;

/// What happened to one generated reply.
#[derive(Debug, Clone)]
pub struct ReplyOutcome {
    /// The model's raw completion.
    pub raw_text: String,
    /// What actually went to the platform; `None` when suppressed.
    pub sent_text: Option<String>,
    /// What should be persisted to history (save-side filter applied).
    pub save_text: String,
    /// Send was suppressed because a recent reply matched.
    pub duplicate_blocked: bool,
}

pub struct ReplyRequest {
    pub chat: ChatKey,
    pub origin: String,
    pub session_id: String,
    pub system_prompt: String,
    /// Formatted context block + current message.
    pub user_prompt: String,
    /// What to search memories for (normally the bare user message).
    pub memory_query: String,
    pub image_urls: Vec<String>,
}

pub struct ReplyOrchestrator {
    config: Arc<MurmurConfig>,
    output_filter: FilterSet,
    save_filter: FilterSet,
    typo: TypoGenerator,
    typing: TypingSimulator,
    memory_injector: MemoryInjector,
}

impl ReplyOrchestrator {
    pub fn new(config: Arc<MurmurConfig>) -> Self {
        let output_filter = FilterSet::new(
            config.content_filter.enable_output_content_filter,
            &config.content_filter.output_content_filter_rules,
        );
        let save_filter = FilterSet::new(
            config.content_filter.enable_save_content_filter,
            &config.content_filter.save_content_filter_rules,
        );
        let typo = TypoGenerator::new(config.typo.clone());
        let typing = TypingSimulator::new(config.typing.clone());
        let memory_injector = MemoryInjector::new(config.memory.clone());
        Self {
            config,
            output_filter,
            save_filter,
            typo,
            typing,
            memory_injector,
        }
    }

    /// Generate a reply and push it through the outbound chain.
    ///
    /// Returns `None` when the reply died before anything was produced
    /// (empty completion, or emptied by the output filter). A duplicate
    /// block returns `Some` with `sent_text = None` — the attempt still
    /// counts for the caller's bookkeeping.
    #[allow(clippy::too_many_arguments)]
    pub async fn generate_and_send(
        &self,
        provider: &dyn ChatProvider,
        memory: Option<&dyn MemoryProvider>,
        personas: &dyn PersonaSource,
        tools: &dyn ToolRegistry,
        platform: &dyn PlatformLink,
        recent: &RecentReplies,
        mood: &MoodTracker,
        request: ReplyRequest,
    ) -> Result<Option<ReplyOutcome>> {
        let mut user_prompt = request.user_prompt;

        // 1. Memory (post-decision timing; the pre-decision variant runs in
        //    the decision engine before the judge call).
        if self.config.memory.memory_injection_timing == MemoryTiming::PostDecision {
            if let Some(memory) = memory {
                user_prompt = self
                    .memory_injector
                    .inject(memory, personas, &request.session_id, &request.memory_query, &user_prompt)
                    .await;
            }
        }

        // 2. Tools reminder.
        user_prompt = inject_tools(&user_prompt, tools);

        // 3. Mood line on top of the system prompt.
        let mut system_prompt = request.system_prompt;
        if let Some(mood_line) = mood.describe(&request.chat) {
            system_prompt = format!("{mood_line}\n{system_prompt}");
        }

        // 4. The LLM call.
        let completion = provider
            .text_chat(ChatRequest {
                prompt: user_prompt,
                session_id: request.session_id.clone(),
                system_prompt,
                image_urls: request.image_urls,
                tools: tools.tools(),
                ..ChatRequest::default()
            })
            .await?;
        let raw_text = completion.completion_text.trim().to_string();
        if raw_text.is_empty() {
            debug!(chat = %request.chat, "empty completion, nothing to send");
            return Ok(None);
        }

        // 5. Typos first, then the typing pause sized to the final text.
        let humanized = self.typo.inject(&raw_text);
        self.typing.simulate_if_needed(&humanized).await;

        // 6. Output filter; an emptied reply is suppressed entirely.
        let outgoing = self.output_filter.apply(&humanized);
        if outgoing.is_empty() {
            info!(chat = %request.chat, "reply emptied by output filter, suppressed");
            return Ok(None);
        }

        // 7. Duplicate suppression: don't send, but report the attempt.
        let save_text = self.save_filter.apply(&raw_text);
        if recent.is_duplicate(&request.chat.chat_id, &outgoing) {
            info!(chat = %request.chat, "duplicate reply blocked");
            return Ok(Some(ReplyOutcome {
                raw_text,
                sent_text: None,
                save_text,
                duplicate_blocked: true,
            }));
        }

        // 8. Send.
        if let Err(e) = platform.send_message(&request.origin, &outgoing).await {
            warn!(chat = %request.chat, "send failed: {e}");
            return Err(e);
        }
        recent.record(&request.chat.chat_id, &outgoing);

        // 9. Save-side text may differ from what was sent.
        Ok(Some(ReplyOutcome {
            raw_text,
            sent_text: Some(outgoing),
            save_text,
            duplicate_blocked: false,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use murmur_core::config::DuplicateConfig;
    use murmur_core::host::ChatCompletion;
    use std::sync::Mutex;

    struct FixedProvider(String);

    #[async_trait]
    impl ChatProvider for FixedProvider {
        async fn text_chat(&self, _request: ChatRequest) -> Result<ChatCompletion> {
            Ok(ChatCompletion {
                completion_text: self.0.clone(),
            })
        }
    }

    struct NoPersona;

    #[async_trait]
    impl PersonaSource for NoPersona {
        async fn system_prompt(&self, _session_id: &str) -> Result<String> {
            Ok(String::new())
        }
        async fn persona_id(&self, _session_id: &str) -> Result<Option<String>> {
            Ok(None)
        }
    }

    struct NoTools;

    impl ToolRegistry for NoTools {
        fn tools(&self) -> Vec<murmur_core::host::ToolSpec> {
            Vec::new()
        }
    }

    #[derive(Default)]
    struct RecordingPlatform {
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl PlatformLink for RecordingPlatform {
        async fn send_message(&self, origin: &str, text: &str) -> Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((origin.to_string(), text.to_string()));
            Ok(())
        }
        async fn send_poke(&self, _origin: &str, _user_id: &str) -> Result<()> {
            Ok(())
        }
    }

    fn orchestrator(config: MurmurConfig) -> ReplyOrchestrator {
        ReplyOrchestrator::new(Arc::new(config.validated()))
    }

    fn request() -> ReplyRequest {
        ReplyRequest {
            chat: ChatKey::group("qq", "1"),
            origin: "qq:group:1".to_string(),
            session_id: "s1".to_string(),
            system_prompt: "persona".to_string(),
            user_prompt: "context".to_string(),
            memory_query: "q".to_string(),
            image_urls: Vec::new(),
        }
    }

    #[tokio::test]
    async fn reply_is_sent_and_recorded() {
        let orchestrator = orchestrator(MurmurConfig::default());
        let platform = RecordingPlatform::default();
        let recent = RecentReplies::new(DuplicateConfig::default());
        let mood = MoodTracker::new(Default::default());

        let outcome = orchestrator
            .generate_and_send(
                &FixedProvider("hello there".to_string()),
                None,
                &NoPersona,
                &NoTools,
                &platform,
                &recent,
                &mood,
                request(),
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(outcome.sent_text.as_deref(), Some("hello there"));
        assert!(!outcome.duplicate_blocked);
        assert_eq!(platform.sent.lock().unwrap().len(), 1);
        assert!(recent.is_duplicate("1", "hello there"));
    }

    #[tokio::test]
    async fn duplicate_is_blocked_but_reported() {
        let orchestrator = orchestrator(MurmurConfig::default());
        let platform = RecordingPlatform::default();
        let recent = RecentReplies::new(DuplicateConfig::default());
        recent.record("1", "hello there");
        let mood = MoodTracker::new(Default::default());

        let outcome = orchestrator
            .generate_and_send(
                &FixedProvider("hello there".to_string()),
                None,
                &NoPersona,
                &NoTools,
                &platform,
                &recent,
                &mood,
                request(),
            )
            .await
            .unwrap()
            .unwrap();

        assert!(outcome.duplicate_blocked);
        assert!(outcome.sent_text.is_none());
        // The save text still exists for history persistence.
        assert_eq!(outcome.save_text, "hello there");
        assert!(platform.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn output_filter_can_suppress_entirely() {
        let mut config = MurmurConfig::default();
        config.content_filter.enable_output_content_filter = true;
        config.content_filter.output_content_filter_rules = vec!["{{>*END".to_string()];
        let orchestrator = orchestrator(config);
        let platform = RecordingPlatform::default();
        let recent = RecentReplies::new(DuplicateConfig::default());
        let mood = MoodTracker::new(Default::default());

        let outcome = orchestrator
            .generate_and_send(
                &FixedProvider("everything before END".to_string()),
                None,
                &NoPersona,
                &NoTools,
                &platform,
                &recent,
                &mood,
                request(),
            )
            .await
            .unwrap();

        assert!(outcome.is_none());
        assert!(platform.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_filter_is_independent_of_output() {
        let mut config = MurmurConfig::default();
        config.content_filter.enable_save_content_filter = true;
        config.content_filter.save_content_filter_rules = vec!["<sig>*</sig>".to_string()];
        let orchestrator = orchestrator(config);
        let platform = RecordingPlatform::default();
        let recent = RecentReplies::new(DuplicateConfig::default());
        let mood = MoodTracker::new(Default::default());

        let outcome = orchestrator
            .generate_and_send(
                &FixedProvider("hi <sig>internal</sig>".to_string()),
                None,
                &NoPersona,
                &NoTools,
                &platform,
                &recent,
                &mood,
                request(),
            )
            .await
            .unwrap()
            .unwrap();

        // Sent text keeps the tag, saved text loses it.
        assert_eq!(outcome.sent_text.as_deref(), Some("hi <sig>internal</sig>"));
        assert_eq!(outcome.save_text, "hi");
    }

    #[tokio::test]
    async fn empty_completion_produces_nothing() {
        let orchestrator = orchestrator(MurmurConfig::default());
        let platform = RecordingPlatform::default();
        let recent = RecentReplies::new(DuplicateConfig::default());
        let mood = MoodTracker::new(Default::default());

        let outcome = orchestrator
            .generate_and_send(
                &FixedProvider("   ".to_string()),
                None,
                &NoPersona,
                &NoTools,
                &platform,
                &recent,
                &mood,
                request(),
            )
            .await
            .unwrap();
        assert!(outcome.is_none());
    }
}
