//! End-to-end pipeline tests against a mock host: filter ordering, cache
//! promotion, duplicate suppression, fatigue resets, and the proactive
//! outcome ladder.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use murmur_core::config::MurmurConfig;
use murmur_core::host::{
    ChatCompletion, ChatProvider, ChatRequest, ConversationStore, ConversationTurn,
    HistoryRecord, MessageHistory, PersonaSource, PlatformLink, ToolRegistry, ToolSpec,
};
use murmur_core::{ChatKind, Result};
use murmur_engine::{
    EngineDeps, GroupMessageEvent, MessageComponent, MessageDisposition, MurmurPlugin,
};
use murmur_proactive::ProactiveChatDelegate;

// --- mock host ---------------------------------------------------------------

/// Answers judge prompts with one canned verdict and everything else with
/// a canned reply.
struct MockProvider {
    judge_answer: Mutex<String>,
    reply: Mutex<String>,
}

impl MockProvider {
    fn new(judge_answer: &str, reply: &str) -> Self {
        Self {
            judge_answer: Mutex::new(judge_answer.to_string()),
            reply: Mutex::new(reply.to_string()),
        }
    }

    fn set_reply(&self, reply: &str) {
        *self.reply.lock().unwrap() = reply.to_string();
    }
}

#[async_trait]
impl ChatProvider for MockProvider {
    async fn text_chat(&self, request: ChatRequest) -> Result<ChatCompletion> {
        let is_judge = request.prompt.contains("Answer \"yes\" or \"no\"");
        let text = if is_judge {
            self.judge_answer.lock().unwrap().clone()
        } else {
            self.reply.lock().unwrap().clone()
        };
        Ok(ChatCompletion {
            completion_text: text,
        })
    }
}

#[derive(Default)]
struct MockConversations {
    history: Mutex<Vec<ConversationTurn>>,
    id: Mutex<Option<String>>,
}

#[async_trait]
impl ConversationStore for MockConversations {
    async fn current_conversation_id(&self, _origin: &str) -> Result<Option<String>> {
        Ok(self.id.lock().unwrap().clone())
    }

    async fn new_conversation(
        &self,
        _origin: &str,
        _platform_id: &str,
        _title: &str,
    ) -> Result<String> {
        let id = "conv".to_string();
        *self.id.lock().unwrap() = Some(id.clone());
        Ok(id)
    }

    async fn conversation_history(
        &self,
        _origin: &str,
        _conversation_id: &str,
    ) -> Result<Vec<ConversationTurn>> {
        Ok(self.history.lock().unwrap().clone())
    }

    async fn update_conversation(
        &self,
        _origin: &str,
        _conversation_id: &str,
        history: Vec<ConversationTurn>,
    ) -> Result<()> {
        *self.history.lock().unwrap() = history;
        Ok(())
    }
}

struct EmptyMessageHistory;

#[async_trait]
impl MessageHistory for EmptyMessageHistory {
    async fn page(
        &self,
        _platform_id: &str,
        _chat_id: &str,
        _page: usize,
        _page_size: usize,
    ) -> Result<Vec<HistoryRecord>> {
        Ok(Vec::new())
    }

    async fn insert(
        &self,
        _platform_id: &str,
        _chat_id: &str,
        _record: HistoryRecord,
    ) -> Result<()> {
        Ok(())
    }
}

struct NoTools;

impl ToolRegistry for NoTools {
    fn tools(&self) -> Vec<ToolSpec> {
        Vec::new()
    }
}

struct FixedPersona;

#[async_trait]
impl PersonaSource for FixedPersona {
    async fn system_prompt(&self, _session_id: &str) -> Result<String> {
        Ok("You are murmur.".to_string())
    }

    async fn persona_id(&self, _session_id: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

#[derive(Default)]
struct MockPlatform {
    sent: Mutex<Vec<String>>,
    pokes: Mutex<Vec<String>>,
}

#[async_trait]
impl PlatformLink for MockPlatform {
    async fn send_message(&self, _origin: &str, text: &str) -> Result<()> {
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn send_poke(&self, _origin: &str, user_id: &str) -> Result<()> {
        self.pokes.lock().unwrap().push(user_id.to_string());
        Ok(())
    }
}

struct Harness {
    plugin: MurmurPlugin,
    provider: Arc<MockProvider>,
    conversations: Arc<MockConversations>,
    platform: Arc<MockPlatform>,
    _dir: tempfile::TempDir,
}

fn harness_with(mut config: MurmurConfig, judge_answer: &str, reply: &str) -> Harness {
    // Keep the pipeline deterministic by default.
    config.typing.enable_typing_simulation = false;
    config.typo.enable_typo_injection = false;
    let provider = Arc::new(MockProvider::new(judge_answer, reply));
    let conversations = Arc::new(MockConversations::default());
    let platform = Arc::new(MockPlatform::default());
    let deps = EngineDeps {
        provider: provider.clone(),
        conversations: conversations.clone(),
        message_history: Arc::new(EmptyMessageHistory),
        tools: Arc::new(NoTools),
        personas: Arc::new(FixedPersona),
        memory: None,
        captions: None,
        platform: platform.clone(),
    };
    let dir = tempfile::tempdir().unwrap();
    let plugin = MurmurPlugin::new(config, deps, dir.path());
    Harness {
        plugin,
        provider,
        conversations,
        platform,
        _dir: dir,
    }
}

fn harness(judge_answer: &str, reply: &str) -> Harness {
    harness_with(MurmurConfig::default(), judge_answer, reply)
}

fn event(id: &str, sender: &str, ts: f64, components: Vec<MessageComponent>) -> GroupMessageEvent {
    GroupMessageEvent {
        platform_name: "qq".to_string(),
        platform_id: "qq-main".to_string(),
        chat_kind: ChatKind::Group,
        chat_id: "879646332".to_string(),
        origin: "qq:group:879646332".to_string(),
        message_id: id.to_string(),
        sender_id: sender.to_string(),
        sender_name: format!("user-{sender}"),
        self_id: "botid".to_string(),
        timestamp: ts,
        components,
    }
}

fn text_event(id: &str, sender: &str, ts: f64, text: &str) -> GroupMessageEvent {
    event(
        id,
        sender,
        ts,
        vec![MessageComponent::Text {
            text: text.to_string(),
        }],
    )
}

fn at_event(id: &str, sender: &str, ts: f64, text: &str) -> GroupMessageEvent {
    let mut components = vec![MessageComponent::Mention {
        user_id: "botid".to_string(),
        user_name: None,
        is_all: false,
    }];
    if !text.is_empty() {
        components.push(MessageComponent::Text {
            text: text.to_string(),
        });
    }
    event(id, sender, ts, components)
}

// --- filter ordering ----------------------------------------------------------

#[tokio::test]
async fn disabled_plugin_does_nothing() {
    let mut config = MurmurConfig::default();
    config.core.enable_group_chat = false;
    let h = harness_with(config, "yes", "hi");
    let disposition = h.plugin.on_group_message(&at_event("m1", "u1", 1.0, "hey")).await;
    assert_eq!(disposition, MessageDisposition::Disabled);
    assert!(h.platform.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn commands_are_marked_and_skipped() {
    let h = harness("yes", "hi");
    let disposition = h
        .plugin
        .on_group_message(&text_event("m1", "u1", 1.0, "/status now"))
        .await;
    assert_eq!(disposition, MessageDisposition::Command);
    assert!(h.plugin.engine().is_command_marked("m1"));
    assert!(h.platform.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn at_all_is_ignored() {
    let h = harness("yes", "hi");
    let e = event(
        "m1",
        "u1",
        1.0,
        vec![
            MessageComponent::Mention {
                user_id: String::new(),
                user_name: None,
                is_all: true,
            },
            MessageComponent::Text {
                text: "everyone look".to_string(),
            },
        ],
    );
    assert_eq!(
        h.plugin.on_group_message(&e).await,
        MessageDisposition::AtAllIgnored
    );
}

#[tokio::test]
async fn blacklisted_user_is_dropped_even_with_mention() {
    let mut config = MurmurConfig::default();
    config.user_filter.enable_user_blacklist = true;
    config.user_filter.blacklist_user_ids = vec!["u666".to_string()];
    let h = harness_with(config, "yes", "hi");
    let disposition = h
        .plugin
        .on_group_message(&at_event("m1", "u666", 1.0, "reply to me"))
        .await;
    assert_eq!(disposition, MessageDisposition::BlacklistedUser);
}

#[tokio::test]
async fn poke_marker_spoof_is_discarded() {
    let h = harness("yes", "hi");
    let disposition = h
        .plugin
        .on_group_message(&text_event("m1", "u1", 1.0, "[poke]"))
        .await;
    assert_eq!(disposition, MessageDisposition::PokeSpoof);
}

// --- scenario: empty at-mention ----------------------------------------------

#[tokio::test]
async fn empty_at_mention_forces_reply_and_boosts_attention() {
    let h = harness("no", "oh hey, what's up?");
    let disposition = h
        .plugin
        .on_group_message(&at_event("m1", "u1", 1.0, ""))
        .await;
    // Judge says "no", but @ forces the reply anyway.
    assert_eq!(disposition, MessageDisposition::Replied);
    assert_eq!(h.platform.sent.lock().unwrap().len(), 1);

    let chat = at_event("m1", "u1", 1.0, "").chat_key();
    let snapshot = h
        .plugin
        .engine()
        .attention()
        .profile_snapshot(&chat, "u1")
        .await
        .expect("profile created by the reply");
    // Fresh user: attention is one boost step (modulo sub-second decay).
    assert!((snapshot.attention - 0.4).abs() < 1e-3);
    assert_eq!(snapshot.consecutive_replies, 1);
}

// --- probability gate ----------------------------------------------------------

#[tokio::test]
async fn zero_probability_messages_are_cached_minimal() {
    let mut config = MurmurConfig::default();
    config.core.initial_probability = 0.0;
    config.core.after_reply_probability = 0.0;
    config.attention.enable_attention_mechanism = false;
    config.spillover.enable_attention_spillover = false;
    let h = harness_with(config, "yes", "hi");

    let disposition = h
        .plugin
        .on_group_message(&text_event("m1", "u1", 1.0, "just chatting"))
        .await;
    assert_eq!(disposition, MessageDisposition::ProbabilityFiltered);

    let chat = text_event("m1", "u1", 1.0, "x").chat_key();
    let cached = h.plugin.engine().cache().all(&chat);
    assert_eq!(cached.len(), 1);
    assert!(cached[0].is_probability_filtered());
}

#[tokio::test]
async fn judge_decline_saves_message_and_lowers_attention() {
    let mut config = MurmurConfig::default();
    // Pin the gate open so the judge is always consulted.
    config.hard_limit.enable_probability_hard_limit = true;
    config.hard_limit.probability_min_limit = 1.0;
    config.hard_limit.probability_max_limit = 1.0;
    let h = harness_with(config, "no", "ignored");

    // Build attention above the decrease threshold first.
    h.plugin.on_group_message(&at_event("m0", "u1", 1.0, "hi")).await;
    let chat = at_event("m0", "u1", 1.0, "x").chat_key();
    let before = h
        .plugin
        .engine()
        .attention()
        .profile_snapshot(&chat, "u1")
        .await
        .unwrap()
        .attention;

    let disposition = h
        .plugin
        .on_group_message(&text_event("m1", "u1", 2.0, "talking to someone else"))
        .await;
    assert_eq!(disposition, MessageDisposition::JudgeDeclined);

    let after = h
        .plugin
        .engine()
        .attention()
        .profile_snapshot(&chat, "u1")
        .await
        .unwrap()
        .attention;
    assert!(after < before, "no-reply must lower attention ({before} → {after})");

    // Continuity: the declined message still landed in the shadow history.
    let shadow = h.plugin.engine().history().recent(&chat, 10).await.unwrap();
    assert!(shadow
        .iter()
        .any(|m| m.content.contains("talking to someone else")));
}

// --- scenario: cache promotion ordering ----------------------------------------

#[tokio::test]
async fn promotion_appends_cached_messages_in_timestamp_order() {
    let mut config = MurmurConfig::default();
    config.core.initial_probability = 0.0;
    config.core.after_reply_probability = 0.0;
    config.attention.enable_attention_mechanism = false;
    config.spillover.enable_attention_spillover = false;
    let h = harness_with(config, "yes", "here's my reply");

    // Two messages fail the probability gate and stay cached.
    h.plugin
        .on_group_message(&text_event("t1", "u1", 10.0, "first"))
        .await;
    h.plugin
        .on_group_message(&text_event("t2", "u2", 11.0, "second"))
        .await;
    // The third is an @, so the bot replies.
    let disposition = h
        .plugin
        .on_group_message(&at_event("t3", "u3", 12.0, "bot, thoughts?"))
        .await;
    assert_eq!(disposition, MessageDisposition::Replied);

    let history = h.conversations.history.lock().unwrap();
    let texts: Vec<String> = history.iter().map(|t| t.content.text()).collect();
    assert_eq!(texts.len(), 4, "two cached + current user + bot: {texts:?}");
    assert!(texts[0].contains("first"));
    assert!(texts[1].contains("second"));
    assert!(texts[2].contains("thoughts"));
    assert_eq!(texts[3], "here's my reply");

    // Promoted entries are gone from the pending cache.
    let chat = text_event("t1", "u1", 10.0, "x").chat_key();
    assert!(h.plugin.engine().cache().is_empty(&chat));
}

// --- scenario: duplicate suppression -------------------------------------------

#[tokio::test]
async fn duplicate_reply_is_suppressed_but_user_message_persists() {
    let h = harness("yes", "hello everyone");

    // First @ sends the reply and records it.
    let first = h
        .plugin
        .on_group_message(&at_event("m1", "u1", 1.0, "hi bot"))
        .await;
    assert_eq!(first, MessageDisposition::Replied);

    // Second @ produces the same completion: blocked.
    let second = h
        .plugin
        .on_group_message(&at_event("m2", "u2", 2.0, "hi again bot"))
        .await;
    assert_eq!(second, MessageDisposition::ReplySuppressed);
    assert_eq!(h.platform.sent.lock().unwrap().len(), 1);

    // The triggering user message still reached the official history,
    // without a second bot row.
    let history = h.conversations.history.lock().unwrap();
    let texts: Vec<String> = history.iter().map(|t| t.content.text()).collect();
    assert!(texts.iter().any(|t| t.contains("hi again bot")));
    assert_eq!(
        texts.iter().filter(|t| *t == "hello everyone").count(),
        1,
        "bot reply must not be duplicated: {texts:?}"
    );
}

// --- fatigue reset on forced trigger -------------------------------------------

#[tokio::test]
async fn at_mention_resets_consecutive_replies() {
    let mut config = MurmurConfig::default();
    config.fatigue.enable_conversation_fatigue = true;
    config.fatigue.fatigue_threshold_light = 2;
    config.fatigue.fatigue_threshold_medium = 3;
    config.fatigue.fatigue_threshold_heavy = 4;
    let h = harness_with(config, "yes", "sure");

    // Build up a streak via repeated @s... each forced reply resets first,
    // so the streak stays at 1.
    for i in 0..4 {
        h.plugin
            .on_group_message(&at_event(&format!("m{i}"), "u1", i as f64 + 1.0, "chat"))
            .await;
    }
    let chat = at_event("m0", "u1", 1.0, "x").chat_key();
    let snapshot = h
        .plugin
        .engine()
        .attention()
        .profile_snapshot(&chat, "u1")
        .await
        .unwrap();
    assert_eq!(snapshot.consecutive_replies, 1);
}

// --- proactive: scenario 3 (cooldown after repeated silence) --------------------

#[tokio::test]
async fn proactive_cooldown_after_three_silent_windows() {
    let mut config = MurmurConfig::default();
    config.proactive.enable_proactive_chat = true;
    config.proactive.enable_quiet_time = false;
    config.proactive.enable_adaptive_scoring = false;
    config.proactive.max_consecutive_failures = 3;
    config.proactive.failure_threshold_perturbation = 0.0;
    config.proactive.failure_sequence_probability = -1.0;
    config.proactive.temp_boost_duration = 0; // window expires immediately
    let h = harness_with(config, "yes", "anyone here?");

    // Seed a send context via one organic message.
    h.plugin
        .on_group_message(&text_event("m0", "u1", 1.0, "/cmd"))
        .await;
    h.plugin
        .on_group_message(&at_event("m1", "u1", 1.0, "hello bot"))
        .await;

    let chat = text_event("m0", "u1", 1.0, "x").chat_key();
    let proactive = h.plugin.engine().proactive();

    for round in 0..3 {
        h.provider.set_reply(&format!("anyone here? round {round}"));
        let text = h
            .plugin
            .engine()
            .generate_proactive(&chat, Default::default())
            .await
            .unwrap()
            .expect("generation should produce text");
        proactive.record_bot_reply(&chat, true).await;
        proactive.set_last_proactive_content(&chat, &text).await;
        proactive.activate_temp_boost(&chat).await;
        // Window (duration 0) expires unanswered.
        proactive.record_failure(&chat).await;
    }

    assert!(proactive.is_in_cooldown(&chat).await);
    let state = proactive.state_view(&chat).await.unwrap();
    assert_eq!(state.total_proactive_failures, 3);
    assert_eq!(state.consecutive_failures, 0);
    assert_eq!(state.proactive_attempts_count, 0);
    assert!((proactive.temp_boost(&chat).await).abs() < 1e-9);
}

// --- proactive: success via organic reply decision ------------------------------

#[tokio::test]
async fn reply_during_boost_window_marks_proactive_success() {
    let mut config = MurmurConfig::default();
    config.proactive.enable_proactive_chat = true;
    config.proactive.enable_quiet_time = false;
    // Judge says "no" so only forced triggers reply — keeps the sequence
    // deterministic.
    let h = harness_with(config, "no", "nice to hear from you");

    // Seed identity, then a proactive send opens the window.
    h.plugin
        .on_group_message(&at_event("m1", "u1", 1.0, "hello bot"))
        .await;
    let chat = at_event("m1", "u1", 1.0, "x").chat_key();
    let proactive = h.plugin.engine().proactive();
    proactive.record_bot_reply(&chat, true).await;
    proactive.activate_temp_boost(&chat).await;

    // Two users speak, then the bot decides to reply.
    h.plugin
        .on_group_message(&text_event("m2", "u2", 2.0, "oh hi"))
        .await;
    let disposition = h
        .plugin
        .on_group_message(&at_event("m3", "u3", 3.0, "welcome back bot"))
        .await;
    assert_eq!(disposition, MessageDisposition::Replied);

    let state = proactive.state_view(&chat).await.unwrap();
    assert!(state.proactive_outcome_recorded);
    assert!(!state.proactive_active);
    assert_eq!(state.consecutive_successes, 1);
    assert!(state.interaction_score > 50, "score should rise on success");
}

// --- proactive generation path --------------------------------------------------

#[tokio::test]
async fn proactive_generation_promotes_marked_prompt() {
    let mut config = MurmurConfig::default();
    config.proactive.enable_proactive_chat = true;
    config.proactive.enable_quiet_time = false;
    let h = harness_with(config, "yes", "so, what's everyone working on?");

    h.plugin
        .on_group_message(&at_event("m1", "u1", 1.0, "hi bot"))
        .await;
    let chat = at_event("m1", "u1", 1.0, "x").chat_key();

    let text = h
        .plugin
        .engine()
        .generate_proactive(&chat, Default::default())
        .await
        .unwrap()
        .expect("proactive text");
    assert_eq!(text, "so, what's everyone working on?");
    assert_eq!(h.platform.sent.lock().unwrap().len(), 2); // @-reply + proactive

    let history = h.conversations.history.lock().unwrap();
    let texts: Vec<String> = history.iter().map(|t| t.content.text()).collect();
    assert!(
        texts.iter().any(|t| t.starts_with("[proactive]")),
        "synthetic prompt entry must keep its marker: {texts:?}"
    );
    assert!(texts.iter().any(|t| t == "so, what's everyone working on?"));
}

// --- lifecycle -------------------------------------------------------------------

#[tokio::test]
async fn initialize_and_terminate_round_trip() {
    let h = harness("yes", "hi");
    h.plugin.initialize().await;
    h.plugin.on_group_message(&at_event("m1", "u1", 1.0, "hey")).await;
    h.plugin.terminate().await;
}

#[tokio::test]
async fn reset_commands_respect_allowlists() {
    let mut config = MurmurConfig::default();
    config.reset.reset_allowed_user_ids = vec!["admin".to_string()];
    config.reset.reset_here_allowed_user_ids = vec!["admin".to_string()];
    let h = harness_with(config, "yes", "hi");
    let chat = at_event("m1", "u1", 1.0, "x").chat_key();

    assert!(h.plugin.reset_all("rando").await.is_none());
    assert!(h.plugin.reset_here("rando", &chat).await.is_none());
    assert!(h.plugin.reset_all("admin").await.is_some());
    assert!(h.plugin.reset_here("admin", &chat).await.is_some());
}
