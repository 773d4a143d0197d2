//! The full configuration surface (murmur.toml + MURMUR_* env overrides).
//!
//! Every option the decision core recognizes lives here, grouped by the
//! subsystem it feeds. Out-of-range values are repaired in [`MurmurConfig::validated`]
//! with a single warning per repair rather than rejected, so a bad config
//! never takes the plugin down.

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Hard cap on the pending-message cache, regardless of config.
pub const PENDING_CACHE_HARD_CAP: usize = 50;
/// Hard cap on the pending-message TTL (seconds).
pub const PENDING_CACHE_TTL_CAP: u64 = 7200;
/// Hard cap on formatted context entries, even with `max_context_messages = -1`.
pub const CONTEXT_HARD_CAP: usize = 500;
/// Official history is truncated to this many rows on every promotion.
pub const OFFICIAL_HISTORY_CAP: usize = 150;
/// Hard cap on the duplicate-filter window.
pub const DUPLICATE_CHECK_CAP: usize = 50;
/// Recent replies kept per chat: `2 × duplicate_filter_check_count`, capped.
pub const RECENT_REPLIES_HARD_CAP: usize = 100;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MurmurConfig {
    #[serde(default)]
    pub core: CoreConfig,
    #[serde(default)]
    pub judge: JudgeConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub image: ImageConfig,
    #[serde(default)]
    pub keywords: KeywordConfig,
    #[serde(default)]
    pub commands: CommandConfig,
    #[serde(default)]
    pub user_filter: UserFilterConfig,
    #[serde(default)]
    pub mention: MentionConfig,
    #[serde(default)]
    pub poke: PokeConfig,
    #[serde(default)]
    pub attention: AttentionConfig,
    #[serde(default)]
    pub emotion: EmotionConfig,
    #[serde(default)]
    pub spillover: SpilloverConfig,
    #[serde(default)]
    pub cooldown: CooldownConfig,
    #[serde(default)]
    pub fatigue: FatigueConfig,
    #[serde(default)]
    pub humanize: HumanizeConfig,
    #[serde(default)]
    pub typo: TypoConfig,
    #[serde(default)]
    pub typing: TypingConfig,
    #[serde(default)]
    pub mood: MoodConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub proactive: ProactiveConfig,
    #[serde(default)]
    pub reply_periods: TimePeriodConfig,
    #[serde(default)]
    pub proactive_periods: TimePeriodConfig,
    #[serde(default)]
    pub hard_limit: HardLimitConfig,
    #[serde(default)]
    pub content_filter: ContentFilterConfig,
    #[serde(default)]
    pub duplicate: DuplicateConfig,
    #[serde(default)]
    pub reset: ResetConfig,
}

impl MurmurConfig {
    /// Load from a TOML file with MURMUR_* env var overrides, then repair
    /// out-of-range values.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let mut figment = Figment::new();
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }
        let config: MurmurConfig = figment
            .merge(Env::prefixed("MURMUR_").split("__"))
            .extract()
            .map_err(|e| crate::error::MurmurError::Config(e.to_string()))?;
        Ok(config.validated())
    }

    /// Repair every out-of-range option. Called once at load; use sites can
    /// assume the invariants documented on each group.
    pub fn validated(mut self) -> Self {
        self.cache.repair();
        self.context.repair();
        self.fatigue.repair();
        self.attention.repair();
        self.duplicate.repair();
        self.proactive.repair();
        self.hard_limit.repair();
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Master switch; when false, inbound handlers return without side effects.
    #[serde(default = "bool_true")]
    pub enable_group_chat: bool,
    /// Group whitelist; empty = all groups.
    #[serde(default)]
    pub enabled_groups: Vec<String>,
    #[serde(default)]
    pub debug_mode: bool,
    /// Resting reply probability per chat.
    #[serde(default = "default_initial_probability")]
    pub initial_probability: f64,
    /// Probability right after the bot has replied in a chat.
    #[serde(default = "default_after_reply_probability")]
    pub after_reply_probability: f64,
    /// Seconds over which the after-reply boost decays back to resting.
    #[serde(default = "default_probability_duration")]
    pub probability_duration: u64,
    /// Concurrency gate: max polls waiting on a peer handler for the same chat.
    #[serde(default = "default_concurrent_wait_max_loops")]
    pub concurrent_wait_max_loops: u32,
    /// Concurrency gate: seconds between polls.
    #[serde(default = "default_concurrent_wait_interval")]
    pub concurrent_wait_interval: f64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            enable_group_chat: true,
            enabled_groups: Vec::new(),
            debug_mode: false,
            initial_probability: default_initial_probability(),
            after_reply_probability: default_after_reply_probability(),
            probability_duration: default_probability_duration(),
            concurrent_wait_max_loops: default_concurrent_wait_max_loops(),
            concurrent_wait_interval: default_concurrent_wait_interval(),
        }
    }
}

fn default_initial_probability() -> f64 {
    0.08
}
fn default_after_reply_probability() -> f64 {
    0.4
}
fn default_probability_duration() -> u64 {
    120
}
fn default_concurrent_wait_max_loops() -> u32 {
    20
}
fn default_concurrent_wait_interval() -> f64 {
    0.5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeConfig {
    /// Provider routed to for the yes/no decision; None = the session provider.
    #[serde(default)]
    pub decision_ai_provider_id: Option<String>,
    #[serde(default = "default_decision_ai_timeout")]
    pub decision_ai_timeout: u64,
    /// Extra instructions appended to the decision prompt.
    #[serde(default)]
    pub decision_ai_extra_prompt: String,
    #[serde(default)]
    pub decision_ai_prompt_mode: JudgePromptMode,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            decision_ai_provider_id: None,
            decision_ai_timeout: default_decision_ai_timeout(),
            decision_ai_extra_prompt: String::new(),
            decision_ai_prompt_mode: JudgePromptMode::default(),
        }
    }
}

fn default_decision_ai_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JudgePromptMode {
    #[default]
    Standard,
    Minimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default = "bool_true")]
    pub include_timestamp: bool,
    #[serde(default = "bool_true")]
    pub include_sender_info: bool,
    /// -1 = unlimited (still bounded by the 500-entry hard cap), 0 = none.
    #[serde(default = "default_max_context_messages")]
    pub max_context_messages: i32,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            include_timestamp: true,
            include_sender_info: true,
            max_context_messages: default_max_context_messages(),
        }
    }
}

impl ContextConfig {
    fn repair(&mut self) {
        if self.max_context_messages > CONTEXT_HARD_CAP as i32 {
            warn!(
                configured = self.max_context_messages,
                cap = CONTEXT_HARD_CAP,
                "max_context_messages above hard cap, clamping"
            );
            self.max_context_messages = CONTEXT_HARD_CAP as i32;
        }
        if self.max_context_messages < -1 {
            self.max_context_messages = -1;
        }
    }

    /// The effective entry limit after -1/0/hard-cap handling.
    pub fn effective_context_limit(&self) -> usize {
        match self.max_context_messages {
            -1 => CONTEXT_HARD_CAP,
            n if n <= 0 => 0,
            n => (n as usize).min(CONTEXT_HARD_CAP),
        }
    }
}

fn default_max_context_messages() -> i32 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_pending_cache_max_count")]
    pub pending_cache_max_count: usize,
    #[serde(default = "default_pending_cache_ttl_seconds")]
    pub pending_cache_ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            pending_cache_max_count: default_pending_cache_max_count(),
            pending_cache_ttl_seconds: default_pending_cache_ttl_seconds(),
        }
    }
}

impl CacheConfig {
    fn repair(&mut self) {
        if self.pending_cache_max_count > PENDING_CACHE_HARD_CAP {
            warn!(
                configured = self.pending_cache_max_count,
                cap = PENDING_CACHE_HARD_CAP,
                "pending_cache_max_count above hard cap, clamping"
            );
            self.pending_cache_max_count = PENDING_CACHE_HARD_CAP;
        }
        if self.pending_cache_max_count == 0 {
            self.pending_cache_max_count = 1;
        }
        if self.pending_cache_ttl_seconds > PENDING_CACHE_TTL_CAP {
            warn!(
                configured = self.pending_cache_ttl_seconds,
                cap = PENDING_CACHE_TTL_CAP,
                "pending_cache_ttl_seconds above hard cap, clamping"
            );
            self.pending_cache_ttl_seconds = PENDING_CACHE_TTL_CAP;
        }
    }
}

fn default_pending_cache_max_count() -> usize {
    20
}
fn default_pending_cache_ttl_seconds() -> u64 {
    600
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageConfig {
    #[serde(default)]
    pub enable_image_processing: bool,
    #[serde(default)]
    pub image_to_text_scope: ImageScope,
    #[serde(default)]
    pub image_to_text_provider_id: Option<String>,
    #[serde(default = "default_image_prompt")]
    pub image_to_text_prompt: String,
    #[serde(default = "default_image_to_text_timeout")]
    pub image_to_text_timeout: u64,
    /// Max seconds to wait for the platform's async image caption.
    #[serde(default = "default_caption_max_wait")]
    pub platform_image_caption_max_wait: f64,
    /// Milliseconds between caption polls after the fast checks.
    #[serde(default = "default_caption_retry_interval")]
    pub platform_image_caption_retry_interval: u64,
    /// Number of tight polls before backing off to the retry interval.
    #[serde(default = "default_caption_fast_checks")]
    pub platform_image_caption_fast_check_count: u32,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            enable_image_processing: false,
            image_to_text_scope: ImageScope::default(),
            image_to_text_provider_id: None,
            image_to_text_prompt: default_image_prompt(),
            image_to_text_timeout: default_image_to_text_timeout(),
            platform_image_caption_max_wait: default_caption_max_wait(),
            platform_image_caption_retry_interval: default_caption_retry_interval(),
            platform_image_caption_fast_check_count: default_caption_fast_checks(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageScope {
    #[default]
    MentionOnly,
    All,
}

fn default_image_prompt() -> String {
    "Describe this image in one short sentence.".to_string()
}
fn default_image_to_text_timeout() -> u64 {
    30
}
fn default_caption_max_wait() -> f64 {
    8.0
}
fn default_caption_retry_interval() -> u64 {
    500
}
fn default_caption_fast_checks() -> u32 {
    4
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeywordConfig {
    /// Keywords that force the at-message path.
    #[serde(default)]
    pub trigger_keywords: Vec<String>,
    /// Messages containing any of these are dropped outright.
    #[serde(default)]
    pub blacklist_keywords: Vec<String>,
    /// Keep the judge AI in the loop even for keyword triggers.
    #[serde(default)]
    pub keyword_smart_mode: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandConfig {
    #[serde(default = "bool_true")]
    pub enable_command_filter: bool,
    #[serde(default = "default_command_prefixes")]
    pub command_prefixes: Vec<String>,
    #[serde(default)]
    pub enable_full_command_detection: bool,
    #[serde(default)]
    pub full_command_list: Vec<String>,
    #[serde(default)]
    pub enable_command_prefix_match: bool,
    #[serde(default)]
    pub command_prefix_match_list: Vec<String>,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            enable_command_filter: true,
            command_prefixes: default_command_prefixes(),
            enable_full_command_detection: false,
            full_command_list: Vec::new(),
            enable_command_prefix_match: false,
            command_prefix_match_list: Vec::new(),
        }
    }
}

fn default_command_prefixes() -> Vec<String> {
    vec!["/".to_string(), "!".to_string(), "#".to_string()]
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserFilterConfig {
    #[serde(default)]
    pub enable_user_blacklist: bool,
    #[serde(default)]
    pub blacklist_user_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MentionConfig {
    #[serde(default)]
    pub enable_ignore_at_others: bool,
    #[serde(default)]
    pub ignore_at_others_mode: MentionMode,
    /// Ignore group-wide "@all" mentions.
    #[serde(default = "bool_true")]
    pub enable_ignore_at_all: bool,
}

impl Default for MentionConfig {
    fn default() -> Self {
        Self {
            enable_ignore_at_others: false,
            ignore_at_others_mode: MentionMode::default(),
            enable_ignore_at_all: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MentionMode {
    /// Any mention of a non-bot user skips the message.
    #[default]
    Strict,
    /// Mentions of others are allowed if the bot is also mentioned.
    AllowWithBot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PokeConfig {
    #[serde(default)]
    pub poke_message_mode: PokeMode,
    /// Probability of ignoring a poke aimed at the bot.
    #[serde(default = "default_poke_skip_probability")]
    pub poke_bot_skip_probability: f64,
    /// Reference value for the smart poke probability boost.
    #[serde(default = "default_poke_boost_reference")]
    pub poke_bot_probability_boost_reference: f64,
    /// Probability of poking back when poked.
    #[serde(default)]
    pub poke_reverse_on_poke_probability: f64,
    #[serde(default)]
    pub enable_poke_after_reply: bool,
    #[serde(default = "default_poke_after_reply_probability")]
    pub poke_after_reply_probability: f64,
    /// Seconds between the reply and the follow-up poke.
    #[serde(default = "default_poke_after_reply_delay")]
    pub poke_after_reply_delay: f64,
    #[serde(default)]
    pub enable_poke_trace_prompt: bool,
    #[serde(default = "default_poke_trace_max_users")]
    pub poke_trace_max_tracked_users: usize,
    #[serde(default = "default_poke_trace_ttl")]
    pub poke_trace_ttl_seconds: u64,
    /// Poke handling whitelist; empty = all groups.
    #[serde(default)]
    pub poke_enabled_groups: Vec<String>,
}

impl Default for PokeConfig {
    fn default() -> Self {
        Self {
            poke_message_mode: PokeMode::default(),
            poke_bot_skip_probability: default_poke_skip_probability(),
            poke_bot_probability_boost_reference: default_poke_boost_reference(),
            poke_reverse_on_poke_probability: 0.0,
            enable_poke_after_reply: false,
            poke_after_reply_probability: default_poke_after_reply_probability(),
            poke_after_reply_delay: default_poke_after_reply_delay(),
            enable_poke_trace_prompt: false,
            poke_trace_max_tracked_users: default_poke_trace_max_users(),
            poke_trace_ttl_seconds: default_poke_trace_ttl(),
            poke_enabled_groups: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PokeMode {
    /// Ignore every poke notification.
    Ignore,
    /// React only to pokes aimed at the bot.
    #[default]
    BotOnly,
    /// React to pokes aimed at anyone.
    All,
}

fn default_poke_skip_probability() -> f64 {
    0.2
}
fn default_poke_boost_reference() -> f64 {
    0.3
}
fn default_poke_after_reply_probability() -> f64 {
    0.15
}
fn default_poke_after_reply_delay() -> f64 {
    2.0
}
fn default_poke_trace_max_users() -> usize {
    5
}
fn default_poke_trace_ttl() -> u64 {
    600
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttentionConfig {
    #[serde(default = "bool_true")]
    pub enable_attention_mechanism: bool,
    /// Reference ceiling the attention boost approaches.
    #[serde(default = "default_attention_increased")]
    pub attention_increased_probability: f64,
    /// Floor applied when attention is present but low.
    #[serde(default = "default_attention_decreased")]
    pub attention_decreased_probability: f64,
    /// Seconds; stale profiles beyond 3× this are dropped on read.
    #[serde(default = "default_attention_duration")]
    pub attention_duration: u64,
    #[serde(default = "default_max_tracked_users")]
    pub attention_max_tracked_users: usize,
    #[serde(default = "default_attention_halflife")]
    pub attention_decay_halflife: f64,
    #[serde(default = "default_emotion_halflife")]
    pub emotion_decay_halflife: f64,
    #[serde(default = "default_attention_boost_step")]
    pub attention_boost_step: f64,
    #[serde(default = "default_attention_decrease_step")]
    pub attention_decrease_step: f64,
    #[serde(default = "default_emotion_boost_step")]
    pub emotion_boost_step: f64,
    /// Subtracted when the judge AI declines to reply.
    #[serde(default = "default_no_reply_step")]
    pub attention_decrease_on_no_reply_step: f64,
    /// No-reply decrement only applies above this attention level.
    #[serde(default = "default_decrease_threshold")]
    pub attention_decrease_threshold: f64,
}

impl Default for AttentionConfig {
    fn default() -> Self {
        Self {
            enable_attention_mechanism: true,
            attention_increased_probability: default_attention_increased(),
            attention_decreased_probability: default_attention_decreased(),
            attention_duration: default_attention_duration(),
            attention_max_tracked_users: default_max_tracked_users(),
            attention_decay_halflife: default_attention_halflife(),
            emotion_decay_halflife: default_emotion_halflife(),
            attention_boost_step: default_attention_boost_step(),
            attention_decrease_step: default_attention_decrease_step(),
            emotion_boost_step: default_emotion_boost_step(),
            attention_decrease_on_no_reply_step: default_no_reply_step(),
            attention_decrease_threshold: default_decrease_threshold(),
        }
    }
}

impl AttentionConfig {
    fn repair(&mut self) {
        if self.attention_increased_probability < self.attention_decreased_probability {
            warn!(
                increased = self.attention_increased_probability,
                decreased = self.attention_decreased_probability,
                "attention increased < decreased, swapping"
            );
            std::mem::swap(
                &mut self.attention_increased_probability,
                &mut self.attention_decreased_probability,
            );
        }
    }
}

fn default_attention_increased() -> f64 {
    0.9
}
fn default_attention_decreased() -> f64 {
    0.05
}
fn default_attention_duration() -> u64 {
    300
}
fn default_max_tracked_users() -> usize {
    10
}
fn default_attention_halflife() -> f64 {
    300.0
}
fn default_emotion_halflife() -> f64 {
    600.0
}
fn default_attention_boost_step() -> f64 {
    0.4
}
fn default_attention_decrease_step() -> f64 {
    0.1
}
fn default_emotion_boost_step() -> f64 {
    0.1
}
fn default_no_reply_step() -> f64 {
    0.15
}
fn default_decrease_threshold() -> f64 {
    0.3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmotionConfig {
    #[serde(default)]
    pub enable_attention_emotion_detection: bool,
    #[serde(default)]
    pub positive_keywords: Vec<String>,
    #[serde(default)]
    pub negative_keywords: Vec<String>,
    #[serde(default = "bool_true")]
    pub attention_enable_negation: bool,
    #[serde(default)]
    pub attention_negation_words: Vec<String>,
    /// Characters scanned before a keyword hit for a negation word.
    #[serde(default = "default_negation_range")]
    pub attention_negation_check_range: usize,
    #[serde(default = "default_positive_boost")]
    pub attention_positive_emotion_boost: f64,
    #[serde(default = "default_negative_decrease")]
    pub attention_negative_emotion_decrease: f64,
}

impl Default for EmotionConfig {
    fn default() -> Self {
        Self {
            enable_attention_emotion_detection: false,
            positive_keywords: Vec::new(),
            negative_keywords: Vec::new(),
            attention_enable_negation: true,
            attention_negation_words: Vec::new(),
            attention_negation_check_range: default_negation_range(),
            attention_positive_emotion_boost: default_positive_boost(),
            attention_negative_emotion_decrease: default_negative_decrease(),
        }
    }
}

fn default_negation_range() -> usize {
    5
}
fn default_positive_boost() -> f64 {
    0.1
}
fn default_negative_decrease() -> f64 {
    0.15
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpilloverConfig {
    #[serde(default = "bool_true")]
    pub enable_attention_spillover: bool,
    #[serde(default = "default_spillover_ratio")]
    pub attention_spillover_ratio: f64,
    #[serde(default = "default_spillover_halflife")]
    pub attention_spillover_decay_halflife: f64,
    #[serde(default = "default_spillover_min_trigger")]
    pub attention_spillover_min_trigger: f64,
}

impl Default for SpilloverConfig {
    fn default() -> Self {
        Self {
            enable_attention_spillover: true,
            attention_spillover_ratio: default_spillover_ratio(),
            attention_spillover_decay_halflife: default_spillover_halflife(),
            attention_spillover_min_trigger: default_spillover_min_trigger(),
        }
    }
}

fn default_spillover_ratio() -> f64 {
    0.35
}
fn default_spillover_halflife() -> f64 {
    90.0
}
fn default_spillover_min_trigger() -> f64 {
    0.4
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CooldownConfig {
    #[serde(default = "bool_true")]
    pub enable_attention_cooldown: bool,
    /// Seconds before an entry auto-expires.
    #[serde(default = "default_cooldown_max_duration")]
    pub cooldown_max_duration: u64,
    /// Attention above this when decremented triggers a cooldown entry.
    #[serde(default = "default_cooldown_trigger_threshold")]
    pub cooldown_trigger_threshold: f64,
    /// Extra attention removed when the cooldown entry is created.
    #[serde(default = "default_cooldown_attention_decrease")]
    pub cooldown_attention_decrease: f64,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            enable_attention_cooldown: true,
            cooldown_max_duration: default_cooldown_max_duration(),
            cooldown_trigger_threshold: default_cooldown_trigger_threshold(),
            cooldown_attention_decrease: default_cooldown_attention_decrease(),
        }
    }
}

fn default_cooldown_max_duration() -> u64 {
    600
}
fn default_cooldown_trigger_threshold() -> f64 {
    0.3
}
fn default_cooldown_attention_decrease() -> f64 {
    0.2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FatigueConfig {
    #[serde(default)]
    pub enable_conversation_fatigue: bool,
    /// Seconds without a reply to the user before the streak resets. Min 60.
    #[serde(default = "default_fatigue_reset_threshold")]
    pub fatigue_reset_threshold: u64,
    #[serde(default = "default_fatigue_light")]
    pub fatigue_threshold_light: u32,
    #[serde(default = "default_fatigue_medium")]
    pub fatigue_threshold_medium: u32,
    #[serde(default = "default_fatigue_heavy")]
    pub fatigue_threshold_heavy: u32,
    #[serde(default = "default_fatigue_decrease_light")]
    pub fatigue_probability_decrease_light: f64,
    #[serde(default = "default_fatigue_decrease_medium")]
    pub fatigue_probability_decrease_medium: f64,
    #[serde(default = "default_fatigue_decrease_heavy")]
    pub fatigue_probability_decrease_heavy: f64,
    /// Probability the heavy-fatigue hint asks the model to wind down.
    #[serde(default = "default_fatigue_closing_probability")]
    pub fatigue_closing_probability: f64,
}

impl Default for FatigueConfig {
    fn default() -> Self {
        Self {
            enable_conversation_fatigue: false,
            fatigue_reset_threshold: default_fatigue_reset_threshold(),
            fatigue_threshold_light: default_fatigue_light(),
            fatigue_threshold_medium: default_fatigue_medium(),
            fatigue_threshold_heavy: default_fatigue_heavy(),
            fatigue_probability_decrease_light: default_fatigue_decrease_light(),
            fatigue_probability_decrease_medium: default_fatigue_decrease_medium(),
            fatigue_probability_decrease_heavy: default_fatigue_decrease_heavy(),
            fatigue_closing_probability: default_fatigue_closing_probability(),
        }
    }
}

impl FatigueConfig {
    /// Thresholds must be strictly ascending and decreases ascending in
    /// [0,1]; violating configs are sorted rather than rejected.
    fn repair(&mut self) {
        if self.fatigue_reset_threshold < 60 {
            warn!(
                configured = self.fatigue_reset_threshold,
                "fatigue_reset_threshold below 60s, raising to minimum"
            );
            self.fatigue_reset_threshold = 60;
        }

        let mut thresholds = [
            self.fatigue_threshold_light,
            self.fatigue_threshold_medium,
            self.fatigue_threshold_heavy,
        ];
        let sorted = {
            let mut s = thresholds;
            s.sort_unstable();
            s
        };
        if thresholds != sorted {
            warn!(?thresholds, "fatigue thresholds out of order, sorting");
            thresholds = sorted;
        }
        // Strictly ascending: bump duplicates upward.
        if thresholds[1] <= thresholds[0] {
            thresholds[1] = thresholds[0] + 1;
        }
        if thresholds[2] <= thresholds[1] {
            thresholds[2] = thresholds[1] + 1;
        }
        self.fatigue_threshold_light = thresholds[0];
        self.fatigue_threshold_medium = thresholds[1];
        self.fatigue_threshold_heavy = thresholds[2];

        let mut decreases = [
            self.fatigue_probability_decrease_light.clamp(0.0, 1.0),
            self.fatigue_probability_decrease_medium.clamp(0.0, 1.0),
            self.fatigue_probability_decrease_heavy.clamp(0.0, 1.0),
        ];
        let sorted = {
            let mut s = decreases;
            s.sort_by(|a, b| a.total_cmp(b));
            s
        };
        if decreases != sorted {
            warn!(?decreases, "fatigue decreases out of order, sorting");
            decreases = sorted;
        }
        self.fatigue_probability_decrease_light = decreases[0];
        self.fatigue_probability_decrease_medium = decreases[1];
        self.fatigue_probability_decrease_heavy = decreases[2];
    }
}

fn default_fatigue_reset_threshold() -> u64 {
    300
}
fn default_fatigue_light() -> u32 {
    3
}
fn default_fatigue_medium() -> u32 {
    5
}
fn default_fatigue_heavy() -> u32 {
    8
}
fn default_fatigue_decrease_light() -> f64 {
    0.1
}
fn default_fatigue_decrease_medium() -> f64 {
    0.2
}
fn default_fatigue_decrease_heavy() -> f64 {
    0.35
}
fn default_fatigue_closing_probability() -> f64 {
    0.3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumanizeConfig {
    #[serde(default)]
    pub enable_humanize_mode: bool,
    /// Messages since last reply before silent mode engages.
    #[serde(default = "default_silent_mode_threshold")]
    pub humanize_silent_mode_threshold: u32,
    /// Seconds silent mode may last.
    #[serde(default = "default_silent_max_duration")]
    pub humanize_silent_max_duration: u64,
    /// Messages silent mode may swallow.
    #[serde(default = "default_silent_max_messages")]
    pub humanize_silent_max_messages: u32,
    #[serde(default = "bool_true")]
    pub humanize_enable_dynamic_threshold: bool,
    #[serde(default = "default_base_message_threshold")]
    pub humanize_base_message_threshold: u32,
    #[serde(default = "default_max_message_threshold")]
    pub humanize_max_message_threshold: u32,
    /// Feed recent yes/no decisions back into the judge prompt.
    #[serde(default = "bool_true")]
    pub humanize_include_decision_history: bool,
    #[serde(default)]
    pub humanize_interest_keywords: Vec<String>,
    #[serde(default = "default_interest_boost")]
    pub humanize_interest_boost_probability: f64,
}

impl Default for HumanizeConfig {
    fn default() -> Self {
        Self {
            enable_humanize_mode: false,
            humanize_silent_mode_threshold: default_silent_mode_threshold(),
            humanize_silent_max_duration: default_silent_max_duration(),
            humanize_silent_max_messages: default_silent_max_messages(),
            humanize_enable_dynamic_threshold: true,
            humanize_base_message_threshold: default_base_message_threshold(),
            humanize_max_message_threshold: default_max_message_threshold(),
            humanize_include_decision_history: true,
            humanize_interest_keywords: Vec::new(),
            humanize_interest_boost_probability: default_interest_boost(),
        }
    }
}

fn default_silent_mode_threshold() -> u32 {
    12
}
fn default_silent_max_duration() -> u64 {
    1800
}
fn default_silent_max_messages() -> u32 {
    30
}
fn default_base_message_threshold() -> u32 {
    5
}
fn default_max_message_threshold() -> u32 {
    15
}
fn default_interest_boost() -> f64 {
    0.3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypoConfig {
    #[serde(default)]
    pub enable_typo_injection: bool,
    /// Probability that an eligible reply gets typos at all.
    #[serde(default = "default_typo_probability")]
    pub typo_probability: f64,
    /// Replies shorter than this are never touched.
    #[serde(default = "default_typo_min_length")]
    pub typo_min_text_length: usize,
    /// Minimum CJK characters before the homophone table applies.
    #[serde(default = "default_typo_min_cjk")]
    pub typo_min_cjk_chars: usize,
    #[serde(default = "default_typo_min_count")]
    pub typo_min_count: usize,
    #[serde(default = "default_typo_max_count")]
    pub typo_max_count: usize,
    /// Extra homophone entries merged over the built-in table.
    #[serde(default)]
    pub typo_homophones: std::collections::HashMap<String, Vec<String>>,
}

impl Default for TypoConfig {
    fn default() -> Self {
        Self {
            enable_typo_injection: false,
            typo_probability: default_typo_probability(),
            typo_min_text_length: default_typo_min_length(),
            typo_min_cjk_chars: default_typo_min_cjk(),
            typo_min_count: default_typo_min_count(),
            typo_max_count: default_typo_max_count(),
            typo_homophones: std::collections::HashMap::new(),
        }
    }
}

fn default_typo_probability() -> f64 {
    0.15
}
fn default_typo_min_length() -> usize {
    8
}
fn default_typo_min_cjk() -> usize {
    4
}
fn default_typo_min_count() -> usize {
    1
}
fn default_typo_max_count() -> usize {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypingConfig {
    #[serde(default)]
    pub enable_typing_simulation: bool,
    /// Characters per second.
    #[serde(default = "default_typing_speed")]
    pub typing_speed: f64,
    #[serde(default = "default_typing_min_delay")]
    pub min_delay: f64,
    #[serde(default = "default_typing_max_delay")]
    pub max_delay: f64,
    /// ±fraction of random jitter on the computed delay.
    #[serde(default = "default_typing_random_factor")]
    pub random_factor: f64,
}

impl Default for TypingConfig {
    fn default() -> Self {
        Self {
            enable_typing_simulation: false,
            typing_speed: default_typing_speed(),
            min_delay: default_typing_min_delay(),
            max_delay: default_typing_max_delay(),
            random_factor: default_typing_random_factor(),
        }
    }
}

fn default_typing_speed() -> f64 {
    15.0
}
fn default_typing_min_delay() -> f64 {
    0.5
}
fn default_typing_max_delay() -> f64 {
    3.0
}
fn default_typing_random_factor() -> f64 {
    0.3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoodConfig {
    #[serde(default)]
    pub enable_mood_tracking: bool,
    #[serde(default)]
    pub mood_positive_keywords: Vec<String>,
    #[serde(default)]
    pub mood_negative_keywords: Vec<String>,
    /// Seconds for mood intensity to halve.
    #[serde(default = "default_mood_halflife")]
    pub mood_decay_halflife: f64,
    /// Intensity added per keyword hit.
    #[serde(default = "default_mood_step")]
    pub mood_intensity_step: f64,
}

impl Default for MoodConfig {
    fn default() -> Self {
        Self {
            enable_mood_tracking: false,
            mood_positive_keywords: Vec::new(),
            mood_negative_keywords: Vec::new(),
            mood_decay_halflife: default_mood_halflife(),
            mood_intensity_step: default_mood_step(),
        }
    }
}

fn default_mood_halflife() -> f64 {
    1800.0
}
fn default_mood_step() -> f64 {
    0.2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default)]
    pub enable_memory_injection: bool,
    #[serde(default)]
    pub memory_mode: MemoryMode,
    /// When memories are fetched relative to the judge decision.
    #[serde(default)]
    pub memory_injection_timing: MemoryTiming,
    #[serde(default = "default_memory_top_k")]
    pub memory_top_k: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enable_memory_injection: false,
            memory_mode: MemoryMode::default(),
            memory_injection_timing: MemoryTiming::default(),
            memory_top_k: default_memory_top_k(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryMode {
    /// Invoke the memory plugin's tool handler.
    Legacy,
    /// Call the engine's `search_memories` directly.
    #[default]
    LivingMemory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryTiming {
    PreDecision,
    #[default]
    PostDecision,
}

fn default_memory_top_k() -> usize {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProactiveConfig {
    #[serde(default)]
    pub enable_proactive_chat: bool,
    /// Whitelist; empty = all groups.
    #[serde(default)]
    pub enabled_groups: Vec<String>,
    /// Seconds of bot silence before a trigger is considered.
    #[serde(default = "default_silence_threshold")]
    pub silence_threshold: u64,
    #[serde(default = "default_proactive_probability")]
    pub probability: f64,
    #[serde(default = "default_check_interval")]
    pub check_interval: u64,
    #[serde(default = "bool_true")]
    pub require_user_activity: bool,
    #[serde(default = "default_min_user_messages")]
    pub min_user_messages: u32,
    /// Seconds; user messages older than this don't count as activity.
    #[serde(default = "default_user_activity_window")]
    pub user_activity_window: u64,
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
    /// -1 = always count toward consecutive failures, 0 = never,
    /// (0,1] = Bernoulli. Out-of-range repairs to -1.
    #[serde(default = "default_failure_sequence_probability")]
    pub failure_sequence_probability: f64,
    /// 0 disables the Beta-distribution threshold randomization.
    #[serde(default)]
    pub failure_threshold_perturbation: f64,
    #[serde(default = "default_cooldown_duration")]
    pub cooldown_duration: u64,
    #[serde(default = "default_temp_boost_probability")]
    pub temp_boost_probability: f64,
    #[serde(default = "default_temp_boost_duration")]
    pub temp_boost_duration: u64,
    #[serde(default = "bool_true")]
    pub enable_quiet_time: bool,
    #[serde(default = "default_quiet_start")]
    pub quiet_start: String,
    #[serde(default = "default_quiet_end")]
    pub quiet_end: String,
    /// Minutes of linear fade at each quiet-hours boundary.
    #[serde(default = "default_quiet_transition_minutes")]
    pub quiet_transition_minutes: u32,
    /// Base system prompt for proactive generation.
    #[serde(default = "default_proactive_prompt")]
    pub proactive_prompt: String,
    #[serde(default = "bool_true")]
    pub enable_attention_focus: bool,
    #[serde(default = "default_attention_max_selected")]
    pub attention_max_selected_users: usize,
    /// rank→weight percentages for the attention-focus draw.
    #[serde(default = "default_attention_rank_weights")]
    pub attention_rank_weights: String,
    #[serde(default = "default_focus_last_user_probability")]
    pub focus_last_user_probability: f64,
    #[serde(default = "bool_true")]
    pub enable_adaptive_scoring: bool,
    #[serde(default = "default_score_min")]
    pub interaction_score_min: i32,
    #[serde(default = "default_score_max")]
    pub interaction_score_max: i32,
    #[serde(default = "default_score_increase")]
    pub score_increase_on_success: i32,
    #[serde(default = "default_quick_bonus")]
    pub score_quick_reply_bonus: i32,
    #[serde(default = "default_multi_user_bonus")]
    pub score_multi_user_bonus: i32,
    #[serde(default = "default_streak_bonus")]
    pub score_streak_bonus: i32,
    #[serde(default = "default_revival_bonus")]
    pub score_revival_bonus: i32,
    #[serde(default = "default_score_decrease")]
    pub score_decrease_on_fail: i32,
    /// Subtracted after 24h with no interaction.
    #[serde(default = "default_score_decay_rate")]
    pub interaction_score_decay_rate: i32,
    #[serde(default = "bool_true")]
    pub enable_complaint_system: bool,
    #[serde(default = "default_complaint_trigger")]
    pub complaint_trigger_threshold: u32,
    #[serde(default = "default_complaint_light")]
    pub complaint_level_light: u32,
    #[serde(default = "default_complaint_medium")]
    pub complaint_level_medium: u32,
    #[serde(default = "default_complaint_strong")]
    pub complaint_level_strong: u32,
    #[serde(default = "default_complaint_prob_light")]
    pub complaint_probability_light: f64,
    #[serde(default = "default_complaint_prob_medium")]
    pub complaint_probability_medium: f64,
    #[serde(default = "default_complaint_prob_strong")]
    pub complaint_probability_strong: f64,
    #[serde(default = "default_complaint_max_accumulation")]
    pub complaint_max_accumulation: u32,
    #[serde(default = "default_complaint_decay_on_success")]
    pub complaint_decay_on_success: u32,
    /// Seconds between complaint-decay sweeps.
    #[serde(default = "default_complaint_decay_check_interval")]
    pub complaint_decay_check_interval: u64,
    /// Seconds without proactive activity before decay applies.
    #[serde(default = "default_complaint_decay_no_failure")]
    pub complaint_decay_no_failure_threshold: u64,
    #[serde(default = "default_complaint_decay_amount")]
    pub complaint_decay_amount: u32,
}

impl Default for ProactiveConfig {
    fn default() -> Self {
        Self {
            enable_proactive_chat: false,
            enabled_groups: Vec::new(),
            silence_threshold: default_silence_threshold(),
            probability: default_proactive_probability(),
            check_interval: default_check_interval(),
            require_user_activity: true,
            min_user_messages: default_min_user_messages(),
            user_activity_window: default_user_activity_window(),
            max_consecutive_failures: default_max_consecutive_failures(),
            failure_sequence_probability: default_failure_sequence_probability(),
            failure_threshold_perturbation: 0.0,
            cooldown_duration: default_cooldown_duration(),
            temp_boost_probability: default_temp_boost_probability(),
            temp_boost_duration: default_temp_boost_duration(),
            enable_quiet_time: true,
            quiet_start: default_quiet_start(),
            quiet_end: default_quiet_end(),
            quiet_transition_minutes: default_quiet_transition_minutes(),
            proactive_prompt: default_proactive_prompt(),
            enable_attention_focus: true,
            attention_max_selected_users: default_attention_max_selected(),
            attention_rank_weights: default_attention_rank_weights(),
            focus_last_user_probability: default_focus_last_user_probability(),
            enable_adaptive_scoring: true,
            interaction_score_min: default_score_min(),
            interaction_score_max: default_score_max(),
            score_increase_on_success: default_score_increase(),
            score_quick_reply_bonus: default_quick_bonus(),
            score_multi_user_bonus: default_multi_user_bonus(),
            score_streak_bonus: default_streak_bonus(),
            score_revival_bonus: default_revival_bonus(),
            score_decrease_on_fail: default_score_decrease(),
            interaction_score_decay_rate: default_score_decay_rate(),
            enable_complaint_system: true,
            complaint_trigger_threshold: default_complaint_trigger(),
            complaint_level_light: default_complaint_light(),
            complaint_level_medium: default_complaint_medium(),
            complaint_level_strong: default_complaint_strong(),
            complaint_probability_light: default_complaint_prob_light(),
            complaint_probability_medium: default_complaint_prob_medium(),
            complaint_probability_strong: default_complaint_prob_strong(),
            complaint_max_accumulation: default_complaint_max_accumulation(),
            complaint_decay_on_success: default_complaint_decay_on_success(),
            complaint_decay_check_interval: default_complaint_decay_check_interval(),
            complaint_decay_no_failure_threshold: default_complaint_decay_no_failure(),
            complaint_decay_amount: default_complaint_decay_amount(),
        }
    }
}

impl ProactiveConfig {
    fn repair(&mut self) {
        let p = self.failure_sequence_probability;
        let valid = p == -1.0 || (0.0..=1.0).contains(&p);
        if !valid {
            warn!(
                configured = p,
                "failure_sequence_probability outside {{-1}} ∪ [0,1], treating as -1"
            );
            self.failure_sequence_probability = -1.0;
        }
        self.failure_threshold_perturbation = self.failure_threshold_perturbation.clamp(0.0, 1.0);
        if self.interaction_score_min > self.interaction_score_max {
            warn!(
                min = self.interaction_score_min,
                max = self.interaction_score_max,
                "interaction score bounds inverted, swapping"
            );
            std::mem::swap(
                &mut self.interaction_score_min,
                &mut self.interaction_score_max,
            );
        }
        if self.check_interval == 0 {
            self.check_interval = default_check_interval();
        }
    }
}

fn default_silence_threshold() -> u64 {
    600
}
fn default_proactive_probability() -> f64 {
    0.3
}
fn default_check_interval() -> u64 {
    60
}
fn default_min_user_messages() -> u32 {
    3
}
fn default_user_activity_window() -> u64 {
    1800
}
fn default_max_consecutive_failures() -> u32 {
    3
}
fn default_failure_sequence_probability() -> f64 {
    -1.0
}
fn default_cooldown_duration() -> u64 {
    3600
}
fn default_temp_boost_probability() -> f64 {
    0.35
}
fn default_temp_boost_duration() -> u64 {
    180
}
fn default_quiet_start() -> String {
    "23:30".to_string()
}
fn default_quiet_end() -> String {
    "07:00".to_string()
}
fn default_quiet_transition_minutes() -> u32 {
    30
}
fn default_proactive_prompt() -> String {
    "The group has been quiet for a while. Start a new topic naturally, \
     in character, as if you just thought of something to say."
        .to_string()
}
fn default_attention_max_selected() -> usize {
    2
}
fn default_attention_rank_weights() -> String {
    "1:55,2:25,3:12,4:8".to_string()
}
fn default_focus_last_user_probability() -> f64 {
    0.4
}
fn default_score_min() -> i32 {
    10
}
fn default_score_max() -> i32 {
    100
}
fn default_score_increase() -> i32 {
    15
}
fn default_quick_bonus() -> i32 {
    5
}
fn default_multi_user_bonus() -> i32 {
    10
}
fn default_streak_bonus() -> i32 {
    5
}
fn default_revival_bonus() -> i32 {
    10
}
fn default_score_decrease() -> i32 {
    10
}
fn default_score_decay_rate() -> i32 {
    5
}
fn default_complaint_trigger() -> u32 {
    3
}
fn default_complaint_light() -> u32 {
    3
}
fn default_complaint_medium() -> u32 {
    5
}
fn default_complaint_strong() -> u32 {
    8
}
fn default_complaint_prob_light() -> f64 {
    0.3
}
fn default_complaint_prob_medium() -> f64 {
    0.5
}
fn default_complaint_prob_strong() -> f64 {
    0.7
}
fn default_complaint_max_accumulation() -> u32 {
    15
}
fn default_complaint_decay_on_success() -> u32 {
    2
}
fn default_complaint_decay_check_interval() -> u64 {
    6 * 3600
}
fn default_complaint_decay_no_failure() -> u64 {
    12 * 3600
}
fn default_complaint_decay_amount() -> u32 {
    1
}

/// Dynamic time-period factors. Used twice: once for reply probability,
/// once for proactive probability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimePeriodConfig {
    #[serde(default)]
    pub enable_dynamic_probability: bool,
    /// JSON string: `[{"name":…, "start":"HH:MM", "end":"HH:MM", "factor":…}]`.
    #[serde(default)]
    pub time_periods: String,
    #[serde(default = "default_period_transition_minutes")]
    pub transition_minutes: u32,
    #[serde(default = "default_period_min_factor")]
    pub min_factor: f64,
    #[serde(default = "default_period_max_factor")]
    pub max_factor: f64,
    #[serde(default)]
    pub use_smooth_curve: bool,
}

impl Default for TimePeriodConfig {
    fn default() -> Self {
        Self {
            enable_dynamic_probability: false,
            time_periods: String::new(),
            transition_minutes: default_period_transition_minutes(),
            min_factor: default_period_min_factor(),
            max_factor: default_period_max_factor(),
            use_smooth_curve: false,
        }
    }
}

fn default_period_transition_minutes() -> u32 {
    30
}
fn default_period_min_factor() -> f64 {
    0.1
}
fn default_period_max_factor() -> f64 {
    2.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardLimitConfig {
    #[serde(default)]
    pub enable_probability_hard_limit: bool,
    #[serde(default = "default_probability_min_limit")]
    pub probability_min_limit: f64,
    #[serde(default = "default_probability_max_limit")]
    pub probability_max_limit: f64,
}

impl Default for HardLimitConfig {
    fn default() -> Self {
        Self {
            enable_probability_hard_limit: false,
            probability_min_limit: default_probability_min_limit(),
            probability_max_limit: default_probability_max_limit(),
        }
    }
}

impl HardLimitConfig {
    fn repair(&mut self) {
        self.probability_min_limit = self.probability_min_limit.clamp(0.0, 1.0);
        self.probability_max_limit = self.probability_max_limit.clamp(0.0, 1.0);
        if self.probability_min_limit > self.probability_max_limit {
            warn!(
                min = self.probability_min_limit,
                max = self.probability_max_limit,
                "probability hard limits inverted, swapping"
            );
            std::mem::swap(
                &mut self.probability_min_limit,
                &mut self.probability_max_limit,
            );
        }
    }
}

fn default_probability_min_limit() -> f64 {
    0.01
}
fn default_probability_max_limit() -> f64 {
    0.95
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentFilterConfig {
    #[serde(default)]
    pub enable_output_content_filter: bool,
    #[serde(default)]
    pub output_content_filter_rules: Vec<String>,
    #[serde(default)]
    pub enable_save_content_filter: bool,
    #[serde(default)]
    pub save_content_filter_rules: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateConfig {
    #[serde(default = "bool_true")]
    pub enable_duplicate_filter: bool,
    #[serde(default = "default_duplicate_check_count")]
    pub duplicate_filter_check_count: usize,
    #[serde(default = "bool_true")]
    pub enable_duplicate_time_limit: bool,
    /// Seconds; clamped to [60, 7200].
    #[serde(default = "default_duplicate_time_limit")]
    pub duplicate_filter_time_limit: u64,
}

impl Default for DuplicateConfig {
    fn default() -> Self {
        Self {
            enable_duplicate_filter: true,
            duplicate_filter_check_count: default_duplicate_check_count(),
            enable_duplicate_time_limit: true,
            duplicate_filter_time_limit: default_duplicate_time_limit(),
        }
    }
}

impl DuplicateConfig {
    fn repair(&mut self) {
        if self.duplicate_filter_check_count > DUPLICATE_CHECK_CAP {
            warn!(
                configured = self.duplicate_filter_check_count,
                cap = DUPLICATE_CHECK_CAP,
                "duplicate_filter_check_count above cap, clamping"
            );
            self.duplicate_filter_check_count = DUPLICATE_CHECK_CAP;
        }
        let clamped = self.duplicate_filter_time_limit.clamp(60, 7200);
        if clamped != self.duplicate_filter_time_limit {
            warn!(
                configured = self.duplicate_filter_time_limit,
                "duplicate_filter_time_limit outside [60, 7200], clamping"
            );
            self.duplicate_filter_time_limit = clamped;
        }
    }

    /// Per-chat recent-replies capacity: 2× the check window, hard-capped.
    pub fn recent_replies_capacity(&self) -> usize {
        (self.duplicate_filter_check_count * 2).min(RECENT_REPLIES_HARD_CAP)
    }
}

fn default_duplicate_check_count() -> usize {
    5
}
fn default_duplicate_time_limit() -> u64 {
    600
}

/// Allowlists for the two user-visible reset commands.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResetConfig {
    #[serde(default)]
    pub reset_allowed_user_ids: Vec<String>,
    #[serde(default)]
    pub reset_here_allowed_user_ids: Vec<String>,
}

fn bool_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation_unchanged() {
        let config = MurmurConfig::default().validated();
        assert!(config.core.enable_group_chat);
        assert_eq!(config.fatigue.fatigue_threshold_light, 3);
        assert_eq!(config.fatigue.fatigue_threshold_medium, 5);
        assert_eq!(config.fatigue.fatigue_threshold_heavy, 8);
    }

    #[test]
    fn fatigue_thresholds_are_sorted_and_strict() {
        let mut config = MurmurConfig::default();
        config.fatigue.fatigue_threshold_light = 8;
        config.fatigue.fatigue_threshold_medium = 3;
        config.fatigue.fatigue_threshold_heavy = 3;
        let config = config.validated();
        assert!(config.fatigue.fatigue_threshold_light < config.fatigue.fatigue_threshold_medium);
        assert!(config.fatigue.fatigue_threshold_medium < config.fatigue.fatigue_threshold_heavy);
    }

    #[test]
    fn fatigue_decreases_are_sorted() {
        let mut config = MurmurConfig::default();
        config.fatigue.fatigue_probability_decrease_light = 0.5;
        config.fatigue.fatigue_probability_decrease_heavy = 0.1;
        let config = config.validated();
        assert!(
            config.fatigue.fatigue_probability_decrease_light
                <= config.fatigue.fatigue_probability_decrease_medium
        );
        assert!(
            config.fatigue.fatigue_probability_decrease_medium
                <= config.fatigue.fatigue_probability_decrease_heavy
        );
    }

    #[test]
    fn pending_cache_respects_hard_cap() {
        let mut config = MurmurConfig::default();
        config.cache.pending_cache_max_count = 500;
        config.cache.pending_cache_ttl_seconds = 1_000_000;
        let config = config.validated();
        assert_eq!(config.cache.pending_cache_max_count, PENDING_CACHE_HARD_CAP);
        assert_eq!(config.cache.pending_cache_ttl_seconds, PENDING_CACHE_TTL_CAP);
    }

    #[test]
    fn context_limit_handles_sentinels() {
        let mut config = MurmurConfig::default();
        config.context.max_context_messages = -1;
        assert_eq!(
            config.validated().context.effective_context_limit(),
            CONTEXT_HARD_CAP
        );

        let mut config = MurmurConfig::default();
        config.context.max_context_messages = 0;
        assert_eq!(config.validated().context.effective_context_limit(), 0);

        let mut config = MurmurConfig::default();
        config.context.max_context_messages = 12;
        assert_eq!(config.validated().context.effective_context_limit(), 12);
    }

    #[test]
    fn out_of_range_failure_sequence_probability_repairs_to_always() {
        let mut config = MurmurConfig::default();
        config.proactive.failure_sequence_probability = 3.5;
        let config = config.validated();
        assert_eq!(config.proactive.failure_sequence_probability, -1.0);
    }

    #[test]
    fn recent_replies_capacity_caps_at_hard_limit() {
        let mut config = DuplicateConfig::default();
        config.duplicate_filter_check_count = 50;
        assert_eq!(config.recent_replies_capacity(), RECENT_REPLIES_HARD_CAP);
    }

    #[test]
    fn load_from_toml_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("murmur.toml");
        std::fs::write(
            &path,
            "[core]\ninitial_probability = 0.2\n[proactive]\nenable_proactive_chat = true\n",
        )
        .unwrap();
        let config = MurmurConfig::load(path.to_str()).unwrap();
        assert_eq!(config.core.initial_probability, 0.2);
        assert!(config.proactive.enable_proactive_chat);
        // Untouched groups keep their defaults.
        assert_eq!(config.attention.attention_boost_step, 0.4);
    }
}
