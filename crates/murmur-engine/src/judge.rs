//! The judge AI — one LLM call whose only output is yes/no on whether the
//! bot should reply to the current message. Failures (timeout, parse,
//! transport) come back as [`JudgeVerdict::Error`] so downstream attention
//! decrements and statistics are suppressed rather than miscounted.

use std::time::Duration;

use tracing::warn;

use murmur_attention::FatigueLevel;
use murmur_core::config::{JudgeConfig, JudgePromptMode};
use murmur_core::host::{ChatProvider, ChatRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JudgeVerdict {
    Reply,
    NoReply,
    /// The call failed; treated as no-reply but tagged so attention and
    /// humanize statistics stay untouched.
    Error,
}

/// Situational hints woven into the decision prompt.
#[derive(Debug, Clone, Default)]
pub struct JudgeHints {
    /// "at" / "keyword" when a trigger put this call in smart mode.
    pub trigger_tag: Option<&'static str>,
    pub matched_keyword: Option<String>,
    /// Current time-period label, when dynamic periods are on.
    pub time_label: Option<String>,
    /// Recent yes/no decisions (oldest first) for humanize mode.
    pub decision_history: Vec<bool>,
    pub fatigue: FatigueLevel,
    /// Ask the model to wind the conversation down (heavy fatigue).
    pub suggest_closing: bool,
    /// The sender pinged the bot with no content.
    pub empty_at: bool,
    /// Humanize silent mode is engaged — lean toward staying quiet.
    pub silent_mode: bool,
}

pub struct JudgeAi {
    config: JudgeConfig,
}

impl JudgeAi {
    pub fn new(config: JudgeConfig) -> Self {
        Self { config }
    }

    /// Decide whether to reply, given the formatted context block.
    pub async fn should_reply(
        &self,
        provider: &dyn ChatProvider,
        session_id: &str,
        context_block: &str,
        hints: &JudgeHints,
    ) -> JudgeVerdict {
        let prompt = self.build_prompt(context_block, hints);
        let request = ChatRequest {
            prompt,
            session_id: session_id.to_string(),
            timeout: Some(Duration::from_secs(self.config.decision_ai_timeout)),
            ..ChatRequest::default()
        };

        let call = provider.text_chat(request);
        let result = tokio::time::timeout(
            Duration::from_secs(self.config.decision_ai_timeout),
            call,
        )
        .await;

        match result {
            Ok(Ok(completion)) => match parse_verdict(&completion.completion_text) {
                Some(verdict) => verdict,
                None => {
                    warn!(
                        raw = %completion.completion_text.chars().take(80).collect::<String>(),
                        "judge returned no parseable yes/no"
                    );
                    JudgeVerdict::Error
                }
            },
            Ok(Err(e)) => {
                warn!("judge call failed: {e}");
                JudgeVerdict::Error
            }
            Err(_) => {
                warn!(timeout_secs = self.config.decision_ai_timeout, "judge call timed out");
                JudgeVerdict::Error
            }
        }
    }

    fn build_prompt(&self, context_block: &str, hints: &JudgeHints) -> String {
        let mut parts: Vec<String> = Vec::new();
        parts.push(
            "You are deciding whether the bot should reply to the newest \
             message in a group chat. Read the context, then answer with \
             exactly \"yes\" or \"no\" — nothing else."
                .to_string(),
        );

        // Minimal mode: instruction + context only, no situational hints.
        if self.config.decision_ai_prompt_mode == JudgePromptMode::Minimal {
            parts.push(String::new());
            parts.push(context_block.to_string());
            parts.push(String::new());
            parts.push("Answer \"yes\" or \"no\":".to_string());
            return parts.join("\n");
        }

        match hints.trigger_tag {
            Some("at") => parts.push("The bot was mentioned directly [at].".to_string()),
            Some("keyword") => {
                let keyword = hints.matched_keyword.as_deref().unwrap_or("");
                parts.push(format!(
                    "The message matched the trigger keyword \"{keyword}\"; \
                     reply unless it is clearly not aimed at the bot."
                ));
            }
            _ => {}
        }
        if hints.empty_at {
            parts.push(
                "The user pinged the bot without any content — a brief \
                 greeting is usually the right call."
                    .to_string(),
            );
        }
        if let Some(label) = &hints.time_label {
            parts.push(format!("Current time period: {label}."));
        }
        if !hints.decision_history.is_empty() {
            let rendered: Vec<&str> = hints
                .decision_history
                .iter()
                .map(|replied| if *replied { "replied" } else { "stayed quiet" })
                .collect();
            parts.push(format!("Recent decisions, oldest first: {}.", rendered.join(", ")));
        }
        match hints.fatigue {
            FatigueLevel::None => {}
            level => {
                parts.push(format!(
                    "The bot has been talking to this user a lot (fatigue: {}).",
                    level.as_str()
                ));
                if hints.suggest_closing {
                    parts.push(
                        "If you do reply, suggest winding the exchange down naturally."
                            .to_string(),
                    );
                }
            }
        }
        if hints.silent_mode {
            parts.push(
                "You have deliberately been staying quiet in this chat; \
                 only answer yes for something genuinely worth breaking \
                 the silence over."
                    .to_string(),
            );
        }
        if !self.config.decision_ai_extra_prompt.is_empty() {
            parts.push(self.config.decision_ai_extra_prompt.clone());
        }

        parts.push(String::new());
        parts.push(context_block.to_string());
        parts.push(String::new());
        parts.push("Answer \"yes\" or \"no\":".to_string());
        parts.join("\n")
    }
}

/// Pull a yes/no out of the completion. Checks the leading token first,
/// then falls back to a substring scan; ambiguous output is `None`.
fn parse_verdict(completion: &str) -> Option<JudgeVerdict> {
    let normalized = completion.trim().to_lowercase();
    if normalized.is_empty() {
        return None;
    }
    let head: String = normalized
        .chars()
        .take_while(|c| c.is_alphanumeric())
        .collect();
    match head.as_str() {
        "yes" | "y" | "是" => return Some(JudgeVerdict::Reply),
        "no" | "n" | "否" => return Some(JudgeVerdict::NoReply),
        _ => {}
    }
    let has_yes = normalized.contains("yes") || normalized.contains('是');
    let has_no = normalized.contains("no") || normalized.contains('否');
    match (has_yes, has_no) {
        (true, false) => Some(JudgeVerdict::Reply),
        (false, true) => Some(JudgeVerdict::NoReply),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_answers() {
        assert_eq!(parse_verdict("yes"), Some(JudgeVerdict::Reply));
        assert_eq!(parse_verdict("No."), Some(JudgeVerdict::NoReply));
        assert_eq!(parse_verdict("  YES\n"), Some(JudgeVerdict::Reply));
        assert_eq!(parse_verdict("是"), Some(JudgeVerdict::Reply));
    }

    #[test]
    fn parses_wrapped_answers() {
        assert_eq!(
            parse_verdict("I think the answer is yes here"),
            Some(JudgeVerdict::Reply)
        );
    }

    #[test]
    fn ambiguous_output_is_error() {
        assert_eq!(parse_verdict("yes and no"), None);
        assert_eq!(parse_verdict(""), None);
        assert_eq!(parse_verdict("maybe"), None);
    }

    #[test]
    fn prompt_carries_hints() {
        let judge = JudgeAi::new(JudgeConfig::default());
        let hints = JudgeHints {
            trigger_tag: Some("keyword"),
            matched_keyword: Some("murmur".to_string()),
            decision_history: vec![true, false],
            fatigue: FatigueLevel::Heavy,
            suggest_closing: true,
            time_label: Some("evening".to_string()),
            ..JudgeHints::default()
        };
        let prompt = judge.build_prompt("CONTEXT", &hints);
        assert!(prompt.contains("murmur"));
        assert!(prompt.contains("evening"));
        assert!(prompt.contains("heavy"));
        assert!(prompt.contains("winding"));
        assert!(prompt.contains("CONTEXT"));
    }

    #[test]
    fn minimal_mode_drops_the_hints() {
        let judge = JudgeAi::new(JudgeConfig {
            decision_ai_prompt_mode: JudgePromptMode::Minimal,
            ..JudgeConfig::default()
        });
        let hints = JudgeHints {
            trigger_tag: Some("keyword"),
            matched_keyword: Some("murmur".to_string()),
            time_label: Some("evening".to_string()),
            ..JudgeHints::default()
        };
        let prompt = judge.build_prompt("CONTEXT", &hints);
        assert!(prompt.contains("CONTEXT"));
        assert!(!prompt.contains("murmur"));
        assert!(!prompt.contains("evening"));
    }

    #[test]
    fn empty_at_hint_requests_greeting() {
        let judge = JudgeAi::new(JudgeConfig::default());
        let hints = JudgeHints {
            trigger_tag: Some("at"),
            empty_at: true,
            ..JudgeHints::default()
        };
        let prompt = judge.build_prompt("C", &hints);
        assert!(prompt.contains("pinged the bot without any content"));
        assert!(prompt.contains("[at]"));
    }
}
