//! Boundary contracts to the chatbot host.
//!
//! The plugin never links the host directly; the engine receives trait
//! objects for the pieces it consumes (LLM provider, conversation store,
//! message history, tool registry, persona source, platform link). Hosts —
//! and the test suite — supply the implementations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Result;

/// One `{role, content}` row of the host's official conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: Content,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Content::Text(content.into()),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: Content::Text(content.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// Conversation content: plain text or a multimodal part list.
///
/// The wire shape of the part list is fixed by the host:
/// `[{"type":"text","text":…}, {"type":"image_url","image_url":{"url":…}}]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl Content {
    /// The text portion, ignoring image parts.
    pub fn text(&self) -> String {
        match self {
            Content::Text(t) => t.clone(),
            Content::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }

    /// Stable serialization used as the dedup key during promotion.
    /// Multimodal lists serialize with sorted keys via serde_json's
    /// deterministic struct ordering, so equal content hashes equal.
    pub fn dedup_key(&self) -> String {
        match self {
            Content::Text(t) => t.clone(),
            Content::Parts(_) => serde_json::to_string(self).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

/// Multimodal user content from text plus image URLs. Falls back to plain
/// text when there are no images.
pub fn multimodal(text: &str, image_urls: &[String]) -> Content {
    if image_urls.is_empty() {
        return Content::Text(text.to_string());
    }
    let mut parts = Vec::with_capacity(1 + image_urls.len());
    if !text.is_empty() {
        parts.push(ContentPart::Text {
            text: text.to_string(),
        });
    }
    for url in image_urls {
        if !url.is_empty() {
            parts.push(ContentPart::ImageUrl {
                image_url: ImageUrl { url: url.clone() },
            });
        }
    }
    Content::Parts(parts)
}

/// Request to the host's chat provider.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub prompt: String,
    pub session_id: String,
    pub contexts: Vec<ConversationTurn>,
    pub system_prompt: String,
    pub image_urls: Vec<String>,
    pub tools: Vec<ToolSpec>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct ChatCompletion {
    pub completion_text: String,
}

/// The LLM chat provider (`context.get_using_provider()` on the host side).
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn text_chat(&self, request: ChatRequest) -> Result<ChatCompletion>;
}

/// The host's official conversation manager, pinned to a single update
/// method (no legacy name fallback chain).
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Current conversation id for a session origin, if one exists.
    async fn current_conversation_id(&self, origin: &str) -> Result<Option<String>>;

    /// Create a conversation and return its id.
    async fn new_conversation(&self, origin: &str, platform_id: &str, title: &str)
        -> Result<String>;

    async fn conversation_history(
        &self,
        origin: &str,
        conversation_id: &str,
    ) -> Result<Vec<ConversationTurn>>;

    async fn update_conversation(
        &self,
        origin: &str,
        conversation_id: &str,
        history: Vec<ConversationTurn>,
    ) -> Result<()>;
}

/// One record of the host's raw platform message history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: i64,
    pub content: String,
    pub sender_id: String,
    pub sender_name: String,
    /// Unix seconds.
    pub created_at: f64,
}

/// The host's platform-level message history manager.
#[async_trait]
pub trait MessageHistory: Send + Sync {
    async fn page(
        &self,
        platform_id: &str,
        chat_id: &str,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<HistoryRecord>>;

    async fn insert(&self, platform_id: &str, chat_id: &str, record: HistoryRecord) -> Result<()>;
}

/// A tool exposed by the host's LLM tool manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON-schema-ish parameter description; opaque to murmur.
    #[serde(default)]
    pub parameters: serde_json::Value,
}

pub trait ToolRegistry: Send + Sync {
    fn tools(&self) -> Vec<ToolSpec>;
}

/// Persona lookup. Called per request — never cached — so persona switches
/// on the host take effect immediately.
#[async_trait]
pub trait PersonaSource: Send + Sync {
    async fn system_prompt(&self, session_id: &str) -> Result<String>;

    /// Persona id forwarded to the memory provider, if the host has one.
    async fn persona_id(&self, session_id: &str) -> Result<Option<String>>;
}

/// A retrieved long-term memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryHit {
    pub content: String,
    /// 1–5; rendered as a star bar in the prompt.
    pub importance: u8,
    /// Unix seconds.
    pub created_at: f64,
}

/// The long-term memory plugin boundary.
#[async_trait]
pub trait MemoryProvider: Send + Sync {
    async fn search_memories(
        &self,
        query: &str,
        k: usize,
        session_id: &str,
        persona_id: Option<&str>,
    ) -> Result<Vec<MemoryHit>>;
}

/// Asynchronous image description service (usually backed by the host's
/// long-term memory plugin). `None` means the caption isn't ready yet.
#[async_trait]
pub trait ImageCaptioner: Send + Sync {
    async fn caption(&self, url: &str) -> Result<Option<String>>;
}

/// Outbound platform actions. `origin` is the host's unified session origin.
#[async_trait]
pub trait PlatformLink: Send + Sync {
    async fn send_message(&self, origin: &str, text: &str) -> Result<()>;

    /// Native "poke" toward a user. Hosts without the capability may no-op.
    async fn send_poke(&self, origin: &str, user_id: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_parts_match_host_wire_shape() {
        let content = multimodal("look", &["https://img.example/a.png".to_string()]);
        let json = serde_json::to_value(&content).unwrap();
        assert_eq!(
            json,
            serde_json::json!([
                {"type": "text", "text": "look"},
                {"type": "image_url", "image_url": {"url": "https://img.example/a.png"}}
            ])
        );
    }

    #[test]
    fn multimodal_without_images_is_plain_text() {
        assert_eq!(multimodal("hi", &[]), Content::Text("hi".to_string()));
    }

    #[test]
    fn text_extraction_skips_images() {
        let content = multimodal("caption", &["https://x/y.png".to_string()]);
        assert_eq!(content.text(), "caption");
    }

    #[test]
    fn dedup_key_is_stable_for_equal_parts() {
        let a = multimodal("t", &["u1".to_string()]);
        let b = multimodal("t", &["u1".to_string()]);
        assert_eq!(a.dedup_key(), b.dedup_key());
        assert_ne!(a.dedup_key(), multimodal("t", &["u2".to_string()]).dedup_key());
    }
}
