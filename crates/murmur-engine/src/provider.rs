//! OpenAI-compatible chat provider adapter.
//!
//! Hosts that expose their own provider object implement
//! [`ChatProvider`] directly; this adapter covers the common case of an
//! OpenAI-style HTTP endpoint. The `reqwest::Client` is created in
//! `MurmurPlugin::initialize` and dropped on terminate.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use murmur_core::host::{ChatCompletion, ChatProvider, ChatRequest, Content, Role};
use murmur_core::{MurmurError, Result};

pub struct OpenAiCompatProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    /// Path appended to base_url. Default: "/v1/chat/completions".
    chat_path: String,
}

impl OpenAiCompatProvider {
    /// `base_url` without a trailing slash.
    pub fn new(client: reqwest::Client, api_key: String, base_url: String, model: String) -> Self {
        Self {
            client,
            api_key,
            base_url,
            model,
            chat_path: "/v1/chat/completions".to_string(),
        }
    }

    pub fn with_chat_path(mut self, chat_path: String) -> Self {
        self.chat_path = chat_path;
        self
    }

    fn build_body(&self, request: &ChatRequest) -> serde_json::Value {
        let mut messages: Vec<serde_json::Value> = Vec::new();
        if !request.system_prompt.is_empty() {
            messages.push(serde_json::json!({
                "role": "system",
                "content": request.system_prompt,
            }));
        }
        for turn in &request.contexts {
            let role = match turn.role {
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::System => "system",
            };
            let content = match &turn.content {
                Content::Text(t) => serde_json::Value::String(t.clone()),
                parts @ Content::Parts(_) => {
                    serde_json::to_value(parts).unwrap_or(serde_json::Value::Null)
                }
            };
            messages.push(serde_json::json!({"role": role, "content": content}));
        }

        // The current prompt, multimodal when image URLs ride along.
        if request.image_urls.is_empty() {
            messages.push(serde_json::json!({"role": "user", "content": request.prompt}));
        } else {
            let mut parts = vec![serde_json::json!({"type": "text", "text": request.prompt})];
            for url in &request.image_urls {
                parts.push(serde_json::json!({
                    "type": "image_url",
                    "image_url": {"url": url},
                }));
            }
            messages.push(serde_json::json!({"role": "user", "content": parts}));
        }

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
        });
        if !request.tools.is_empty() {
            let tools: Vec<serde_json::Value> = request
                .tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        },
                    })
                })
                .collect();
            body["tools"] = serde_json::Value::Array(tools);
        }
        body
    }
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Deserialize)]
struct ApiMessage {
    content: Option<String>,
}

#[async_trait]
impl ChatProvider for OpenAiCompatProvider {
    async fn text_chat(&self, request: ChatRequest) -> Result<ChatCompletion> {
        let url = format!("{}{}", self.base_url, self.chat_path);
        let body = self.build_body(&request);
        debug!(model = %self.model, session = %request.session_id, "chat request");

        let mut builder = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(&body);
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                MurmurError::Timeout {
                    ms: request.timeout.map(|t| t.as_millis() as u64).unwrap_or(0),
                }
            } else {
                MurmurError::Provider(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %text, "chat API error");
            return Err(MurmurError::Provider(format!("HTTP {status}: {text}")));
        }

        let parsed: ApiResponse = response
            .json()
            .await
            .map_err(|e| MurmurError::Provider(format!("bad response body: {e}")))?;

        let completion_text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        Ok(ChatCompletion { completion_text })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_core::host::{ConversationTurn, ToolSpec};

    fn provider() -> OpenAiCompatProvider {
        OpenAiCompatProvider::new(
            reqwest::Client::new(),
            "key".to_string(),
            "https://api.example".to_string(),
            "test-model".to_string(),
        )
    }

    #[test]
    fn body_orders_system_context_prompt() {
        let request = ChatRequest {
            prompt: "current".to_string(),
            system_prompt: "persona".to_string(),
            contexts: vec![ConversationTurn::user("earlier")],
            ..ChatRequest::default()
        };
        let body = provider().build_body(&request);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["content"], "earlier");
        assert_eq!(messages[2]["content"], "current");
    }

    #[test]
    fn image_urls_become_multimodal_prompt() {
        let request = ChatRequest {
            prompt: "what is this".to_string(),
            image_urls: vec!["https://img/a.png".to_string()],
            ..ChatRequest::default()
        };
        let body = provider().build_body(&request);
        let last = body["messages"].as_array().unwrap().last().unwrap().clone();
        let parts = last["content"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1]["image_url"]["url"], "https://img/a.png");
    }

    #[test]
    fn tools_serialize_as_functions() {
        let request = ChatRequest {
            prompt: "p".to_string(),
            tools: vec![ToolSpec {
                name: "search".to_string(),
                description: "d".to_string(),
                parameters: serde_json::json!({"type": "object"}),
            }],
            ..ChatRequest::default()
        };
        let body = provider().build_body(&request);
        assert_eq!(body["tools"][0]["function"]["name"], "search");
    }

    #[test]
    fn response_parsing_takes_first_choice() {
        let parsed: ApiResponse = serde_json::from_value(serde_json::json!({
            "choices": [{"message": {"content": "hello"}}]
        }))
        .unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("hello"));
    }
}
