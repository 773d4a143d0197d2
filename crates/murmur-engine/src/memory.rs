//! Long-term memory injection.
//!
//! Retrieved memories render as star-rated lines under a background-info
//! section and are spliced into the prompt at most once per message. The
//! persona and session ids are resolved fresh on every call — never cached
//! — so a persona switch on the host takes effect immediately.

use chrono::{Local, TimeZone};
use tracing::{debug, warn};

use murmur_core::config::{MemoryConfig, MemoryMode};
use murmur_core::host::{MemoryHit, MemoryProvider, PersonaSource};
use murmur_history::markers::{BACKGROUND_FOOTER, BACKGROUND_HEADER};

pub struct MemoryInjector {
    config: MemoryConfig,
}

impl MemoryInjector {
    pub fn new(config: MemoryConfig) -> Self {
        Self { config }
    }

    pub fn enabled(&self) -> bool {
        self.config.enable_memory_injection
    }

    /// Fetch memories for `query` and splice them into `prompt`.
    /// Failures skip injection; the reply still goes out.
    pub async fn inject(
        &self,
        memory: &dyn MemoryProvider,
        personas: &dyn PersonaSource,
        session_id: &str,
        query: &str,
        prompt: &str,
    ) -> String {
        if !self.config.enable_memory_injection {
            return prompt.to_string();
        }
        // Idempotence: one background section per message, ever.
        if prompt.contains(BACKGROUND_HEADER) {
            return prompt.to_string();
        }

        // Resolved per call on purpose — see module docs.
        let persona_id = match personas.persona_id(session_id).await {
            Ok(id) => id,
            Err(e) => {
                warn!("persona lookup failed, searching without persona: {e}");
                None
            }
        };

        let hits = match memory
            .search_memories(query, self.config.memory_top_k, session_id, persona_id.as_deref())
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                warn!("memory search failed, skipping injection: {e}");
                return prompt.to_string();
            }
        };
        if hits.is_empty() {
            return prompt.to_string();
        }

        debug!(count = hits.len(), "injecting memories");
        let mut section = String::from(BACKGROUND_HEADER);
        for hit in &hits {
            section.push('\n');
            // Legacy tool-handler results carry no reliable importance
            // metadata, so they render as plain bullets.
            match self.config.memory_mode {
                MemoryMode::LivingMemory => section.push_str(&format_hit(hit)),
                MemoryMode::Legacy => section.push_str(&format!("- {}", hit.content)),
            }
        }
        section.push('\n');
        section.push_str(BACKGROUND_FOOTER);

        format!("{section}\n\n{prompt}")
    }
}

/// `★★★☆☆ [2026-07-01 12:00] content`
fn format_hit(hit: &MemoryHit) -> String {
    let importance = hit.importance.clamp(1, 5) as usize;
    let stars: String = "★".repeat(importance) + &"☆".repeat(5 - importance);
    let when = Local
        .timestamp_opt(hit.created_at as i64, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "unknown".to_string());
    format!("{stars} [{when}] {}", hit.content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FixedMemory(Vec<MemoryHit>);

    #[async_trait]
    impl MemoryProvider for FixedMemory {
        async fn search_memories(
            &self,
            _query: &str,
            _k: usize,
            _session_id: &str,
            _persona_id: Option<&str>,
        ) -> murmur_core::Result<Vec<MemoryHit>> {
            Ok(self.0.clone())
        }
    }

    struct FixedPersona;

    #[async_trait]
    impl PersonaSource for FixedPersona {
        async fn system_prompt(&self, _session_id: &str) -> murmur_core::Result<String> {
            Ok("persona".to_string())
        }

        async fn persona_id(&self, _session_id: &str) -> murmur_core::Result<Option<String>> {
            Ok(Some("p1".to_string()))
        }
    }

    fn injector() -> MemoryInjector {
        MemoryInjector::new(MemoryConfig {
            enable_memory_injection: true,
            memory_mode: MemoryMode::LivingMemory,
            memory_top_k: 5,
            ..MemoryConfig::default()
        })
    }

    fn hit(content: &str, importance: u8) -> MemoryHit {
        MemoryHit {
            content: content.to_string(),
            importance,
            created_at: 1_700_000_000.0,
        }
    }

    #[tokio::test]
    async fn injection_prepends_background_section() {
        let memory = FixedMemory(vec![hit("likes tea", 4)]);
        let out = injector()
            .inject(&memory, &FixedPersona, "s1", "tea?", "the prompt")
            .await;
        assert!(out.starts_with(BACKGROUND_HEADER));
        assert!(out.contains("★★★★☆ "));
        assert!(out.contains("likes tea"));
        assert!(out.ends_with("the prompt"));
    }

    #[tokio::test]
    async fn injection_is_idempotent() {
        let memory = FixedMemory(vec![hit("likes tea", 3)]);
        let injector = injector();
        let once = injector
            .inject(&memory, &FixedPersona, "s1", "q", "prompt")
            .await;
        let twice = injector
            .inject(&memory, &FixedPersona, "s1", "q", &once)
            .await;
        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn no_hits_leaves_prompt_untouched() {
        let memory = FixedMemory(Vec::new());
        let out = injector()
            .inject(&memory, &FixedPersona, "s1", "q", "prompt")
            .await;
        assert_eq!(out, "prompt");
    }

    #[tokio::test]
    async fn disabled_injection_is_passthrough() {
        let injector = MemoryInjector::new(MemoryConfig::default());
        let memory = FixedMemory(vec![hit("x", 5)]);
        let out = injector
            .inject(&memory, &FixedPersona, "s1", "q", "prompt")
            .await;
        assert_eq!(out, "prompt");
    }

    #[tokio::test]
    async fn legacy_mode_renders_plain_bullets() {
        let injector = MemoryInjector::new(MemoryConfig {
            enable_memory_injection: true,
            memory_mode: MemoryMode::Legacy,
            memory_top_k: 5,
            ..MemoryConfig::default()
        });
        let memory = FixedMemory(vec![hit("likes tea", 4)]);
        let out = injector
            .inject(&memory, &FixedPersona, "s1", "q", "prompt")
            .await;
        assert!(out.contains("- likes tea"));
        assert!(!out.contains('★'));
    }

    #[test]
    fn star_bar_clamps_importance() {
        assert!(format_hit(&hit("x", 0)).starts_with("★☆☆☆☆"));
        assert!(format_hit(&hit("x", 9)).starts_with("★★★★★"));
    }
}
