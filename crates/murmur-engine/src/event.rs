//! Inbound event model — the shape the host adapter hands to
//! [`crate::DecisionEngine::on_group_message`].

use murmur_core::{ChatKey, ChatKind};

#[derive(Debug, Clone, PartialEq)]
pub enum MessageComponent {
    Text {
        text: String,
    },
    Mention {
        user_id: String,
        user_name: Option<String>,
        /// Group-wide "@all" mention.
        is_all: bool,
    },
    Image {
        url: String,
    },
    Reply {
        message_id: String,
    },
    /// Native poke notification (not typed text).
    Poke {
        sender_id: String,
        target_id: String,
    },
}

#[derive(Debug, Clone)]
pub struct GroupMessageEvent {
    /// Platform (adapter type) name, e.g. "aiocqhttp".
    pub platform_name: String,
    /// Adapter instance id — required for outbound sends.
    pub platform_id: String,
    pub chat_kind: ChatKind,
    pub chat_id: String,
    /// The host's unified session origin.
    pub origin: String,
    pub message_id: String,
    pub sender_id: String,
    pub sender_name: String,
    /// The bot's own account id on this platform.
    pub self_id: String,
    /// Platform message timestamp, Unix seconds.
    pub timestamp: f64,
    pub components: Vec<MessageComponent>,
}

impl GroupMessageEvent {
    pub fn chat_key(&self) -> ChatKey {
        ChatKey::new(self.platform_name.clone(), self.chat_kind, self.chat_id.clone())
    }

    /// Concatenated text components.
    pub fn text(&self) -> String {
        self.components
            .iter()
            .filter_map(|c| match c {
                MessageComponent::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
            .trim()
            .to_string()
    }

    pub fn image_urls(&self) -> Vec<String> {
        self.components
            .iter()
            .filter_map(|c| match c {
                MessageComponent::Image { url } => Some(url.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn has_at_all(&self) -> bool {
        self.components.iter().any(|c| {
            matches!(c, MessageComponent::Mention { is_all, .. } if *is_all)
        })
    }

    pub fn mentions_bot(&self) -> bool {
        self.components.iter().any(|c| {
            matches!(c, MessageComponent::Mention { user_id, is_all, .. }
                if !*is_all && user_id == &self.self_id)
        })
    }

    pub fn mentions_others(&self) -> bool {
        self.components.iter().any(|c| {
            matches!(c, MessageComponent::Mention { user_id, is_all, .. }
                if !*is_all && user_id != &self.self_id)
        })
    }

    /// Mentioned user descriptions for the cache snapshot.
    pub fn mention_summary(&self) -> Option<String> {
        let mentioned: Vec<String> = self
            .components
            .iter()
            .filter_map(|c| match c {
                MessageComponent::Mention { user_id, user_name, is_all } if !*is_all => Some(
                    user_name
                        .clone()
                        .map(|n| format!("{n}({user_id})"))
                        .unwrap_or_else(|| user_id.clone()),
                ),
                _ => None,
            })
            .collect();
        if mentioned.is_empty() {
            None
        } else {
            Some(mentioned.join(", "))
        }
    }

    /// The native poke component, if this event is a poke notification.
    pub fn poke(&self) -> Option<(&str, &str)> {
        self.components.iter().find_map(|c| match c {
            MessageComponent::Poke { sender_id, target_id } => {
                Some((sender_id.as_str(), target_id.as_str()))
            }
            _ => None,
        })
    }

    pub fn is_poke_event(&self) -> bool {
        self.poke().is_some()
    }

    pub fn has_images(&self) -> bool {
        self.components
            .iter()
            .any(|c| matches!(c, MessageComponent::Image { .. }))
    }

    /// Image-only: at least one image and no text at all.
    pub fn is_image_only(&self) -> bool {
        self.has_images() && self.text().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(components: Vec<MessageComponent>) -> GroupMessageEvent {
        GroupMessageEvent {
            platform_name: "qq".to_string(),
            platform_id: "qq-main".to_string(),
            chat_kind: ChatKind::Group,
            chat_id: "1".to_string(),
            origin: "qq:group:1".to_string(),
            message_id: "m1".to_string(),
            sender_id: "u1".to_string(),
            sender_name: "alice".to_string(),
            self_id: "bot".to_string(),
            timestamp: 1.0,
            components,
        }
    }

    #[test]
    fn text_concatenates_and_trims() {
        let e = event(vec![
            MessageComponent::Text { text: " hello".to_string() },
            MessageComponent::Text { text: " world ".to_string() },
        ]);
        assert_eq!(e.text(), "hello world");
    }

    #[test]
    fn mention_classification() {
        let e = event(vec![
            MessageComponent::Mention {
                user_id: "bot".to_string(),
                user_name: None,
                is_all: false,
            },
            MessageComponent::Mention {
                user_id: "u2".to_string(),
                user_name: Some("bob".to_string()),
                is_all: false,
            },
        ]);
        assert!(e.mentions_bot());
        assert!(e.mentions_others());
        assert!(!e.has_at_all());
        assert_eq!(e.mention_summary().unwrap(), "bot, bob(u2)");
    }

    #[test]
    fn at_all_is_not_a_bot_mention() {
        let e = event(vec![MessageComponent::Mention {
            user_id: String::new(),
            user_name: None,
            is_all: true,
        }]);
        assert!(e.has_at_all());
        assert!(!e.mentions_bot());
    }

    #[test]
    fn image_only_detection() {
        let e = event(vec![MessageComponent::Image { url: "u".to_string() }]);
        assert!(e.is_image_only());
        let mixed = event(vec![
            MessageComponent::Image { url: "u".to_string() },
            MessageComponent::Text { text: "look".to_string() },
        ]);
        assert!(!mixed.is_image_only());
    }

    #[test]
    fn poke_extraction() {
        let e = event(vec![MessageComponent::Poke {
            sender_id: "u1".to_string(),
            target_id: "bot".to_string(),
        }]);
        assert_eq!(e.poke(), Some(("u1", "bot")));
    }
}
