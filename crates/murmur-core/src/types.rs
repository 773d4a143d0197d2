use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Whether a chat is a group or a one-on-one conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Group,
    Private,
}

impl ChatKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatKind::Group => "group",
            ChatKind::Private => "private",
        }
    }

    pub fn is_private(&self) -> bool {
        matches!(self, ChatKind::Private)
    }
}

impl fmt::Display for ChatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Primary sharding key for everything murmur tracks.
///
/// Format: `{platform}:{group|private}:{chat_id}`. The platform segment is
/// the platform *name* (adapter type); the adapter instance id needed for
/// outbound sends is carried separately wherever sending happens.
///
/// Serialized as the formatted string so persisted JSON maps stay
/// human-readable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChatKey {
    pub platform: String,
    pub kind: ChatKind,
    pub chat_id: String,
}

impl ChatKey {
    pub fn new(platform: impl Into<String>, kind: ChatKind, chat_id: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            kind,
            chat_id: chat_id.into(),
        }
    }

    pub fn group(platform: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self::new(platform, ChatKind::Group, chat_id)
    }

    pub fn private(platform: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self::new(platform, ChatKind::Private, chat_id)
    }

    pub fn is_private(&self) -> bool {
        self.kind.is_private()
    }
}

impl fmt::Display for ChatKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.platform, self.kind, self.chat_id)
    }
}

impl FromStr for ChatKey {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let platform = parts.next().filter(|p| !p.is_empty());
        let kind = parts.next();
        let chat_id = parts.next().filter(|c| !c.is_empty());
        match (platform, kind, chat_id) {
            (Some(platform), Some(kind), Some(chat_id)) => {
                let kind = match kind {
                    "group" => ChatKind::Group,
                    "private" => ChatKind::Private,
                    other => return Err(format!("unknown chat kind: {other}")),
                };
                Ok(ChatKey::new(platform, kind, chat_id))
            }
            _ => Err(format!("malformed chat key: {s}")),
        }
    }
}

impl Serialize for ChatKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ChatKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Current Unix time in seconds, as the fractional representation every
/// persisted store uses.
pub fn unix_now() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_key_round_trips_through_display() {
        let key = ChatKey::group("aiocqhttp", "879646332");
        let parsed: ChatKey = key.to_string().parse().expect("parse");
        assert_eq!(key, parsed);
    }

    #[test]
    fn chat_key_rejects_malformed_strings() {
        assert!("".parse::<ChatKey>().is_err());
        assert!("qq".parse::<ChatKey>().is_err());
        assert!("qq:channel:1".parse::<ChatKey>().is_err());
        assert!("qq:group:".parse::<ChatKey>().is_err());
    }

    #[test]
    fn chat_key_serializes_as_string() {
        let key = ChatKey::private("telegram", "42");
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"telegram:private:42\"");
        let back: ChatKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn chat_id_may_contain_colons() {
        let parsed: ChatKey = "slack:group:T01:C02".parse().expect("parse");
        assert_eq!(parsed.chat_id, "T01:C02");
    }
}
