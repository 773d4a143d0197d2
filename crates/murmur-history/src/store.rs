//! Custom JSON history shadow.
//!
//! One file per chat under `chat_history/<platform>/<group|private>/<chat_id>.json`,
//! holding the plugin's own view of the conversation (including messages
//! the host never saw because no reply happened). Human-readable,
//! versionless, truncated to a fixed tail.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error};

use murmur_core::host::Role;
use murmur_core::ChatKey;

use crate::error::{HistoryError, Result};

/// Rows kept per chat file.
const SHADOW_HISTORY_CAP: usize = 500;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub role: Role,
    pub content: String,
    pub sender_id: String,
    pub sender_name: String,
    /// Unix seconds.
    pub timestamp: f64,
    /// Synthetic proactive entry, not an organic user message.
    #[serde(default)]
    pub proactive: bool,
}

impl StoredMessage {
    pub fn user(sender_id: &str, sender_name: &str, content: &str, timestamp: f64) -> Self {
        Self {
            role: Role::User,
            content: content.to_string(),
            sender_id: sender_id.to_string(),
            sender_name: sender_name.to_string(),
            timestamp,
            proactive: false,
        }
    }

    pub fn bot(bot_id: &str, bot_name: &str, content: &str, timestamp: f64) -> Self {
        Self {
            role: Role::Assistant,
            content: content.to_string(),
            sender_id: bot_id.to_string(),
            sender_name: bot_name.to_string(),
            timestamp,
            proactive: false,
        }
    }
}

pub struct HistoryStore {
    root: PathBuf,
    /// Serializes the read-modify-write cycle on the per-chat files.
    write_lock: Mutex<()>,
}

impl HistoryStore {
    /// `data_dir` is the plugin data directory; files live in its
    /// `chat_history/` subtree.
    pub fn new(data_dir: &Path) -> Self {
        Self {
            root: data_dir.join("chat_history"),
            write_lock: Mutex::new(()),
        }
    }

    fn path_for(&self, chat: &ChatKey) -> PathBuf {
        self.root
            .join(sanitize(&chat.platform))
            .join(chat.kind.as_str())
            .join(format!("{}.json", sanitize(&chat.chat_id)))
    }

    /// Append one message, truncating the file to the newest
    /// [`SHADOW_HISTORY_CAP`] rows.
    pub async fn append(&self, chat: &ChatKey, message: StoredMessage) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.path_for(chat);
        let mut messages = read_file(&path);
        messages.push(message);
        if messages.len() > SHADOW_HISTORY_CAP {
            let excess = messages.len() - SHADOW_HISTORY_CAP;
            messages.drain(0..excess);
        }
        write_file(&path, &messages)?;
        debug!(chat = %chat, total = messages.len(), "shadow history appended");
        Ok(())
    }

    /// The newest `limit` messages, oldest first.
    pub async fn recent(&self, chat: &ChatKey, limit: usize) -> Result<Vec<StoredMessage>> {
        let path = self.path_for(chat);
        let messages = read_file(&path);
        let skip = messages.len().saturating_sub(limit);
        Ok(messages.into_iter().skip(skip).collect())
    }

    /// Delete a chat's shadow file (the "reset here" command).
    pub async fn clear_chat(&self, chat: &ChatKey) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.path_for(chat);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(HistoryError::Io(e)),
        }
    }
}

/// Path components come from platform ids and chat ids; keep them flat.
fn sanitize(component: &str) -> String {
    component
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

fn read_file(path: &Path) -> Vec<StoredMessage> {
    let Ok(bytes) = std::fs::read(path) else {
        return Vec::new();
    };
    match serde_json::from_slice(&bytes) {
        Ok(messages) => messages,
        Err(e) => {
            error!(path = %path.display(), "shadow history corrupt, starting fresh: {e}");
            Vec::new()
        }
    }
}

fn write_file(path: &Path, messages: &[StoredMessage]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let bytes = serde_json::to_vec_pretty(messages)?;
    std::fs::write(path, bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat() -> ChatKey {
        ChatKey::group("aiocqhttp", "879646332")
    }

    #[tokio::test]
    async fn append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path());
        store
            .append(&chat(), StoredMessage::user("u1", "alice", "hi", 1.0))
            .await
            .unwrap();
        store
            .append(&chat(), StoredMessage::bot("self", "bot", "hello", 2.0))
            .await
            .unwrap();

        let recent = store.recent(&chat(), 10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].content, "hi");
        assert_eq!(recent[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn file_lands_under_platform_and_kind() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path());
        store
            .append(&chat(), StoredMessage::user("u1", "alice", "hi", 1.0))
            .await
            .unwrap();
        let expected = dir
            .path()
            .join("chat_history/aiocqhttp/group/879646332.json");
        assert!(expected.exists());
    }

    #[tokio::test]
    async fn recent_limit_returns_newest() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path());
        for i in 0..5 {
            store
                .append(
                    &chat(),
                    StoredMessage::user("u1", "alice", &format!("m{i}"), i as f64),
                )
                .await
                .unwrap();
        }
        let recent = store.recent(&chat(), 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].content, "m3");
        assert_eq!(recent[1].content, "m4");
    }

    #[tokio::test]
    async fn round_trip_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path());
        let message = StoredMessage::user("u1", "alice", "hi", 1.5);
        store.append(&chat(), message.clone()).await.unwrap();
        let first = store.recent(&chat(), 1).await.unwrap();
        assert_eq!(first[0], message);
    }

    #[tokio::test]
    async fn clear_chat_removes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path());
        store
            .append(&chat(), StoredMessage::user("u1", "a", "hi", 1.0))
            .await
            .unwrap();
        store.clear_chat(&chat()).await.unwrap();
        assert!(store.recent(&chat(), 10).await.unwrap().is_empty());
        // Clearing twice is fine.
        store.clear_chat(&chat()).await.unwrap();
    }

    #[tokio::test]
    async fn weird_ids_are_sanitized() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path());
        let chat = ChatKey::private("tele/gram", "../../etc");
        store
            .append(&chat, StoredMessage::user("u", "n", "x", 1.0))
            .await
            .unwrap();
        let recent = store.recent(&chat, 1).await.unwrap();
        assert_eq!(recent.len(), 1);
        // Nothing escaped the data root.
        assert!(!dir.path().join("../etc.json").exists());
    }
}
