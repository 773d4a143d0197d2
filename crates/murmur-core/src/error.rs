use thiserror::Error;

#[derive(Debug, Error)]
pub enum MurmurError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("LLM provider error: {0}")]
    Provider(String),

    #[error("Request timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Host contract violation: {0}")]
    Host(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MurmurError {
    /// True for failures that should degrade silently (§7 transient I/O):
    /// the handler falls back to a safe default instead of surfacing them.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MurmurError::Provider(_) | MurmurError::Timeout { .. } | MurmurError::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, MurmurError>;
