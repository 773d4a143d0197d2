use thiserror::Error;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Host conversation error: {0}")]
    Conversation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<murmur_core::MurmurError> for HistoryError {
    fn from(e: murmur_core::MurmurError) -> Self {
        HistoryError::Conversation(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, HistoryError>;
