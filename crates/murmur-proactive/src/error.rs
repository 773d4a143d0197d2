use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProactiveError {
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Delegate error: {0}")]
    Delegate(String),
}

pub type Result<T> = std::result::Result<T, ProactiveError>;
