//! Shared foundation for the murmur workspace: chat identity types, the
//! configuration surface, the error taxonomy, and the host boundary traits.
//!
//! Everything above this crate (attention, history, proactive, engine) talks
//! to the chatbot host exclusively through the traits in [`host`].

pub mod config;
pub mod error;
pub mod host;
pub mod types;

pub use error::{MurmurError, Result};
pub use types::{ChatKey, ChatKind};
