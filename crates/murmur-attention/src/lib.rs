//! Multi-user attention & emotion tracking.
//!
//! Per (chat, user) the bot keeps a decaying attention score and emotional
//! valence. Replying to a user raises their attention and bleeds a little
//! from everyone else in the chat; a judge-AI "no reply" lowers it and can
//! push the user into the cooldown list. Sustained back-and-forth with one
//! user accumulates fatigue, which blocks further attention growth until
//! the streak breaks.
//!
//! All state lives in memory behind one async mutex per manager and is
//! shadowed to `attention_data.json` / `cooldown_data.json`.

pub mod cooldown;
pub mod decay;
pub mod error;
pub mod sentiment;
pub mod tracker;
pub mod types;

pub use cooldown::CooldownManager;
pub use error::{AttentionError, Result};
pub use tracker::AttentionTracker;
pub use types::{ActivitySnapshot, FatigueLevel, ProfileSnapshot, UserProfile};
