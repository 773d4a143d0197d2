//! The decision & orchestration engine.
//!
//! [`DecisionEngine`] is the single entry point per inbound group message:
//! ordered filters, trigger classification, the probability gate, the
//! judge AI, the concurrency gate, and finally reply orchestration with
//! the full post-send transaction (cache promotion, attention updates,
//! frequency tuning). [`MurmurPlugin`] wires the managers together, owns
//! the background tasks, and implements the proactive generation delegate.

pub mod decision;
pub mod event;
pub mod filters;
pub mod judge;
pub mod memory;
pub mod orchestrator;
pub mod plugin;
pub mod provider;
pub mod tools;

pub use decision::{DecisionEngine, EngineDeps, MessageDisposition};
pub use event::{GroupMessageEvent, MessageComponent};
pub use judge::{JudgeAi, JudgeVerdict};
pub use plugin::MurmurPlugin;
pub use provider::OpenAiCompatProvider;
