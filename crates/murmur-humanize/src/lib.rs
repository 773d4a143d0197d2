//! Leaf transformers of the humanization layer: output/save content
//! filtering, typo injection, typing-delay simulation, mood tracking, and
//! per-chat reply-frequency tuning.
//!
//! Each unit is self-contained and side-effect free apart from the typing
//! simulator's sleep; the engine composes them in §"post-LLM" order.

pub mod content_filter;
pub mod frequency;
pub mod mood;
pub mod typing;
pub mod typo;

pub use content_filter::{FilterRule, FilterSet};
pub use frequency::FrequencyTuner;
pub use mood::MoodTracker;
pub use typing::TypingSimulator;
pub use typo::TypoGenerator;
