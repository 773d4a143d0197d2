//! Complaint escalation.
//!
//! When proactive messages keep going unanswered, the accumulated failure
//! count unlocks escalating mood cues that ride along with (or replace)
//! the normal proactive prompt, so the persona can visibly sulk instead of
//! cheerfully repeating itself.

use rand::Rng;

use murmur_core::config::ProactiveConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComplaintLevel {
    Light,
    Medium,
    Strong,
}

impl ComplaintLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComplaintLevel::Light => "light",
            ComplaintLevel::Medium => "medium",
            ComplaintLevel::Strong => "strong",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ComplaintPrompt {
    pub level: ComplaintLevel,
    pub prompt: String,
    /// When true the complaint replaces the normal proactive prompt
    /// instead of appending to it.
    pub priority: bool,
    pub failure_count: u32,
}

/// Maybe produce a complaint cue for the current failure count. The tier
/// thresholds gate eligibility; each tier then rolls its own probability.
pub fn generate_complaint<R: Rng + ?Sized>(
    total_failures: u32,
    config: &ProactiveConfig,
    rng: &mut R,
) -> Option<ComplaintPrompt> {
    if !config.enable_complaint_system || total_failures < config.complaint_trigger_threshold {
        return None;
    }

    // Most severe tier first.
    let (level, probability) = if total_failures >= config.complaint_level_strong {
        (ComplaintLevel::Strong, config.complaint_probability_strong)
    } else if total_failures >= config.complaint_level_medium {
        (ComplaintLevel::Medium, config.complaint_probability_medium)
    } else if total_failures >= config.complaint_level_light {
        (ComplaintLevel::Light, config.complaint_probability_light)
    } else {
        return None;
    };

    if rng.gen::<f64>() >= probability {
        return None;
    }

    let prompt = match level {
        ComplaintLevel::Light => String::from(
            "\n\n[Mood cue] Your last message got no response. You may \
             lightly acknowledge it with humor, or just move on to a fresh \
             topic — keep it casual, nothing dramatic.",
        ),
        ComplaintLevel::Medium => format!(
            "\n\n[Mood cue] You have spoken up {total_failures} times without anyone \
             responding. You may show, a bit more openly, that being ignored \
             stings — tease the room about it or pointedly change the \
             subject, but stay playful rather than negative."
        ),
        ComplaintLevel::Strong => format!(
            "\n\n[Mood cue] You have now spoken {total_failures} times with no reply and \
             it genuinely hurts. Express the dejection plainly — threaten to \
             go quiet for a while, say you'll lurk, be self-deprecating. \
             Stay in character and don't spiral into real negativity."
        ),
    };

    Some(ComplaintPrompt {
        level,
        prompt,
        priority: true,
        failure_count: total_failures,
    })
}
