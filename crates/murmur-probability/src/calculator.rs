//! The reply-probability composition pipeline.
//!
//! Order is fixed: base → attention (with poke scaling) → spillover for
//! profileless users → interest boost → fatigue penalty → hard clamp →
//! system clamp. A user in attention cooldown short-circuits the whole
//! pipeline and keeps the base probability.

use tracing::debug;

use murmur_attention::types::{ActivitySnapshot, FatigueLevel, ProfileSnapshot};
use murmur_core::config::MurmurConfig;

/// Everything the pipeline needs, pre-fetched and pre-decayed by the caller.
#[derive(Debug, Clone, Default)]
pub struct ProbabilityInputs {
    /// Output of the frequency tuner for this chat.
    pub base_probability: f64,
    /// Decayed profile of the sender, if tracked.
    pub profile: Option<ProfileSnapshot>,
    /// Cooldown wins over every boost: when set, the base is returned as-is.
    pub in_cooldown: bool,
    /// Decayed chat activity, for users without a profile.
    pub spillover: Option<ActivitySnapshot>,
    /// Non-zero when this message is a poke aimed at the bot.
    pub poke_boost_reference: f64,
    /// Message matched a humanize interest keyword.
    pub interest_match: bool,
    /// Sender's current fatigue tier.
    pub fatigue_level: FatigueLevel,
}

/// Compose the effective reply probability. Always in [0, 1]; within the
/// configured hard limits when those are enabled.
pub fn effective_probability(inputs: &ProbabilityInputs, config: &MurmurConfig) -> f64 {
    let base = inputs.base_probability.clamp(0.0, 1.0);

    // Tie-break: cooldown suppresses attention, spillover and poke boosts.
    if inputs.in_cooldown {
        return base;
    }

    let attention_cfg = &config.attention;
    let increased = attention_cfg.attention_increased_probability.clamp(0.0, 1.0);
    let decreased = attention_cfg.attention_decreased_probability.clamp(0.0, 1.0);
    let mut p = base;

    if attention_cfg.enable_attention_mechanism {
        match inputs.profile {
            Some(profile) => {
                p = attention_adjusted(p, profile, increased, decreased, inputs.poke_boost_reference);
            }
            None => {
                // Spillover only applies to users the bot has no profile for.
                if config.spillover.enable_attention_spillover {
                    if let Some(activity) = inputs.spillover {
                        let min_trigger = config.spillover.attention_spillover_min_trigger;
                        if activity.base_activity >= min_trigger
                            && activity.decayed_activity >= min_trigger * 0.5
                        {
                            let room = (increased - p).max(0.0);
                            let boost = activity.decayed_activity
                                * config.spillover.attention_spillover_ratio
                                * room;
                            p = (p + boost).clamp(0.0, 0.95);
                            debug!(boost, p, "spillover boost applied");
                        }
                    }
                }
                if inputs.poke_boost_reference > 0.0 {
                    // No profile to scale against: neutral 0.5 factor.
                    p = (p + inputs.poke_boost_reference * 0.5).clamp(0.0, 0.98);
                }
            }
        }
    } else if inputs.poke_boost_reference > 0.0 {
        p = (p + inputs.poke_boost_reference * 0.5).clamp(0.0, 0.98);
    }

    // Interest keywords make the bot lean in.
    if config.humanize.enable_humanize_mode && inputs.interest_match {
        p += config.humanize.humanize_interest_boost_probability;
    }

    // Fatigue may push below the attention floor on purpose.
    if config.fatigue.enable_conversation_fatigue {
        let penalty = match inputs.fatigue_level {
            FatigueLevel::None => 0.0,
            FatigueLevel::Light => config.fatigue.fatigue_probability_decrease_light,
            FatigueLevel::Medium => config.fatigue.fatigue_probability_decrease_medium,
            FatigueLevel::Heavy => config.fatigue.fatigue_probability_decrease_heavy,
        };
        p -= penalty;
    }

    if config.hard_limit.enable_probability_hard_limit {
        p = p.clamp(
            config.hard_limit.probability_min_limit,
            config.hard_limit.probability_max_limit,
        );
    }

    p.clamp(0.0, 1.0)
}

/// The attention step: progressive boost toward `increased`, emotion as a
/// ±30% multiplier, smart-scaled poke boost, then the 0.98 / floor bounds.
fn attention_adjusted(
    base: f64,
    profile: ProfileSnapshot,
    increased: f64,
    decreased: f64,
    poke_reference: f64,
) -> f64 {
    let attention = profile.attention.clamp(0.0, 1.0);
    let emotion = profile.emotion.clamp(-1.0, 1.0);

    // Poke boost scales with how the bot currently feels about the poker:
    // emotion carries 70% of the factor, attention 30%.
    let poke_boost = if poke_reference > 0.0 {
        let emotion_factor = (0.5 + emotion * 0.5).clamp(0.1, 1.0);
        let attention_factor = (0.3 + attention * 0.7).clamp(0.3, 1.0);
        poke_reference * (emotion_factor * 0.7 + attention_factor * 0.3)
    } else {
        0.0
    };

    if attention > 0.1 {
        let mut p = base + (increased - base) * attention;
        p *= 1.0 + emotion * 0.3;
        p += poke_boost;
        p = p.min(0.98);
        p = p.max(decreased);
        p.clamp(0.0, 1.0)
    } else {
        // Barely-known user: mild discount, floored.
        let mut p = (base * 0.8).max(decreased);
        p += poke_boost;
        p.clamp(0.0, 1.0)
    }
}
