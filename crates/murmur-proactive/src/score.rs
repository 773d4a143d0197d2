//! Adaptive interaction scoring.
//!
//! Every chat carries a 0–100 score that buckets into a qualitative level;
//! the level scales the proactive parameters (a hot group gets poked more
//! often and forgiven faster, a dead one barely at all). The score rises
//! on answered proactive messages and sinks on silence and neglect.

use rand::Rng;
use serde::Serialize;

use murmur_core::config::ProactiveConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreLevel {
    Hot,
    Friendly,
    Cool,
    Cold,
    Dead,
}

impl ScoreLevel {
    pub fn from_score(score: i32) -> Self {
        match score {
            s if s >= 80 => ScoreLevel::Hot,
            s if s >= 60 => ScoreLevel::Friendly,
            s if s >= 40 => ScoreLevel::Cool,
            s if s >= 20 => ScoreLevel::Cold,
            _ => ScoreLevel::Dead,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScoreLevel::Hot => "hot",
            ScoreLevel::Friendly => "friendly",
            ScoreLevel::Cool => "cool",
            ScoreLevel::Cold => "cold",
            ScoreLevel::Dead => "dead",
        }
    }
}

/// Parameters after adaptive scaling, before the Beta perturbation.
#[derive(Debug, Clone, Copy)]
pub struct AdaptiveParams {
    pub prob_multiplier: f64,
    pub silence_threshold: u64,
    pub cooldown_duration: u64,
    /// Base threshold for this score bucket; the per-round effective value
    /// comes from [`perturbed_max_failures`].
    pub max_failures: u32,
    pub score: i32,
    pub level: ScoreLevel,
}

/// Scale the configured base parameters by the chat's score bucket.
pub fn adaptive_parameters(score: i32, config: &ProactiveConfig) -> AdaptiveParams {
    let base_max = config.max_consecutive_failures;
    if !config.enable_adaptive_scoring {
        return AdaptiveParams {
            prob_multiplier: 1.0,
            silence_threshold: config.silence_threshold,
            cooldown_duration: config.cooldown_duration,
            max_failures: base_max,
            score: 50,
            level: ScoreLevel::Friendly,
        };
    }

    let level = ScoreLevel::from_score(score);
    let (prob_multiplier, silence_multiplier, cooldown_multiplier, max_failures) = match level {
        ScoreLevel::Hot => (1.8, 0.5, 0.33, (base_max + 1).min(3)),
        ScoreLevel::Friendly => (1.0, 1.0, 1.0, base_max),
        ScoreLevel::Cool => (0.5, 1.5, 1.5, base_max.saturating_sub(1).max(1)),
        ScoreLevel::Cold => (0.25, 3.0, 2.0, 1),
        ScoreLevel::Dead => (0.1, 6.0, 4.0, 1),
    };

    AdaptiveParams {
        prob_multiplier,
        silence_threshold: (config.silence_threshold as f64 * silence_multiplier) as u64,
        cooldown_duration: (config.cooldown_duration as f64 * cooldown_multiplier) as u64,
        // The adaptive threshold never exceeds the configured maximum.
        max_failures: max_failures.min(base_max.max(1)),
        score,
        level,
    }
}

/// Draw the effective failure threshold for a new retry round.
///
/// Beta(1, 1 + 5·perturbation): α = 1 gives the closed-form inverse CDF
/// `x = 1 − (1 − u)^(1/β)`, biased toward small values as the perturbation
/// grows. Scaled to `[1, base]`. With perturbation 0 the configured base is
/// returned untouched, so cooldown entry stays deterministic.
pub fn perturbed_max_failures<R: Rng + ?Sized>(
    base_max_failures: u32,
    perturbation: f64,
    rng: &mut R,
) -> u32 {
    let perturbation = perturbation.clamp(0.0, 1.0);
    if perturbation <= 0.0 || base_max_failures == 0 {
        return base_max_failures;
    }
    let beta = 1.0 + perturbation * 5.0;
    let u: f64 = rng.gen();
    let ratio = 1.0 - (1.0 - u).powf(1.0 / beta);
    let effective = (ratio * base_max_failures as f64).round() as u32;
    effective.clamp(1, base_max_failures)
}

/// Clamp a score delta into the configured bounds and report crossings the
/// way operators care about: threshold crossings (30/50/70), extremes, and
/// big jumps get logged at info, everything else at debug.
pub fn apply_score_delta(
    score: i32,
    delta: i32,
    config: &ProactiveConfig,
) -> (i32, bool) {
    let new_score = (score + delta).clamp(config.interaction_score_min, config.interaction_score_max);
    let crossed = [30, 50, 70].iter().any(|t| {
        (score < *t && new_score >= *t) || (score > *t && new_score <= *t)
    });
    let notable = crossed || new_score <= 20 || new_score >= 90 || delta.abs() >= 15;
    (new_score, notable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;

    fn config() -> ProactiveConfig {
        ProactiveConfig {
            silence_threshold: 600,
            cooldown_duration: 3600,
            max_consecutive_failures: 3,
            enable_adaptive_scoring: true,
            ..ProactiveConfig::default()
        }
    }

    #[test]
    fn score_buckets_match_the_ladder() {
        assert_eq!(ScoreLevel::from_score(95), ScoreLevel::Hot);
        assert_eq!(ScoreLevel::from_score(80), ScoreLevel::Hot);
        assert_eq!(ScoreLevel::from_score(79), ScoreLevel::Friendly);
        assert_eq!(ScoreLevel::from_score(59), ScoreLevel::Cool);
        assert_eq!(ScoreLevel::from_score(39), ScoreLevel::Cold);
        assert_eq!(ScoreLevel::from_score(19), ScoreLevel::Dead);
    }

    #[test]
    fn hot_group_gets_faster_parameters() {
        let p = adaptive_parameters(85, &config());
        assert_eq!(p.prob_multiplier, 1.8);
        assert_eq!(p.silence_threshold, 300);
        assert_eq!(p.cooldown_duration, 1188);
        assert_eq!(p.max_failures, 3);
    }

    #[test]
    fn dead_group_gets_glacial_parameters() {
        let p = adaptive_parameters(5, &config());
        assert_eq!(p.prob_multiplier, 0.1);
        assert_eq!(p.silence_threshold, 3600);
        assert_eq!(p.max_failures, 1);
    }

    #[test]
    fn adaptive_never_exceeds_configured_max() {
        let mut cfg = config();
        cfg.max_consecutive_failures = 2;
        let p = adaptive_parameters(85, &cfg);
        assert!(p.max_failures <= 2);
    }

    #[test]
    fn disabled_scoring_returns_base_values() {
        let mut cfg = config();
        cfg.enable_adaptive_scoring = false;
        let p = adaptive_parameters(5, &cfg);
        assert_eq!(p.prob_multiplier, 1.0);
        assert_eq!(p.silence_threshold, 600);
        assert_eq!(p.max_failures, 3);
    }

    #[test]
    fn zero_perturbation_is_deterministic() {
        let mut rng = StepRng::new(0, 0);
        assert_eq!(perturbed_max_failures(3, 0.0, &mut rng), 3);
    }

    #[test]
    fn perturbed_threshold_stays_in_range() {
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let v = perturbed_max_failures(5, 0.8, &mut rng);
            assert!((1..=5).contains(&v), "out of range: {v}");
        }
    }

    #[test]
    fn score_delta_clamps_to_bounds() {
        let cfg = config();
        let (up, _) = apply_score_delta(95, 50, &cfg);
        assert_eq!(up, cfg.interaction_score_max);
        let (down, _) = apply_score_delta(12, -50, &cfg);
        assert_eq!(down, cfg.interaction_score_min);
    }

    #[test]
    fn threshold_crossings_are_notable() {
        let cfg = config();
        let (_, notable) = apply_score_delta(68, 5, &cfg);
        assert!(notable, "crossing 70 is notable");
        let (_, quiet) = apply_score_delta(55, 2, &cfg);
        assert!(!quiet);
    }
}
