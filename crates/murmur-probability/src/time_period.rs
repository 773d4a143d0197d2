//! Wall-clock factors for reply and proactive probability.
//!
//! Two mechanisms share the minute math here:
//! - Named periods (`[{"name","start","end","factor"}]`, cross-midnight
//!   allowed): inside a period its factor applies; within
//!   `transition_minutes` of a boundary the factor fades linearly (or with
//!   a cosine curve) from/to the surrounding region; elsewhere 1.0.
//! - Quiet hours: the degenerate period whose inside factor is 0, used as
//!   the highest-priority gate for proactive chat.

use chrono::Timelike;
use serde::Deserialize;
use tracing::warn;

const MINUTES_PER_DAY: i64 = 1440;

/// One configured period, times held as minutes-of-day.
#[derive(Debug, Clone, PartialEq)]
pub struct TimePeriod {
    pub name: String,
    pub start_minutes: i64,
    pub end_minutes: i64,
    pub factor: f64,
}

impl TimePeriod {
    /// Whether minute `m` falls inside `[start, end)`, across midnight if
    /// needed.
    fn contains(&self, m: i64) -> bool {
        if self.start_minutes <= self.end_minutes {
            self.start_minutes <= m && m < self.end_minutes
        } else {
            m >= self.start_minutes || m < self.end_minutes
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawPeriod {
    #[serde(default)]
    name: String,
    start: String,
    end: String,
    factor: f64,
}

/// Parse the `time_periods` JSON config string. Invalid JSON or invalid
/// entries degrade to an empty list / skipped entries with one warning each.
pub fn parse_periods(json: &str) -> Vec<TimePeriod> {
    if json.trim().is_empty() {
        return Vec::new();
    }
    let raw: Vec<RawPeriod> = match serde_json::from_str(json) {
        Ok(raw) => raw,
        Err(e) => {
            warn!("time period config is not valid JSON, ignoring: {e}");
            return Vec::new();
        }
    };
    raw.into_iter()
        .filter_map(|p| {
            let start = parse_hhmm(&p.start)?;
            let end = parse_hhmm(&p.end)?;
            if start == end {
                warn!(name = %p.name, "time period with zero length, skipping");
                return None;
            }
            Some(TimePeriod {
                name: p.name,
                start_minutes: start,
                end_minutes: end,
                factor: p.factor,
            })
        })
        .collect()
}

/// `"HH:MM"` → minutes of day; `None` (with a warning) when unparseable.
pub fn parse_hhmm(s: &str) -> Option<i64> {
    let mut parts = s.splitn(2, ':');
    let hour: i64 = parts.next()?.trim().parse().ok()?;
    let minute: i64 = parts.next().unwrap_or("0").trim().parse().ok()?;
    if !(0..24).contains(&hour) || !(0..60).contains(&minute) {
        warn!(time = s, "time outside 00:00–23:59, ignoring");
        return None;
    }
    Some(hour * 60 + minute)
}

/// Minutes of day for a chrono time.
pub fn minute_of_day<T: Timelike>(t: &T) -> i64 {
    (t.hour() * 60 + t.minute()) as i64
}

/// Forward circular distance in minutes from `a` to `b`.
fn forward_dist(a: i64, b: i64) -> i64 {
    (b - a).rem_euclid(MINUTES_PER_DAY)
}

/// Factor for minute-of-day `m` given the configured periods.
pub fn time_factor(
    m: i64,
    periods: &[TimePeriod],
    transition_minutes: u32,
    min_factor: f64,
    max_factor: f64,
    use_smooth_curve: bool,
) -> f64 {
    if periods.is_empty() {
        return 1.0;
    }
    let m = m.rem_euclid(MINUTES_PER_DAY);

    // Inside a period the factor is flat; the first match wins.
    if let Some(period) = periods.iter().find(|p| p.contains(m)) {
        return period.factor.clamp(min_factor, max_factor);
    }

    // Outside all periods: fade into an upcoming period and out of a past
    // one. The nearest boundary wins if windows overlap.
    let trans = transition_minutes as i64;
    let mut best: Option<(i64, f64)> = None;
    if trans > 0 {
        for period in periods {
            // Approaching the start: 1.0 → factor over [start − trans, start).
            let until_start = forward_dist(m, period.start_minutes);
            if until_start > 0 && until_start <= trans {
                let progress = shape(1.0 - until_start as f64 / trans as f64, use_smooth_curve);
                let factor = 1.0 + (period.factor - 1.0) * progress;
                if best.map(|(d, _)| until_start < d).unwrap_or(true) {
                    best = Some((until_start, factor));
                }
            }
            // Leaving after the end: factor → 1.0 over [end, end + trans).
            let since_end = forward_dist(period.end_minutes, m);
            if since_end < trans {
                let progress = shape(since_end as f64 / trans as f64, use_smooth_curve);
                let factor = period.factor + (1.0 - period.factor) * progress;
                if best.map(|(d, _)| since_end < d).unwrap_or(true) {
                    best = Some((since_end, factor));
                }
            }
        }
    }
    best.map(|(_, f)| f.clamp(min_factor, max_factor)).unwrap_or(1.0)
}

/// Quiet-hours gate: 0.0 inside `[start, end)` (cross-midnight allowed),
/// a linear fade 1→0 approaching the start and 0→1 after the end, 1.0
/// elsewhere. Always linear — this is a hard gate, not an aesthetic curve.
pub fn quiet_transition_factor(
    m: i64,
    quiet_start: i64,
    quiet_end: i64,
    transition_minutes: u32,
) -> f64 {
    let m = m.rem_euclid(MINUTES_PER_DAY);
    let quiet = TimePeriod {
        name: "quiet".to_string(),
        start_minutes: quiet_start,
        end_minutes: quiet_end,
        factor: 0.0,
    };
    if quiet.contains(m) {
        return 0.0;
    }
    let trans = transition_minutes as i64;
    if trans == 0 {
        return 1.0;
    }
    let until_start = forward_dist(m, quiet_start);
    if until_start > 0 && until_start <= trans {
        return until_start as f64 / trans as f64;
    }
    let since_end = forward_dist(quiet_end, m);
    if since_end < trans {
        return since_end as f64 / trans as f64;
    }
    1.0
}

fn shape(progress: f64, smooth: bool) -> f64 {
    let p = progress.clamp(0.0, 1.0);
    if smooth {
        (1.0 - (std::f64::consts::PI * p).cos()) / 2.0
    } else {
        p
    }
}
