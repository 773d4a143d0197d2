//! Pure probability layer: the reply-probability composition pipeline and
//! the wall-clock time-period factors. No state, no I/O — callers hand in
//! decayed snapshots and get a number back, which keeps every rule testable
//! in isolation.

pub mod calculator;
pub mod time_period;

pub use calculator::{effective_probability, ProbabilityInputs};
pub use time_period::{parse_periods, quiet_transition_factor, time_factor, TimePeriod};
