//! Recurrence rules: when does a job fire next.

use std::fmt;

use chrono::{DateTime, Duration, Timelike};
use chrono_tz::Tz;

/// Describes when a job's next activation falls.
///
/// `next` must be a pure function of the rule and `after`: the run loop
/// calls it once when the scheduler starts and once after every firing, and
/// relies on repeated calls giving the same answer. Rules are `Debug` so
/// parse results and entries can be reported in failures.
pub trait Schedule: fmt::Debug + Send + Sync + 'static {
    /// The next activation strictly after `after`, or `None` when no instant
    /// within the rule's search horizon satisfies it.
    fn next(&self, after: &DateTime<Tz>) -> Option<DateTime<Tz>>;
}

/// Fixed-interval rule: activations exactly `delay` apart, regardless of how
/// long the job runs.
///
/// The interval is aligned to whole seconds. Anything below one second is
/// rounded up to one second; sub-second remainders are truncated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    delay: Duration,
}

impl Interval {
    pub fn new(every: std::time::Duration) -> Self {
        let secs = i64::try_from(every.as_secs().max(1)).unwrap_or(i64::MAX);
        let delay = Duration::try_seconds(secs).unwrap_or(Duration::MAX);
        Self { delay }
    }
}

impl Schedule for Interval {
    fn next(&self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        // Activations stay on the whole-second grid, so a mid-second query
        // is floored before the interval is added.
        let t = after.with_nanosecond(0).unwrap_or(*after);
        t.checked_add_signed(self.delay)
    }
}
