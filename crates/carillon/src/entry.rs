//! Scheduled entries and their firing order.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use chrono::DateTime;
use chrono_tz::Tz;

use crate::job::Job;
use crate::schedule::Schedule;

/// Identifier the scheduler assigns to a registered entry.
///
/// Ids are handed out monotonically starting at 1 and never reused; 0 is
/// never issued, so it is safe as a sentinel on the caller's side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId(pub u64);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One registered (schedule, job) pair and its firing state.
#[derive(Clone)]
pub struct Entry {
    /// Scheduler-assigned identifier, for lookup and removal.
    pub id: EntryId,
    /// When the job should run.
    pub schedule: Arc<dyn Schedule>,
    /// The upcoming activation, or `None` while the scheduler is stopped or
    /// when the schedule has no satisfiable instant.
    pub next: Option<DateTime<Tz>>,
    /// The most recent activation; `None` until the entry first fires.
    pub prev: Option<DateTime<Tz>>,
    /// The job as submitted, before any wrappers.
    pub job: Arc<dyn Job>,
    /// The job actually invoked: `job` decorated by the scheduler's chain.
    pub wrapped_job: Arc<dyn Job>,
}

impl Entry {
    /// Firing order: soonest `next` first, entries that never fire last.
    pub(crate) fn cmp_by_next(a: &Entry, b: &Entry) -> Ordering {
        match (a.next, b.next) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(x), Some(y)) => x.cmp(&y),
        }
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("id", &self.id)
            .field("next", &self.next)
            .field("prev", &self.prev)
            .finish_non_exhaustive()
    }
}
