//! `carillon`: a time-driven job scheduler in the spirit of classic cron.
//!
//! # Overview
//!
//! Jobs are registered against recurrence rules, parsed from crontab
//! expressions or built programmatically, and [`Cron::start`] fires each
//! job on its schedule from a single run-loop task. Every execution is
//! dispatched on its own tokio task, so a slow job never delays the
//! timetable; panic containment and overlap policies compose through
//! [`Chain`]. Times are evaluated in the scheduler's zone (UTC unless
//! configured), and individual rules may pin their own zone.
//!
//! # Expression format
//!
//! | Field        | Allowed values  | Special characters |
//! |--------------|-----------------|--------------------|
//! | minute       | 0-59            | `*` `/` `,` `-`    |
//! | hour         | 0-23            | `*` `/` `,` `-`    |
//! | day of month | 1-31            | `*` `/` `,` `-` `?`|
//! | month        | 1-12 or JAN-DEC | `*` `/` `,` `-`    |
//! | day of week  | 0-6 or SUN-SAT  | `*` `/` `,` `-` `?`|
//!
//! Descriptors are accepted in place of the five fields: `@hourly`,
//! `@daily` (alias `@midnight`), `@weekly`, `@monthly`, `@yearly` (alias
//! `@annually`), and `@every <duration>` for fixed intervals. A leading
//! `TZ=<zone>`/`CRON_TZ=<zone>` token evaluates that rule in an IANA zone
//! of its own. A six-field grammar with leading seconds is available via
//! [`CrontabParser::with_seconds`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use carillon::{recover, Chain, Cron, TracingLogger};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cron = Cron::builder()
//!         .timezone(chrono_tz::America::New_York)
//!         .chain(Chain::new(vec![recover(Arc::new(TracingLogger))]))
//!         .build();
//!
//!     cron.add_fn("30 17 * * mon-fri", || async {
//!         println!("markets closed");
//!     })
//!     .await?;
//!
//!     cron.start().await;
//!
//!     // ... the loop fires jobs until stopped ...
//!
//!     let drained = cron.stop().await;
//!     drained.cancelled().await; // wait for in-flight jobs
//!     Ok(())
//! }
//! ```

pub mod calendar;
pub mod chain;
pub mod engine;
pub mod entry;
pub mod error;
pub mod job;
pub mod logger;
pub mod parser;
pub mod schedule;

pub use calendar::{CalendarSchedule, FieldSet};
pub use chain::{delay_if_still_running, recover, skip_if_still_running, Chain, JobWrapper};
pub use engine::{Cron, CronBuilder};
pub use entry::{Entry, EntryId};
pub use error::{Error, Result};
pub use job::{Job, JobFn};
pub use logger::{Logger, NoopLogger, TracingLogger};
pub use parser::{CrontabParser, ScheduleParser, Seconds};
pub use schedule::{Interval, Schedule};
