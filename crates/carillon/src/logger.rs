//! Logging seam between the scheduler and the embedding application.
//!
//! The run loop and the job wrappers report through the [`Logger`] trait
//! rather than calling `tracing` directly, so applications can reroute or
//! silence scheduler output without touching their subscriber setup.
//! [`TracingLogger`] is the default and forwards everything to `tracing`;
//! [`NoopLogger`] drops everything.

use std::error::Error as StdError;
use std::fmt::Write as _;

use chrono::{DateTime, SecondsFormat, TimeZone};
use tracing::{error, info};

/// One key/value pair attached to a log line.
pub type LogField = (&'static str, String);

/// Minimal structured-logging interface consumed by the scheduler.
///
/// Two severities only: `info` traces normal operation (schedule decisions,
/// wake/run/add/remove transitions, overlap policy outcomes) and `error`
/// reports faults (job panics). Calls happen on the run-loop task and inside
/// job wrappers, so implementations should return quickly.
pub trait Logger: Send + Sync {
    fn info(&self, msg: &str, fields: &[LogField]);
    fn error(&self, err: &dyn StdError, msg: &str, fields: &[LogField]);
}

/// Forwards scheduler logs to the `tracing` macros.
///
/// Field pairs are rendered logfmt-style into the message; level filtering
/// is left to whatever subscriber the application installed.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn info(&self, msg: &str, fields: &[LogField]) {
        info!(target: "carillon", "{msg}{}", render(fields));
    }

    fn error(&self, err: &dyn StdError, msg: &str, fields: &[LogField]) {
        error!(target: "carillon", "{msg}: {err}{}", render(fields));
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn info(&self, _msg: &str, _fields: &[LogField]) {}
    fn error(&self, _err: &dyn StdError, _msg: &str, _fields: &[LogField]) {}
}

/// Render a timestamp for log output (RFC 3339, whole seconds).
pub fn fmt_time<Z: TimeZone>(t: &DateTime<Z>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Render an optional activation instant; an exhausted schedule reads "never".
pub fn fmt_next<Z: TimeZone>(t: &Option<DateTime<Z>>) -> String {
    match t {
        Some(t) => fmt_time(t),
        None => "never".to_string(),
    }
}

fn render(fields: &[LogField]) -> String {
    let mut out = String::new();
    for (key, value) in fields {
        let _ = write!(out, ", {key}={value}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn render_joins_fields_with_commas() {
        let s = render(&[("entry", "3".to_string()), ("next", "never".to_string())]);
        assert_eq!(s, ", entry=3, next=never");
    }

    #[test]
    fn render_empty_fields_is_empty() {
        assert_eq!(render(&[]), "");
    }

    #[test]
    fn fmt_next_shows_never_for_exhausted_schedules() {
        let none: Option<DateTime<Utc>> = None;
        assert_eq!(fmt_next(&none), "never");
    }

    #[test]
    fn fmt_time_is_rfc3339_at_second_precision() {
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap();
        assert_eq!(fmt_time(&t), "2024-05-01T09:30:00Z");
    }
}
