use thiserror::Error;

/// Errors that can occur within the scheduler.
#[derive(Debug, Error)]
pub enum Error {
    /// The schedule expression was empty (or became empty after a
    /// `TZ=`/`CRON_TZ=` prefix was stripped).
    #[error("empty schedule expression")]
    EmptyExpression,

    /// The expression had the wrong number of whitespace-separated fields.
    #[error("expected {expected} fields, found {found} in {expr:?}")]
    FieldCount {
        expected: String,
        found: usize,
        expr: String,
    },

    /// A single field failed to parse or named an out-of-range value.
    #[error("invalid {field} field {value:?}: {reason}")]
    InvalidField {
        field: &'static str,
        value: String,
        reason: String,
    },

    /// An `@`-descriptor was not recognised.
    #[error("unrecognised descriptor: {0}")]
    UnknownDescriptor(String),

    /// An `@every` duration failed to parse.
    #[error("invalid duration {text:?}: {reason}")]
    InvalidDuration { text: String, reason: String },

    /// A `TZ=`/`CRON_TZ=` prefix named a zone missing from the tz database.
    #[error("unknown time zone: {0}")]
    UnknownTimeZone(String),

    /// A job invocation panicked. Produced by the `recover` wrapper; the
    /// panic payload is coerced to text at capture.
    #[error("job panicked: {0}")]
    JobPanic(String),
}

pub type Result<T> = std::result::Result<T, Error>;
