//! Crontab expression parsing.
//!
//! [`CrontabParser`] covers the classic five-field grammar plus the common
//! extensions: optional or mandatory seconds field, `@yearly`-style
//! descriptors, `@every <duration>` intervals, and a leading
//! `TZ=`/`CRON_TZ=` zone override. Custom grammars plug into the scheduler
//! through the [`ScheduleParser`] trait.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono_tz::Tz;

use crate::calendar::{CalendarSchedule, FieldSet};
use crate::error::{Error, Result};
use crate::schedule::{Interval, Schedule};

/// Turns a textual expression into a recurrence rule.
///
/// The scheduler holds exactly one parser (see
/// [`CronBuilder::parser`](crate::engine::CronBuilder::parser)); every
/// expression registered through the facade goes through it.
pub trait ScheduleParser: Send + Sync {
    fn parse(&self, expr: &str) -> Result<Arc<dyn Schedule>>;
}

/// Whether the grammar includes a leading seconds field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Seconds {
    /// No seconds field; second 0 is implied (classic crontab).
    #[default]
    Implied,
    /// A mandatory leading seconds field (Quartz-style six fields).
    Required,
    /// Six fields when a seconds field is present, five without.
    Optional,
}

/// Value bounds and naming for one crontab field.
struct Bounds {
    label: &'static str,
    min: u32,
    max: u32,
    names: &'static [(&'static str, u32)],
}

const SECONDS: Bounds = Bounds {
    label: "second",
    min: 0,
    max: 59,
    names: &[],
};

const MINUTES: Bounds = Bounds {
    label: "minute",
    min: 0,
    max: 59,
    names: &[],
};

const HOURS: Bounds = Bounds {
    label: "hour",
    min: 0,
    max: 23,
    names: &[],
};

const DAYS_OF_MONTH: Bounds = Bounds {
    label: "day of month",
    min: 1,
    max: 31,
    names: &[],
};

const MONTHS: Bounds = Bounds {
    label: "month",
    min: 1,
    max: 12,
    names: &[
        ("jan", 1),
        ("feb", 2),
        ("mar", 3),
        ("apr", 4),
        ("may", 5),
        ("jun", 6),
        ("jul", 7),
        ("aug", 8),
        ("sep", 9),
        ("oct", 10),
        ("nov", 11),
        ("dec", 12),
    ],
};

const DAYS_OF_WEEK: Bounds = Bounds {
    label: "day of week",
    min: 0,
    max: 6,
    names: &[
        ("sun", 0),
        ("mon", 1),
        ("tue", 2),
        ("wed", 3),
        ("thu", 4),
        ("fri", 5),
        ("sat", 6),
    ],
};

/// The default expression grammar.
///
/// Fields are whitespace-separated, in order: minute (0-59), hour (0-23),
/// day of month (1-31), month (1-12 or JAN-DEC), day of week (0-6 or
/// SUN-SAT). Each field accepts `*` (any), `?` (any, days only by
/// convention), explicit values, `-` ranges, `/` steps and `,` lists; month
/// and weekday names are case-insensitive.
///
/// An expression may instead be a descriptor: `@yearly` (alias
/// `@annually`), `@monthly`, `@weekly`, `@daily` (alias `@midnight`),
/// `@hourly`, or `@every <duration>` where the duration is an unsigned
/// decimal sequence with `h`/`m`/`s`/`ms`/`us`/`ns` units, e.g.
/// `@every 1h30m10s`.
///
/// A leading `TZ=<zone>` or `CRON_TZ=<zone>` token pins the rule to an IANA
/// zone regardless of the scheduler-wide zone.
#[derive(Debug, Clone, Copy, Default)]
pub struct CrontabParser {
    seconds: Seconds,
}

impl CrontabParser {
    /// A grammar with the seconds-field handling chosen explicitly.
    pub fn new(seconds: Seconds) -> Self {
        Self { seconds }
    }

    /// The classic five-field grammar; second 0 is implied.
    pub fn standard() -> Self {
        Self::new(Seconds::Implied)
    }

    /// Six fields with a mandatory leading seconds field.
    pub fn with_seconds() -> Self {
        Self::new(Seconds::Required)
    }

    /// Six fields when a seconds field is present, five otherwise.
    pub fn optional_seconds() -> Self {
        Self::new(Seconds::Optional)
    }

    fn parse_descriptor(&self, expr: &str, tz: Option<Tz>) -> Result<Arc<dyn Schedule>> {
        let rule = |second, minute, hour, dom, month, dow| -> Arc<dyn Schedule> {
            Arc::new(CalendarSchedule::new(second, minute, hour, dom, month, dow, tz))
        };
        match expr {
            "@yearly" | "@annually" => Ok(rule(
                FieldSet::from_values(&[0]),
                FieldSet::from_values(&[0]),
                FieldSet::from_values(&[0]),
                FieldSet::from_values(&[1]),
                FieldSet::from_values(&[1]),
                all(&DAYS_OF_WEEK),
            )),
            "@monthly" => Ok(rule(
                FieldSet::from_values(&[0]),
                FieldSet::from_values(&[0]),
                FieldSet::from_values(&[0]),
                FieldSet::from_values(&[1]),
                all(&MONTHS),
                all(&DAYS_OF_WEEK),
            )),
            "@weekly" => Ok(rule(
                FieldSet::from_values(&[0]),
                FieldSet::from_values(&[0]),
                FieldSet::from_values(&[0]),
                all(&DAYS_OF_MONTH),
                all(&MONTHS),
                FieldSet::from_values(&[0]),
            )),
            "@daily" | "@midnight" => Ok(rule(
                FieldSet::from_values(&[0]),
                FieldSet::from_values(&[0]),
                FieldSet::from_values(&[0]),
                all(&DAYS_OF_MONTH),
                all(&MONTHS),
                all(&DAYS_OF_WEEK),
            )),
            "@hourly" => Ok(rule(
                FieldSet::from_values(&[0]),
                FieldSet::from_values(&[0]),
                all(&HOURS),
                all(&DAYS_OF_MONTH),
                all(&MONTHS),
                all(&DAYS_OF_WEEK),
            )),
            _ => {
                // A recognised `@every` with a blank or missing duration is
                // a duration error; text glued straight onto the word is a
                // different descriptor.
                if let Some(rest) = expr.strip_prefix("@every") {
                    if rest.is_empty() || rest.starts_with(char::is_whitespace) {
                        let every = parse_duration(rest)?;
                        return Ok(Arc::new(Interval::new(every)));
                    }
                }
                Err(Error::UnknownDescriptor(expr.to_string()))
            }
        }
    }
}

impl ScheduleParser for CrontabParser {
    fn parse(&self, expr: &str) -> Result<Arc<dyn Schedule>> {
        let mut expr = expr.trim();
        if expr.is_empty() {
            return Err(Error::EmptyExpression);
        }

        // A leading TZ=/CRON_TZ= token pins this rule to a zone, overriding
        // the scheduler-wide zone for this entry alone.
        let mut tz = None;
        if let Some(tagged) = expr
            .strip_prefix("TZ=")
            .or_else(|| expr.strip_prefix("CRON_TZ="))
        {
            let (zone, rest) = match tagged.split_once(char::is_whitespace) {
                Some((zone, rest)) => (zone, rest.trim_start()),
                None => (tagged, ""),
            };
            tz = Some(
                zone.parse::<Tz>()
                    .map_err(|_| Error::UnknownTimeZone(zone.to_string()))?,
            );
            expr = rest;
            if expr.is_empty() {
                return Err(Error::EmptyExpression);
            }
        }

        if expr.starts_with('@') {
            return self.parse_descriptor(expr, tz);
        }

        let fields: Vec<&str> = expr.split_whitespace().collect();
        let wrong_count = |expected: &str| Error::FieldCount {
            expected: expected.to_string(),
            found: fields.len(),
            expr: expr.to_string(),
        };

        let (second, tail): (FieldSet, &[&str]) = match self.seconds {
            Seconds::Implied => {
                if fields.len() != 5 {
                    return Err(wrong_count("5"));
                }
                (FieldSet::from_values(&[0]), &fields[..])
            }
            Seconds::Required => {
                if fields.len() != 6 {
                    return Err(wrong_count("6"));
                }
                (parse_field(fields[0], &SECONDS)?, &fields[1..])
            }
            Seconds::Optional => match fields.len() {
                5 => (FieldSet::from_values(&[0]), &fields[..]),
                6 => (parse_field(fields[0], &SECONDS)?, &fields[1..]),
                _ => return Err(wrong_count("5 or 6")),
            },
        };

        let minute = parse_field(tail[0], &MINUTES)?;
        let hour = parse_field(tail[1], &HOURS)?;
        let day_of_month = parse_field(tail[2], &DAYS_OF_MONTH)?;
        let month = parse_field(tail[3], &MONTHS)?;
        let day_of_week = parse_field(tail[4], &DAYS_OF_WEEK)?;

        Ok(Arc::new(CalendarSchedule::new(
            second,
            minute,
            hour,
            day_of_month,
            month,
            day_of_week,
            tz,
        )))
    }
}

fn all(bounds: &Bounds) -> FieldSet {
    FieldSet::unconstrained(bounds.min, bounds.max)
}

/// Parse one whitespace-delimited field: a comma-separated list of ranges.
fn parse_field(text: &str, bounds: &Bounds) -> Result<FieldSet> {
    let mut set = FieldSet::empty();
    for part in text.split(',') {
        insert_part(&mut set, part, bounds)?;
    }
    Ok(set)
}

/// Parse one comma-separated part (`*`, `?`, `N`, `N-M`, with an optional
/// `/step`) into `set`.
fn insert_part(set: &mut FieldSet, part: &str, bounds: &Bounds) -> Result<()> {
    let fail = |reason: String| Error::InvalidField {
        field: bounds.label,
        value: part.to_string(),
        reason,
    };

    let pieces: Vec<&str> = part.split('/').collect();
    let (range, step_text) = match pieces.as_slice() {
        [range] => (*range, None),
        [range, step] => (*range, Some(*step)),
        _ => return Err(fail("too many slashes".to_string())),
    };

    let (first, last, star, single) = if range == "*" || range == "?" {
        (bounds.min, bounds.max, true, false)
    } else {
        let ends: Vec<&str> = range.split('-').collect();
        match ends.as_slice() {
            [value] => {
                let v = parse_value(value, bounds)?;
                (v, v, false, true)
            }
            [lo, hi] => (parse_value(lo, bounds)?, parse_value(hi, bounds)?, false, false),
            _ => return Err(fail("too many hyphens".to_string())),
        }
    };

    let (step, last) = match step_text {
        None => (1, last),
        Some(text) => {
            let step: u32 = text
                .parse()
                .map_err(|_| fail(format!("step {text:?} is not a number")))?;
            // `N/step` runs from N to the top of the field's range.
            let last = if single { bounds.max } else { last };
            (step, last)
        }
    };

    if first < bounds.min {
        return Err(fail(format!("{first} is below the minimum {}", bounds.min)));
    }
    if last > bounds.max {
        return Err(fail(format!("{last} is above the maximum {}", bounds.max)));
    }
    if first > last {
        return Err(fail(format!("range start {first} is beyond its end {last}")));
    }
    if step == 0 {
        return Err(fail("step must be a positive number".to_string()));
    }

    set.insert_span(first, last, step);
    // Stepped wildcards constrain the field, so only a plain `*`/`?` keeps
    // wildcard standing for the day-combination rule.
    if star && step == 1 {
        set.mark_wildcard();
    }
    Ok(())
}

/// A field value: either a name from the field's table (JAN, MON, ...) or a
/// decimal number.
fn parse_value(text: &str, bounds: &Bounds) -> Result<u32> {
    let lowered = text.to_ascii_lowercase();
    for (name, value) in bounds.names {
        if *name == lowered {
            return Ok(*value);
        }
    }
    text.parse::<u32>().map_err(|_| Error::InvalidField {
        field: bounds.label,
        value: text.to_string(),
        reason: "not a number or recognised name".to_string(),
    })
}

/// Parse a duration written as an unsigned decimal sequence with units,
/// e.g. `1h30m10s` or `90s`. Supported units: `h`, `m`, `s`, `ms`, `us`,
/// `ns`.
fn parse_duration(text: &str) -> Result<StdDuration> {
    let src = text.trim();
    let fail = |reason: &str| Error::InvalidDuration {
        text: src.to_string(),
        reason: reason.to_string(),
    };

    if src.is_empty() {
        return Err(fail("empty duration"));
    }

    let mut total = StdDuration::ZERO;
    let mut rest = src;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return Err(fail("expected a number"));
        }
        let value: u64 = rest[..digits].parse().map_err(|_| fail("number too large"))?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        let piece = match unit {
            "h" => StdDuration::from_secs(
                value.checked_mul(3600).ok_or_else(|| fail("duration overflows"))?,
            ),
            "m" => StdDuration::from_secs(
                value.checked_mul(60).ok_or_else(|| fail("duration overflows"))?,
            ),
            "s" => StdDuration::from_secs(value),
            "ms" => StdDuration::from_millis(value),
            "us" | "µs" => StdDuration::from_micros(value),
            "ns" => StdDuration::from_nanos(value),
            "" => return Err(fail("missing unit after number")),
            other => {
                return Err(Error::InvalidDuration {
                    text: src.to_string(),
                    reason: format!("unknown unit {other:?}"),
                })
            }
        };
        total = total
            .checked_add(piece)
            .ok_or_else(|| fail("duration overflows"))?;
        rest = &rest[unit_len..];
    }
    Ok(total)
}
