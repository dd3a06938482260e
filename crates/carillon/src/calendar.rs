//! Crontab-style calendar recurrence.
//!
//! A [`CalendarSchedule`] holds one [`FieldSet`] per calendar field
//! (second, minute, hour, day-of-month, month, day-of-week) and finds the
//! next matching wall-clock instant by walking fields coarse-to-fine:
//! advance the month until it matches, then the day, hour, minute and
//! second. Whenever a coarser field advances, every finer field restarts at
//! its minimum; whenever a finer field wraps around, control returns to the
//! top so the carry propagates. The search is bounded to a five-year
//! horizon, after which the rule is considered unsatisfiable (e.g. 30th of
//! February).

use chrono::{
    DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, Offset, TimeZone,
    Timelike,
};
use chrono_tz::Tz;

use crate::schedule::Schedule;

/// How many years past the query `next` searches before giving up.
const SEARCH_HORIZON_YEARS: i32 = 5;

/// Permitted values for one calendar field, stored as a fixed-width bitset.
///
/// Bit `b` set means value `b` is allowed. The `wildcard` flag records
/// whether the field was written as `*` or `?`, which the day-of-month /
/// day-of-week combination rule needs even though the bits alone look the
/// same as an explicit full range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSet {
    bits: u64,
    wildcard: bool,
}

impl FieldSet {
    /// Largest value the bitset can address.
    pub const MAX_VALUE: u32 = 63;

    /// A set matching nothing.
    pub const fn empty() -> Self {
        Self {
            bits: 0,
            wildcard: false,
        }
    }

    /// A set permitting exactly `values`.
    pub fn from_values(values: &[u32]) -> Self {
        let mut set = Self::empty();
        for &v in values {
            set.insert_span(v, v, 1);
        }
        set
    }

    /// The unconstrained field: every value in `min..=max`, flagged as a
    /// wildcard.
    pub fn unconstrained(min: u32, max: u32) -> Self {
        let mut set = Self::empty();
        set.insert_span(min, max, 1);
        set.wildcard = true;
        set
    }

    /// Permit every `step`-th value in `first..=last`.
    ///
    /// Values beyond [`Self::MAX_VALUE`] are ignored; callers validate
    /// against their field bounds before inserting.
    pub fn insert_span(&mut self, first: u32, last: u32, step: u32) {
        if step == 0 {
            return;
        }
        let last = last.min(Self::MAX_VALUE);
        let mut v = first;
        while v <= last {
            self.bits |= 1 << v;
            v = v.saturating_add(step);
        }
    }

    /// Flag the field as originally unconstrained (`*` or `?`).
    pub fn mark_wildcard(&mut self) {
        self.wildcard = true;
    }

    pub fn contains(&self, value: u32) -> bool {
        value <= Self::MAX_VALUE && self.bits & (1 << value) != 0
    }

    pub fn is_wildcard(&self) -> bool {
        self.wildcard
    }
}

/// Crontab-style recurrence rule, optionally pinned to a time zone.
///
/// Normally produced by [`CrontabParser`](crate::parser::CrontabParser);
/// construct directly when generating rules programmatically.
///
/// Day-of-month and day-of-week combine with the historical crontab quirk:
/// if either field was written as a wildcard, a day must satisfy both; if
/// both are restricted, a day satisfying either one fires.
#[derive(Debug, Clone, Copy)]
pub struct CalendarSchedule {
    second: FieldSet,
    minute: FieldSet,
    hour: FieldSet,
    day_of_month: FieldSet,
    month: FieldSet,
    day_of_week: FieldSet,
    /// Zone the rule is evaluated in; `None` means the query time's zone.
    tz: Option<Tz>,
}

impl CalendarSchedule {
    pub fn new(
        second: FieldSet,
        minute: FieldSet,
        hour: FieldSet,
        day_of_month: FieldSet,
        month: FieldSet,
        day_of_week: FieldSet,
        tz: Option<Tz>,
    ) -> Self {
        Self {
            second,
            minute,
            hour,
            day_of_month,
            month,
            day_of_week,
            tz,
        }
    }

    /// The day-of-month / day-of-week combination rule (see the type docs).
    fn day_matches(&self, t: &DateTime<Tz>) -> bool {
        let dom = self.day_of_month.contains(t.day());
        let dow = self.day_of_week.contains(t.weekday().num_days_from_sunday());
        if self.day_of_month.is_wildcard() || self.day_of_week.is_wildcard() {
            dom && dow
        } else {
            dom || dow
        }
    }
}

impl Schedule for CalendarSchedule {
    fn next(&self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        // Pinned rules are evaluated in their own zone; the result converts
        // back to the caller's zone at the end.
        let home = after.timezone();
        let tz = self.tz.unwrap_or(home);
        let mut t = after.with_timezone(&tz);

        // Start at the next whole second: a rule never re-fires at the
        // instant that was just asked about.
        let subsec = i64::from(t.timestamp_subsec_nanos());
        t = t + Duration::seconds(1) - Duration::nanoseconds(subsec);

        let year_limit = t.year() + SEARCH_HORIZON_YEARS;

        // Set once any field advances; from then on the finer fields are
        // already at their minimums and must not be reset again.
        let mut added = false;

        'wrap: loop {
            if t.year() > year_limit {
                return None;
            }

            while !self.month.contains(t.month()) {
                if !added {
                    added = true;
                    t = civil(&tz, t.year(), t.month(), 1, 0, 0, 0)?;
                }
                t = add_month(&tz, &t)?;
                if t.month() == 1 {
                    continue 'wrap;
                }
            }

            while !self.day_matches(&t) {
                if !added {
                    added = true;
                    t = civil(&tz, t.year(), t.month(), t.day(), 0, 0, 0)?;
                }
                t = add_day(&tz, &t)?;

                // Crossing a daylight-saving transition leaves the scan off
                // midnight; push the residue away so later days keep
                // starting at their first valid instant.
                let hour = t.hour();
                if hour != 0 {
                    if hour > 12 {
                        t = t + Duration::hours(i64::from(24 - hour));
                    } else {
                        t = t - Duration::hours(i64::from(hour));
                    }
                }

                if t.day() == 1 {
                    continue 'wrap;
                }
            }

            while !self.hour.contains(t.hour()) {
                if !added {
                    added = true;
                    t = civil(&tz, t.year(), t.month(), t.day(), t.hour(), 0, 0)?;
                }
                t = t + Duration::hours(1);
                if t.hour() == 0 {
                    continue 'wrap;
                }
            }

            while !self.minute.contains(t.minute()) {
                if !added {
                    added = true;
                    t = t - Duration::seconds(i64::from(t.second()));
                }
                t = t + Duration::minutes(1);
                if t.minute() == 0 {
                    continue 'wrap;
                }
            }

            while !self.second.contains(t.second()) {
                // Sub-seconds were zeroed on entry, so the scan is already
                // on the whole-second grid.
                added = true;
                t = t + Duration::seconds(1);
                if t.second() == 0 {
                    continue 'wrap;
                }
            }

            return Some(t.with_timezone(&home));
        }
    }
}

/// Build a wall-clock time in `tz`, resolving daylight-saving anomalies.
///
/// Ambiguous times (clocks rolled back, the wall time happens twice) take
/// the earlier instant. Nonexistent times (clocks jumped forward) derive
/// UTC from the offset in force at the naive instant, rechecking once in
/// case the derived instant crossed the transition; the result lands just
/// before the gap, and the search's hour handling moves past it.
fn resolve_local(tz: &Tz, naive: NaiveDateTime) -> DateTime<Tz> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(t) => t,
        LocalResult::Ambiguous(earliest, _) => earliest,
        LocalResult::None => {
            let first = tz.offset_from_utc_datetime(&naive).fix().local_minus_utc();
            let guess = naive - Duration::seconds(i64::from(first));
            let second = tz.offset_from_utc_datetime(&guess).fix().local_minus_utc();
            let utc = if second == first {
                guess
            } else {
                naive - Duration::seconds(i64::from(second))
            };
            tz.from_utc_datetime(&utc)
        }
    }
}

fn civil(
    tz: &Tz,
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    min: u32,
    sec: u32,
) -> Option<DateTime<Tz>> {
    let naive = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, min, sec)?;
    Some(resolve_local(tz, naive))
}

/// The same wall clock one civil month later. Only called with the day
/// already reset to 1, so the target date always exists.
fn add_month(tz: &Tz, t: &DateTime<Tz>) -> Option<DateTime<Tz>> {
    let (year, month) = if t.month() == 12 {
        (t.year() + 1, 1)
    } else {
        (t.year(), t.month() + 1)
    };
    civil(tz, year, month, t.day(), t.hour(), t.minute(), t.second())
}

/// The same wall clock one civil day later.
fn add_day(tz: &Tz, t: &DateTime<Tz>) -> Option<DateTime<Tz>> {
    let date = t.date_naive().succ_opt()?;
    let naive = date.and_hms_opt(t.hour(), t.minute(), t.second())?;
    Some(resolve_local(tz, naive))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::America::{New_York, Sao_Paulo};
    use chrono_tz::Asia::Tokyo;

    fn every(min: u32, max: u32) -> FieldSet {
        FieldSet::unconstrained(min, max)
    }

    fn only(values: &[u32]) -> FieldSet {
        FieldSet::from_values(values)
    }

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Tz> {
        Tz::UTC.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    /// sec/min/hour restricted, days and months wide open.
    fn daily(hour: &[u32], minute: &[u32]) -> CalendarSchedule {
        CalendarSchedule::new(
            only(&[0]),
            only(minute),
            only(hour),
            every(1, 31),
            every(1, 12),
            every(0, 6),
            None,
        )
    }

    #[test]
    fn field_set_contains_inserted_values() {
        let mut set = FieldSet::empty();
        set.insert_span(10, 20, 5);
        assert!(set.contains(10));
        assert!(set.contains(15));
        assert!(set.contains(20));
        assert!(!set.contains(11));
        assert!(!set.contains(25));
        assert!(!set.is_wildcard());
    }

    #[test]
    fn field_set_ignores_values_past_the_addressable_range() {
        let mut set = FieldSet::empty();
        set.insert_span(60, 200, 1);
        assert!(set.contains(60));
        assert!(set.contains(63));
        assert!(!set.contains(64));
        assert!(!set.contains(100));
    }

    #[test]
    fn wildcard_flag_survives_construction() {
        assert!(every(0, 6).is_wildcard());
        assert!(!only(&[3]).is_wildcard());
    }

    #[test]
    fn half_past_every_hour() {
        let rule = CalendarSchedule::new(
            only(&[0]),
            only(&[30]),
            every(0, 23),
            every(1, 31),
            every(1, 12),
            every(0, 6),
            None,
        );
        // Before the half hour: later the same hour.
        assert_eq!(rule.next(&utc(2024, 6, 10, 2, 10, 0)), Some(utc(2024, 6, 10, 2, 30, 0)));
        // Past the half hour: the next hour's.
        assert_eq!(rule.next(&utc(2024, 6, 10, 2, 45, 0)), Some(utc(2024, 6, 10, 3, 30, 0)));
        // Exactly on the half hour: strictly after, so the next hour's.
        assert_eq!(rule.next(&utc(2024, 6, 10, 2, 30, 0)), Some(utc(2024, 6, 10, 3, 30, 0)));
    }

    #[test]
    fn next_is_strictly_after_the_query() {
        let rule = daily(&[0], &[0]);
        let t = utc(2024, 6, 10, 0, 0, 0);
        let next = rule.next(&t).unwrap();
        assert!(next > t);
        assert_eq!(next, utc(2024, 6, 11, 0, 0, 0));
    }

    #[test]
    fn first_of_month_rolls_into_next_month() {
        let rule = CalendarSchedule::new(
            only(&[0]),
            only(&[15]),
            only(&[14]),
            only(&[1]),
            every(1, 12),
            every(0, 6),
            None,
        );
        assert_eq!(
            rule.next(&utc(2024, 1, 5, 9, 0, 0)),
            Some(utc(2024, 2, 1, 14, 15, 0))
        );
    }

    #[test]
    fn month_field_rolls_into_next_year() {
        let rule = CalendarSchedule::new(
            only(&[0]),
            only(&[0]),
            only(&[0]),
            only(&[1]),
            only(&[1]),
            every(0, 6),
            None,
        );
        assert_eq!(
            rule.next(&utc(2024, 6, 15, 12, 0, 0)),
            Some(utc(2025, 1, 1, 0, 0, 0))
        );
    }

    // 2024-06-11 is a Tuesday; 2024-06-15 a Saturday; 2024-06-17 a Monday.

    #[test]
    fn restricted_dom_and_dow_fire_on_either() {
        let rule = CalendarSchedule::new(
            only(&[0]),
            only(&[0]),
            only(&[0]),
            only(&[15]),
            every(1, 12),
            only(&[1]),
            None,
        );
        // The 15th comes before the next Monday.
        assert_eq!(
            rule.next(&utc(2024, 6, 11, 12, 0, 0)),
            Some(utc(2024, 6, 15, 0, 0, 0))
        );
        // Then the Monday comes before the next 15th.
        assert_eq!(
            rule.next(&utc(2024, 6, 15, 12, 0, 0)),
            Some(utc(2024, 6, 17, 0, 0, 0))
        );
    }

    #[test]
    fn wildcard_dow_requires_the_dom() {
        let rule = CalendarSchedule::new(
            only(&[0]),
            only(&[0]),
            only(&[0]),
            only(&[15]),
            every(1, 12),
            every(0, 6),
            None,
        );
        // Monday the 17th does not fire; only the 15th of July does.
        assert_eq!(
            rule.next(&utc(2024, 6, 15, 12, 0, 0)),
            Some(utc(2024, 7, 15, 0, 0, 0))
        );
    }

    #[test]
    fn wildcard_dom_requires_the_dow() {
        let rule = CalendarSchedule::new(
            only(&[0]),
            only(&[0]),
            only(&[0]),
            every(1, 31),
            every(1, 12),
            only(&[1]),
            None,
        );
        assert_eq!(
            rule.next(&utc(2024, 6, 11, 12, 0, 0)),
            Some(utc(2024, 6, 17, 0, 0, 0))
        );
    }

    #[test]
    fn leap_day_waits_for_a_leap_year() {
        let rule = CalendarSchedule::new(
            only(&[0]),
            only(&[0]),
            only(&[0]),
            only(&[29]),
            only(&[2]),
            every(0, 6),
            None,
        );
        assert_eq!(
            rule.next(&utc(2023, 6, 1, 0, 0, 0)),
            Some(utc(2024, 2, 29, 0, 0, 0))
        );
        // Multi-year search within the horizon.
        assert_eq!(
            rule.next(&utc(2025, 3, 1, 0, 0, 0)),
            Some(utc(2028, 2, 29, 0, 0, 0))
        );
    }

    #[test]
    fn unsatisfiable_rule_exhausts_the_horizon() {
        // February the 30th.
        let rule = CalendarSchedule::new(
            only(&[0]),
            only(&[0]),
            only(&[0]),
            only(&[30]),
            only(&[2]),
            every(0, 6),
            None,
        );
        assert_eq!(rule.next(&utc(2024, 1, 1, 0, 0, 0)), None);
    }

    #[test]
    fn spring_forward_skips_the_missing_half_hour() {
        // 2024-03-10: New York clocks jump 02:00 -> 03:00, so 02:30 does not
        // exist that day and the rule waits for the 11th.
        let rule = daily(&[2], &[30]);
        let from = New_York.with_ymd_and_hms(2024, 3, 9, 12, 0, 0).unwrap();
        let expect = New_York.with_ymd_and_hms(2024, 3, 11, 2, 30, 0).unwrap();
        assert_eq!(rule.next(&from), Some(expect));
    }

    #[test]
    fn fall_back_fires_on_the_earlier_repeat() {
        // 2024-11-03: New York repeats 01:00-02:00; the rule fires on the
        // first (daylight-time) pass.
        let rule = daily(&[1], &[30]);
        let from = New_York.with_ymd_and_hms(2024, 11, 3, 0, 0, 0).unwrap();
        let next = rule.next(&from).unwrap();
        let expect = New_York
            .with_ymd_and_hms(2024, 11, 3, 1, 30, 0)
            .earliest()
            .unwrap();
        assert_eq!(next, expect);
        assert_eq!(next.offset().fix().local_minus_utc(), -4 * 3600);
    }

    #[test]
    fn midnight_rule_skips_a_day_without_a_midnight() {
        // 2018-11-04: Sao Paulo clocks jump 00:00 -> 01:00, so that day has
        // no midnight at all and the rule fires on the 5th.
        let rule = daily(&[0], &[0]);
        let from = Sao_Paulo.with_ymd_and_hms(2018, 11, 3, 12, 0, 0).unwrap();
        let expect = Sao_Paulo.with_ymd_and_hms(2018, 11, 5, 0, 0, 0).unwrap();
        assert_eq!(rule.next(&from), Some(expect));
    }

    #[test]
    fn pinned_zone_overrides_the_query_zone() {
        let rule = CalendarSchedule::new(
            only(&[0]),
            only(&[30]),
            only(&[4]),
            every(1, 31),
            every(1, 12),
            every(0, 6),
            Some(Tokyo),
        );
        // 04:30 in Tokyo is 19:30 UTC the previous day.
        assert_eq!(
            rule.next(&utc(2024, 6, 10, 0, 0, 0)),
            Some(utc(2024, 6, 10, 19, 30, 0))
        );
    }

    #[test]
    fn subsecond_queries_round_up_to_the_next_grid_second() {
        let rule = CalendarSchedule::new(
            every(0, 59),
            every(0, 59),
            every(0, 23),
            every(1, 31),
            every(1, 12),
            every(0, 6),
            None,
        );
        let mid = utc(2024, 6, 10, 10, 20, 30).with_nanosecond(400_000_000).unwrap();
        assert_eq!(rule.next(&mid), Some(utc(2024, 6, 10, 10, 20, 31)));
    }

    #[test]
    fn nonexistent_local_times_resolve_just_before_the_gap() {
        let naive = NaiveDate::from_ymd_opt(2024, 3, 10)
            .unwrap()
            .and_hms_opt(2, 30, 0)
            .unwrap();
        let resolved = resolve_local(&New_York, naive);
        assert_eq!(
            resolved,
            New_York.with_ymd_and_hms(2024, 3, 10, 1, 30, 0).unwrap()
        );
    }
}
