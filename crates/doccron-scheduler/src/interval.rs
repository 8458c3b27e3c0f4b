//! Cron-style interval expressions.
//!
//! Expressions have six whitespace-separated fields:
//!
//! ```text
//! second minute hour day-of-month month day-of-week
//! 0-59   0-59   0-23 1-31         1-12  0-7 (0 and 7 are Sunday)
//! ```
//!
//! A five-field expression is accepted too and fires at second 0.
//! Each field takes `*`, `?`, single values, ranges `A-B`, steps `*/S`,
//! `A/S`, `A-B/S` and comma-separated lists. Months accept `JAN`..`DEC`
//! and weekdays `SUN`..`SAT`.
//!
//! When both day-of-month and day-of-week are restricted a day matches if
//! either does; when one of them starts with `*` (or is `?`) both must.
//! All evaluation happens in UTC.
//!
//! # Examples
//!
//! - `"* * * * * *"` - every second
//! - `"0 */5 * * * *"` - every 5 minutes
//! - `"0 0 9 * * MON-FRI"` - 9 AM on weekdays
//! - `"0 30 4 1,15 * 5"` - 4:30 AM on the 1st, the 15th and every Friday

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use thiserror::Error;

#[cfg(test)]
#[path = "interval_tests.rs"]
mod tests;

/// Calendar years searched past the reference before giving up.
pub const MAX_SEARCH_YEARS: i32 = 8;

const MONTH_NAMES: &[&str] = &[
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];
const WEEKDAY_NAMES: &[&str] = &["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// Interval expression errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntervalError {
    /// Wrong number of fields.
    #[error("Expected 5 or 6 fields, found {0}")]
    FieldCount(usize),

    /// A field could not be parsed.
    #[error("Invalid {field} field '{token}': {reason}")]
    InvalidField {
        field: &'static str,
        token: String,
        reason: String,
    },
}

/// Result of searching for the next occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextRun {
    /// The earliest matching instant.
    At(DateTime<Utc>),
    /// No match before the ceiling or within the search horizon.
    Exhausted,
}

impl NextRun {
    pub fn at(self) -> Option<DateTime<Utc>> {
        match self {
            NextRun::At(at) => Some(at),
            NextRun::Exhausted => None,
        }
    }

    pub fn is_exhausted(self) -> bool {
        matches!(self, NextRun::Exhausted)
    }
}

#[derive(Clone, Copy)]
struct FieldKind {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
    name_offset: u32,
}

const SECOND: FieldKind = FieldKind { name: "second", min: 0, max: 59, names: &[], name_offset: 0 };
const MINUTE: FieldKind = FieldKind { name: "minute", min: 0, max: 59, names: &[], name_offset: 0 };
const HOUR: FieldKind = FieldKind { name: "hour", min: 0, max: 23, names: &[], name_offset: 0 };
const DAY_OF_MONTH: FieldKind =
    FieldKind { name: "day-of-month", min: 1, max: 31, names: &[], name_offset: 0 };
const MONTH: FieldKind =
    FieldKind { name: "month", min: 1, max: 12, names: MONTH_NAMES, name_offset: 1 };
const DAY_OF_WEEK: FieldKind =
    FieldKind { name: "day-of-week", min: 0, max: 7, names: WEEKDAY_NAMES, name_offset: 0 };

/// Set of allowed values for one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FieldSet(u64);

impl FieldSet {
    fn contains(self, value: u32) -> bool {
        value < 64 && self.0 & (1u64 << value) != 0
    }
}

/// A parsed interval expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interval {
    expression: String,
    seconds: FieldSet,
    minutes: FieldSet,
    hours: FieldSet,
    days_of_month: FieldSet,
    months: FieldSet,
    days_of_week: FieldSet,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl Interval {
    /// Parse an expression.
    pub fn parse(expression: &str) -> Result<Self, IntervalError> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        let fields: Vec<&str> = match fields.len() {
            6 => fields,
            5 => std::iter::once("0").chain(fields).collect(),
            n => return Err(IntervalError::FieldCount(n)),
        };

        let (seconds, _) = parse_field(fields[0], SECOND)?;
        let (minutes, _) = parse_field(fields[1], MINUTE)?;
        let (hours, _) = parse_field(fields[2], HOUR)?;
        let (days_of_month, dom_restricted) = parse_field(fields[3], DAY_OF_MONTH)?;
        let (months, _) = parse_field(fields[4], MONTH)?;
        let (mut days_of_week, dow_restricted) = parse_field(fields[5], DAY_OF_WEEK)?;

        // 7 is an alias for Sunday.
        if days_of_week.contains(7) {
            days_of_week = FieldSet((days_of_week.0 & !(1 << 7)) | 1);
        }

        Ok(Self {
            expression: expression.trim().to_string(),
            seconds,
            minutes,
            hours,
            days_of_month,
            months,
            days_of_week,
            dom_restricted,
            dow_restricted,
        })
    }

    /// The expression as written.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Whether `at` (truncated to the second) is selected by the expression.
    pub fn matches(&self, at: DateTime<Utc>) -> bool {
        let t = at.naive_utc();
        self.months.contains(t.month())
            && self.day_matches(t.date())
            && self.hours.contains(t.hour())
            && self.minutes.contains(t.minute())
            && self.seconds.contains(t.second())
    }

    /// Earliest instant strictly after `after` that the expression selects.
    ///
    /// `ceiling` is inclusive. The search gives up after
    /// [`MAX_SEARCH_YEARS`] calendar years, so impossible expressions such
    /// as `0 0 0 30 2 *` terminate with [`NextRun::Exhausted`].
    pub fn next_after(&self, after: DateTime<Utc>, ceiling: Option<DateTime<Utc>>) -> NextRun {
        let Some(start) = after
            .timestamp()
            .checked_add(1)
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
        else {
            return NextRun::Exhausted;
        };

        let mut t = start.naive_utc();
        let horizon = t.year() + MAX_SEARCH_YEARS;
        let ceiling = ceiling.map(|c| c.naive_utc());

        loop {
            if t.year() > horizon || ceiling.is_some_and(|c| t > c) {
                return NextRun::Exhausted;
            }

            let advanced = if !self.months.contains(t.month()) {
                start_of_next_month(t)
            } else if !self.day_matches(t.date()) {
                start_of_next_day(t)
            } else if !self.hours.contains(t.hour()) {
                start_of_next_hour(t)
            } else if !self.minutes.contains(t.minute()) {
                start_of_next_minute(t)
            } else if !self.seconds.contains(t.second()) {
                t.checked_add_signed(Duration::seconds(1))
            } else {
                return NextRun::At(Utc.from_utc_datetime(&t));
            };

            match advanced {
                Some(next) => t = next,
                None => return NextRun::Exhausted,
            }
        }
    }

    /// Iterate over successive occurrences after `after`, up to `ceiling`.
    pub fn upcoming(&self, after: DateTime<Utc>, ceiling: Option<DateTime<Utc>>) -> Upcoming<'_> {
        Upcoming {
            interval: self,
            cursor: after,
            ceiling,
        }
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = self.days_of_month.contains(date.day());
        let dow = self
            .days_of_week
            .contains(date.weekday().num_days_from_sunday());
        if self.dom_restricted && self.dow_restricted {
            dom || dow
        } else {
            dom && dow
        }
    }
}

impl FromStr for Interval {
    type Err = IntervalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

/// Iterator returned by [`Interval::upcoming`].
pub struct Upcoming<'a> {
    interval: &'a Interval,
    cursor: DateTime<Utc>,
    ceiling: Option<DateTime<Utc>>,
}

impl Iterator for Upcoming<'_> {
    type Item = DateTime<Utc>;

    fn next(&mut self) -> Option<Self::Item> {
        let at = self.interval.next_after(self.cursor, self.ceiling).at()?;
        self.cursor = at;
        Some(at)
    }
}

/// Parse `expression` and find its next occurrence after `after`.
pub fn next(
    expression: &str,
    after: DateTime<Utc>,
    ceiling: Option<DateTime<Utc>>,
) -> Result<NextRun, IntervalError> {
    Ok(Interval::parse(expression)?.next_after(after, ceiling))
}

fn start_of_next_month(t: NaiveDateTime) -> Option<NaiveDateTime> {
    let (year, month) = if t.month() == 12 {
        (t.year() + 1, 1)
    } else {
        (t.year(), t.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)
}

fn start_of_next_day(t: NaiveDateTime) -> Option<NaiveDateTime> {
    t.date().succ_opt()?.and_hms_opt(0, 0, 0)
}

fn start_of_next_hour(t: NaiveDateTime) -> Option<NaiveDateTime> {
    t.date()
        .and_hms_opt(t.hour(), 0, 0)?
        .checked_add_signed(Duration::hours(1))
}

fn start_of_next_minute(t: NaiveDateTime) -> Option<NaiveDateTime> {
    t.date()
        .and_hms_opt(t.hour(), t.minute(), 0)?
        .checked_add_signed(Duration::minutes(1))
}

/// Parse one field into its value set and whether it counts as restricted.
fn parse_field(token: &str, kind: FieldKind) -> Result<(FieldSet, bool), IntervalError> {
    let invalid = |reason: String| IntervalError::InvalidField {
        field: kind.name,
        token: token.to_string(),
        reason,
    };

    let restricted = !(token.starts_with('*') || token == "?");
    let mut bits = 0u64;

    for part in token.split(',') {
        if part.is_empty() {
            return Err(invalid("empty list element".to_string()));
        }

        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| invalid(format!("step '{}' is not a number", step)))?;
                if step == 0 {
                    return Err(invalid("step must be positive".to_string()));
                }
                (range, Some(step))
            }
            None => (part, None),
        };

        let (lo, hi) = if range == "*" || range == "?" {
            (kind.min, kind.max)
        } else if let Some((a, b)) = range.split_once('-') {
            let lo = parse_value(a, kind).map_err(&invalid)?;
            let hi = parse_value(b, kind).map_err(&invalid)?;
            if lo > hi {
                return Err(invalid(format!("range {}-{} is reversed", lo, hi)));
            }
            (lo, hi)
        } else {
            let value = parse_value(range, kind).map_err(&invalid)?;
            match step {
                Some(_) => (value, kind.max),
                None => (value, value),
            }
        };

        let step = step.unwrap_or(1) as usize;
        for value in (lo..=hi).step_by(step) {
            bits |= 1u64 << value;
        }
    }

    Ok((FieldSet(bits), restricted))
}

fn parse_value(raw: &str, kind: FieldKind) -> Result<u32, String> {
    let value = match raw.parse::<u32>() {
        Ok(value) => value,
        Err(_) => {
            let upper = raw.to_ascii_uppercase();
            kind.names
                .iter()
                .position(|name| *name == upper)
                .map(|index| index as u32 + kind.name_offset)
                .ok_or_else(|| format!("'{}' is not a valid value", raw))?
        }
    };

    if value < kind.min || value > kind.max {
        return Err(format!(
            "{} is outside {}-{}",
            value, kind.min, kind.max
        ));
    }
    Ok(value)
}
