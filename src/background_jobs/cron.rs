//! Five-field cron expressions.
//!
//! Supports `*`, single values, ranges (`1-5`), lists (`1,15,30`), steps
//! (`*/3`, `10-40/10`, `5/15`), month and weekday names (`JAN`, `mon`), both
//! `0` and `7` for Sunday, and the `@hourly`/`@daily`/`@weekly`/`@monthly`/
//! `@yearly` shorthands.
//!
//! Day-of-month and day-of-week follow the usual cron rule: when both are
//! restricted a day matches if either matches, otherwise only the restricted
//! one applies.

use chrono::{
    DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Timelike,
};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Upper bound on how far ahead `next_after` searches. Large enough for a
/// February 29th schedule across a skipped leap year (e.g. 2096 -> 2104).
const MAX_LOOKAHEAD_DAYS: i64 = 366 * 9;

const MONTH_NAMES: &[&str] = &[
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];
const WEEKDAY_NAMES: &[&str] = &["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CronParseError {
    #[error("empty cron expression")]
    Empty,

    #[error("expected 5 fields (minute hour day-of-month month day-of-week), found {0}")]
    FieldCount(usize),

    #[error("unknown cron shorthand: {0}")]
    UnknownMacro(String),

    #[error("invalid {field} value: {value:?}")]
    InvalidValue { field: &'static str, value: String },

    #[error("{field} value {value} out of range {min}-{max}")]
    OutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },

    #[error("invalid {field} step: {step:?}")]
    InvalidStep { field: &'static str, step: String },

    #[error("invalid {field} range: {start}-{end}")]
    InvalidRange {
        field: &'static str,
        start: u32,
        end: u32,
    },
}

struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
}

const MINUTE: FieldSpec = FieldSpec {
    name: "minute",
    min: 0,
    max: 59,
    names: &[],
};
const HOUR: FieldSpec = FieldSpec {
    name: "hour",
    min: 0,
    max: 23,
    names: &[],
};
const DAY_OF_MONTH: FieldSpec = FieldSpec {
    name: "day-of-month",
    min: 1,
    max: 31,
    names: &[],
};
const MONTH: FieldSpec = FieldSpec {
    name: "month",
    min: 1,
    max: 12,
    names: MONTH_NAMES,
};
// 7 is accepted as an alias for Sunday and folded onto 0 after parsing.
const DAY_OF_WEEK: FieldSpec = FieldSpec {
    name: "day-of-week",
    min: 0,
    max: 7,
    names: WEEKDAY_NAMES,
};

/// Set of allowed values for one field, as a bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FieldSet(u64);

impl FieldSet {
    fn contains(&self, value: u32) -> bool {
        value < 64 && self.0 & (1 << value) != 0
    }

    fn insert(&mut self, value: u32) {
        self.0 |= 1 << value;
    }
}

/// A parsed cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expression: String,
    minutes: FieldSet,
    hours: FieldSet,
    days_of_month: FieldSet,
    months: FieldSet,
    days_of_week: FieldSet,
    dom_wildcard: bool,
    dow_wildcard: bool,
}

impl CronSchedule {
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First firing time strictly after `after`, evaluated in `after`'s time
    /// zone. Returns `None` if the expression can never fire (e.g. `0 0 30 2 *`).
    ///
    /// Local times skipped by a DST transition are skipped; ambiguous ones
    /// fire at their first occurrence that is still after `after`.
    pub fn next_after<Tz: TimeZone>(&self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        let tz = after.timezone();
        let mut candidate = after
            .naive_local()
            .with_second(0)?
            .with_nanosecond(0)?
            + Duration::minutes(1);
        let limit = candidate + Duration::days(MAX_LOOKAHEAD_DAYS);

        while candidate <= limit {
            if !self.months.contains(candidate.month()) {
                candidate = first_of_next_month(candidate.date())?;
                continue;
            }
            if !self.day_matches(candidate.date()) {
                candidate = (candidate.date() + Duration::days(1)).and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !self.hours.contains(candidate.hour()) {
                candidate = candidate.with_minute(0)? + Duration::hours(1);
                continue;
            }
            if !self.minutes.contains(candidate.minute()) {
                candidate += Duration::minutes(1);
                continue;
            }

            match tz.from_local_datetime(&candidate) {
                LocalResult::Single(at) if at > *after => return Some(at),
                LocalResult::Ambiguous(earliest, latest) => {
                    if earliest > *after {
                        return Some(earliest);
                    }
                    if latest > *after {
                        return Some(latest);
                    }
                }
                _ => {}
            }
            candidate += Duration::minutes(1);
        }

        None
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = self.days_of_month.contains(date.day());
        let dow = self
            .days_of_week
            .contains(date.weekday().num_days_from_sunday());
        match (self.dom_wildcard, self.dow_wildcard) {
            (true, true) => true,
            (true, false) => dow,
            (false, true) => dom,
            (false, false) => dom || dow,
        }
    }
}

impl FromStr for CronSchedule {
    type Err = CronParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let expression = s.trim();
        if expression.is_empty() {
            return Err(CronParseError::Empty);
        }

        let expanded = if expression.starts_with('@') {
            expand_macro(expression)?
        } else {
            expression
        };

        let fields: Vec<&str> = expanded.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CronParseError::FieldCount(fields.len()));
        }

        let mut days_of_week = parse_field(fields[4], &DAY_OF_WEEK)?;
        if days_of_week.contains(7) {
            days_of_week.0 &= !(1 << 7);
            days_of_week.insert(0);
        }

        Ok(Self {
            expression: expression.to_string(),
            minutes: parse_field(fields[0], &MINUTE)?,
            hours: parse_field(fields[1], &HOUR)?,
            days_of_month: parse_field(fields[2], &DAY_OF_MONTH)?,
            months: parse_field(fields[3], &MONTH)?,
            days_of_week,
            dom_wildcard: fields[2].starts_with('*'),
            dow_wildcard: fields[4].starts_with('*'),
        })
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

fn expand_macro(expression: &str) -> Result<&'static str, CronParseError> {
    match expression.to_ascii_lowercase().as_str() {
        "@yearly" | "@annually" => Ok("0 0 1 1 *"),
        "@monthly" => Ok("0 0 1 * *"),
        "@weekly" => Ok("0 0 * * 0"),
        "@daily" | "@midnight" => Ok("0 0 * * *"),
        "@hourly" => Ok("0 * * * *"),
        _ => Err(CronParseError::UnknownMacro(expression.to_string())),
    }
}

fn parse_field(field: &str, spec: &FieldSpec) -> Result<FieldSet, CronParseError> {
    let mut set = FieldSet(0);
    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step = step
                    .parse::<u32>()
                    .ok()
                    .filter(|s| *s > 0 && *s <= spec.max)
                    .ok_or_else(|| CronParseError::InvalidStep {
                        field: spec.name,
                        step: step.to_string(),
                    })?;
                (range, Some(step))
            }
            None => (part, None),
        };

        let (start, end) = if range == "*" {
            (spec.min, spec.max)
        } else if let Some((start, end)) = range.split_once('-') {
            let start = parse_value(start, spec)?;
            let end = parse_value(end, spec)?;
            if start > end {
                return Err(CronParseError::InvalidRange {
                    field: spec.name,
                    start,
                    end,
                });
            }
            (start, end)
        } else {
            let value = parse_value(range, spec)?;
            // `5/15` means "from 5 to the end of the range, every 15".
            match step {
                Some(_) => (value, spec.max),
                None => (value, value),
            }
        };

        let step = step.unwrap_or(1);
        let mut value = start;
        while value <= end {
            set.insert(value);
            match value.checked_add(step) {
                Some(next) => value = next,
                None => break,
            }
        }
    }
    Ok(set)
}

fn parse_value(token: &str, spec: &FieldSpec) -> Result<u32, CronParseError> {
    let value = match token.parse::<u32>() {
        Ok(value) => value,
        Err(_) => spec
            .names
            .iter()
            .position(|name| name.eq_ignore_ascii_case(token))
            .map(|idx| idx as u32 + spec.min)
            .ok_or_else(|| CronParseError::InvalidValue {
                field: spec.name,
                value: token.to_string(),
            })?,
    };

    if value < spec.min || value > spec.max {
        return Err(CronParseError::OutOfRange {
            field: spec.name,
            value,
            min: spec.min,
            max: spec.max,
        });
    }
    Ok(value)
}

fn first_of_next_month(date: NaiveDate) -> Option<NaiveDateTime> {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)
}
