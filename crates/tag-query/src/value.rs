//! Scalar casts for metatag values
//!
//! Every cast returns `None` on malformed input; callers turn that into a
//! non-matching clause instead of an error.

use chrono::{DateTime, Datelike, Months, NaiveDate, NaiveDateTime, TimeDelta, Utc};
use regex::Regex;
use std::sync::LazyLock;

/// `3_days_ago`, `2weeksago`, `1_yr_ago`
static RELATIVE_AGO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)_?([a-z]+?)_?ago$").expect("relative date regex"));

/// `512`, `1.5kb`, `2MB`
static FILE_SIZE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(\d+(?:\.\d+)?)\s*(b|k|kb|m|mb)?$").expect("file size regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

/// Accepted spellings for relative-date units.
const UNIT_SPELLINGS: &[(&str, Unit)] = &[
    ("s", Unit::Second),
    ("sec", Unit::Second),
    ("secs", Unit::Second),
    ("second", Unit::Second),
    ("seconds", Unit::Second),
    ("mi", Unit::Minute),
    ("min", Unit::Minute),
    ("mins", Unit::Minute),
    ("minute", Unit::Minute),
    ("minutes", Unit::Minute),
    ("h", Unit::Hour),
    ("hr", Unit::Hour),
    ("hrs", Unit::Hour),
    ("hour", Unit::Hour),
    ("hours", Unit::Hour),
    ("d", Unit::Day),
    ("day", Unit::Day),
    ("days", Unit::Day),
    ("w", Unit::Week),
    ("wk", Unit::Week),
    ("wks", Unit::Week),
    ("week", Unit::Week),
    ("weeks", Unit::Week),
    ("mo", Unit::Month),
    ("mon", Unit::Month),
    ("month", Unit::Month),
    ("months", Unit::Month),
    ("y", Unit::Year),
    ("yr", Unit::Year),
    ("yrs", Unit::Year),
    ("year", Unit::Year),
    ("years", Unit::Year),
];

/// Inclusive interval of time a date value refers to.
///
/// Instants (`3_days_ago`, RFC 3339 timestamps) have `start == end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateSpan {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateSpan {
    const fn instant(at: DateTime<Utc>) -> Self {
        Self { start: at, end: at }
    }

    #[must_use]
    pub fn is_instant(&self) -> bool {
        self.start == self.end
    }
}

#[must_use]
pub fn parse_int(value: &str) -> Option<i64> {
    value.trim().parse().ok()
}

#[must_use]
pub fn parse_float(value: &str) -> Option<f64> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// `w:h` or a decimal, rounded to two places. A zero height yields `0.0`.
#[must_use]
pub fn parse_ratio(value: &str) -> Option<f64> {
    match value.trim().split_once(':') {
        Some((w, h)) => {
            let w = parse_float(w)?;
            let h = parse_float(h)?;
            if h == 0.0 {
                Some(0.0)
            } else {
                Some(round2(w / h))
            }
        }
        None => parse_float(value).map(round2),
    }
}

/// Byte count with optional `b`/`kb`/`mb` suffix (case-insensitive).
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub fn parse_filesize(value: &str) -> Option<i64> {
    let caps = FILE_SIZE.captures(value.trim())?;
    let number: f64 = caps[1].parse().ok()?;
    let multiplier = match caps.get(2).map(|m| m.as_str().to_ascii_lowercase()) {
        None => 1.0,
        Some(unit) => match unit.as_str() {
            "k" | "kb" => 1024.0,
            "m" | "mb" => 1024.0 * 1024.0,
            _ => 1.0,
        },
    };
    let bytes = (number * multiplier).round();
    if bytes > i64::MAX as f64 {
        return None;
    }
    Some(bytes as i64)
}

/// `true|yes|1|t|y|on` or `false|no|0|f|n|off`.
#[must_use]
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" | "on" => Some(true),
        "false" | "f" | "no" | "n" | "0" | "off" => Some(false),
        _ => None,
    }
}

fn start_of(date: NaiveDate) -> Option<DateTime<Utc>> {
    Some(date.and_hms_opt(0, 0, 0)?.and_utc())
}

/// Span covering `first..=last` whole days.
fn days_span(first: NaiveDate, last: NaiveDate) -> Option<DateSpan> {
    let start = start_of(first)?;
    let end = start_of(last.succ_opt()?)? - TimeDelta::microseconds(1);
    Some(DateSpan { start, end })
}

fn month_start(year: i32, month: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, 1)
}

fn unit_ago(now: DateTime<Utc>, amount: i64, unit: Unit) -> Option<DateTime<Utc>> {
    let months = |n: i64| u32::try_from(n).ok().map(Months::new);
    match unit {
        Unit::Second => now.checked_sub_signed(TimeDelta::try_seconds(amount)?),
        Unit::Minute => now.checked_sub_signed(TimeDelta::try_minutes(amount)?),
        Unit::Hour => now.checked_sub_signed(TimeDelta::try_hours(amount)?),
        Unit::Day => now.checked_sub_signed(TimeDelta::try_days(amount)?),
        Unit::Week => now.checked_sub_signed(TimeDelta::try_weeks(amount)?),
        Unit::Month => now.checked_sub_months(months(amount)?),
        Unit::Year => now.checked_sub_months(months(amount.checked_mul(12)?)?),
    }
}

fn relative_span(value: &str, now: DateTime<Utc>) -> Option<DateSpan> {
    let today = now.date_naive();
    match value {
        "today" => days_span(today, today),
        "yesterday" => {
            let day = today.pred_opt()?;
            days_span(day, day)
        }
        "day" | "week" | "month" | "year" | "decade" => {
            let (amount, unit) = match value {
                "day" => (1, Unit::Day),
                "week" => (1, Unit::Week),
                "month" => (1, Unit::Month),
                "year" => (1, Unit::Year),
                _ => (10, Unit::Year),
            };
            Some(DateSpan {
                start: unit_ago(now, amount, unit)?,
                end: now,
            })
        }
        "yesterweek" => {
            let since_monday = i64::from(today.weekday().num_days_from_monday());
            let this_monday = today.checked_sub_signed(TimeDelta::days(since_monday))?;
            let last_monday = this_monday.checked_sub_signed(TimeDelta::days(7))?;
            days_span(last_monday, this_monday.pred_opt()?)
        }
        "yestermonth" => {
            let (year, month) = if today.month() == 1 {
                (today.year() - 1, 12)
            } else {
                (today.year(), today.month() - 1)
            };
            let first = month_start(year, month)?;
            let last = month_start(today.year(), today.month())?.pred_opt()?;
            days_span(first, last)
        }
        "yesteryear" => {
            let year = today.year() - 1;
            days_span(
                NaiveDate::from_ymd_opt(year, 1, 1)?,
                NaiveDate::from_ymd_opt(year, 12, 31)?,
            )
        }
        _ => None,
    }
}

fn ago_span(value: &str, now: DateTime<Utc>) -> Option<DateSpan> {
    let caps = RELATIVE_AGO.captures(value)?;
    let amount: i64 = caps[1].parse().ok()?;
    let unit = UNIT_SPELLINGS
        .iter()
        .find(|(spelling, _)| *spelling == &caps[2])
        .map(|(_, unit)| *unit)?;
    unit_ago(now, amount, unit).map(DateSpan::instant)
}

fn absolute_span(value: &str) -> Option<DateSpan> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(DateSpan::instant(dt.with_timezone(&Utc)));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S") {
        return Some(DateSpan::instant(naive.and_utc()));
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return days_span(date, date);
    }
    if let Ok(first) = NaiveDate::parse_from_str(&format!("{value}-01"), "%Y-%m-%d") {
        let next = first.checked_add_months(Months::new(1))?;
        return days_span(first, next.pred_opt()?);
    }
    if value.len() == 4 && value.chars().all(|c| c.is_ascii_digit()) {
        let year: i32 = value.parse().ok()?;
        return days_span(
            NaiveDate::from_ymd_opt(year, 1, 1)?,
            NaiveDate::from_ymd_opt(year, 12, 31)?,
        );
    }
    None
}

/// Resolve a date value to the span of time it names, relative to `now`.
///
/// Accepts absolute dates (`2020-01-02`, `2020-01`, `2020`, RFC 3339),
/// `today`, `yesterday`, `day|week|month|year|decade` (the trailing period),
/// `N_unit_ago`, and the calendar periods `yesterweek`, `yestermonth`,
/// `yesteryear`.
#[must_use]
pub fn parse_date_span(value: &str, now: DateTime<Utc>) -> Option<DateSpan> {
    let value = value.trim();
    let lower = value.to_ascii_lowercase();
    relative_span(&lower, now)
        .or_else(|| ago_span(&lower, now))
        .or_else(|| absolute_span(value))
}
