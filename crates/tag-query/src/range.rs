//! Range grammar for metatag values
//!
//! Parses the operator part of a metatag value (`<x`, `>=x`, `a..b`, `a,b,c`,
//! bare `x`) and defers the scalar part to a caller-supplied cast, so the
//! same grammar serves integers, floats, ratios, file sizes and dates.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::value;

/// Comma lists are truncated to this many entries.
pub const MAX_RANGE_LIST: usize = 100;

/// Relative tolerance applied by [`Range::fudged`].
const FUDGE_FACTOR: f64 = 0.05;

/// A comparison against a single field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Range<T> {
    Eq(T),
    Gt(T),
    Gte(T),
    Lt(T),
    Lte(T),
    Between(T, T),
    In(Vec<T>),
}

/// A [`Range`] tagged with the scalar type the index field stores.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "range", rename_all = "snake_case")]
pub enum TypedRange {
    Int(Range<i64>),
    Float(Range<f64>),
    Date(Range<DateTime<Utc>>),
}

impl<T> Range<T> {
    /// Apply `f` to every bound.
    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> Range<U> {
        match self {
            Self::Eq(v) => Range::Eq(f(v)),
            Self::Gt(v) => Range::Gt(f(v)),
            Self::Gte(v) => Range::Gte(f(v)),
            Self::Lt(v) => Range::Lt(f(v)),
            Self::Lte(v) => Range::Lte(f(v)),
            Self::Between(a, b) => {
                let a = f(a);
                Range::Between(a, f(b))
            }
            Self::In(values) => Range::In(values.into_iter().map(f).collect()),
        }
    }
}

/// Scalars that can be widened into a tolerance band.
pub trait Fudge: Sized {
    /// `(low, high)` bounds roughly ±5% around `self`, clamped to the type.
    fn fudge_bounds(&self) -> (Self, Self);
}

impl Fudge for i64 {
    fn fudge_bounds(&self) -> (Self, Self) {
        // Exact integer arithmetic: 95/100 and 105/100, widened so nothing overflows.
        let v = i128::from(*self);
        let a = (v * 95).div_euclid(100);
        let b = -((-v * 105).div_euclid(100));
        let clamp = |x: i128| {
            Self::try_from(x).unwrap_or(if x < 0 { Self::MIN } else { Self::MAX })
        };
        (clamp(a.min(b)), clamp(a.max(b)))
    }
}

impl Fudge for f64 {
    fn fudge_bounds(&self) -> (Self, Self) {
        let a = self * (1.0 - FUDGE_FACTOR);
        let b = self * (1.0 + FUDGE_FACTOR);
        let clamp = |x: f64| x.clamp(f64::MIN, f64::MAX);
        (clamp(a.min(b)), clamp(a.max(b)))
    }
}

impl<T: Fudge> Range<T> {
    /// Rewrite `Eq(v)` into `Between(v*0.95, v*1.05)`; other shapes pass through.
    #[must_use]
    pub fn fudged(self) -> Self {
        match self {
            Self::Eq(v) => {
                let (low, high) = v.fudge_bounds();
                Self::Between(low, high)
            }
            other => other,
        }
    }
}

/// Parse `input` with the range grammar, casting each scalar with `cast`.
///
/// Returns `None` when the operator shape is empty or any required scalar
/// fails to cast. Comma lists skip entries that fail to cast and keep at
/// most [`MAX_RANGE_LIST`] entries.
pub fn parse_range<T>(input: &str, cast: impl Fn(&str) -> Option<T>) -> Option<Range<T>> {
    let s = input.trim();
    if s.is_empty() {
        return None;
    }

    if let Some(rest) = s.strip_prefix("<=") {
        return cast(rest).map(Range::Lte);
    }
    if let Some(rest) = s.strip_prefix(">=") {
        return cast(rest).map(Range::Gte);
    }
    if let Some(rest) = s.strip_prefix('<') {
        return cast(rest).map(Range::Lt);
    }
    if let Some(rest) = s.strip_prefix('>') {
        return cast(rest).map(Range::Gt);
    }

    if let Some((low, high)) = s.split_once("..") {
        return match (low.trim(), high.trim()) {
            ("", "") => None,
            ("", high) => cast(high).map(Range::Lte),
            (low, "") => cast(low).map(Range::Gte),
            (low, high) => Some(Range::Between(cast(low)?, cast(high)?)),
        };
    }

    if s.contains(',') {
        let values: Vec<T> = s
            .split(',')
            .take(MAX_RANGE_LIST)
            .filter_map(|part| cast(part.trim()))
            .collect();
        return if values.is_empty() {
            None
        } else {
            Some(Range::In(values))
        };
    }

    cast(s).map(Range::Eq)
}

/// Integer range (`id`, `score`, `width`, ...).
#[must_use]
pub fn parse_int_range(input: &str) -> Option<Range<i64>> {
    parse_range(input, value::parse_int)
}

/// Float range (`duration`).
#[must_use]
pub fn parse_float_range(input: &str) -> Option<Range<f64>> {
    parse_range(input, value::parse_float)
}

/// Aspect-ratio range; accepts `w:h` or decimal bounds.
#[must_use]
pub fn parse_ratio_range(input: &str) -> Option<Range<f64>> {
    parse_range(input, value::parse_ratio)
}

/// File-size range in bytes; accepts `kb`/`mb` suffixes.
#[must_use]
pub fn parse_filesize_range(input: &str) -> Option<Range<i64>> {
    parse_range(input, value::parse_filesize)
}

/// Date range relative to `now`.
///
/// A bare value that names a period (`2020-01-01`, `yesterday`, `yesterweek`)
/// covers that whole period; a bare instant (`3_days_ago`) means "since".
/// Open bounds pick the side of the period that keeps the comparison strict
/// (`>2020-01-01` starts after that day ends).
#[must_use]
pub fn parse_date_range(input: &str, now: DateTime<Utc>) -> Option<Range<DateTime<Utc>>> {
    let spans = parse_range(input, |s| value::parse_date_span(s, now))?;
    match spans {
        Range::Eq(span) if span.is_instant() => Some(Range::Gte(span.start)),
        Range::Eq(span) => Some(Range::Between(span.start, span.end)),
        Range::Gt(span) => Some(Range::Gt(span.end)),
        Range::Gte(span) => Some(Range::Gte(span.start)),
        Range::Lt(span) => Some(Range::Lt(span.start)),
        Range::Lte(span) => Some(Range::Lte(span.end)),
        Range::Between(a, b) => Some(Range::Between(a.start.min(b.start), a.end.max(b.end))),
        Range::In(_) => None,
    }
}
