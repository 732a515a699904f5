//! Folds over one pupil's history. Each rule reads a bounded range of calendar
//! years for a single field.

use super::long::History;
use super::schema::Field;
use std::ops::RangeInclusive;

/// A value resolved from the history, with the year it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved<'a> {
    pub year: u16,
    pub value: &'a str,
}

/// The baseline-year value if present, otherwise the first value observed in a
/// later year up to `last`. Earlier years are never consulted and later values
/// never replace an earlier one.
pub fn first_available(history: &History, field: Field, baseline: u16, last: u16) -> Option<Resolved<'_>> {
    history
        .series(field, baseline..=last)
        .next()
        .map(|(year, value)| Resolved { year, value })
}

/// Maximum integer value over `years`. The `fallback` year is read only when
/// none of `years` carries a value, and never overrides an observed maximum.
pub fn max_over(history: &History, field: Field, years: &[u16], fallback: Option<u16>) -> Option<i64> {
    let observed = years
        .iter()
        .filter_map(|&year| history.get(field, year))
        .filter_map(|value| value.parse::<i64>().ok())
        .max();
    observed.or_else(|| {
        fallback
            .and_then(|year| history.get(field, year))
            .and_then(|value| value.parse::<i64>().ok())
    })
}

/// Logical OR over the window: `Some(true)` if any year is true, `Some(false)`
/// if only false values were observed, `None` if nothing was observed.
pub fn ever_true(history: &History, field: Field, window: RangeInclusive<u16>) -> Option<bool> {
    history
        .series(field, window)
        .filter_map(|(_, value)| match value {
            "1" => Some(true),
            "0" => Some(false),
            _ => None,
        })
        .fold(None, |acc, flag| Some(acc.unwrap_or(false) || flag))
}

/// Re-indexes a field from calendar years onto academic-year slots
/// `0..span`, where slot `y` holds calendar year `baseline + y`.
pub fn year_indexed(history: &History, field: Field, baseline: u16, span: usize) -> Vec<Option<String>> {
    (0..span)
        .map(|y| {
            u16::try_from(y)
                .ok()
                .and_then(|offset| baseline.checked_add(offset))
                .and_then(|year| history.get(field, year))
                .map(str::to_string)
        })
        .collect()
}

/// `Some(a != b)` when both identifiers are present.
pub fn changed(a: Option<&str>, b: Option<&str>) -> Option<bool> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a != b),
        _ => None,
    }
}
