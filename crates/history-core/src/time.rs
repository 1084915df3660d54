//! UTC date arithmetic shared by the fetcher and the history service.
//!
//! All arithmetic happens in UTC milliseconds per `spec.md` §9: a midpoint
//! is computed as the floor-division of two epoch-millisecond timestamps,
//! then truncated back down to a day boundary. Nothing in this module reads
//! the wall clock — [`today_utc`] is the single exception, and only the
//! history service calls it; the fetcher and upstream client receive dates
//! as plain arguments.

use chrono::{NaiveDate, Utc};

const MILLIS_PER_DAY: i64 = 86_400_000;

/// The current instant floored to UTC midnight.
///
/// This is the sole source of time-derived input anywhere in the engine —
/// the fetcher and upstream client never call this themselves.
#[must_use]
pub fn today_utc() -> NaiveDate {
    Utc::now().date_naive()
}

fn days_to_epoch_millis(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .expect("midnight is always a valid time")
        .and_utc()
        .timestamp_millis()
}

fn epoch_millis_to_day(millis: i64) -> NaiveDate {
    chrono::DateTime::from_timestamp_millis(millis)
        .expect("value derived from a valid NaiveDate")
        .date_naive()
}

/// The number of whole days between two dates (`end - start`).
#[must_use]
pub fn days_between(start: NaiveDate, end: NaiveDate) -> i64 {
    (end - start).num_days()
}

/// The UTC-millisecond midpoint between `start` and `end`, floored to a day
/// boundary.
///
/// Per `spec.md` §4.2's tie-break rule: if flooring collapses the midpoint
/// back onto `start` (can happen for adjacent-day segments), the caller
/// must treat the segment as terminal rather than probe `start` again.
#[must_use]
pub fn midpoint_day(start: NaiveDate, end: NaiveDate) -> NaiveDate {
    let start_ms = days_to_epoch_millis(start);
    let end_ms = days_to_epoch_millis(end);
    let mid_ms = start_ms + (end_ms - start_ms) / 2;
    epoch_millis_to_day(mid_ms - mid_ms.rem_euclid(MILLIS_PER_DAY))
}
