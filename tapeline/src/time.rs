//! Time helpers shared across the catalog and pipeline.

use chrono::{DateTime, TimeZone, Utc};

/// The "never backed up" sentinel: year 0001-01-01 00:00:00 UTC.
///
/// Returned by the catalog when a directory has no completed job yet, so
/// that every file modification time compares as newer.
pub fn never_backed_up() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(1, 1, 1, 0, 0, 0).unwrap()
}

/// Duration between two instants, rounded down to whole minutes.
///
/// Job rows store their duration in minutes; sub-minute runs record zero.
pub fn whole_minutes(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    (end - start).num_minutes()
}
