//! Calendar helpers for due-date classification and stats ranges.
//!
//! All boundaries are computed in UTC. Weeks are ISO weeks (Monday start).

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};

use crate::error::{Result, TrackerError};

/// Inclusive [00:00:00, 23:59:59] bounds of the given instant's calendar day.
pub fn day_bounds(reference: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let date = reference.date_naive();
    date_bounds(date)
}

/// Inclusive bounds of the ISO week containing the given instant.
pub fn week_bounds(reference: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let date = reference.date_naive();
    let days_from_monday = date.weekday().num_days_from_monday() as i64;
    let monday = date - Duration::days(days_from_monday);
    let sunday = monday + Duration::days(6);

    let (start, _) = date_bounds(monday);
    let (_, end) = date_bounds(sunday);
    (start, end)
}

/// Inclusive [start 00:00:00, end 23:59:59] bounds of a calendar date span.
pub fn range_bounds(start: NaiveDate, end: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let (start_dt, _) = date_bounds(start);
    let (_, end_dt) = date_bounds(end);
    (start_dt, end_dt)
}

fn date_bounds(date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap());
    let end = Utc.from_utc_datetime(&date.and_hms_opt(23, 59, 59).unwrap());
    (start, end)
}

/// Default window for focus statistics: the 7 days before today, plus today.
pub fn default_stats_range(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    (today - Duration::days(7), today)
}

/// Parse a `YYYY-MM-DD` calendar date from request input.
pub fn parse_date(input: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(input.trim(), "%Y-%m-%d").map_err(|_| {
        TrackerError::Request(format!("invalid date '{}', expected YYYY-MM-DD", input))
    })
}
