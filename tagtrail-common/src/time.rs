//! Timestamp and UTC day-window utilities
//!
//! All instants are persisted as Unix epoch milliseconds (UTC). Snapshot rows
//! are keyed by the calendar date of the window they were computed over.

use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::{Error, Result};

/// Date format used for snapshot keys and API input
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Convert a UTC instant to epoch milliseconds
pub fn to_millis(instant: DateTime<Utc>) -> i64 {
    instant.timestamp_millis()
}

/// Parse a strict `YYYY-MM-DD` date
pub fn parse_date(s: &str) -> Result<NaiveDate> {
    let trimmed = s.trim();
    // chrono accepts unpadded fields; snapshot keys must be canonical
    if trimmed.len() != 10 {
        return Err(Error::InvalidInput(format!(
            "date must be formatted YYYY-MM-DD: {:?}",
            s
        )));
    }
    NaiveDate::parse_from_str(trimmed, DATE_FORMAT)
        .map_err(|e| Error::InvalidInput(format!("invalid date {:?}: {}", s, e)))
}

/// Inclusive UTC boundaries of one calendar day
///
/// Computed once per aggregation run and shared by every dimension so that
/// all rollups for a date see exactly the same window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayWindow {
    pub date: NaiveDate,
    /// First millisecond of the day (inclusive)
    pub start_ms: i64,
    /// Last millisecond of the day (inclusive)
    pub end_ms: i64,
}

impl DayWindow {
    /// Window covering `date` from 00:00:00.000 to 23:59:59.999 UTC
    pub fn for_date(date: NaiveDate) -> Self {
        let start = date.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc();
        let end = start + Duration::days(1) - Duration::milliseconds(1);
        Self {
            date,
            start_ms: to_millis(start),
            end_ms: to_millis(end),
        }
    }

    /// The day before `now`'s UTC calendar date
    pub fn yesterday(now: DateTime<Utc>) -> Self {
        let today = now.date_naive();
        Self::for_date(today.pred_opt().unwrap_or(today))
    }

    /// Resolve an optional requested date, defaulting to yesterday (UTC)
    pub fn resolve(date: Option<NaiveDate>, now: DateTime<Utc>) -> Self {
        match date {
            Some(date) => Self::for_date(date),
            None => Self::yesterday(now),
        }
    }

    /// Snapshot key for this window
    pub fn date_key(&self) -> String {
        self.date.format(DATE_FORMAT).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_window_boundaries_are_inclusive() {
        let window = DayWindow::for_date(date(2024, 3, 10));
        let start = Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap();
        assert_eq!(window.start_ms, start.timestamp_millis());
        assert_eq!(window.end_ms - window.start_ms, 86_400_000 - 1);
        let next = DayWindow::for_date(date(2024, 3, 11));
        assert_eq!(next.start_ms, window.end_ms + 1);
    }

    #[test]
    fn test_yesterday_crosses_month_boundary() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 0, 30, 0).unwrap();
        let window = DayWindow::yesterday(now);
        assert_eq!(window.date, date(2024, 2, 29));
        assert_eq!(window.date_key(), "2024-02-29");
    }

    #[test]
    fn test_resolve_prefers_explicit_date() {
        let now = Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap();
        assert_eq!(DayWindow::resolve(Some(date(2024, 1, 2)), now).date, date(2024, 1, 2));
        assert_eq!(DayWindow::resolve(None, now).date, date(2024, 6, 14));
    }

    #[test]
    fn test_parse_date_strict() {
        assert_eq!(parse_date("2024-05-07").unwrap(), date(2024, 5, 7));
        assert_eq!(parse_date(" 2024-05-07 ").unwrap(), date(2024, 5, 7));
        assert!(parse_date("2024-5-7").is_err());
        assert!(parse_date("2024-02-30").is_err());
        assert!(parse_date("yesterday").is_err());
        assert!(parse_date("").is_err());
    }
}
