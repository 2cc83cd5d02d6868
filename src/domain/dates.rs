//! Civil-date arithmetic and millisecond timestamps.
//!
//! Due dates are plain `YYYY-MM-DD` calendar days with no timezone logic;
//! "today" is the local wall-clock date.

use chrono::{Duration, Local, NaiveDate, Utc};

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Local wall-clock date.
pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Today plus a number of civil days.
pub fn today_plus_days(days: i64) -> NaiveDate {
    today() + Duration::days(days)
}
