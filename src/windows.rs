//! Calendar-month windows over the analysis period.

use chrono::{Datelike, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Calendar month of a timestamp, used as a session's window key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WindowKey {
    pub year: i32,
    pub month: u32,
}

impl WindowKey {
    pub fn from_ts_ms(ts_ms_utc: i64) -> Option<Self> {
        let dt = Utc.timestamp_millis_opt(ts_ms_utc).single()?;
        Some(Self {
            year: dt.year(),
            month: dt.month(),
        })
    }
}

impl std::fmt::Display for WindowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Half-open `[start, end)` window in UTC milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthWindow {
    pub key: WindowKey,
    pub start_ts_ms_utc: i64,
    pub end_ts_ms_utc_exclusive: i64,
}

impl MonthWindow {
    pub fn contains(&self, ts_ms_utc: i64) -> bool {
        ts_ms_utc >= self.start_ts_ms_utc && ts_ms_utc < self.end_ts_ms_utc_exclusive
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WindowError {
    #[error("window range is empty: start {start} is not before end {end}")]
    EmptyRange { start: NaiveDate, end: NaiveDate },
    #[error("date {0} is outside the representable UTC range")]
    InvalidDate(NaiveDate),
}

/// Steps `start` to `end_exclusive` in one-month increments.
///
/// The first window begins at `start` even when it is mid-month; the last one is
/// clipped to `end_exclusive`. Consecutive windows share their boundary.
pub fn month_windows(
    start: NaiveDate,
    end_exclusive: NaiveDate,
) -> Result<Vec<MonthWindow>, WindowError> {
    if end_exclusive <= start {
        return Err(WindowError::EmptyRange {
            start,
            end: end_exclusive,
        });
    }

    let mut out = Vec::new();
    let mut cursor = start;

    while cursor < end_exclusive {
        let next = std::cmp::min(next_month(cursor)?, end_exclusive);
        out.push(MonthWindow {
            key: WindowKey {
                year: cursor.year(),
                month: cursor.month(),
            },
            start_ts_ms_utc: day_start_ms(cursor)?,
            end_ts_ms_utc_exclusive: day_start_ms(next)?,
        });
        cursor = next;
    }

    Ok(out)
}

fn day_start_ms(date: NaiveDate) -> Result<i64, WindowError> {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp_millis())
        .ok_or(WindowError::InvalidDate(date))
}

fn next_month(date: NaiveDate) -> Result<NaiveDate, WindowError> {
    let next = if date.month() == 12 {
        NaiveDate::from_ymd_opt(date.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(date.year(), date.month() + 1, 1)
    };
    next.ok_or(WindowError::InvalidDate(date))
}
