//! Calendar-aligned counting windows.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Window kind for a policy's counted quantity.
///
/// Every window is aligned to a UTC calendar boundary, so two requests that
/// fall in the same window always compute the same window start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowKind {
    /// Per-second rate limiting
    Second,
    /// Per-minute rate limiting
    Minute,
    /// Per-hour rate limiting
    Hour,
    /// Per-day rate limiting
    Day,
    /// Per-week rate limiting, weeks start on Monday
    Week,
    /// Per-calendar-month rate limiting
    Month,
}

impl WindowKind {
    /// Truncate `now` to the start of the window containing it.
    ///
    /// Idempotent: `start(start(t)) == start(t)`.
    pub fn start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            WindowKind::Second => truncate_secs(now, 1),
            WindowKind::Minute => truncate_secs(now, 60),
            WindowKind::Hour => truncate_secs(now, 3600),
            WindowKind::Day => midnight(now.date_naive()),
            WindowKind::Week => {
                let date = now.date_naive();
                let offset = date.weekday().num_days_from_monday() as i64;
                midnight(date - Duration::days(offset))
            }
            WindowKind::Month => midnight(first_of_month(now.year(), now.month())),
        }
    }

    /// The exclusive end of the window starting at `start`.
    pub fn end(&self, start: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            WindowKind::Second => start + Duration::seconds(1),
            WindowKind::Minute => start + Duration::minutes(1),
            WindowKind::Hour => start + Duration::hours(1),
            WindowKind::Day => start + Duration::days(1),
            WindowKind::Week => start + Duration::weeks(1),
            WindowKind::Month => {
                let (year, month) = if start.month() == 12 {
                    (start.year() + 1, 1)
                } else {
                    (start.year(), start.month() + 1)
                };
                midnight(first_of_month(year, month))
            }
        }
    }

    /// Start and end of the window containing `now`.
    pub fn bounds(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = self.start(now);
        (start, self.end(start))
    }
}

impl std::fmt::Display for WindowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            WindowKind::Second => "second",
            WindowKind::Minute => "minute",
            WindowKind::Hour => "hour",
            WindowKind::Day => "day",
            WindowKind::Week => "week",
            WindowKind::Month => "month",
        };
        f.write_str(name)
    }
}

fn truncate_secs(now: DateTime<Utc>, unit: i64) -> DateTime<Utc> {
    let secs = now.timestamp();
    let aligned = secs - secs.rem_euclid(unit);
    Utc.timestamp_opt(aligned, 0)
        .single()
        .expect("aligned timestamp lies inside the representable range")
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_hms_opt(0, 0, 0)
        .expect("midnight is a valid time")
        .and_utc()
}

fn first_of_month(year: i32, month: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, 1).expect("day 1 exists in every month")
}
