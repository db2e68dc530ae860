use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};

use crate::model::{Ms, Span};

/// Calendar month `[first day 00:00 UTC, first day of next month 00:00 UTC)`.
pub fn month(year: i32, month: u32) -> Option<Span> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    let start = Utc.from_utc_datetime(&first.and_hms_opt(0, 0, 0)?);
    let end = Utc.from_utc_datetime(&next.and_hms_opt(0, 0, 0)?);
    Span::try_new(start.timestamp_millis(), end.timestamp_millis())
}

/// Parse `YYYY-MM` into its calendar month.
pub fn parse_month(s: &str) -> Option<Span> {
    let (y, m) = s.trim().split_once('-')?;
    month(y.parse().ok()?, m.parse().ok()?)
}

/// Month containing the instant `t`.
pub fn month_of(t: Ms) -> Option<Span> {
    let dt = DateTime::<Utc>::from_timestamp_millis(t)?;
    month(dt.year(), dt.month())
}

/// Timestamp from integer milliseconds or an RFC 3339 string. A bare
/// `YYYY-MM-DDTHH:MM[:SS]` without offset is taken as UTC.
pub fn parse_timestamp(s: &str) -> Option<Ms> {
    let s = s.trim();
    if let Ok(ms) = s.parse::<Ms>() {
        return Some(ms);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&naive).timestamp_millis());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive).timestamp_millis())
}

/// `YYYY-MM-DD HH:MM` (UTC) for messages; falls back to the raw number.
pub fn format_timestamp(t: Ms) -> String {
    DateTime::<Utc>::from_timestamp_millis(t)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| t.to_string())
}
