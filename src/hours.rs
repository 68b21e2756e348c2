//! Clock-time parsing and the hour math used for crew time rows.
//!
//! The portal UI submits wall-clock times as `HH:MM` strings, occasionally
//! with AM/PM markers depending on the device locale. Everything here works
//! in whole minutes and only converts to fractional hours at the end.

use chrono::{Local, NaiveDate};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimeError {
    #[error("invalid time '{0}': expected HH:MM")]
    InvalidTime(String),
    #[error("invalid date '{0}': expected YYYY-MM-DD")]
    InvalidDate(String),
}

/// Parse a wall-clock time into minutes since midnight.
///
/// Accepts 24-hour `HH:MM` as well as `H:MM AM`/`H:MMPM` variants.
pub fn parse_minutes(input: &str) -> Result<u32, TimeError> {
    let trimmed = input.trim();
    let upper = trimmed.to_ascii_uppercase();

    let (clock, meridiem) = if let Some(rest) = upper.strip_suffix("AM") {
        (rest.trim_end().to_string(), Some(false))
    } else if let Some(rest) = upper.strip_suffix("PM") {
        (rest.trim_end().to_string(), Some(true))
    } else {
        (upper, None)
    };

    let (h, m) = clock
        .split_once(':')
        .ok_or_else(|| TimeError::InvalidTime(input.to_string()))?;
    let hour: u32 = h
        .trim()
        .parse()
        .map_err(|_| TimeError::InvalidTime(input.to_string()))?;
    let minute: u32 = m
        .trim()
        .parse()
        .map_err(|_| TimeError::InvalidTime(input.to_string()))?;
    if minute > 59 {
        return Err(TimeError::InvalidTime(input.to_string()));
    }

    let hour = match meridiem {
        None => {
            if hour > 23 {
                return Err(TimeError::InvalidTime(input.to_string()));
            }
            hour
        }
        Some(pm) => {
            if hour == 0 || hour > 12 {
                return Err(TimeError::InvalidTime(input.to_string()));
            }
            match (pm, hour) {
                (false, 12) => 0,
                (false, h) => h,
                (true, 12) => 12,
                (true, h) => h + 12,
            }
        }
    };

    Ok(hour * 60 + minute)
}

/// Normalize any accepted time input to 24-hour `HH:MM`.
pub fn normalize_hhmm(input: &str) -> Result<String, TimeError> {
    let minutes = parse_minutes(input)?;
    Ok(format!("{:02}:{:02}", minutes / 60, minutes % 60))
}

/// Worked hours for one crew row: `(end - start) - lunch`, floored at zero
/// and rounded to two decimals. The lunch span only counts when both marks
/// are present.
pub fn compute_hours(
    start: &str,
    end: &str,
    lunch_start: Option<&str>,
    lunch_end: Option<&str>,
) -> Result<f64, TimeError> {
    let start_min = parse_minutes(start)? as i64;
    let end_min = parse_minutes(end)? as i64;

    let lunch_min = match (
        lunch_start.filter(|s| !s.trim().is_empty()),
        lunch_end.filter(|s| !s.trim().is_empty()),
    ) {
        (Some(ls), Some(le)) => {
            (parse_minutes(le)? as i64 - parse_minutes(ls)? as i64).max(0)
        }
        _ => 0,
    };

    let worked = (end_min - start_min - lunch_min).max(0);
    Ok(round2(worked as f64 / 60.0))
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Format a date + time for the CRM as `YYYY-MM-DDTHH:MM:SS±HH:MM`.
///
/// The offset is the process-local UTC offset looked up per call, so a
/// daylight-saving transition between two sync attempts produces the offset
/// in force at format time.
pub fn crm_datetime(date: &str, time: &str) -> Result<String, TimeError> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|_| TimeError::InvalidDate(date.to_string()))?;
    let clock = normalize_hhmm(time)?;
    let offset = *Local::now().offset();
    Ok(format!("{date}T{clock}:00{offset}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_24_hour_times() {
        assert_eq!(parse_minutes("09:00").unwrap(), 540);
        assert_eq!(parse_minutes("00:00").unwrap(), 0);
        assert_eq!(parse_minutes("23:59").unwrap(), 1439);
    }

    #[test]
    fn parses_meridiem_times() {
        assert_eq!(normalize_hhmm("5:06 PM").unwrap(), "17:06");
        assert_eq!(normalize_hhmm("12:00 AM").unwrap(), "00:00");
        assert_eq!(normalize_hhmm("12:30PM").unwrap(), "12:30");
        assert_eq!(normalize_hhmm("7:15 am").unwrap(), "07:15");
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_minutes("25:00").is_err());
        assert!(parse_minutes("09:60").is_err());
        assert!(parse_minutes("13:00 PM").is_err());
        assert!(parse_minutes("breakfast").is_err());
    }

    #[test]
    fn computes_hours_with_lunch() {
        let h = compute_hours("09:00", "17:00", Some("12:00"), Some("12:30")).unwrap();
        assert_eq!(h, 7.5);
    }

    #[test]
    fn computes_hours_without_lunch() {
        let h = compute_hours("09:00", "17:00", Some(""), Some("")).unwrap();
        assert_eq!(h, 8.0);
        let h = compute_hours("09:00", "17:00", None, None).unwrap();
        assert_eq!(h, 8.0);
    }

    #[test]
    fn negative_spans_floor_at_zero() {
        let h = compute_hours("10:00", "09:00", None, None).unwrap();
        assert_eq!(h, 0.0);
        // Inverted lunch marks contribute nothing rather than adding time.
        let h = compute_hours("09:00", "17:00", Some("13:00"), Some("12:00")).unwrap();
        assert_eq!(h, 8.0);
    }

    #[test]
    fn lunch_needs_both_marks() {
        let h = compute_hours("09:00", "17:00", Some("12:00"), None).unwrap();
        assert_eq!(h, 8.0);
    }

    #[test]
    fn crm_datetime_shape() {
        let s = crm_datetime("2026-01-21", "5:06 PM").unwrap();
        assert!(s.starts_with("2026-01-21T17:06:00"));
        let offset = &s["2026-01-21T17:06:00".len()..];
        assert_eq!(offset.len(), 6);
        assert!(offset.starts_with('+') || offset.starts_with('-'));
        assert_eq!(&offset[3..4], ":");
    }

    #[test]
    fn crm_datetime_rejects_bad_date() {
        assert!(crm_datetime("01/21/2026", "09:00").is_err());
    }
}
