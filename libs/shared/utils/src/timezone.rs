//! Clinic timezone handling.
//!
//! All appointment slots are authored and displayed in one fixed civil
//! timezone (UTC+5:30) but persisted as absolute UTC instants. Storing the
//! local midnight as an instant keeps "appointments on day D" queryable as a
//! contiguous range no matter what timezone the server or database runs in.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use thiserror::Error;

/// Offset of the clinic's civil timezone from UTC, in minutes.
pub const CLINIC_OFFSET_MINUTES: i32 = 330;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeError {
    #[error("Invalid calendar date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),

    #[error("Invalid clock time '{0}', expected HH:mm")]
    InvalidTime(String),
}

fn clinic_offset() -> FixedOffset {
    FixedOffset::east_opt(CLINIC_OFFSET_MINUTES * 60).unwrap()
}

/// Absolute instant of 00:00 clinic time on the given `YYYY-MM-DD` day.
pub fn civil_midnight(date: &str) -> Result<DateTime<Utc>, TimeError> {
    let day = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|_| TimeError::InvalidDate(date.to_string()))?;
    let local = day.and_hms_opt(0, 0, 0).unwrap();
    let midnight = clinic_offset()
        .from_local_datetime(&local)
        .single()
        .ok_or_else(|| TimeError::InvalidDate(date.to_string()))?;
    Ok(midnight.with_timezone(&Utc))
}

/// Half-open `[midnight, midnight + 24h)` interval covering the given local
/// calendar day.
pub fn civil_day_bounds(date: &str) -> Result<(DateTime<Utc>, DateTime<Utc>), TimeError> {
    let start = civil_midnight(date)?;
    Ok((start, start + Duration::hours(24)))
}

/// Strict `HH:mm` parser. Rejects single-digit hours and anything carrying
/// seconds, matching the wire format of slot times.
pub fn parse_clock_time(time: &str) -> Result<NaiveTime, TimeError> {
    let bytes = time.as_bytes();
    if bytes.len() != 5 || bytes[2] != b':' {
        return Err(TimeError::InvalidTime(time.to_string()));
    }
    NaiveTime::parse_from_str(time, "%H:%M").map_err(|_| TimeError::InvalidTime(time.to_string()))
}

/// Combine a stored local-midnight instant with a local `HH:mm` clock time
/// into the absolute instant of that moment.
pub fn local_date_time(day_instant: DateTime<Utc>, time: &str) -> Result<DateTime<Utc>, TimeError> {
    let clock = parse_clock_time(time)?;
    let local_day = day_instant.with_timezone(&clinic_offset()).date_naive();
    let instant = clinic_offset()
        .from_local_datetime(&local_day.and_time(clock))
        .single()
        .ok_or_else(|| TimeError::InvalidTime(time.to_string()))?;
    Ok(instant.with_timezone(&Utc))
}

/// Bounds of the current local calendar day. Recomputed from the wall clock
/// on every call.
pub fn today_bounds() -> (DateTime<Utc>, DateTime<Utc>) {
    today_bounds_at(Utc::now())
}

/// Bounds of the local calendar day containing `now`.
pub fn today_bounds_at(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let local_day = now.with_timezone(&clinic_offset()).date_naive();
    let local = local_day.and_hms_opt(0, 0, 0).unwrap();
    let start = clinic_offset()
        .from_local_datetime(&local)
        .unwrap()
        .with_timezone(&Utc);
    (start, start + Duration::hours(24))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn civil_midnight_is_previous_evening_utc() {
        // 2025-06-01 00:00 IST == 2025-05-31 18:30 UTC
        let midnight = civil_midnight("2025-06-01").unwrap();
        assert_eq!(midnight.to_rfc3339(), "2025-05-31T18:30:00+00:00");
    }

    #[test]
    fn civil_midnight_rejects_garbage() {
        assert_eq!(
            civil_midnight("not-a-date"),
            Err(TimeError::InvalidDate("not-a-date".to_string()))
        );
        assert!(civil_midnight("2025-13-45").is_err());
        assert!(civil_midnight("").is_err());
    }

    #[test]
    fn day_bounds_are_half_open_24h() {
        let (start, end) = civil_day_bounds("2025-06-01").unwrap();
        assert_eq!(end - start, Duration::hours(24));
        assert_eq!(start, civil_midnight("2025-06-01").unwrap());
        assert_eq!(end, civil_midnight("2025-06-02").unwrap());
    }

    #[test]
    fn local_date_time_round_trips_through_fixed_offset() {
        // A human in the clinic timezone calls this "2025-06-01 10:00 local",
        // which is 04:30 UTC.
        let midnight = civil_midnight("2025-06-01").unwrap();
        let instant = local_date_time(midnight, "10:00").unwrap();
        assert_eq!(instant.to_rfc3339(), "2025-06-01T04:30:00+00:00");
    }

    #[test]
    fn clock_time_must_be_hh_mm() {
        assert!(parse_clock_time("09:30").is_ok());
        assert_eq!(
            parse_clock_time("9:30"),
            Err(TimeError::InvalidTime("9:30".to_string()))
        );
        assert!(parse_clock_time("09:30:00").is_err());
        assert!(parse_clock_time("25:00").is_err());
        assert!(parse_clock_time("10:61").is_err());
    }

    #[test]
    fn today_bounds_contain_now() {
        let now = Utc::now();
        let (start, end) = today_bounds_at(now);
        assert!(start <= now && now < end);
        assert_eq!(end - start, Duration::hours(24));
    }

    #[test]
    fn today_bounds_track_the_local_day_not_the_utc_day() {
        // 2025-05-31 19:00 UTC is already 2025-06-01 00:30 in the clinic
        // timezone, so the local day starts at 18:30 UTC the same evening.
        let now = "2025-05-31T19:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let (start, _) = today_bounds_at(now);
        assert_eq!(start, civil_midnight("2025-06-01").unwrap());
    }
}
