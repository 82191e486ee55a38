//! Epoch and local-calendar helpers
//!
//! Day boundaries follow the host's local timezone ("today" is a local date).

use anyhow::{anyhow, Context};
use chrono::{Local, NaiveDate, TimeZone};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current time as fractional epoch seconds
#[inline]
pub fn epoch_secs() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}

/// Local calendar date containing the given epoch timestamp
pub fn local_date(ts: f64) -> anyhow::Result<NaiveDate> {
    if !ts.is_finite() {
        return Err(anyhow!("non-finite timestamp {ts}"));
    }
    let secs = ts.floor() as i64;
    let nanos = ((ts - ts.floor()) * 1e9) as u32;
    Local
        .timestamp_opt(secs, nanos)
        .single()
        .map(|dt| dt.date_naive())
        .with_context(|| format!("timestamp {ts} out of range"))
}

/// Epoch seconds of local midnight starting `date`
pub fn day_start(date: NaiveDate) -> anyhow::Result<f64> {
    let midnight = date.and_hms_opt(0, 0, 0).context("invalid midnight")?;
    Local
        .from_local_datetime(&midnight)
        .earliest()
        .map(|dt| dt.timestamp() as f64)
        .with_context(|| format!("local midnight of {date} does not exist"))
}

/// Minute-of-day index of `ts` relative to local midnight of `date`
pub fn minute_of_day(date: NaiveDate, ts: f64) -> anyhow::Result<u32> {
    let offset = ts - day_start(date)?;
    if offset < 0.0 {
        return Err(anyhow!("timestamp {ts} precedes {date}"));
    }
    Ok((offset / 60.0).floor() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_date_round_trips_midnight() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 10).unwrap();
        let start = day_start(date).unwrap();
        assert_eq!(local_date(start).unwrap(), date);
        assert_eq!(local_date(start + 1.0).unwrap(), date);
        assert_eq!(local_date(start - 1.0).unwrap(), date.pred_opt().unwrap());
    }

    #[test]
    fn test_minute_of_day() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 10).unwrap();
        let start = day_start(date).unwrap();
        assert_eq!(minute_of_day(date, start).unwrap(), 0);
        assert_eq!(minute_of_day(date, start + 59.9).unwrap(), 0);
        assert_eq!(minute_of_day(date, start + 61.0).unwrap(), 1);
        assert_eq!(minute_of_day(date, start + 3600.0 * 13.0).unwrap(), 780);
        assert!(minute_of_day(date, start - 10.0).is_err());
    }

    #[test]
    fn test_rejects_nan() {
        assert!(local_date(f64::NAN).is_err());
    }
}
