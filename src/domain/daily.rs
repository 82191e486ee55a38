//! Per-day travel records
//!
//! Two aggregates are kept per calendar day:
//! - `DailyRecord` - minute-granularity samples, stored under `daily:{date}`
//! - `LegacyDailyStats` - scalar per-segment totals, stored in the `daily_stats` map
//!
//! Both are derived from the same fix stream. Distance is integrated differently
//! (minute samples vs accepted segments); travel time has a single accrual that
//! both records expose.

use crate::domain::time::{day_start, minute_of_day};
use crate::domain::types::{Fix, Position, Waypoint};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Speed (mph) above which an old-schema sample is considered moving
const LEGACY_SAMPLE_MOVING_MPH: f64 = 1.0;

/// One sample per minute-of-day
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MinuteLocation {
    pub minute: u32,
    pub timestamp: f64,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub speed: f64,
    #[serde(default)]
    pub moving: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailySummary {
    #[serde(default)]
    pub first_movement_time: Option<f64>,
    #[serde(default)]
    pub last_movement_time: Option<f64>,
    #[serde(default)]
    pub moving_time_seconds: f64,
    #[serde(default)]
    pub stopped_time_seconds: f64,
}

/// Minute-series record for one local calendar day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyRecord {
    pub date: NaiveDate,
    #[serde(default)]
    pub start_time: f64,
    #[serde(default)]
    pub end_time: Option<f64>,
    #[serde(default)]
    pub start_location: Option<Waypoint>,
    #[serde(default)]
    pub end_location: Option<Waypoint>,
    #[serde(default)]
    pub total_distance_miles: f64,
    #[serde(default)]
    pub total_travel_time_seconds: f64,
    #[serde(default)]
    pub minute_locations: Vec<MinuteLocation>,
    #[serde(default)]
    pub summary: DailySummary,
}

impl DailyRecord {
    /// Fresh record whose start is the given fix
    pub fn new(date: NaiveDate, start: Fix) -> Self {
        Self {
            date,
            start_time: start.timestamp,
            end_time: None,
            start_location: Some(start.into()),
            end_location: None,
            total_distance_miles: 0.0,
            total_travel_time_seconds: 0.0,
            minute_locations: Vec::new(),
            summary: DailySummary::default(),
        }
    }

    /// Record a per-minute sample.
    ///
    /// Only moving samples are kept, and a sample identical to the newest stored
    /// one is ignored. A later sample in an already-filled minute overwrites it;
    /// an older one is dropped. The end point never moves backwards.
    /// Returns whether the record changed.
    pub fn record_sample(&mut self, fix: &Fix, speed: f64, moving: bool) -> anyhow::Result<bool> {
        if !moving {
            return Ok(false);
        }

        if let Some(last) = self.minute_locations.last() {
            if last.latitude == fix.latitude
                && last.longitude == fix.longitude
                && last.timestamp == fix.timestamp
            {
                return Ok(false);
            }
        }

        let minute = minute_of_day(self.date, fix.timestamp)?;
        let sample = MinuteLocation {
            minute,
            timestamp: fix.timestamp,
            latitude: fix.latitude,
            longitude: fix.longitude,
            speed,
            moving,
        };

        match self.minute_locations.binary_search_by_key(&minute, |m| m.minute) {
            Ok(idx) if self.minute_locations[idx].timestamp > fix.timestamp => return Ok(false),
            Ok(idx) => self.minute_locations[idx] = sample,
            Err(idx) => self.minute_locations.insert(idx, sample),
        }

        if self.end_time.map_or(true, |end| fix.timestamp >= end) {
            self.end_location = Some((*fix).into());
            self.end_time = Some(fix.timestamp);
        }
        Ok(true)
    }

    /// Path length along the stored minute samples
    pub fn path_distance_miles(&self) -> f64 {
        self.minute_locations
            .windows(2)
            .map(|w| {
                Position::new(w[0].latitude, w[0].longitude)
                    .distance_to(&Position::new(w[1].latitude, w[1].longitude))
            })
            .sum()
    }

    pub fn recompute_distance(&mut self) {
        self.total_distance_miles = self.path_distance_miles();
    }

    pub fn note_movement(&mut self, ts: f64) {
        let summary = &mut self.summary;
        summary.first_movement_time = Some(summary.first_movement_time.map_or(ts, |first| first.min(ts)));
        summary.last_movement_time = Some(summary.last_movement_time.map_or(ts, |last| last.max(ts)));
    }

    /// Mirror the day's accrued travel seconds and derive stopped time from elapsed
    pub fn set_travel_time(&mut self, travel_seconds: f64, now: f64) {
        self.total_travel_time_seconds = travel_seconds;
        self.summary.moving_time_seconds = travel_seconds;
        let elapsed = (now - self.start_time).max(0.0);
        self.summary.stopped_time_seconds = (elapsed - travel_seconds).max(0.0);
    }

    /// Hours between start and the last recorded sample
    pub fn span_hours(&self) -> f64 {
        match self.end_time {
            Some(end) if self.start_time > 0.0 => ((end - self.start_time) / 3600.0).max(0.0),
            _ => 0.0,
        }
    }
}

/// Scalar per-day aggregate, accumulated segment by segment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LegacyDailyStats {
    #[serde(default)]
    pub total_miles: f64,
    #[serde(default)]
    pub start_time: f64,
    #[serde(default)]
    pub start_location: Option<Waypoint>,
    #[serde(default)]
    pub end_location: Option<Waypoint>,
    #[serde(default)]
    pub first_movement_time: Option<f64>,
    #[serde(default)]
    pub last_movement_time: Option<f64>,
    #[serde(default)]
    pub total_travel_time: f64,
    #[serde(default)]
    pub last_update_time: f64,
    /// Base timestamp of the running travel-time accrual
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_movement_update: Option<f64>,
}

/// All legacy aggregates keyed by local date
pub type LegacyStats = BTreeMap<NaiveDate, LegacyDailyStats>;

impl LegacyDailyStats {
    pub fn new(now: f64) -> Self {
        Self { start_time: now, last_update_time: now, ..Default::default() }
    }

    /// Add an accepted segment ending at `position`
    pub fn add_segment(&mut self, miles: f64, now: f64, position: Position) {
        self.total_miles += miles;
        self.last_update_time = now;
        self.last_movement_time = Some(now);
        self.end_location = Some(Waypoint::at(position));
    }

    /// Set the day's start location once. Returns true when it was set.
    pub fn set_start_if_unset(&mut self, position: Position, now: f64) -> bool {
        if self.start_location.is_some() {
            return false;
        }
        self.start_location = Some(Waypoint::at(position));
        self.first_movement_time = Some(now);
        true
    }

    /// Accrue travel time for a fix. A non-moving fix drops the accrual base,
    /// so the next moving fix only starts a new one. Returns seconds added.
    pub fn accrue_travel(&mut self, now: f64, moving: bool) -> f64 {
        if !moving {
            self.last_movement_update = None;
            return 0.0;
        }
        let added = match self.last_movement_update {
            Some(base) if now > base => now - base,
            _ => 0.0,
        };
        self.total_travel_time += added;
        // Late fixes never move the base backwards
        self.last_movement_update = Some(self.last_movement_update.map_or(now, |base| base.max(now)));
        added
    }
}

/// Sample layout of the old per-day schema
#[derive(Debug, Deserialize)]
struct OldMinuteSample {
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    speed: f64,
}

/// Old per-day schema: samples keyed by epoch-seconds strings
#[derive(Debug, Deserialize)]
struct OldDailyRecord {
    #[serde(default)]
    start_time: Option<f64>,
    #[serde(default)]
    end_time: Option<f64>,
    #[serde(default)]
    start_location: Option<Waypoint>,
    #[serde(default)]
    end_location: Option<Waypoint>,
    #[serde(default)]
    total_miles: f64,
    #[serde(default)]
    total_travel_time: f64,
    #[serde(default)]
    samples_by_minute: BTreeMap<String, OldMinuteSample>,
}

/// True when a stored value uses the old `samples_by_minute` schema
pub fn is_old_schema(value: &Value) -> bool {
    value.get("samples_by_minute").is_some() && value.get("minute_locations").is_none()
}

/// Parse a stored daily value, upcasting the old schema when needed.
///
/// Returns the record and whether a migration happened. Migrating an already
/// current value is a plain parse, so applying this twice equals applying it once.
pub fn upcast_daily(date: NaiveDate, value: Value) -> anyhow::Result<(DailyRecord, bool)> {
    if !is_old_schema(&value) {
        let mut value = value;
        // Records written before the date field existed
        if let Value::Object(map) = &mut value {
            map.entry("date").or_insert_with(|| Value::String(date.to_string()));
        }
        return Ok((serde_json::from_value(value)?, false));
    }

    let old: OldDailyRecord = serde_json::from_value(value)?;
    let midnight = day_start(date)?;
    let start_time = old.start_time.unwrap_or(midnight);

    let mut by_minute: BTreeMap<u32, MinuteLocation> = BTreeMap::new();
    for (key, sample) in old.samples_by_minute {
        let Ok(ts) = key.parse::<f64>() else {
            continue;
        };
        if ts < midnight {
            continue;
        }
        let minute = ((ts - midnight) / 60.0).floor() as u32;
        let entry = MinuteLocation {
            minute,
            timestamp: ts,
            latitude: sample.latitude,
            longitude: sample.longitude,
            speed: sample.speed,
            moving: sample.speed > LEGACY_SAMPLE_MOVING_MPH,
        };
        match by_minute.get(&minute) {
            Some(existing) if existing.timestamp >= ts => {}
            _ => {
                by_minute.insert(minute, entry);
            }
        }
    }

    let record = DailyRecord {
        date,
        start_time,
        end_time: old.end_time,
        start_location: old.start_location,
        end_location: old.end_location,
        total_distance_miles: old.total_miles,
        total_travel_time_seconds: old.total_travel_time,
        minute_locations: by_minute.into_values().collect(),
        summary: DailySummary::default(),
    };
    Ok((record, true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 10).unwrap()
    }

    fn midnight() -> f64 {
        day_start(date()).unwrap()
    }

    #[test]
    fn test_record_sample_ignores_stationary() {
        let t0 = midnight() + 3600.0;
        let mut record = DailyRecord::new(date(), Fix::new(32.0, -86.0, t0));
        let changed = record.record_sample(&Fix::new(32.01, -86.0, t0 + 60.0), 0.0, false).unwrap();
        assert!(!changed);
        assert!(record.minute_locations.is_empty());
        assert!(record.end_location.is_none());
    }

    #[test]
    fn test_record_sample_overwrites_same_minute() {
        let t0 = midnight() + 3600.0;
        let mut record = DailyRecord::new(date(), Fix::new(32.0, -86.0, t0));
        record.record_sample(&Fix::new(32.01, -86.0, t0 + 5.0), 30.0, true).unwrap();
        record.record_sample(&Fix::new(32.02, -86.0, t0 + 50.0), 35.0, true).unwrap();

        assert_eq!(record.minute_locations.len(), 1);
        assert_eq!(record.minute_locations[0].minute, 60);
        assert_eq!(record.minute_locations[0].latitude, 32.02);
        assert_eq!(record.end_time, Some(t0 + 50.0));
    }

    #[test]
    fn test_record_sample_keeps_minute_order() {
        let t0 = midnight() + 7200.0;
        let mut record = DailyRecord::new(date(), Fix::new(32.0, -86.0, t0));
        record.record_sample(&Fix::new(32.03, -86.0, t0 + 180.0), 30.0, true).unwrap();
        record.record_sample(&Fix::new(32.01, -86.0, t0 + 60.0), 30.0, true).unwrap();
        record.record_sample(&Fix::new(32.02, -86.0, t0 + 120.0), 30.0, true).unwrap();

        let minutes: Vec<u32> = record.minute_locations.iter().map(|m| m.minute).collect();
        assert_eq!(minutes, vec![121, 122, 123]);
        // Late samples fill gaps without pulling the end point back
        assert_eq!(record.end_time, Some(t0 + 180.0));
        assert_eq!(record.end_location.map(|w| w.latitude), Some(32.03));
    }

    #[test]
    fn test_record_sample_keeps_newer_sample_in_minute() {
        let t0 = midnight() + 3600.0;
        let mut record = DailyRecord::new(date(), Fix::new(32.0, -86.0, t0));
        record.record_sample(&Fix::new(32.02, -86.0, t0 + 50.0), 35.0, true).unwrap();
        let changed = record.record_sample(&Fix::new(32.01, -86.0, t0 + 5.0), 30.0, true).unwrap();

        assert!(!changed);
        assert_eq!(record.minute_locations.len(), 1);
        assert_eq!(record.minute_locations[0].latitude, 32.02);
    }

    #[test]
    fn test_note_movement_spans_out_of_order_times() {
        let t0 = midnight() + 3600.0;
        let mut record = DailyRecord::new(date(), Fix::new(32.0, -86.0, t0));
        record.note_movement(t0 + 120.0);
        record.note_movement(t0 + 60.0);
        record.note_movement(t0 + 90.0);
        assert_eq!(record.summary.first_movement_time, Some(t0 + 60.0));
        assert_eq!(record.summary.last_movement_time, Some(t0 + 120.0));
    }

    #[test]
    fn test_record_sample_skips_exact_duplicate() {
        let t0 = midnight() + 3600.0;
        let fix = Fix::new(32.01, -86.0, t0 + 60.0);
        let mut record = DailyRecord::new(date(), Fix::new(32.0, -86.0, t0));
        assert!(record.record_sample(&fix, 30.0, true).unwrap());
        assert!(!record.record_sample(&fix, 31.0, true).unwrap());
        assert_eq!(record.minute_locations[0].speed, 30.0);
    }

    #[test]
    fn test_path_distance() {
        let t0 = midnight() + 3600.0;
        let mut record = DailyRecord::new(date(), Fix::new(32.0, -86.0, t0));
        record.record_sample(&Fix::new(32.0, -86.0, t0 + 60.0), 30.0, true).unwrap();
        record.record_sample(&Fix::new(33.0, -86.0, t0 + 120.0), 30.0, true).unwrap();
        record.recompute_distance();
        assert!((record.total_distance_miles - 69.0975).abs() < 0.01);
    }

    #[test]
    fn test_legacy_start_is_sticky() {
        let mut stats = LegacyDailyStats::new(100.0);
        assert!(stats.set_start_if_unset(Position::new(1.0, 1.0), 100.0));
        assert!(!stats.set_start_if_unset(Position::new(2.0, 2.0), 200.0));
        assert_eq!(stats.start_location.unwrap().latitude, 1.0);
        assert_eq!(stats.first_movement_time, Some(100.0));
    }

    #[test]
    fn test_accrue_travel_breaks_on_stop() {
        let mut stats = LegacyDailyStats::new(0.0);
        assert_eq!(stats.accrue_travel(60.0, true), 0.0);
        assert_eq!(stats.accrue_travel(120.0, true), 60.0);
        assert_eq!(stats.accrue_travel(180.0, false), 0.0);
        // Fresh base after the stop: nothing credited for 120..240
        assert_eq!(stats.accrue_travel(240.0, true), 0.0);
        assert_eq!(stats.accrue_travel(300.0, true), 60.0);
        assert_eq!(stats.total_travel_time, 120.0);
    }

    #[test]
    fn test_legacy_stats_map_round_trip() {
        let mut stats = LegacyStats::new();
        stats.insert(date(), LegacyDailyStats::new(5.0));
        let json = serde_json::to_string(&stats).unwrap();
        assert!(json.contains("\"2025-06-10\""));
        let back: LegacyStats = serde_json::from_str(&json).unwrap();
        assert_eq!(back, stats);
    }

    fn old_record() -> Value {
        let m = midnight();
        let mut samples = serde_json::Map::new();
        samples.insert(
            format!("{}", (m + 3720.0) as i64),
            json!({"latitude": 32.05, "longitude": -86.0, "speed": 40.0}),
        );
        samples.insert(
            format!("{}", (m + 3660.0) as i64),
            json!({"latitude": 32.02, "longitude": -86.0, "speed": 0.5}),
        );
        samples.insert("garbage".to_string(), json!({"latitude": 0.0, "longitude": 0.0}));
        json!({
            "date": "2025-06-10",
            "start_time": m + 3600.0,
            "end_time": m + 3900.0,
            "start_location": {"latitude": 32.0, "longitude": -86.0},
            "end_location": {"latitude": 32.1, "longitude": -86.0},
            "total_miles": 7.5,
            "total_travel_time": 300,
            "samples_by_minute": Value::Object(samples)
        })
    }

    #[test]
    fn test_upcast_old_schema() {
        let (record, migrated) = upcast_daily(date(), old_record()).unwrap();
        assert!(migrated);
        assert_eq!(record.total_distance_miles, 7.5);
        assert_eq!(record.total_travel_time_seconds, 300.0);
        assert_eq!(record.minute_locations.len(), 2);
        assert_eq!(record.minute_locations[0].minute, 61);
        assert!(!record.minute_locations[0].moving);
        assert_eq!(record.minute_locations[1].minute, 62);
        assert!(record.minute_locations[1].moving);
    }

    #[test]
    fn test_upcast_is_idempotent() {
        let (once, _) = upcast_daily(date(), old_record()).unwrap();
        let once_value = serde_json::to_value(&once).unwrap();
        let (twice, migrated_again) = upcast_daily(date(), once_value.clone()).unwrap();
        assert!(!migrated_again);
        assert_eq!(twice, once);
        assert_eq!(serde_json::to_value(&twice).unwrap(), once_value);
    }

    #[test]
    fn test_current_schema_missing_fields_default() {
        let (record, migrated) =
            upcast_daily(date(), json!({"start_time": 10.0, "minute_locations": []})).unwrap();
        assert!(!migrated);
        assert_eq!(record.date, date());
        assert_eq!(record.total_distance_miles, 0.0);
        assert!(record.summary.first_movement_time.is_none());
    }
}
