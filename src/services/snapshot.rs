//! Serving snapshot assembly
//!
//! The snapshot is assembled from a copy of the tracker state at wall-clock
//! time. Assembly may read storage, so it runs on the blocking pool; the
//! routing estimate is awaited afterwards.

use crate::domain::daily::DailyRecord;
use crate::domain::time::local_date;
use crate::domain::{Fix, JourneyPoint, MovementStatus, Position, Waypoint};
use crate::io::routing::RoutingClient;
use crate::services::history::HistoryStore;
use crate::services::journey::{day_starts, JourneyAggregator, JourneyAverage, PreviousDay};
use crate::services::tracker::Tracker;
use anyhow::Context;
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

/// JSON record served to the dashboard. Miles, mph, epoch seconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationSnapshot {
    pub latitude: f64,
    pub longitude: f64,
    pub last_updated: f64,
    pub speed: i64,
    pub avg_speed_10min: i64,
    pub avg_speed_30min: i64,
    pub avg_speed_1hour: i64,
    pub movement_status: MovementStatus,
    pub status_timestamp: Option<f64>,
    pub stopped_duration_seconds: u64,
    pub today_mileage: f64,
    pub daily_travel_time_hours: f64,
    pub daily_road_distance: f64,
    pub osrm_road_distance: Option<f64>,
    pub daily_straight_distance: f64,
    pub daily_start_location: Option<Waypoint>,
    pub daily_end_location: Option<Waypoint>,
    pub first_movement_time: Option<f64>,
    pub last_movement_time: Option<f64>,
    pub actual_day_duration_hours: f64,
    pub previous_travel: String,
    pub journey_average: String,
    pub journey_history: Vec<JourneyPoint>,
    pub stopped_since: Option<f64>,
    pub eta_utc: Option<i64>,
    pub eta_hours: Option<f64>,
}

#[inline]
fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Today's minute samples merged with the raw history window, one per timestamp
fn journey_fixes(day: Option<&DailyRecord>, history: &HistoryStore) -> Vec<Fix> {
    let mut fixes: Vec<Fix> = day
        .map(|d| {
            d.minute_locations
                .iter()
                .map(|m| Fix::new(m.latitude, m.longitude, m.timestamp))
                .collect()
        })
        .unwrap_or_default();
    fixes.extend(history.fixes());
    fixes.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
    fixes.dedup_by(|a, b| a.timestamp == b.timestamp);
    fixes
}

/// Everything except the routing estimate
pub fn assemble(tracker: &Tracker, journey: &JourneyAggregator, now: f64) -> LocationSnapshot {
    let today_record = match tracker.current_day(now) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!(error = %e, "current_day_unavailable");
            None
        }
    };
    let today = today_record.as_ref().map(|r| r.date).or_else(|| local_date(now).ok());

    let view = tracker.view();
    let classifier = tracker.classifier();
    let driver = &view.driver;
    let history = &view.history;

    let reading = classifier.movement_status(history, now);
    let stopped_duration = classifier.stopped_duration(history, now);

    let previous = today
        .and_then(|d| tracker.previous_day(d))
        .map(|record| PreviousDay::from_record(&record));

    let start_record = match &today_record {
        Some(record) if record.date == journey.start_date() => Some(record.clone()),
        _ => tracker.day_record(journey.start_date()),
    };
    let current = today_record
        .as_ref()
        .and_then(|r| r.end_location)
        .map_or(driver.position(), |w| w.position());
    let journey_average = match today {
        Some(d) => journey.journey_average(start_record.as_ref(), current, &view.legacy, d),
        None => JourneyAverage::Unavailable,
    };

    let starts = day_starts(&view.legacy, start_record.iter().chain(today_record.iter()));
    let journey_history =
        journey.build_journey_history(&journey_fixes(today_record.as_ref(), history), &starts, now);

    let today_distance = today_record.as_ref().map_or(0.0, |r| r.total_distance_miles);
    let day_hours = today_record.as_ref().map_or(0.0, |r| r.span_hours());
    let straight = today_record
        .as_ref()
        .and_then(|r| r.start_location)
        .map_or(0.0, |start| start.position().distance_to(&driver.position()));

    LocationSnapshot {
        latitude: driver.latitude,
        longitude: driver.longitude,
        last_updated: driver.last_updated,
        speed: driver.speed.round() as i64,
        avg_speed_10min: classifier.average_moving_speed(history, now, 10.0).round() as i64,
        avg_speed_30min: classifier.average_moving_speed(history, now, 30.0).round() as i64,
        avg_speed_1hour: classifier.average_moving_speed(history, now, 60.0).round() as i64,
        movement_status: reading.status,
        status_timestamp: reading.since,
        stopped_duration_seconds: stopped_duration,
        today_mileage: round1(today_distance),
        daily_travel_time_hours: round1(day_hours),
        daily_road_distance: round1(today_distance),
        osrm_road_distance: None,
        daily_straight_distance: round1(straight),
        daily_start_location: today_record.as_ref().and_then(|r| r.start_location),
        daily_end_location: today_record.as_ref().and_then(|r| r.end_location),
        first_movement_time: today_record.as_ref().and_then(|r| r.summary.first_movement_time),
        last_movement_time: today_record.as_ref().and_then(|r| r.summary.last_movement_time),
        actual_day_duration_hours: round1(day_hours),
        previous_travel: PreviousDay::describe(previous.as_ref()),
        journey_average: journey_average.to_string(),
        journey_history,
        stopped_since: driver.stopped_since,
        eta_utc: None,
        eta_hours: None,
    }
}

/// Builds snapshots for the HTTP endpoint
pub struct SnapshotBuilder {
    tracker: Arc<Tracker>,
    journey: JourneyAggregator,
    routing: Option<RoutingClient>,
}

impl SnapshotBuilder {
    pub fn new(tracker: Arc<Tracker>, journey: JourneyAggregator, routing: Option<RoutingClient>) -> Self {
        Self { tracker, journey, routing }
    }

    pub async fn build(&self, now: f64) -> anyhow::Result<LocationSnapshot> {
        let tracker = self.tracker.clone();
        let journey = self.journey;
        let mut snapshot = tokio::task::spawn_blocking(move || assemble(&tracker, &journey, now))
            .await
            .context("Snapshot assembly panicked")?;

        if let Some(routing) = &self.routing {
            let from = Position::new(snapshot.latitude, snapshot.longitude);
            if let Some(estimate) = routing.destination_estimate(from, now).await {
                snapshot.osrm_road_distance = Some(round1(estimate.road_miles));
                snapshot.eta_hours = estimate.eta_hours.map(round1);
                snapshot.eta_utc = estimate.eta_utc;
            }
        }
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::geo::EARTH_RADIUS_MILES;
    use crate::domain::time::day_start;
    use crate::infra::config::MovementConfig;
    use crate::io::store::{FileStore, Persistence};
    use chrono::NaiveDate;
    use tempfile::{tempdir, TempDir};

    const MILES_PER_DEGREE_LAT: f64 = EARTH_RADIUS_MILES * std::f64::consts::PI / 180.0;

    fn north(miles: f64, ts: f64) -> Fix {
        Fix::new(32.0 + miles / MILES_PER_DEGREE_LAT, -86.0, ts)
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn noon() -> f64 {
        day_start(date(2025, 10, 1)).unwrap() + 12.0 * 3600.0
    }

    fn tracker(now: f64) -> (Arc<Tracker>, TempDir) {
        let dir = tempdir().unwrap();
        let store = Arc::new(Persistence::new(None, FileStore::new(dir.path())));
        (Arc::new(Tracker::new(MovementConfig::default(), store, now)), dir)
    }

    #[test]
    fn test_assemble_while_moving() {
        let t0 = noon();
        let (tracker, _dir) = tracker(t0);
        // 30 mph for five minutes
        for i in 0..=5 {
            tracker.ingest(north(0.5 * i as f64, t0 + 60.0 * i as f64));
        }
        let now = t0 + 300.0;
        let journey = JourneyAggregator::new(date(2025, 9, 15), 50);
        let snapshot = assemble(&tracker, &journey, now);

        assert_eq!(snapshot.speed, 30);
        assert_eq!(snapshot.avg_speed_10min, 30);
        assert_eq!(snapshot.movement_status, MovementStatus::Moving);
        assert_eq!(snapshot.stopped_duration_seconds, 0);
        assert_eq!(snapshot.stopped_since, None);
        // The first fix is not a moving sample, so the minute path starts at 0.5 mi
        assert_eq!(snapshot.today_mileage, 2.0);
        assert_eq!(snapshot.daily_road_distance, 2.0);
        assert_eq!(snapshot.first_movement_time, Some(t0 + 60.0));
        assert_eq!(snapshot.last_movement_time, Some(now));
        assert_eq!(snapshot.previous_travel, "No recent travel");
        assert_eq!(snapshot.journey_average, "N/A");
        assert_eq!(snapshot.journey_history.len(), 6);
        assert_eq!(snapshot.journey_history.last().map(|p| p.timestamp), Some(now));
        assert_eq!(snapshot.daily_straight_distance, 2.5);
    }

    #[test]
    fn test_assemble_without_fixes() {
        let t0 = noon();
        let (tracker, _dir) = tracker(t0);
        let journey = JourneyAggregator::new(date(2025, 9, 15), 50);
        let snapshot = assemble(&tracker, &journey, t0);

        assert_eq!(snapshot.movement_status, MovementStatus::Unknown);
        assert_eq!(snapshot.status_timestamp, None);
        assert_eq!(snapshot.speed, 0);
        assert_eq!(snapshot.today_mileage, 0.0);
        assert!(snapshot.daily_start_location.is_some());
        assert!(snapshot.journey_history.is_empty());
    }

    #[test]
    fn test_journey_average_from_start_day() {
        let t0 = noon();
        let (tracker, _dir) = tracker(t0);
        // The journey starts today
        for i in 0..=2 {
            tracker.ingest(north(0.5 * i as f64, t0 + 60.0 * i as f64));
        }
        let journey = JourneyAggregator::new(date(2025, 10, 1), 50);
        let snapshot = assemble(&tracker, &journey, t0 + 120.0);
        // One mile from the day's start with one credited minute of travel
        assert_eq!(snapshot.journey_average, "60 mph (1mi/0.0h daily)");
    }

    #[test]
    fn test_snapshot_serializes_all_fields() {
        let t0 = noon();
        let (tracker, _dir) = tracker(t0);
        tracker.ingest(north(0.0, t0));
        let journey = JourneyAggregator::new(date(2025, 9, 15), 50);
        let json = serde_json::to_value(assemble(&tracker, &journey, t0)).unwrap();
        for key in [
            "latitude",
            "longitude",
            "last_updated",
            "speed",
            "avg_speed_10min",
            "avg_speed_30min",
            "avg_speed_1hour",
            "movement_status",
            "status_timestamp",
            "stopped_duration_seconds",
            "today_mileage",
            "daily_travel_time_hours",
            "daily_road_distance",
            "osrm_road_distance",
            "daily_straight_distance",
            "daily_start_location",
            "daily_end_location",
            "first_movement_time",
            "last_movement_time",
            "actual_day_duration_hours",
            "previous_travel",
            "journey_average",
            "journey_history",
            "stopped_since",
            "eta_utc",
            "eta_hours",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        assert_eq!(json["movement_status"], "unknown");
        assert!(json["eta_utc"].is_null());
    }

    #[tokio::test]
    async fn test_build_falls_back_without_routing_service() {
        let t0 = noon();
        let (tracker, _dir) = tracker(t0);
        tracker.ingest(north(0.0, t0));
        let routing = RoutingClient::new(
            "http://127.0.0.1:9",
            std::time::Duration::from_secs(2),
            1.3,
            Some(crate::domain::Position::new(33.0, -86.0)),
        )
        .unwrap();
        let builder = SnapshotBuilder::new(tracker, JourneyAggregator::new(date(2025, 9, 15), 50), Some(routing));
        let snapshot = builder.build(t0).await.unwrap();

        assert_eq!(snapshot.eta_hours, None);
        assert_eq!(snapshot.eta_utc, None);
        let road = snapshot.osrm_road_distance.unwrap();
        // One degree of latitude, scaled by the road factor
        assert!((road - 89.8).abs() < 0.2);
    }
}
