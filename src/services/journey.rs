//! Long-horizon journey views
//!
//! Builds the simplified polyline shown on the map and the averages measured
//! from the configured journey start date.

use crate::domain::daily::{DailyRecord, LegacyStats};
use crate::domain::{Fix, JourneyPoint, Position};
use chrono::NaiveDate;
use std::fmt;
use tracing::debug;

/// First journey point is dropped when this close to the synthetic start
const DUPLICATE_START_MILES: f64 = 1.0;

/// Start of a recorded day
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DayStart {
    pub date: NaiveDate,
    pub timestamp: f64,
    pub position: Position,
}

/// Day starts known from the legacy aggregates and the given records
pub fn day_starts<'a>(
    legacy: &LegacyStats,
    records: impl IntoIterator<Item = &'a DailyRecord>,
) -> Vec<DayStart> {
    let mut starts: Vec<DayStart> = legacy
        .iter()
        .filter_map(|(date, stats)| {
            let location = stats.start_location?;
            (stats.start_time > 0.0).then(|| DayStart {
                date: *date,
                timestamp: stats.start_time,
                position: location.position(),
            })
        })
        .collect();
    starts.extend(records.into_iter().filter_map(|record| {
        let location = record.start_location?;
        (record.start_time > 0.0).then(|| DayStart {
            date: record.date,
            timestamp: record.start_time,
            position: location.position(),
        })
    }));
    starts
}

/// Journey averages since the start date
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JourneyAverage {
    Available { mph: f64, miles_per_day: f64, hours_per_day: f64 },
    Unavailable,
}

impl fmt::Display for JourneyAverage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JourneyAverage::Available { mph, miles_per_day, hours_per_day } => write!(
                f,
                "{:.0} mph ({:.0}mi/{:.1}h daily)",
                mph, miles_per_day, hours_per_day
            ),
            JourneyAverage::Unavailable => f.write_str("N/A"),
        }
    }
}

/// Yesterday's totals
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreviousDay {
    pub date: NaiveDate,
    pub distance_miles: f64,
    /// Span between the record's start and its last sample
    pub travel_time_hours: f64,
}

impl PreviousDay {
    pub fn from_record(record: &DailyRecord) -> Self {
        Self {
            date: record.date,
            distance_miles: record.total_distance_miles,
            travel_time_hours: record.span_hours(),
        }
    }

    /// `MM/DD (Xh, Ymi)`, or a placeholder without a record
    pub fn describe(previous: Option<&PreviousDay>) -> String {
        match previous {
            Some(day) => format!(
                "{} ({}h, {}mi)",
                day.date.format("%m/%d"),
                day.travel_time_hours.round() as i64,
                day.distance_miles.round() as i64
            ),
            None => "No recent travel".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct JourneyAggregator {
    start_date: NaiveDate,
    max_points: usize,
}

impl JourneyAggregator {
    pub fn new(start_date: NaiveDate, max_points: usize) -> Self {
        Self { start_date, max_points: max_points.max(1) }
    }

    pub fn start_date(&self) -> NaiveDate {
        self.start_date
    }

    /// Down-sampled polyline, led by the earliest day start older than any fix
    pub fn build_journey_history(&self, fixes: &[Fix], starts: &[DayStart], now: f64) -> Vec<JourneyPoint> {
        let mut sorted = fixes.to_vec();
        sorted.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));

        let earliest_fix_time = sorted.first().map_or(now, |f| f.timestamp);
        let earliest_start = starts
            .iter()
            .filter(|s| s.timestamp < earliest_fix_time)
            .min_by(|a, b| a.timestamp.total_cmp(&b.timestamp));

        let mut journey = Vec::with_capacity(self.max_points + 2);
        if let Some(start) = earliest_start {
            journey.push(JourneyPoint {
                lat: start.position.latitude,
                lng: start.position.longitude,
                timestamp: start.timestamp,
            });
        }

        let stride = sorted.len().div_ceil(self.max_points).max(1);
        let skip_first = match (earliest_start, sorted.first()) {
            (Some(start), Some(first)) => start.position.distance_to(&first.position()) < DUPLICATE_START_MILES,
            _ => false,
        };
        let from = if skip_first { stride } else { 0 };
        journey.extend(sorted.iter().skip(from).step_by(stride).map(JourneyPoint::from));

        if let Some(last) = sorted.last() {
            if journey.last().map_or(true, |p| p.timestamp != last.timestamp) {
                journey.push(JourneyPoint::from(last));
            }
        }

        debug!(
            fixes = %sorted.len(),
            stride = %stride,
            points = %journey.len(),
            from_day_start = %earliest_start.map(|s| s.date.to_string()).unwrap_or_default(),
            "journey_history_built"
        );
        journey
    }

    /// Straight-line distance from the start date's start location to `current`,
    /// over legacy travel time recorded on or after the start date.
    pub fn journey_average(
        &self,
        start_record: Option<&DailyRecord>,
        current: Position,
        legacy: &LegacyStats,
        today: NaiveDate,
    ) -> JourneyAverage {
        let Some(start) = start_record.and_then(|r| r.start_location) else {
            return JourneyAverage::Unavailable;
        };

        let days_elapsed = (today - self.start_date).num_days() + 1;
        let total_hours: f64 = legacy
            .range(self.start_date..)
            .map(|(_, stats)| stats.total_travel_time / 3600.0)
            .sum();
        if total_hours <= 0.0 || days_elapsed <= 0 {
            return JourneyAverage::Unavailable;
        }

        let distance = start.position().distance_to(&current);
        let days = days_elapsed as f64;
        JourneyAverage::Available {
            mph: distance / total_hours,
            miles_per_day: distance / days,
            hours_per_day: total_hours / days,
        }
    }
}
