//! Shared types for the truck tracker

use crate::domain::geo::haversine_miles;
use anyhow::bail;
use serde::{Deserialize, Serialize};

/// Position used when nothing has been restored yet (Montgomery, AL)
pub const DEFAULT_LATITUDE: f64 = 32.32177734375;
pub const DEFAULT_LONGITUDE: f64 = -86.33056640625;

/// A bare coordinate pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

impl Position {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    #[inline]
    pub fn distance_to(&self, other: &Position) -> f64 {
        haversine_miles(self.latitude, self.longitude, other.latitude, other.longitude)
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.4},{:.4}", self.latitude, self.longitude)
    }
}

/// A single GPS observation. Timestamp is epoch seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fix {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: f64,
}

impl Fix {
    pub fn new(latitude: f64, longitude: f64, timestamp: f64) -> Self {
        Self { latitude, longitude, timestamp }
    }

    pub fn position(&self) -> Position {
        Position::new(self.latitude, self.longitude)
    }

    /// Great-circle distance to another fix in miles
    #[inline]
    pub fn distance_to(&self, other: &Fix) -> f64 {
        haversine_miles(self.latitude, self.longitude, other.latitude, other.longitude)
    }

    /// Reject coordinates that cannot come from a real receiver
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.latitude.is_finite() || !self.longitude.is_finite() || !self.timestamp.is_finite()
        {
            bail!("non-finite fix {:?}", self);
        }
        if !(-90.0..=90.0).contains(&self.latitude) || !(-180.0..=180.0).contains(&self.longitude) {
            bail!("coordinates out of range: {},{}", self.latitude, self.longitude);
        }
        Ok(())
    }
}

/// Start/end location of a day. Older stored records carry no timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
}

impl Waypoint {
    pub fn position(&self) -> Position {
        Position::new(self.latitude, self.longitude)
    }

    /// Waypoint without a timestamp (legacy aggregate layout)
    pub fn at(position: Position) -> Self {
        Self { latitude: position.latitude, longitude: position.longitude, timestamp: None }
    }
}

impl From<Fix> for Waypoint {
    fn from(fix: Fix) -> Self {
        Self { latitude: fix.latitude, longitude: fix.longitude, timestamp: Some(fix.timestamp) }
    }
}

/// Live state of the tracked vehicle
#[derive(Debug, Clone, PartialEq)]
pub struct DriverState {
    pub latitude: f64,
    pub longitude: f64,
    pub last_updated: f64,
    /// Display speed in mph
    pub speed: f64,
    /// Start of a confirmed stop; None while moving or not yet confirmed
    pub stopped_since: Option<f64>,
    /// Position of the previous ingest, used for per-fix change detection
    pub last_position: Option<Position>,
}

impl DriverState {
    pub fn at(latitude: f64, longitude: f64, last_updated: f64) -> Self {
        Self { latitude, longitude, last_updated, speed: 0.0, stopped_since: None, last_position: None }
    }

    pub fn position(&self) -> Position {
        Position::new(self.latitude, self.longitude)
    }
}

/// Movement classification over the trailing window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementStatus {
    Moving,
    Stopped,
    Unknown,
}

impl MovementStatus {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementStatus::Moving => "moving",
            MovementStatus::Stopped => "stopped",
            MovementStatus::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for MovementStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status plus the approximate time the current state began
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MovementReading {
    pub status: MovementStatus,
    pub since: Option<f64>,
}

impl MovementReading {
    pub fn unknown() -> Self {
        Self { status: MovementStatus::Unknown, since: None }
    }
}

/// Point of the visualized journey polyline
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct JourneyPoint {
    pub lat: f64,
    pub lng: f64,
    pub timestamp: f64,
}

impl From<&Fix> for JourneyPoint {
    fn from(fix: &Fix) -> Self {
        Self { lat: fix.latitude, lng: fix.longitude, timestamp: fix.timestamp }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fix_validate() {
        assert!(Fix::new(32.3, -86.3, 1.0).validate().is_ok());
        assert!(Fix::new(f64::NAN, -86.3, 1.0).validate().is_err());
        assert!(Fix::new(32.3, f64::INFINITY, 1.0).validate().is_err());
        assert!(Fix::new(91.0, 0.0, 1.0).validate().is_err());
        assert!(Fix::new(0.0, -181.0, 1.0).validate().is_err());
    }

    #[test]
    fn test_waypoint_serialization_omits_missing_timestamp() {
        let legacy = Waypoint::at(Position::new(1.0, 2.0));
        let json = serde_json::to_value(legacy).unwrap();
        assert!(json.get("timestamp").is_none());

        let stamped = Waypoint::from(Fix::new(1.0, 2.0, 3.0));
        let json = serde_json::to_value(stamped).unwrap();
        assert_eq!(json["timestamp"], 3.0);
    }

    #[test]
    fn test_movement_status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&MovementStatus::Moving).unwrap(), "\"moving\"");
        assert_eq!(MovementStatus::Unknown.to_string(), "unknown");
    }
}
