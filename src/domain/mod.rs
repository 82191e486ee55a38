//! Domain models - core tracking types and per-day records
//!
//! This module contains the canonical data types used throughout the system:
//! - `Fix` - a single GPS observation
//! - `DriverState` - live state of the tracked vehicle
//! - `DailyRecord` / `LegacyDailyStats` - per-day aggregates
//! - `geo` - haversine distance
//! - `time` - epoch and local-calendar helpers

pub mod daily;
pub mod geo;
pub mod time;
pub mod types;

// Re-export commonly used types at module level
pub use daily::{DailyRecord, LegacyDailyStats, LegacyStats};
pub use types::{DriverState, Fix, JourneyPoint, MovementReading, MovementStatus, Position, Waypoint};
