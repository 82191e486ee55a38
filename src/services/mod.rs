//! Services - business logic and state management
//!
//! This module contains the core business logic services:
//! - `tracker` - Fix ingestion and shared tracking state
//! - `history` - Rolling window of recent fixes
//! - `movement` - Speed and moving/stopped classification
//! - `journey` - Multi-day journey history and averages
//! - `snapshot` - Serving-side snapshot assembly
//! - `poller` - Periodic fetch of the location feed

pub mod history;
pub mod journey;
pub mod movement;
pub mod poller;
pub mod snapshot;
pub mod tracker;

// Re-export commonly used types
pub use journey::JourneyAggregator;
pub use movement::MovementClassifier;
pub use poller::Poller;
pub use snapshot::{LocationSnapshot, SnapshotBuilder};
pub use tracker::{IngestOutcome, Tracker};
