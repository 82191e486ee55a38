//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `store` - Key/value persistence (Redis cache, JSON file store)
//! - `location_source` - HTTP client for the driver location feed
//! - `routing` - OSRM client for road distance and ETA
//! - `api` - HTTP endpoint serving the location snapshot

pub mod api;
pub mod location_source;
pub mod routing;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use location_source::LocationSource;
pub use routing::RoutingClient;
pub use store::{FileStore, KeyValueStore, Persistence, StoreKey};
