//! Road distance and ETA via an OSRM-compatible routing service
//!
//! When the service is unreachable or answers without a route, road distance
//! falls back to straight-line distance times a road factor and no ETA is given.

use crate::domain::geo::METERS_PER_MILE;
use crate::domain::Position;
use anyhow::{bail, Context};
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Deserialize)]
struct OsrmRoute {
    /// Meters
    distance: f64,
    /// Seconds
    duration: f64,
}

/// OSRM returns `routes`; simpler services answer with top-level totals
#[derive(Debug, Deserialize)]
struct RouteResponse {
    #[serde(default)]
    routes: Vec<OsrmRoute>,
    #[serde(default)]
    distance: Option<f64>,
    #[serde(default)]
    duration: Option<f64>,
}

/// A routed leg
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RouteEstimate {
    pub distance_miles: f64,
    pub duration_hours: f64,
}

fn parse_route(body: &[u8]) -> anyhow::Result<RouteEstimate> {
    let response: RouteResponse = serde_json::from_slice(body).context("Malformed routing response")?;
    let (meters, seconds) = match response.routes.first() {
        Some(route) => (route.distance, route.duration),
        None => match (response.distance, response.duration) {
            (Some(distance), Some(duration)) => (distance, duration),
            _ => bail!("Routing response has no routes"),
        },
    };
    if !meters.is_finite() || !seconds.is_finite() || meters < 0.0 || seconds < 0.0 {
        bail!("Routing response has invalid totals");
    }
    Ok(RouteEstimate { distance_miles: meters / METERS_PER_MILE, duration_hours: seconds / 3600.0 })
}

/// Road distance, with travel time when it came from the routing service
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoadRoute {
    pub miles: f64,
    pub hours: Option<f64>,
}

/// Remaining distance to the configured destination
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DestinationEstimate {
    pub road_miles: f64,
    pub eta_hours: Option<f64>,
    /// Epoch seconds
    pub eta_utc: Option<i64>,
}

pub struct RoutingClient {
    client: reqwest::Client,
    base_url: String,
    road_factor: f64,
    destination: Option<Position>,
}

impl RoutingClient {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        road_factor: f64,
        destination: Option<Position>,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build routing client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            road_factor,
            destination,
        })
    }

    pub fn destination(&self) -> Option<Position> {
        self.destination
    }

    pub fn route_url(&self, from: Position, to: Position) -> String {
        format!(
            "{}/route/v1/driving/{},{};{},{}?overview=false&alternatives=false&steps=false",
            self.base_url, from.longitude, from.latitude, to.longitude, to.latitude
        )
    }

    pub async fn route(&self, from: Position, to: Position) -> anyhow::Result<RouteEstimate> {
        let response = self
            .client
            .get(self.route_url(from, to))
            .send()
            .await
            .context("Routing request failed")?
            .error_for_status()
            .context("Routing service returned an error status")?;
        let body = response.bytes().await.context("Failed to read routing body")?;
        parse_route(&body)
    }

    /// Straight-line distance scaled to approximate roads
    pub fn fallback_miles(&self, from: Position, to: Position) -> f64 {
        from.distance_to(&to) * self.road_factor
    }

    pub async fn road_route(&self, from: Position, to: Position) -> RoadRoute {
        match self.route(from, to).await {
            Ok(estimate) => RoadRoute { miles: estimate.distance_miles, hours: Some(estimate.duration_hours) },
            Err(e) => {
                warn!(error = %format!("{:#}", e), "routing_unavailable");
                RoadRoute { miles: self.fallback_miles(from, to), hours: None }
            }
        }
    }

    /// Road distance and ETA to the destination; None when no destination is configured
    pub async fn destination_estimate(&self, from: Position, now: f64) -> Option<DestinationEstimate> {
        let destination = self.destination?;
        let route = self.road_route(from, destination).await;
        Some(DestinationEstimate {
            road_miles: route.miles,
            eta_hours: route.hours,
            eta_utc: route.hours.map(|hours| (now + hours * 3600.0) as i64),
        })
    }
}
