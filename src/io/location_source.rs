//! External location feed
//!
//! The feed answers a GET with the driver's last reported position, either
//! wrapped as `{"data": {"driver": {"location": {...}}}}` or as a bare
//! `{latitude, longitude, time}` object. Non-2xx responses and payloads
//! without coordinates are fetch failures.

use crate::domain::Fix;
use anyhow::Context;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Deserialize)]
struct LocationPayload {
    latitude: f64,
    longitude: f64,
    /// Source-side report time; informational only
    #[serde(default)]
    time: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct DriverPayload {
    location: LocationPayload,
}

#[derive(Debug, Deserialize)]
struct DataPayload {
    driver: DriverPayload,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LocationResponse {
    Wrapped { data: DataPayload },
    Bare(LocationPayload),
}

/// Parse a feed response into a fix stamped with the receive time
pub fn parse_location(body: &[u8], received_at: f64) -> anyhow::Result<Fix> {
    let response: LocationResponse =
        serde_json::from_slice(body).context("Malformed location payload")?;
    let location = match response {
        LocationResponse::Wrapped { data } => data.driver.location,
        LocationResponse::Bare(location) => location,
    };
    if let Some(time) = &location.time {
        debug!(reported = %time, "location_report_time");
    }
    let fix = Fix::new(location.latitude, location.longitude, received_at);
    fix.validate()?;
    Ok(fix)
}

pub struct LocationSource {
    client: reqwest::Client,
    url: String,
}

impl LocationSource {
    pub fn new(url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build location client")?;
        Ok(Self { client, url: url.to_string() })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fetch the current position, stamped with `received_at`
    pub async fn fetch(&self, received_at: f64) -> anyhow::Result<Fix> {
        let response = self
            .client
            .get(&self.url)
            .header("Accept", "application/json")
            .send()
            .await
            .context("Location request failed")?
            .error_for_status()
            .context("Location source returned an error status")?;
        let body = response.bytes().await.context("Failed to read location body")?;
        parse_location(&body, received_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::testing::serve_once;

    #[test]
    fn test_parse_wrapped_payload() {
        let body = br#"{"data":{"driver":{"location":{"latitude":32.3,"longitude":-86.3,"time":"2025-10-01T12:00:00Z"}}}}"#;
        let fix = parse_location(body, 1000.0).unwrap();
        assert_eq!(fix, Fix::new(32.3, -86.3, 1000.0));
    }

    #[test]
    fn test_parse_bare_payload() {
        let body = br#"{"latitude":32.3,"longitude":-86.3}"#;
        assert_eq!(parse_location(body, 5.0).unwrap(), Fix::new(32.3, -86.3, 5.0));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(parse_location(b"not json", 0.0).is_err());
        assert!(parse_location(br#"{"data":{"driver":{}}}"#, 0.0).is_err());
        assert!(parse_location(br#"{"latitude":"north","longitude":1.0}"#, 0.0).is_err());
        assert!(parse_location(br#"{"latitude":123.0,"longitude":1.0}"#, 0.0).is_err());
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let url = serve_once("200 OK", r#"{"latitude":30.5,"longitude":-90.25}"#.to_string()).await;
        let source = LocationSource::new(&url, Duration::from_secs(5)).unwrap();
        let fix = source.fetch(42.0).await.unwrap();
        assert_eq!(fix, Fix::new(30.5, -90.25, 42.0));
    }

    #[tokio::test]
    async fn test_fetch_error_status() {
        let url = serve_once("503 Service Unavailable", "{}".to_string()).await;
        let source = LocationSource::new(&url, Duration::from_secs(5)).unwrap();
        assert!(source.fetch(0.0).await.is_err());
    }
}
