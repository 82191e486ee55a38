//! Periodic poll of the location feed
//!
//! Each tick fetches one fix and hands it to the tracker. A failed fetch
//! leaves the previous state in place until the next tick.

use crate::domain::time::epoch_secs;
use crate::io::location_source::LocationSource;
use crate::services::tracker::{IngestOutcome, Tracker};
use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

pub struct Poller {
    source: LocationSource,
    tracker: Arc<Tracker>,
    interval: Duration,
}

impl Poller {
    pub fn new(source: LocationSource, tracker: Arc<Tracker>, interval: Duration) -> Self {
        Self { source, tracker, interval }
    }

    /// Fetch and ingest one fix stamped with `now`. None when the fetch failed.
    pub async fn poll_once(&self, now: f64) -> Option<IngestOutcome> {
        let fix = match self.source.fetch(now).await {
            Ok(fix) => fix,
            Err(e) => {
                warn!(url = %self.source.url(), error = %format!("{:#}", e), "fetch_failed");
                return None;
            }
        };

        let tracker = self.tracker.clone();
        let outcome = match tokio::task::spawn_blocking(move || tracker.ingest(fix))
            .await
            .context("Ingest task panicked")
        {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %format!("{:#}", e), "ingest_task_failed");
                return None;
            }
        };

        if !outcome.success {
            warn!(lat = %fix.latitude, lng = %fix.longitude, "poll_ingest_failed");
        } else if outcome.moved {
            info!(
                lat = %fix.latitude,
                lng = %fix.longitude,
                moved_miles = %format!("{:.3}", outcome.distance_moved_miles),
                speed_mph = %format!("{:.1}", outcome.speed_mph),
                "driver_moved"
            );
        } else {
            debug!(lat = %fix.latitude, lng = %fix.longitude, "driver_stationary");
        }
        Some(outcome)
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            url = %self.source.url(),
            interval_secs = %self.interval.as_secs(),
            "poller_started"
        );

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("poller_shutdown");
                        return;
                    }
                }
                _ = ticker.tick() => {
                    self.poll_once(epoch_secs()).await;
                }
            }
        }
    }
}
