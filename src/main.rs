//! Truck tracker - live position, movement and daily mileage for one vehicle
//!
//! Polls an external location feed, folds each fix into rolling history and
//! per-day records, and serves a JSON snapshot over HTTP.
//!
//! Module structure:
//! - `domain/` - Core types (Fix, DriverState, DailyRecord)
//! - `io/` - External interfaces (location feed, routing, persistence, HTTP)
//! - `services/` - Business logic (Tracker, MovementClassifier, Journey, Poller)
//! - `infra/` - Infrastructure (Config)

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;
use truck_tracker::domain::time::epoch_secs;
use truck_tracker::domain::Position;
use truck_tracker::infra::Config;
use truck_tracker::io::{LocationSource, Persistence, RoutingClient};
use truck_tracker::services::{JourneyAggregator, Poller, SnapshotBuilder, Tracker};

/// Truck tracker - vehicle location and mileage service
#[derive(Parser, Debug)]
#[command(name = "truck-tracker", version, about)]
struct Args {
    /// Path to TOML configuration file (default: $CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Default: INFO, use RUST_LOG=debug for per-fix detail
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(git_hash = %env!("GIT_HASH"), "truck-tracker starting");

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => Config::load_from_path(path),
        None => Config::load(&std::env::args().collect::<Vec<_>>()),
    };

    info!(
        config_file = %config.config_file(),
        source_url = %config.source_url(),
        poll_interval_secs = %config.poll_interval_secs(),
        routing_base_url = %config.routing_base_url(),
        destination = ?config.destination(),
        data_dir = %config.data_dir(),
        journey_start_date = %config.journey_start_date(),
        server_port = %config.server_port(),
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Restore state from the previous run; storage access blocks
    let restore_config = config.clone();
    let tracker = tokio::task::spawn_blocking(move || {
        let store = Arc::new(Persistence::from_config(&restore_config));
        let tracker = Arc::new(Tracker::restore(restore_config.movement(), store, epoch_secs()));
        if let Err(e) = tracker.initialize_days(epoch_secs()) {
            warn!(error = %format!("{:#}", e), "day_initialization_failed");
        }
        tracker
    })
    .await?;

    let destination = config.destination().map(|(lat, lng)| Position::new(lat, lng));
    let routing = match RoutingClient::new(
        config.routing_base_url(),
        Duration::from_secs(config.routing_timeout_secs()),
        config.road_factor(),
        destination,
    ) {
        Ok(routing) => Some(routing),
        Err(e) => {
            warn!(error = %format!("{:#}", e), "routing_disabled");
            None
        }
    };
    let journey = JourneyAggregator::new(config.journey_start_date(), config.journey_max_points());
    let builder = Arc::new(SnapshotBuilder::new(tracker.clone(), journey, routing));

    // Start snapshot HTTP server (if port > 0)
    let server_port = config.server_port();
    if server_port > 0 {
        let api_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) =
                truck_tracker::io::api::start_api_server(server_port, builder, api_shutdown).await
            {
                tracing::error!(error = %e, "API server error");
            }
        });
    }

    // Handle shutdown on Ctrl+C
    let shutdown_signal = shutdown_tx;
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_signal.send(true);
    });

    // Run poller - fetches and ingests until shutdown
    let source = LocationSource::new(
        config.source_url(),
        Duration::from_secs(config.source_timeout_secs()),
    )?;
    let poller = Poller::new(source, tracker, Duration::from_secs(config.poll_interval_secs().max(1)));
    info!("poller_starting");
    poller.run(shutdown_rx).await;

    info!("truck-tracker shutdown complete");
    Ok(())
}
