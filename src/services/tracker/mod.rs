//! Vehicle state tracking and fix ingestion
//!
//! The Tracker owns all mutable tracking state behind a single lock:
//! - Driver state (position, display speed, confirmed stop)
//! - The rolling history window
//! - Legacy per-day aggregates
//! - The active day's minute-series record
//!
//! Persistence is never performed while the lock is held. Ingest collects
//! `PendingWrite`s under the lock and applies them after release.

mod ingest;

pub use ingest::IngestOutcome;

use crate::domain::daily::{DailyRecord, LegacyStats};
use crate::domain::time::local_date;
use crate::domain::types::{DEFAULT_LATITUDE, DEFAULT_LONGITUDE};
use crate::domain::{DriverState, Fix, MovementReading};
use crate::infra::config::MovementConfig;
use crate::io::store::Persistence;
use crate::services::history::HistoryStore;
use crate::services::movement::MovementClassifier;
use chrono::NaiveDate;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

/// Everything guarded by the tracker lock
pub(crate) struct TrackerState {
    pub(crate) driver: DriverState,
    pub(crate) history: HistoryStore,
    pub(crate) legacy: LegacyStats,
    /// Record of the newest local date seen
    pub(crate) day: Option<DailyRecord>,
    /// Location saved before the last restart; consumed by the first successful ingest
    pub(crate) startup_reference: Option<Fix>,
}

/// Copy-on-read view of the tracking state
#[derive(Debug, Clone)]
pub struct TrackerView {
    pub driver: DriverState,
    pub history: HistoryStore,
    pub legacy: LegacyStats,
    pub day: Option<DailyRecord>,
}

/// Shared tracking context for the poller and the serving side
pub struct Tracker {
    pub(crate) classifier: MovementClassifier,
    pub(crate) store: Arc<Persistence>,
    pub(crate) state: Mutex<TrackerState>,
}

impl Tracker {
    /// Empty tracker at the default position
    pub fn new(config: MovementConfig, store: Arc<Persistence>, now: f64) -> Self {
        let history = HistoryStore::new(config.movement_window_secs, config.flush_every);
        let state = TrackerState {
            driver: DriverState::at(DEFAULT_LATITUDE, DEFAULT_LONGITUDE, now),
            history,
            legacy: LegacyStats::new(),
            day: None,
            startup_reference: None,
        };
        Self { classifier: MovementClassifier::new(config), store, state: Mutex::new(state) }
    }

    /// Restore history, legacy aggregates and the last saved location from storage
    pub fn restore(config: MovementConfig, store: Arc<Persistence>, now: f64) -> Self {
        let mut history = HistoryStore::from_fixes(
            store.load_history(),
            config.movement_window_secs,
            config.flush_every,
        );
        let trimmed = history.trim(now, config.history_window_hours);
        let legacy = store.load_daily_stats();
        let startup_reference = store.load_last_location();

        let driver = match history.latest() {
            Some(fix) => DriverState::at(fix.latitude, fix.longitude, fix.timestamp),
            None => DriverState::at(DEFAULT_LATITUDE, DEFAULT_LONGITUDE, now),
        };

        info!(
            history_points = %history.len(),
            trimmed = %trimmed,
            legacy_days = %legacy.len(),
            last_saved = %startup_reference.map(|f| f.timestamp.to_string()).unwrap_or_else(|| "none".into()),
            position = %driver.position(),
            "tracker_restored"
        );

        let state = TrackerState { driver, history, legacy, day: None, startup_reference };
        Self { classifier: MovementClassifier::new(config), store, state: Mutex::new(state) }
    }

    /// Startup day bookkeeping: fill in yesterday's distance if it was never
    /// computed, and make sure today's record exists.
    pub fn initialize_days(&self, now: f64) -> anyhow::Result<()> {
        let today = local_date(now)?;
        if let Some(record) = self.previous_day(today) {
            debug!(date = %record.date, miles = %format!("{:.1}", record.total_distance_miles), "previous_day_checked");
        }

        let record = self.current_day(now)?;
        info!(date = %record.date, start = %record.start_location.map(|w| w.position().to_string()).unwrap_or_default(), "today_initialized");
        Ok(())
    }

    /// Today's record, created at the driver's current position on first access
    pub fn current_day(&self, now: f64) -> anyhow::Result<DailyRecord> {
        let today = local_date(now)?;
        let position = {
            let state = self.state.lock();
            if let Some(day) = state.day.as_ref().filter(|d| d.date == today) {
                return Ok(day.clone());
            }
            state.driver.position()
        };

        let record = match self.store.load_daily(today) {
            Some(record) => record,
            None => {
                let record = DailyRecord::new(
                    today,
                    Fix::new(position.latitude, position.longitude, now),
                );
                self.store.store_daily(&record);
                info!(date = %today, start = %position, "daily_record_created");
                record
            }
        };

        let mut state = self.state.lock();
        match state.day.as_ref() {
            // An ingest installed the record while storage was being read
            Some(day) if day.date == today => Ok(day.clone()),
            Some(day) if day.date > today => Ok(record),
            _ => {
                state.day = Some(record.clone());
                Ok(record)
            }
        }
    }

    /// Yesterday's record, with its distance recomputed and saved if it was never filled in
    pub fn previous_day(&self, today: NaiveDate) -> Option<DailyRecord> {
        let yesterday = today.pred_opt()?;
        let mut record = self.store.load_daily(yesterday)?;
        if record.total_distance_miles == 0.0 {
            let miles = record.path_distance_miles();
            // A day with no path stays at zero without a rewrite
            if miles != 0.0 {
                record.total_distance_miles = miles;
                self.store.store_daily(&record);
                info!(date = %yesterday, miles = %format!("{:.1}", miles), "previous_day_distance_computed");
            }
        }
        Some(record)
    }

    /// Persisted record for any date
    pub fn day_record(&self, date: NaiveDate) -> Option<DailyRecord> {
        self.store.load_daily(date)
    }

    pub fn view(&self) -> TrackerView {
        let state = self.state.lock();
        TrackerView {
            driver: state.driver.clone(),
            history: state.history.clone(),
            legacy: state.legacy.clone(),
            day: state.day.clone(),
        }
    }

    pub fn driver(&self) -> DriverState {
        self.state.lock().driver.clone()
    }

    pub fn movement_status(&self, now: f64) -> MovementReading {
        let state = self.state.lock();
        self.classifier.movement_status(&state.history, now)
    }

    pub fn classifier(&self) -> &MovementClassifier {
        &self.classifier
    }
}
