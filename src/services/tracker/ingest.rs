//! Fix ingestion pipeline
//!
//! One fix runs through, in order: position-change detection, history
//! append/trim/flush, legacy segment aggregation, travel-time accrual,
//! the minute-series record, driver state, and the last-location write.
//! A failing step aborts the rest; writes already collected are still applied.
//!
//! A fix that is not newer than the newest in history only fills in history
//! and the minute series of its day. Exact duplicates are dropped.

use super::{Tracker, TrackerState};
use crate::domain::daily::{DailyRecord, LegacyDailyStats};
use crate::domain::time::local_date;
use crate::domain::{Fix, MovementStatus};
use crate::io::store::PendingWrite;
use crate::services::history::Placement;
use crate::services::movement::MovementClassifier;
use chrono::NaiveDate;
use tracing::{debug, error, info};

/// Result of ingesting one fix
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IngestOutcome {
    pub success: bool,
    /// Fix moved past the per-fix change threshold
    pub moved: bool,
    pub distance_moved_miles: f64,
    pub speed_mph: f64,
}

impl IngestOutcome {
    fn failed() -> Self {
        Self { success: false, moved: false, distance_moved_miles: 0.0, speed_mph: 0.0 }
    }
}

impl Tracker {
    /// Ingest one fix. The fix timestamp is the evaluation time for every step.
    pub fn ingest(&self, fix: Fix) -> IngestOutcome {
        if let Err(e) = fix.validate() {
            error!(error = %e, "fix_rejected");
            return IngestOutcome::failed();
        }
        let date = match local_date(fix.timestamp) {
            Ok(date) => date,
            Err(e) => {
                error!(error = %e, "fix_rejected");
                return IngestOutcome::failed();
            }
        };

        self.ingest_on(fix, date, self.stored_day_unless_active(date))
    }

    /// Ingest a validated fix for local `date`. `stored_day` is the storage
    /// lookup made before locking; None means `date` was the active day then.
    pub(super) fn ingest_on(
        &self,
        fix: Fix,
        date: NaiveDate,
        mut stored_day: Option<Option<DailyRecord>>,
    ) -> IngestOutcome {
        let mut writes = Vec::new();
        let result = loop {
            let mut state = self.state.lock();
            // The active day may have changed since storage was consulted
            let active = state.day.as_ref().is_some_and(|d| d.date == date);
            if !active && stored_day.is_none() {
                drop(state);
                stored_day = Some(self.store.load_daily(date));
                continue;
            }
            break state.apply_fix(&self.classifier, fix, date, stored_day.flatten(), &mut writes);
        };

        for write in &writes {
            self.store.apply(write);
        }

        match result {
            Ok(outcome) => {
                info!(
                    lat = %fix.latitude,
                    lng = %fix.longitude,
                    speed_mph = %format!("{:.1}", outcome.speed_mph),
                    moved = %outcome.moved,
                    moved_ft = %format!("{:.0}", outcome.distance_moved_miles * 5280.0),
                    "fix_ingested"
                );
                outcome
            }
            Err(e) => {
                error!(error = %e, writes_applied = %writes.len(), "ingest_failed");
                IngestOutcome::failed()
            }
        }
    }

    /// Stored record for `date`, read outside the lock. None when `date` is the active day.
    fn stored_day_unless_active(&self, date: NaiveDate) -> Option<Option<DailyRecord>> {
        let active = self.state.lock().day.as_ref().map(|d| d.date);
        if active == Some(date) {
            return None;
        }
        Some(self.store.load_daily(date))
    }
}

impl TrackerState {
    fn apply_fix(
        &mut self,
        classifier: &MovementClassifier,
        fix: Fix,
        date: NaiveDate,
        stored_day: Option<DailyRecord>,
        writes: &mut Vec<PendingWrite>,
    ) -> anyhow::Result<IngestOutcome> {
        let config = *classifier.config();
        let now = fix.timestamp;
        let position = fix.position();

        // History window
        let placement = self.history.append(fix);
        if placement == Placement::Duplicate {
            debug!(ts = %now, "duplicate_fix_ignored");
            return Ok(self.unchanged_outcome());
        }
        let newest = self.history.latest().map_or(now, |f| f.timestamp);
        let trimmed = self.history.trim(newest, config.history_window_hours);
        if trimmed > 0 {
            debug!(trimmed = %trimmed, remaining = %self.history.len(), "history_trimmed");
        }
        if let Some(fixes) = self.history.flush_if_due() {
            writes.push(PendingWrite::History(fixes));
        }

        let previous = match placement {
            Placement::Newest { previous } => previous,
            Placement::Late { previous } => return self.apply_late_fix(classifier, fix, previous, date, stored_day, writes),
            Placement::Duplicate => return Ok(self.unchanged_outcome()),
        };

        let (moved, distance_moved) = classifier.position_change(self.driver.last_position, position);

        // Legacy aggregate from the segment ending at this fix
        let mut legacy_changed = false;
        if let Some(prev) = previous {
            if let Some(segment_speed) = MovementClassifier::segment_speed(&prev, &fix) {
                let miles = prev.distance_to(&fix);
                if !classifier.is_realistic(segment_speed) {
                    debug!(speed_mph = %format!("{:.1}", segment_speed), "segment_rejected");
                } else if miles > config.min_segment_miles {
                    let stats = self.legacy.entry(date).or_insert_with(|| LegacyDailyStats::new(now));
                    stats.add_segment(miles, now, position);
                    if stats.set_start_if_unset(position, now) {
                        info!(date = %date, start = %position, "daily_start_set");
                    }
                    legacy_changed = true;
                }
            }
        }

        let moving = previous.is_some_and(|prev| classifier.is_moving_segment(&prev, &fix));
        let mut speed = classifier.display_speed(&self.history, now);

        let travel_seconds = match self.legacy.get_mut(&date) {
            Some(stats) => {
                stats.accrue_travel(now, moving);
                legacy_changed = true;
                stats.total_travel_time
            }
            None => 0.0,
        };
        if legacy_changed {
            writes.push(PendingWrite::DailyStats(self.legacy.clone()));
        }

        // Minute-series record
        let mut detached = None;
        let record = self.day_for_fix(fix, date, stored_day, &mut detached);
        if record.record_sample(&fix, speed, moving)? {
            record.recompute_distance();
        }
        if moving {
            record.note_movement(now);
        }
        record.set_travel_time(travel_seconds, now);
        writes.push(PendingWrite::Daily(record.clone()));

        // Driver state
        let reading = classifier.movement_status(&self.history, now);
        let stopped_since = match reading.status {
            MovementStatus::Stopped => {
                let stopped = classifier.stopped_duration(&self.history, now) as f64;
                if stopped >= config.stop_confirm_secs {
                    Some(self.driver.stopped_since.unwrap_or(now - stopped))
                } else {
                    None
                }
            }
            MovementStatus::Moving | MovementStatus::Unknown => None,
        };
        if let Some(reference) = self.startup_reference.take() {
            if let Some(startup_speed) = classifier.startup_speed(&reference, &fix) {
                info!(speed_mph = %format!("{:.1}", startup_speed), since = %reference.timestamp, "startup_speed_applied");
                speed = startup_speed;
            }
        }

        self.driver.latitude = fix.latitude;
        self.driver.longitude = fix.longitude;
        self.driver.last_updated = now;
        self.driver.speed = speed;
        self.driver.stopped_since = stopped_since;
        self.driver.last_position = Some(position);

        writes.push(PendingWrite::LastLocation(fix));

        Ok(IngestOutcome { success: true, moved, distance_moved_miles: distance_moved, speed_mph: speed })
    }

    /// A fix older than the newest in history: it fills in the minute series of
    /// its day and leaves the driver, the legacy aggregate and the accrual alone.
    fn apply_late_fix(
        &mut self,
        classifier: &MovementClassifier,
        fix: Fix,
        previous: Option<Fix>,
        date: NaiveDate,
        stored_day: Option<DailyRecord>,
        writes: &mut Vec<PendingWrite>,
    ) -> anyhow::Result<IngestOutcome> {
        let moving = previous.is_some_and(|prev| classifier.is_moving_segment(&prev, &fix));
        let speed = previous
            .and_then(|prev| MovementClassifier::segment_speed(&prev, &fix))
            .filter(|&mph| classifier.is_realistic(mph))
            .unwrap_or(0.0);
        debug!(ts = %fix.timestamp, newest = %self.driver.last_updated, moving = %moving, "late_fix_placed");

        let mut detached = None;
        let record = self.day_for_fix(fix, date, stored_day, &mut detached);
        if record.record_sample(&fix, speed, moving)? {
            record.recompute_distance();
            if moving {
                record.note_movement(fix.timestamp);
            }
        }
        writes.push(PendingWrite::Daily(record.clone()));

        Ok(self.unchanged_outcome())
    }

    /// Record the fix belongs to. A fix for an older date updates that day's
    /// stored record in `detached` without displacing the active one.
    fn day_for_fix<'a>(
        &'a mut self,
        fix: Fix,
        date: NaiveDate,
        stored_day: Option<DailyRecord>,
        detached: &'a mut Option<DailyRecord>,
    ) -> &'a mut DailyRecord {
        match self.day.take() {
            Some(day) if day.date == date => self.day.insert(day),
            Some(day) if day.date > date => {
                self.day = Some(day);
                detached.insert(stored_day.unwrap_or_else(|| DailyRecord::new(date, fix)))
            }
            replaced => {
                if let Some(old) = replaced {
                    info!(from = %old.date, to = %date, miles = %format!("{:.1}", old.total_distance_miles), "day_rolled_over");
                }
                self.day.insert(stored_day.unwrap_or_else(|| DailyRecord::new(date, fix)))
            }
        }
    }

    fn unchanged_outcome(&self) -> IngestOutcome {
        IngestOutcome { success: true, moved: false, distance_moved_miles: 0.0, speed_mph: self.driver.speed }
    }
}
