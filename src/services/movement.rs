//! Movement classification over the history window
//!
//! Every query takes the evaluation time explicitly. Ingest evaluates at the
//! fix timestamp; the serving side evaluates at wall-clock time.

use crate::domain::{Fix, MovementReading, MovementStatus, Position};
use crate::infra::config::MovementConfig;
use crate::services::history::{path_miles, HistoryStore};
use tracing::debug;

#[derive(Debug, Clone, Copy)]
pub struct MovementClassifier {
    config: MovementConfig,
}

impl MovementClassifier {
    pub fn new(config: MovementConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MovementConfig {
        &self.config
    }

    #[inline]
    pub fn is_realistic(&self, speed_mph: f64) -> bool {
        (0.0..=self.config.max_realistic_speed_mph).contains(&speed_mph)
    }

    /// Implied speed between two fixes; None when no time elapsed
    pub fn segment_speed(a: &Fix, b: &Fix) -> Option<f64> {
        let elapsed = b.timestamp - a.timestamp;
        if elapsed <= 0.0 {
            return None;
        }
        Some(a.distance_to(b) / (elapsed / 3600.0))
    }

    /// Segment counts toward travel time and moving averages
    pub fn is_moving_segment(&self, a: &Fix, b: &Fix) -> bool {
        Self::segment_speed(a, b).is_some_and(|speed| {
            self.is_realistic(speed) && speed > self.config.moving_segment_min_mph
        })
    }

    #[inline]
    pub fn exceeds_threshold(&self, miles: f64) -> bool {
        miles > self.config.movement_threshold_miles
    }

    /// Per-fix change against the previous driver position.
    /// With no previous position the fix counts as moved with zero distance.
    pub fn position_change(&self, last: Option<Position>, current: Position) -> (bool, f64) {
        match last {
            None => (true, 0.0),
            Some(last) => {
                let distance = last.distance_to(&current);
                (distance > self.config.position_change_miles, distance)
            }
        }
    }

    /// Oldest-to-newest speed over the trailing `minutes`; 0 when unrealistic
    pub fn speed_over_window(&self, history: &HistoryStore, now: f64, minutes: f64) -> f64 {
        let window = history.recent_window(now, minutes * 60.0);
        let (Some(oldest), Some(newest)) = (window.first(), window.last()) else {
            return 0.0;
        };
        if window.len() < 2 {
            return 0.0;
        }

        match Self::segment_speed(oldest, newest) {
            Some(speed) if self.is_realistic(speed) => speed,
            Some(speed) => {
                debug!(speed_mph = %format!("{:.1}", speed), minutes = %minutes, "unrealistic_speed_ignored");
                0.0
            }
            None => 0.0,
        }
    }

    /// 1-minute speed if nonzero, else 5-minute speed
    pub fn display_speed(&self, history: &HistoryStore, now: f64) -> f64 {
        let one_minute = self.speed_over_window(history, now, 1.0);
        if one_minute > 0.0 {
            return one_minute;
        }
        self.speed_over_window(history, now, 5.0)
    }

    /// Mean speed across moving segments only
    pub fn average_moving_speed(&self, history: &HistoryStore, now: f64, minutes: f64) -> f64 {
        let window = history.recent_window(now, minutes * 60.0);
        let mut distance = 0.0;
        let mut seconds = 0.0;
        for pair in window.windows(2) {
            if self.is_moving_segment(&pair[0], &pair[1]) {
                distance += pair[0].distance_to(&pair[1]);
                seconds += pair[1].timestamp - pair[0].timestamp;
            }
        }
        if seconds <= 0.0 {
            return 0.0;
        }
        let average = distance / (seconds / 3600.0);
        if self.is_realistic(average) {
            average
        } else {
            0.0
        }
    }

    /// Moving/stopped over the trailing movement window ending at `now`.
    ///
    /// Unknown with fewer than two fixes in the window, or when the window reads
    /// below threshold before history covers a full window.
    pub fn movement_status(&self, history: &HistoryStore, now: f64) -> MovementReading {
        let window_secs = self.config.movement_window_secs;
        let window = history.recent_window(now, window_secs);
        if window.len() < 2 {
            return MovementReading::unknown();
        }
        let Some(oldest) = history.oldest() else {
            return MovementReading::unknown();
        };

        let threshold = self.config.movement_threshold_miles;
        if self.exceeds_threshold(path_miles(&window)) {
            // Movement began at the newest fix whose own window was still quiet
            let since = history
                .trailing_newest_first(now)
                .find(|&(_, trailing)| trailing <= threshold)
                .map_or(oldest.timestamp, |(ts, _)| ts);
            return MovementReading { status: MovementStatus::Moving, since: Some(since) };
        }

        if oldest.timestamp > now - window_secs {
            return MovementReading::unknown();
        }

        let since = self.last_moving_timestamp(history, now).unwrap_or(oldest.timestamp);
        MovementReading { status: MovementStatus::Stopped, since: Some(since) }
    }

    /// Seconds since the window last showed movement; 0 while moving
    pub fn stopped_duration(&self, history: &HistoryStore, now: f64) -> u64 {
        if history.len() < 2 {
            return 0;
        }
        let window_secs = self.config.movement_window_secs;
        if self.exceeds_threshold(history.window_distance(now, window_secs)) {
            return 0;
        }

        let since = match self.last_moving_timestamp(history, now) {
            Some(ts) => ts,
            None => match history.oldest() {
                Some(oldest) => oldest.timestamp,
                None => return 0,
            },
        };
        (now - since).max(0.0) as u64
    }

    /// Speed from the location saved before a restart to the first new fix
    pub fn startup_speed(&self, last_saved: &Fix, fix: &Fix) -> Option<f64> {
        let distance = last_saved.distance_to(fix);
        let elapsed = fix.timestamp - last_saved.timestamp;
        if distance <= self.config.min_segment_miles
            || elapsed <= 0.0
            || elapsed > self.config.startup_max_gap_hours * 3600.0
        {
            return None;
        }
        let speed = distance / (elapsed / 3600.0);
        self.is_realistic(speed).then_some(speed)
    }

    fn last_moving_timestamp(&self, history: &HistoryStore, now: f64) -> Option<f64> {
        history
            .trailing_newest_first(now)
            .find(|&(_, trailing)| self.exceeds_threshold(trailing))
            .map(|(ts, _)| ts)
    }
}
