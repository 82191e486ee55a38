//! Rolling window of recent raw fixes
//!
//! Entries are kept sorted by timestamp regardless of arrival order. Each entry
//! carries the cumulative displacement of the trailing movement window ending at
//! it, maintained incrementally on in-order appends so movement queries never
//! rescan the window per point.

use crate::domain::Fix;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq)]
struct WindowedFix {
    fix: Fix,
    /// Path length (miles) over fixes in [ts - window, ts]
    trailing_miles: f64,
}

/// Where an appended fix landed
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Placement {
    /// Strictly newer than every held fix
    Newest { previous: Option<Fix> },
    /// Not newer than the newest held fix; inserted by timestamp
    Late { previous: Option<Fix> },
    /// Identical to a held fix; nothing stored
    Duplicate,
}

impl Placement {
    /// The fix preceding the new one in timestamp order
    pub fn previous(&self) -> Option<Fix> {
        match self {
            Placement::Newest { previous } | Placement::Late { previous } => *previous,
            Placement::Duplicate => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HistoryStore {
    entries: VecDeque<WindowedFix>,
    /// Trailing movement window length in seconds
    window_secs: f64,
    /// Index of the oldest entry inside the newest entry's trailing window
    window_start: usize,
    flush_every: u32,
    appends_since_flush: u32,
}

impl HistoryStore {
    pub fn new(window_secs: f64, flush_every: u32) -> Self {
        Self {
            entries: VecDeque::new(),
            window_secs,
            window_start: 0,
            flush_every: flush_every.max(1),
            appends_since_flush: 0,
        }
    }

    /// Rebuild from persisted fixes in any order
    pub fn from_fixes(mut fixes: Vec<Fix>, window_secs: f64, flush_every: u32) -> Self {
        let mut store = Self::new(window_secs, flush_every);
        fixes.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        store.entries = fixes.into_iter().map(|fix| WindowedFix { fix, trailing_miles: 0.0 }).collect();
        store.rebuild_windows();
        store
    }

    /// Add a fix in timestamp order. Exact duplicates of a held fix are not stored.
    pub fn append(&mut self, fix: Fix) -> Placement {
        let newest = self.entries.back().map_or(true, |last| fix.timestamp > last.fix.timestamp);

        if newest {
            let previous = self.entries.back().map(|e| e.fix);
            self.entries.push_back(WindowedFix { fix, trailing_miles: 0.0 });
            self.advance_window();
            return Placement::Newest { previous };
        }

        let from = self.entries.partition_point(|e| e.fix.timestamp < fix.timestamp);
        let idx = self.entries.partition_point(|e| e.fix.timestamp <= fix.timestamp);
        if self.entries.range(from..idx).any(|e| e.fix == fix) {
            return Placement::Duplicate;
        }

        // Late arrival: insert after any equal timestamps and recompute
        let previous = idx.checked_sub(1).map(|i| self.entries[i].fix);
        self.entries.insert(idx, WindowedFix { fix, trailing_miles: 0.0 });
        self.rebuild_windows();
        Placement::Late { previous }
    }

    /// Drop entries older than `now - hours`. Returns how many were removed.
    pub fn trim(&mut self, now: f64, hours: f64) -> usize {
        let cutoff = now - hours * 3600.0;
        let removed = self.entries.partition_point(|e| e.fix.timestamp < cutoff);
        if removed == 0 {
            return 0;
        }
        self.entries.drain(..removed);
        if self.window_start >= removed {
            self.window_start -= removed;
        } else {
            // Window reached into the removed range; trailing sums no longer hold
            self.rebuild_windows();
        }
        removed
    }

    /// Counts calls; every `flush_every`th returns the window to persist
    pub fn flush_if_due(&mut self) -> Option<Vec<Fix>> {
        self.appends_since_flush += 1;
        if self.appends_since_flush >= self.flush_every {
            self.appends_since_flush = 0;
            Some(self.fixes())
        } else {
            None
        }
    }

    /// Fixes with `end - window_secs <= ts <= end`, ascending
    pub fn recent_window(&self, end: f64, window_secs: f64) -> Vec<Fix> {
        let start = end - window_secs;
        let from = self.entries.partition_point(|e| e.fix.timestamp < start);
        self.entries
            .iter()
            .skip(from)
            .take_while(|e| e.fix.timestamp <= end)
            .map(|e| e.fix)
            .collect()
    }

    /// Path length over `recent_window(end, window_secs)`
    pub fn window_distance(&self, end: f64, window_secs: f64) -> f64 {
        path_miles(&self.recent_window(end, window_secs))
    }

    /// (timestamp, trailing displacement) per entry at or before `now`, newest first
    pub fn trailing_newest_first(&self, now: f64) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.entries
            .iter()
            .rev()
            .skip_while(move |e| e.fix.timestamp > now)
            .map(|e| (e.fix.timestamp, e.trailing_miles))
    }

    pub fn fixes(&self) -> Vec<Fix> {
        self.entries.iter().map(|e| e.fix).collect()
    }

    pub fn latest(&self) -> Option<Fix> {
        self.entries.back().map(|e| e.fix)
    }

    pub fn oldest(&self) -> Option<Fix> {
        self.entries.front().map(|e| e.fix)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn window_secs(&self) -> f64 {
        self.window_secs
    }

    /// Slide the window start for the newly pushed last entry and sum its window
    fn advance_window(&mut self) {
        let last = self.entries.len() - 1;
        let start = self.entries[last].fix.timestamp - self.window_secs;
        while self.window_start < last && self.entries[self.window_start].fix.timestamp < start {
            self.window_start += 1;
        }
        let trailing = (self.window_start..last)
            .map(|i| self.entries[i].fix.distance_to(&self.entries[i + 1].fix))
            .sum();
        self.entries[last].trailing_miles = trailing;
    }

    /// Recompute every trailing sum with a two-pointer pass over prefix sums
    fn rebuild_windows(&mut self) {
        let n = self.entries.len();
        let mut prefix = Vec::with_capacity(n);
        let mut total = 0.0;
        for i in 0..n {
            if i > 0 {
                total += self.entries[i - 1].fix.distance_to(&self.entries[i].fix);
            }
            prefix.push(total);
        }

        let mut start = 0;
        for j in 0..n {
            let window_begin = self.entries[j].fix.timestamp - self.window_secs;
            while start < j && self.entries[start].fix.timestamp < window_begin {
                start += 1;
            }
            self.entries[j].trailing_miles = (prefix[j] - prefix[start]).max(0.0);
        }
        self.window_start = start;
    }
}

/// Path length over consecutive fixes
pub fn path_miles(fixes: &[Fix]) -> f64 {
    fixes.windows(2).map(|w| w[0].distance_to(&w[1])).sum()
}
