//! Rolling time window over boolean condition samples.
//!
//! A [`ConditionWindow`] records `(timestamp, above)` pairs and answers, for a
//! trailing duration, what fraction of samples were above threshold, how long
//! the condition held in total, and the longest continuous stretch below it.
//!
//! A sample's state is assumed to persist until the next sample (right-open
//! intervals); the last sample persists until the query time.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::types::{add_secs, secs_between, Timestamp};

/// Statistics over the samples retained in a window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowStats {
    pub above_count: usize,
    pub total_count: usize,
    /// `above_count / total_count`, or 0.0 when the window is empty.
    pub above_fraction: f64,
    pub cumulative_above_sec: f64,
    pub max_gap_sec: f64,
}

/// Time-ordered record of whether a condition held at each sample.
#[derive(Debug, Clone, Default)]
pub struct ConditionWindow {
    samples: VecDeque<(Timestamp, bool)>,
}

impl ConditionWindow {
    /// An empty window.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sample.
    ///
    /// A timestamp earlier than the last recorded one is clamped to it, so
    /// spans between samples are never negative.
    pub fn add(&mut self, at: Timestamp, above: bool) {
        let at = match self.samples.back() {
            Some(&(last, _)) if at < last => last,
            _ => at,
        };
        self.samples.push_back((at, above));
    }

    /// Drop every sample older than `now - window_sec`.
    ///
    /// A sample exactly at the cutoff is retained.
    pub fn prune(&mut self, now: Timestamp, window_sec: f64) {
        let cutoff = add_secs(now, -window_sec);
        while let Some(&(at, _)) = self.samples.front() {
            if at >= cutoff {
                break;
            }
            self.samples.pop_front();
        }
    }

    /// Drop every sample.
    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Number of retained samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether no samples are retained.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Prune to the trailing `window_sec` and compute statistics at `now`.
    pub fn stats(&mut self, now: Timestamp, window_sec: f64) -> WindowStats {
        self.prune(now, window_sec);

        let Some(&(last_at, last_above)) = self.samples.back() else {
            return WindowStats::default();
        };

        let total_count = self.samples.len();
        let above_count = self.samples.iter().filter(|(_, above)| *above).count();

        let mut cumulative_above_sec = 0.0;
        let mut max_gap_sec: f64 = 0.0;
        let mut current_gap = 0.0;

        for (&(at, above), &(next_at, _)) in self.samples.iter().zip(self.samples.iter().skip(1)) {
            let span = secs_between(at, next_at);
            if above {
                cumulative_above_sec += span;
                current_gap = 0.0;
            } else {
                current_gap += span;
                max_gap_sec = max_gap_sec.max(current_gap);
            }
        }

        if last_above {
            cumulative_above_sec += secs_between(last_at, now).max(0.0);
        }

        WindowStats {
            above_count,
            total_count,
            above_fraction: above_count as f64 / total_count as f64,
            cumulative_above_sec,
            max_gap_sec,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
