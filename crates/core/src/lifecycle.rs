//! Monitor lifecycle states and their valid transitions.
//!
//! ```text
//! Idle -> Starting -> Running -> Stopping -> Idle
//!            \___________________/
//! ```
//!
//! A monitor that fails during start-up goes straight from `Starting` to
//! `Stopping`.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::Timestamp;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorLifecycle {
    #[default]
    Idle,
    Starting,
    Running,
    Stopping,
}

impl MonitorLifecycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorLifecycle::Idle => "idle",
            MonitorLifecycle::Starting => "starting",
            MonitorLifecycle::Running => "running",
            MonitorLifecycle::Stopping => "stopping",
        }
    }

    pub fn valid_transitions(&self) -> &'static [MonitorLifecycle] {
        match self {
            MonitorLifecycle::Idle => &[MonitorLifecycle::Starting],
            MonitorLifecycle::Starting => &[MonitorLifecycle::Running, MonitorLifecycle::Stopping],
            MonitorLifecycle::Running => &[MonitorLifecycle::Stopping],
            MonitorLifecycle::Stopping => &[MonitorLifecycle::Idle],
        }
    }

    pub fn can_transition(&self, to: MonitorLifecycle) -> bool {
        self.valid_transitions().contains(&to)
    }
}

/// Tracks the current lifecycle state and when it was entered.
#[derive(Debug, Clone, Copy)]
pub struct LifecycleTracker {
    state: MonitorLifecycle,
    since: Timestamp,
}

impl LifecycleTracker {
    pub fn new(now: Timestamp) -> Self {
        Self {
            state: MonitorLifecycle::Idle,
            since: now,
        }
    }

    pub fn state(&self) -> MonitorLifecycle {
        self.state
    }

    pub fn since(&self) -> Timestamp {
        self.since
    }

    /// Move to `to`, returning the previous state.
    pub fn transition(
        &mut self,
        to: MonitorLifecycle,
        now: Timestamp,
    ) -> Result<MonitorLifecycle, CoreError> {
        if !self.state.can_transition(to) {
            return Err(CoreError::InvalidTransition {
                from: self.state.as_str(),
                to: to.as_str(),
            });
        }
        let from = self.state;
        self.state = to;
        self.since = now;
        Ok(from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::Utc;

    #[test]
    fn full_cycle_is_valid() {
        let mut tracker = LifecycleTracker::new(Utc::now());
        for to in [
            MonitorLifecycle::Starting,
            MonitorLifecycle::Running,
            MonitorLifecycle::Stopping,
            MonitorLifecycle::Idle,
        ] {
            assert!(tracker.transition(to, Utc::now()).is_ok());
        }
        assert_eq!(tracker.state(), MonitorLifecycle::Idle);
    }

    #[test]
    fn failed_start_can_stop() {
        assert!(MonitorLifecycle::Starting.can_transition(MonitorLifecycle::Stopping));
    }

    #[test]
    fn idle_cannot_jump_to_running() {
        let mut tracker = LifecycleTracker::new(Utc::now());
        assert_matches!(
            tracker.transition(MonitorLifecycle::Running, Utc::now()),
            Err(CoreError::InvalidTransition { from: "idle", to: "running" })
        );
        assert_eq!(tracker.state(), MonitorLifecycle::Idle);
    }

    #[test]
    fn running_cannot_restart_without_stopping() {
        assert!(!MonitorLifecycle::Running.can_transition(MonitorLifecycle::Starting));
    }
}
