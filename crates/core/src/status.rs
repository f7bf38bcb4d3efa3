//! Status snapshot published for UIs.
//!
//! The snapshot is size-bounded: current values only, never history.

use serde::Serialize;

use crate::lifecycle::MonitorLifecycle;
use crate::metrics::PostureState;
use crate::policy::PolicyStatus;
use crate::state_config::SensitivityPreset;
use crate::state_machine::{Diagnostics, StateSummary};
use crate::sustain::DetectionPath;
use crate::thresholds::AbsoluteThresholds;
use crate::types::Timestamp;

/// Smoothed metric values as last fed to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SmoothedMetrics {
    pub neck_flexion_deg: f64,
    pub torso_flexion_deg: f64,
    pub lateral_lean_ratio: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub updated_at: Timestamp,
    pub lifecycle: MonitorLifecycle,
    pub calibrated: bool,
    pub state: PostureState,
    pub state_entered_at: Option<Timestamp>,
    pub time_in_state_sec: f64,
    pub preset: Option<SensitivityPreset>,
    pub detection_path: Option<DetectionPath>,
    pub metrics: Option<SmoothedMetrics>,
    pub thresholds: Option<AbsoluteThresholds>,
    pub diagnostics: Option<Diagnostics>,
    pub policy: Option<PolicyStatus>,
}

impl StatusSnapshot {
    /// An empty snapshot for a monitor that has not produced any state yet.
    pub fn idle(now: Timestamp, lifecycle: MonitorLifecycle, calibrated: bool) -> Self {
        Self {
            updated_at: now,
            lifecycle,
            calibrated,
            state: PostureState::Good,
            state_entered_at: None,
            time_in_state_sec: 0.0,
            preset: None,
            detection_path: None,
            metrics: None,
            thresholds: None,
            diagnostics: None,
            policy: None,
        }
    }

    pub fn with_summary(mut self, summary: &StateSummary) -> Self {
        self.state = summary.current_state;
        self.state_entered_at = Some(summary.state_entered_at);
        self.time_in_state_sec = summary.time_in_state_sec;
        self.preset = Some(summary.preset);
        self.detection_path = summary.last_detection_path;
        self.thresholds = Some(summary.thresholds);
        self
    }

    pub fn with_metrics(mut self, metrics: SmoothedMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    pub fn with_policy(mut self, policy: PolicyStatus) -> Self {
        self.policy = Some(policy);
        self
    }
}
