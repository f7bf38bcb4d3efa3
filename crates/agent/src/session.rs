//! Sample pipeline: smoothing followed by the posture state machine.

use posture_core::calibration::CalibrationBaseline;
use posture_core::error::CoreError;
use posture_core::lifecycle::MonitorLifecycle;
use posture_core::metrics::{MetricSample, PostureState};
use posture_core::nudge::ThresholdBackoff;
use posture_core::policy::PolicyStatus;
use posture_core::smoothing::{MetricSmoother, SmoothingConfig};
use posture_core::state_config::StateConfig;
use posture_core::state_machine::{Diagnostics, PostureStateMachine, StateTransitionEvent};
use posture_core::status::{SmoothedMetrics, StatusSnapshot};
use posture_core::types::Timestamp;

/// A committed transition with the diagnostics captured at that moment.
#[derive(Debug, Clone)]
pub struct SessionTransition {
    pub event: StateTransitionEvent,
    pub diagnostics: Diagnostics,
}

/// One monitoring session over a fixed calibration baseline.
///
/// Low-confidence samples bypass the smoother so a burst of bad frames does
/// not bleed into the averages, and the smoother restarts from the first
/// good frame after a pause. Samples older than the last processed one are
/// dropped.
pub struct MonitorSession {
    smoother: MetricSmoother,
    machine: PostureStateMachine,
    last_smoothed: Option<MetricSample>,
    last_sample_at: Option<Timestamp>,
    samples_processed: u64,
    samples_out_of_order: u64,
}

impl MonitorSession {
    pub fn new(
        baseline: CalibrationBaseline,
        state_config: StateConfig,
        smoothing: SmoothingConfig,
        started_at: Timestamp,
    ) -> Result<Self, CoreError> {
        Ok(Self {
            smoother: MetricSmoother::new(smoothing)?,
            machine: PostureStateMachine::new(baseline, state_config, started_at)?,
            last_smoothed: None,
            last_sample_at: None,
            samples_processed: 0,
            samples_out_of_order: 0,
        })
    }

    /// Feed one raw sample with the dismiss backoff currently in force.
    pub fn process(
        &mut self,
        raw: &MetricSample,
        backoff: Option<ThresholdBackoff>,
    ) -> Option<SessionTransition> {
        if let Some(last) = self.last_sample_at.filter(|last| raw.timestamp < *last) {
            self.samples_out_of_order += 1;
            tracing::warn!(
                timestamp = %raw.timestamp,
                last = %last,
                "Dropping sample older than the last processed one"
            );
            return None;
        }
        self.last_sample_at = Some(raw.timestamp);
        self.samples_processed += 1;
        self.machine.set_backoff(backoff);

        let event = if raw.confidence < self.machine.config().confidence_threshold {
            self.smoother.reset();
            self.machine.update(raw)
        } else {
            let smoothed = self.smoother.smooth(raw);
            self.last_smoothed = Some(smoothed);
            self.machine.update(&smoothed)
        }?;

        if event.to_state == PostureState::Paused {
            self.smoother.reset();
        }
        let diagnostics = self.machine.condition_diagnostics(event.timestamp);
        Some(SessionTransition { event, diagnostics })
    }

    /// Apply a backoff outside of sample processing.
    pub fn set_backoff(&mut self, backoff: Option<ThresholdBackoff>) {
        self.machine.set_backoff(backoff);
    }

    pub fn current_state(&self) -> PostureState {
        self.machine.current_state()
    }

    pub fn machine(&self) -> &PostureStateMachine {
        &self.machine
    }

    pub fn samples_processed(&self) -> u64 {
        self.samples_processed
    }

    /// Samples dropped because they arrived with an earlier timestamp.
    pub fn samples_out_of_order(&self) -> u64 {
        self.samples_out_of_order
    }

    /// Status snapshot at `now`.
    pub fn snapshot(
        &mut self,
        now: Timestamp,
        lifecycle: MonitorLifecycle,
        policy: Option<PolicyStatus>,
    ) -> StatusSnapshot {
        let summary = self.machine.summary(now);
        let diagnostics = self.machine.condition_diagnostics(now);
        let mut snapshot = StatusSnapshot::idle(now, lifecycle, true)
            .with_summary(&summary)
            .with_diagnostics(diagnostics);
        if let Some(s) = self.last_smoothed {
            snapshot = snapshot.with_metrics(SmoothedMetrics {
                neck_flexion_deg: s.neck_flexion_deg,
                torso_flexion_deg: s.torso_flexion_deg,
                lateral_lean_ratio: s.lateral_lean_ratio,
                confidence: s.confidence,
            });
        }
        if let Some(policy) = policy {
            snapshot = snapshot.with_policy(policy);
        }
        snapshot
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
