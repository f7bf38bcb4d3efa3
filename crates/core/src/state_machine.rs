//! Posture state machine.
//!
//! Consumes smoothed [`MetricSample`]s against a calibrated baseline, runs the
//! sustain detectors for each condition, arbitrates by priority and applies
//! hysteretic recovery before returning to `Good`.
//!
//! Pure logic: time comes from the sample timestamps, so replaying a recorded
//! stream yields the same transitions.
//!
//! Recovery from an issue state works in candidacy periods. Candidacy starts
//! on the first tick where no condition triggers. Each candidacy tick records
//! whether the current issue's metric is still above threshold. The machine
//! returns to `Good` once candidacy has lasted `recovery_window_sec` and the
//! still-above fraction over that window is below
//! `1 - recovery_majority_fraction`. Any tick on which a condition triggers
//! ends candidacy.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::calibration::CalibrationBaseline;
use crate::error::CoreError;
use crate::metrics::{MetricSample, MetricsSnapshot, PostureState};
use crate::nudge::ThresholdBackoff;
use crate::state_config::{SensitivityPreset, StateConfig};
use crate::sustain::{Condition, ConditionTracker, DetectionPath, SustainCheckResult, SustainPolicy};
use crate::thresholds::{AbsoluteThresholds, Baselines, ThresholdOffsets};
use crate::types::{secs_between, Timestamp};
use crate::window::{ConditionWindow, WindowStats};

/// Transition events retained for introspection.
const MAX_HISTORY: usize = 256;

pub const REASON_LOW_CONFIDENCE: &str = "Low confidence";
pub const REASON_CONFIDENCE_RECOVERED: &str = "Confidence recovered";

// ---------------------------------------------------------------------------
// Events and diagnostics
// ---------------------------------------------------------------------------

/// A committed state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransitionEvent {
    pub timestamp: Timestamp,
    pub from_state: PostureState,
    pub to_state: PostureState,
    pub reason: String,
    /// Detection path that produced an issue transition.
    pub detection_path: Option<DetectionPath>,
    pub time_in_previous_state_sec: f64,
    pub metrics_snapshot: MetricsSnapshot,
    /// Drifting baselines at the time of the transition.
    pub baselines: Baselines,
}

impl StateTransitionEvent {
    pub fn is_high_severity(&self) -> bool {
        self.detection_path == Some(DetectionPath::HighSeverity)
    }
}

/// Window statistics and thresholds for one condition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConditionDiagnostics {
    #[serde(flatten)]
    pub stats: WindowStats,
    pub window_sec: f64,
    pub threshold: f64,
    pub baseline: f64,
    /// Configured delta: degrees for neck and torso, centimetres for lateral.
    pub delta: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub slouch: ConditionDiagnostics,
    pub forward_lean: ConditionDiagnostics,
    pub lateral_lean: ConditionDiagnostics,
}

impl Diagnostics {
    pub fn get(&self, condition: Condition) -> &ConditionDiagnostics {
        match condition {
            Condition::Slouch => &self.slouch,
            Condition::ForwardLean => &self.forward_lean,
            Condition::LateralLean => &self.lateral_lean,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateSummary {
    pub current_state: PostureState,
    pub state_entered_at: Timestamp,
    pub time_in_state_sec: f64,
    pub transition_count: usize,
    pub preset: SensitivityPreset,
    pub drift_baselines: Baselines,
    pub thresholds: AbsoluteThresholds,
    pub last_detection_path: Option<DetectionPath>,
}

// ---------------------------------------------------------------------------
// PostureStateMachine
// ---------------------------------------------------------------------------

pub struct PostureStateMachine {
    config: StateConfig,
    baseline: CalibrationBaseline,
    drift: Baselines,

    state: PostureState,
    state_entered_at: Timestamp,

    trackers: [ConditionTracker; 3],
    recovery: ConditionWindow,
    recovery_since: Option<Timestamp>,

    backoff: Option<ThresholdBackoff>,

    history: VecDeque<StateTransitionEvent>,
    transition_count: usize,
    state_counts: HashMap<PostureState, usize>,
    last_detection_path: Option<DetectionPath>,
}

impl PostureStateMachine {
    /// Start in `Good` at `started_at` with drifting baselines seeded from
    /// `baseline`.
    pub fn new(
        baseline: CalibrationBaseline,
        config: StateConfig,
        started_at: Timestamp,
    ) -> Result<Self, CoreError> {
        config.validate()?;
        Ok(Self {
            drift: Baselines::from(&baseline),
            baseline,
            config,
            state: PostureState::Good,
            state_entered_at: started_at,
            trackers: Condition::PRIORITY.map(ConditionTracker::new),
            recovery: ConditionWindow::new(),
            recovery_since: None,
            backoff: None,
            history: VecDeque::new(),
            transition_count: 0,
            state_counts: HashMap::new(),
            last_detection_path: None,
        })
    }

    /// Feed one smoothed sample. Returns an event iff the state changed.
    pub fn update(&mut self, sample: &MetricSample) -> Option<StateTransitionEvent> {
        let now = sample.timestamp;

        if sample.confidence < self.config.confidence_threshold {
            return self.transition_to(PostureState::Paused, REASON_LOW_CONFIDENCE.into(), None, sample);
        }
        if self.state == PostureState::Paused {
            return self.transition_to(
                PostureState::Good,
                REASON_CONFIDENCE_RECOVERED.into(),
                None,
                sample,
            );
        }

        let thresholds = self.thresholds(now);
        for tracker in &mut self.trackers {
            let condition = tracker.condition();
            tracker.record(now, metric_value(sample, condition), thresholds.get(condition));
        }

        let mut winner: Option<(Condition, SustainCheckResult)> = None;
        for tracker in &mut self.trackers {
            let condition = tracker.condition();
            let result = tracker.evaluate(
                policy_for(&self.config, condition),
                metric_value(sample, condition),
                thresholds.get(condition),
                now,
            );
            if result.triggered && winner.is_none() {
                winner = Some((condition, result));
            }
        }

        let event = self.resolve(winner, sample, &thresholds);

        if self.state == PostureState::Good {
            self.apply_drift(sample);
        }
        event
    }

    fn resolve(
        &mut self,
        winner: Option<(Condition, SustainCheckResult)>,
        sample: &MetricSample,
        thresholds: &AbsoluteThresholds,
    ) -> Option<StateTransitionEvent> {
        if let Some((condition, result)) = winner {
            if condition.state() == self.state {
                self.end_recovery();
                return None;
            }
            // Good -> issue and issue -> other issue both commit immediately.
            return self.transition_to(condition.state(), result.reason, result.path, sample);
        }

        let current = Condition::from_state(self.state)?;
        let now = sample.timestamp;
        let since = *self.recovery_since.get_or_insert(now);
        let still_above =
            metric_value(sample, current) > thresholds.get(current).ordinary;
        self.recovery.add(now, still_above);

        let window_sec = self.config.recovery_window_sec;
        let stats = self.recovery.stats(now, window_sec);
        let required_above = 1.0 - self.config.recovery_majority_fraction;
        if secs_between(since, now) < window_sec || stats.above_fraction >= required_above {
            return None;
        }

        let reason = format!(
            "Recovery: Metrics below threshold for {:.0}s ({:.0}% below)",
            window_sec,
            (1.0 - stats.above_fraction) * 100.0
        );
        self.transition_to(PostureState::Good, reason, None, sample)
    }

    fn transition_to(
        &mut self,
        to_state: PostureState,
        reason: String,
        detection_path: Option<DetectionPath>,
        sample: &MetricSample,
    ) -> Option<StateTransitionEvent> {
        if to_state == self.state {
            return None;
        }
        let now = sample.timestamp;
        let event = StateTransitionEvent {
            timestamp: now,
            from_state: self.state,
            to_state,
            reason,
            detection_path,
            time_in_previous_state_sec: secs_between(self.state_entered_at, now).max(0.0),
            metrics_snapshot: sample.snapshot(),
            baselines: self.drift,
        };

        self.state = to_state;
        self.state_entered_at = now;
        self.end_recovery();
        if detection_path.is_some() {
            self.last_detection_path = detection_path;
        }
        if to_state == PostureState::Good {
            for tracker in &mut self.trackers {
                tracker.reset();
            }
            self.last_detection_path = None;
        }

        self.transition_count += 1;
        *self.state_counts.entry(to_state).or_insert(0) += 1;
        if self.history.len() == MAX_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(event.clone());

        Some(event)
    }

    fn end_recovery(&mut self) {
        self.recovery.clear();
        self.recovery_since = None;
    }

    fn apply_drift(&mut self, sample: &MetricSample) {
        let alpha = self.config.drift_alpha;
        if alpha == 0.0 {
            return;
        }
        let blend = |x: f64, prev: f64| alpha * x + (1.0 - alpha) * prev;
        self.drift = Baselines {
            neck_deg: blend(sample.neck_flexion_deg, self.drift.neck_deg),
            torso_deg: blend(sample.torso_flexion_deg, self.drift.torso_deg),
            lateral_ratio: blend(sample.lateral_lean_ratio, self.drift.lateral_ratio),
        };
    }

    // -----------------------------------------------------------------------
    // Backoff
    // -----------------------------------------------------------------------

    /// Raise detection thresholds until the backoff expires. `None` clears it.
    pub fn set_backoff(&mut self, backoff: Option<ThresholdBackoff>) {
        self.backoff = backoff;
    }

    fn offsets_at(&self, now: Timestamp) -> ThresholdOffsets {
        self.backoff
            .map(|b| b.offsets_at(now))
            .unwrap_or_default()
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    /// Absolute thresholds in effect at `now`, including any active backoff.
    pub fn thresholds(&self, now: Timestamp) -> AbsoluteThresholds {
        AbsoluteThresholds::compute(&self.config, &self.drift, self.offsets_at(now))
    }

    pub fn current_state(&self) -> PostureState {
        self.state
    }

    pub fn state_entered_at(&self) -> Timestamp {
        self.state_entered_at
    }

    pub fn time_in_state(&self, now: Timestamp) -> f64 {
        secs_between(self.state_entered_at, now).max(0.0)
    }

    pub fn config(&self) -> &StateConfig {
        &self.config
    }

    pub fn calibration(&self) -> &CalibrationBaseline {
        &self.baseline
    }

    pub fn drift_baselines(&self) -> Baselines {
        self.drift
    }

    /// Detection path behind the current issue state, if any.
    pub fn last_detection_path(&self) -> Option<DetectionPath> {
        self.last_detection_path
    }

    pub fn condition_diagnostics(&mut self, now: Timestamp) -> Diagnostics {
        let thresholds = self.thresholds(now);
        let config = &self.config;
        let drift = self.drift;
        let [slouch, forward, lateral] = &mut self.trackers;

        let diag = |tracker: &mut ConditionTracker, baseline: f64, delta: f64| {
            let condition = tracker.condition();
            let window_sec = policy_for(config, condition).window_sec();
            ConditionDiagnostics {
                stats: tracker.stats(now, window_sec),
                window_sec,
                threshold: thresholds.get(condition).ordinary,
                baseline,
                delta,
            }
        };

        Diagnostics {
            slouch: diag(slouch, drift.neck_deg, config.slouch_threshold_deg),
            forward_lean: diag(forward, drift.torso_deg, config.forward_lean_threshold_deg),
            lateral_lean: diag(lateral, drift.lateral_ratio, config.lateral_lean_threshold_cm),
        }
    }

    pub fn summary(&self, now: Timestamp) -> StateSummary {
        StateSummary {
            current_state: self.state,
            state_entered_at: self.state_entered_at,
            time_in_state_sec: self.time_in_state(now),
            transition_count: self.transition_count,
            preset: self.config.preset,
            drift_baselines: self.drift,
            thresholds: self.thresholds(now),
            last_detection_path: self.last_detection_path,
        }
    }

    /// Number of transitions into each state.
    pub fn state_counts(&self) -> HashMap<PostureState, usize> {
        PostureState::ALL
            .into_iter()
            .map(|s| (s, self.state_counts.get(&s).copied().unwrap_or(0)))
            .collect()
    }

    pub fn last_transition(&self) -> Option<&StateTransitionEvent> {
        self.history.back()
    }

    /// Most recent transitions, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &StateTransitionEvent> {
        self.history.iter()
    }
}

fn metric_value(sample: &MetricSample, condition: Condition) -> f64 {
    match condition {
        Condition::Slouch => sample.neck_flexion_deg,
        Condition::ForwardLean => sample.torso_flexion_deg,
        Condition::LateralLean => sample.lateral_lean_ratio,
    }
}

fn policy_for(config: &StateConfig, condition: Condition) -> &SustainPolicy {
    match condition {
        Condition::Slouch => &config.slouch_policy,
        Condition::ForwardLean => &config.forward_lean_policy,
        Condition::LateralLean => &config.lateral_lean_policy,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
