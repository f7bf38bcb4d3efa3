//! Sustained-condition detection.
//!
//! Each tracked posture condition (slouch, forward lean, lateral lean) is
//! judged by three independent paths over its own [`ConditionWindow`]:
//!
//! - **High severity**: the metric has stayed above `baseline + high_severity_delta`
//!   for `high_severity_window_sec`. Short-circuits the other paths.
//! - **Majority**: `above_fraction >= majority_fraction` and no below-threshold
//!   run longer than `gap_budget_sec`.
//! - **Cumulative**: total time above threshold is at least `cumulative_min_sec`.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::metrics::PostureState;
use crate::threshold_validation::{
    validate_duration, validate_non_negative, validate_positive, validate_range,
};
use crate::types::{secs_between, Timestamp};
use crate::window::{ConditionWindow, WindowStats};

// ---------------------------------------------------------------------------
// SustainPolicy
// ---------------------------------------------------------------------------

/// Raw, unvalidated sustain policy parameters as they appear in config files.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SustainPolicyParams {
    pub window_sec: f64,
    pub majority_fraction: f64,
    pub gap_budget_sec: f64,
    pub cumulative_min_sec: f64,
    /// Degrees for neck and torso; centimetres for lateral lean.
    pub high_severity_delta: f64,
    pub high_severity_window_sec: f64,
}

/// Validated, immutable detection policy for one condition.
///
/// Construction fails unless `0.5 <= majority_fraction <= 1.0`,
/// `gap_budget_sec < window_sec` and `cumulative_min_sec <= window_sec`.
/// Durations are capped at one day, and `window_sec` and
/// `high_severity_window_sec` must be greater than zero, so the high-severity
/// path always needs at least two exceeding samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SustainPolicyParams", into = "SustainPolicyParams")]
pub struct SustainPolicy {
    params: SustainPolicyParams,
}

impl SustainPolicy {
    pub fn new(params: SustainPolicyParams) -> Result<Self, CoreError> {
        validate_positive(params.window_sec, "window_sec")?;
        validate_duration(params.window_sec, "window_sec")?;
        validate_range(params.majority_fraction, 0.5, 1.0, "majority_fraction")?;
        validate_duration(params.gap_budget_sec, "gap_budget_sec")?;
        validate_duration(params.cumulative_min_sec, "cumulative_min_sec")?;
        validate_non_negative(params.high_severity_delta, "high_severity_delta")?;
        validate_positive(params.high_severity_window_sec, "high_severity_window_sec")?;
        validate_duration(params.high_severity_window_sec, "high_severity_window_sec")?;

        if params.gap_budget_sec >= params.window_sec {
            return Err(CoreError::Validation(format!(
                "gap_budget_sec ({}) must be less than window_sec ({})",
                params.gap_budget_sec, params.window_sec
            )));
        }
        if params.cumulative_min_sec > params.window_sec {
            return Err(CoreError::Validation(format!(
                "cumulative_min_sec ({}) must not exceed window_sec ({})",
                params.cumulative_min_sec, params.window_sec
            )));
        }
        Ok(Self { params })
    }

    /// Wrap built-in preset parameters, which are checked by tests.
    pub(crate) const fn preset(params: SustainPolicyParams) -> Self {
        Self { params }
    }

    /// Trailing window the majority and cumulative paths look at.
    pub fn window_sec(&self) -> f64 {
        self.params.window_sec
    }

    /// Minimum above-threshold fraction for the majority path.
    pub fn majority_fraction(&self) -> f64 {
        self.params.majority_fraction
    }

    /// Longest below-threshold run the majority path tolerates.
    pub fn gap_budget_sec(&self) -> f64 {
        self.params.gap_budget_sec
    }

    /// Total above-threshold time that fires the cumulative path.
    pub fn cumulative_min_sec(&self) -> f64 {
        self.params.cumulative_min_sec
    }

    /// Delta above baseline for the high-severity threshold.
    pub fn high_severity_delta(&self) -> f64 {
        self.params.high_severity_delta
    }

    /// Continuous exceedance needed before the high-severity path fires.
    pub fn high_severity_window_sec(&self) -> f64 {
        self.params.high_severity_window_sec
    }

    /// The raw parameters, e.g. for serialisation.
    pub fn params(&self) -> SustainPolicyParams {
        self.params
    }
}

impl TryFrom<SustainPolicyParams> for SustainPolicy {
    type Error = CoreError;

    fn try_from(params: SustainPolicyParams) -> Result<Self, Self::Error> {
        Self::new(params)
    }
}

impl From<SustainPolicy> for SustainPolicyParams {
    fn from(policy: SustainPolicy) -> Self {
        policy.params
    }
}

// ---------------------------------------------------------------------------
// Conditions
// ---------------------------------------------------------------------------

/// A tracked posture condition, in arbitration priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Slouch,
    ForwardLean,
    LateralLean,
}

impl Condition {
    /// Highest priority first.
    pub const PRIORITY: [Condition; 3] = [
        Condition::Slouch,
        Condition::ForwardLean,
        Condition::LateralLean,
    ];

    pub fn as_str(&self) -> &'static str {
        self.state().as_str()
    }

    pub fn state(&self) -> PostureState {
        match self {
            Condition::Slouch => PostureState::Slouch,
            Condition::ForwardLean => PostureState::ForwardLean,
            Condition::LateralLean => PostureState::LateralLean,
        }
    }

    pub fn from_state(state: PostureState) -> Option<Self> {
        match state {
            PostureState::Slouch => Some(Condition::Slouch),
            PostureState::ForwardLean => Some(Condition::ForwardLean),
            PostureState::LateralLean => Some(Condition::LateralLean),
            PostureState::Good | PostureState::Paused => None,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Condition::Slouch => "Slouch",
            Condition::ForwardLean => "Forward lean",
            Condition::LateralLean => "Lateral lean",
        }
    }

    /// `"Neck 16.0° > 13.0°"`, `"Torso 14.2° > 12.0°"` or `"0.081 > 0.068"`.
    pub fn describe_excess(&self, value: f64, threshold: f64) -> String {
        match self {
            Condition::Slouch => format!("Neck {value:.1}° > {threshold:.1}°"),
            Condition::ForwardLean => format!("Torso {value:.1}° > {threshold:.1}°"),
            Condition::LateralLean => format!("{value:.3} > {threshold:.3}"),
        }
    }
}

/// Which detection path fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionPath {
    Majority,
    Cumulative,
    HighSeverity,
}

impl DetectionPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionPath::Majority => "majority",
            DetectionPath::Cumulative => "cumulative",
            DetectionPath::HighSeverity => "high_severity",
        }
    }
}

/// Absolute thresholds a condition is compared against on one tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConditionThresholds {
    pub ordinary: f64,
    pub high_severity: f64,
}

/// Outcome of evaluating one condition.
#[derive(Debug, Clone, PartialEq)]
pub struct SustainCheckResult {
    pub triggered: bool,
    pub path: Option<DetectionPath>,
    /// Human-readable explanation; empty when not triggered.
    pub reason: String,
    pub stats: WindowStats,
}

// ---------------------------------------------------------------------------
// ConditionTracker
// ---------------------------------------------------------------------------

/// Rolling window plus high-severity marker for one condition.
#[derive(Debug, Clone)]
pub struct ConditionTracker {
    condition: Condition,
    window: ConditionWindow,
    high_severity_since: Option<Timestamp>,
}

impl ConditionTracker {
    pub fn new(condition: Condition) -> Self {
        Self {
            condition,
            window: ConditionWindow::new(),
            high_severity_since: None,
        }
    }

    pub fn condition(&self) -> Condition {
        self.condition
    }

    /// Record whether `value` exceeded the ordinary threshold at `at`.
    pub fn record(&mut self, at: Timestamp, value: f64, thresholds: ConditionThresholds) {
        self.window.add(at, value > thresholds.ordinary);
    }

    /// Run the three detection paths for the latest `value` at `now`.
    pub fn evaluate(
        &mut self,
        policy: &SustainPolicy,
        value: f64,
        thresholds: ConditionThresholds,
        now: Timestamp,
    ) -> SustainCheckResult {
        let stats = self.window.stats(now, policy.window_sec());

        if value > thresholds.high_severity {
            let since = *self.high_severity_since.get_or_insert(now);
            if secs_between(since, now) >= policy.high_severity_window_sec() {
                return SustainCheckResult {
                    triggered: true,
                    path: Some(DetectionPath::HighSeverity),
                    reason: format!(
                        "High-severity {}: {} for {:.0}s",
                        self.condition.label().to_lowercase(),
                        self.condition.describe_excess(value, thresholds.high_severity),
                        policy.high_severity_window_sec()
                    ),
                    stats,
                };
            }
        } else {
            self.high_severity_since = None;
        }

        let majority_met = stats.above_fraction >= policy.majority_fraction()
            && stats.max_gap_sec <= policy.gap_budget_sec();
        let cumulative_met = stats.cumulative_above_sec >= policy.cumulative_min_sec();

        let path = if majority_met {
            DetectionPath::Majority
        } else if cumulative_met {
            DetectionPath::Cumulative
        } else {
            return SustainCheckResult {
                triggered: false,
                path: None,
                reason: String::new(),
                stats,
            };
        };

        SustainCheckResult {
            triggered: true,
            path: Some(path),
            reason: format!(
                "{} ({}): {} ({:.0}% of {:.0}s, {:.0}s total)",
                self.condition.label(),
                path.as_str(),
                self.condition.describe_excess(value, thresholds.ordinary),
                stats.above_fraction * 100.0,
                policy.window_sec(),
                stats.cumulative_above_sec
            ),
            stats,
        }
    }

    /// Window statistics without touching the high-severity marker.
    pub fn stats(&mut self, now: Timestamp, window_sec: f64) -> WindowStats {
        self.window.stats(now, window_sec)
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.high_severity_since = None;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::add_secs;
    use assert_matches::assert_matches;
    use chrono::{TimeZone, Utc};

    fn t(secs: f64) -> Timestamp {
        add_secs(Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap(), secs)
    }

    fn params() -> SustainPolicyParams {
        SustainPolicyParams {
            window_sec: 30.0,
            majority_fraction: 0.6,
            gap_budget_sec: 3.0,
            cumulative_min_sec: 18.0,
            high_severity_delta: 20.0,
            high_severity_window_sec: 8.0,
        }
    }

    const THRESHOLDS: ConditionThresholds = ConditionThresholds {
        ordinary: 13.0,
        high_severity: 25.0,
    };

    #[test]
    fn accepts_preset_shaped_policy() {
        assert!(SustainPolicy::new(params()).is_ok());
    }

    #[test]
    fn rejects_majority_fraction_out_of_range() {
        let low = SustainPolicyParams { majority_fraction: 0.4, ..params() };
        let high = SustainPolicyParams { majority_fraction: 1.1, ..params() };
        assert_matches!(SustainPolicy::new(low), Err(CoreError::Validation(_)));
        assert_matches!(SustainPolicy::new(high), Err(CoreError::Validation(_)));
    }

    #[test]
    fn rejects_gap_budget_not_below_window() {
        let p = SustainPolicyParams { gap_budget_sec: 30.0, ..params() };
        assert_matches!(SustainPolicy::new(p), Err(CoreError::Validation(msg)) if msg.contains("gap_budget_sec"));
    }

    #[test]
    fn rejects_cumulative_longer_than_window() {
        let p = SustainPolicyParams { cumulative_min_sec: 31.0, ..params() };
        assert!(SustainPolicy::new(p).is_err());
    }

    #[test]
    fn rejects_zero_high_severity_window() {
        let p = SustainPolicyParams { high_severity_window_sec: 0.0, ..params() };
        assert_matches!(
            SustainPolicy::new(p),
            Err(CoreError::Validation(msg)) if msg.contains("high_severity_window_sec")
        );
    }

    #[test]
    fn rejects_durations_longer_than_a_day() {
        let window = SustainPolicyParams { window_sec: 1e13, ..params() };
        let hs = SustainPolicyParams { high_severity_window_sec: 1e13, ..params() };
        assert_matches!(SustainPolicy::new(window), Err(CoreError::Validation(_)));
        assert_matches!(SustainPolicy::new(hs), Err(CoreError::Validation(_)));
    }

    #[test]
    fn deserialising_invalid_policy_fails() {
        let json = r#"{"window_sec":10,"majority_fraction":0.7,"gap_budget_sec":12,
            "cumulative_min_sec":5,"high_severity_delta":20,"high_severity_window_sec":8}"#;
        assert!(serde_json::from_str::<SustainPolicy>(json).is_err());
    }

    #[test]
    fn majority_path_fires_and_is_named() {
        let policy = SustainPolicy::new(params()).unwrap();
        let mut tracker = ConditionTracker::new(Condition::Slouch);
        // 1s spacing: above, above, below, repeated; fraction 2/3, gaps of 1s.
        for i in 0..12 {
            let value = if i % 3 == 2 { 5.0 } else { 16.0 };
            tracker.record(t(i as f64), value, THRESHOLDS);
        }
        let result = tracker.evaluate(&policy, 16.0, THRESHOLDS, t(11.0));
        assert!(result.triggered);
        assert_eq!(result.path, Some(DetectionPath::Majority));
        assert!(result.reason.starts_with("Slouch (majority): Neck 16.0° > 13.0°"));
    }

    #[test]
    fn majority_is_monotonic_in_above_fraction() {
        let policy = SustainPolicy::new(params()).unwrap();
        // 3 of 5 above = 60%: triggers.
        let pattern = [true, false, true, false, true];
        let mut tracker = ConditionTracker::new(Condition::Slouch);
        for (i, above) in pattern.iter().enumerate() {
            tracker.record(t(i as f64), if *above { 16.0 } else { 5.0 }, THRESHOLDS);
        }
        assert!(tracker.evaluate(&policy, 5.0, THRESHOLDS, t(4.0)).triggered);

        // Flip one sample to below: 2 of 5 = 40%, and cumulative is tiny.
        let mut tracker = ConditionTracker::new(Condition::Slouch);
        for (i, above) in pattern.iter().enumerate() {
            let above = *above && i != 4;
            tracker.record(t(i as f64), if above { 16.0 } else { 5.0 }, THRESHOLDS);
        }
        assert!(!tracker.evaluate(&policy, 5.0, THRESHOLDS, t(4.0)).triggered);
    }

    #[test]
    fn long_gap_blocks_majority_but_cumulative_can_fire() {
        let policy = SustainPolicy::new(params()).unwrap();
        let mut tracker = ConditionTracker::new(Condition::ForwardLean);
        // 20s above, 5s below (gap > 3s), then above again.
        for i in 0..20 {
            tracker.record(t(i as f64), 16.0, THRESHOLDS);
        }
        for i in 20..25 {
            tracker.record(t(i as f64), 5.0, THRESHOLDS);
        }
        tracker.record(t(25.0), 16.0, THRESHOLDS);

        let result = tracker.evaluate(&policy, 16.0, THRESHOLDS, t(25.0));
        assert_eq!(result.path, Some(DetectionPath::Cumulative));
        assert!(result.reason.starts_with("Forward lean (cumulative): Torso"));
    }

    #[test]
    fn high_severity_needs_continuous_exceedance() {
        let policy = SustainPolicy::new(params()).unwrap();
        let mut tracker = ConditionTracker::new(Condition::Slouch);

        for i in 0..8 {
            let result = tracker.evaluate(&policy, 30.0, THRESHOLDS, t(i as f64));
            assert_ne!(result.path, Some(DetectionPath::HighSeverity));
        }
        let result = tracker.evaluate(&policy, 30.0, THRESHOLDS, t(8.0));
        assert_eq!(result.path, Some(DetectionPath::HighSeverity));
        assert_eq!(result.reason, "High-severity slouch: Neck 30.0° > 25.0° for 8s");

        // A dip clears the marker.
        tracker.evaluate(&policy, 10.0, THRESHOLDS, t(9.0));
        let result = tracker.evaluate(&policy, 30.0, THRESHOLDS, t(10.0));
        assert_ne!(result.path, Some(DetectionPath::HighSeverity));
    }

    #[test]
    fn reset_clears_window_and_marker() {
        let policy = SustainPolicy::new(params()).unwrap();
        let mut tracker = ConditionTracker::new(Condition::LateralLean);
        tracker.record(t(0.0), 16.0, THRESHOLDS);
        tracker.evaluate(&policy, 30.0, THRESHOLDS, t(0.0));
        tracker.reset();

        assert_eq!(tracker.stats(t(1.0), 30.0).total_count, 0);
        let result = tracker.evaluate(&policy, 30.0, THRESHOLDS, t(7.0));
        assert!(!result.triggered);
    }
}
