//! State machine configuration: sensitivity presets, per-condition sustain
//! policies and the lateral threshold conversion.
//!
//! The lateral lean metric is a shoulder-height ratio, while its thresholds are
//! configured in centimetres. The conversion assumes a typical shoulder width
//! and a scale factor; both are approximations and can be tuned per user.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::sustain::{SustainPolicy, SustainPolicyParams};
use crate::threshold_validation::{
    validate_duration, validate_non_negative, validate_positive, validate_range,
    validate_unit_range,
};

/// Typical adult shoulder width used to convert centimetres to lean ratio.
pub const DEFAULT_SHOULDER_WIDTH_CM: f64 = 40.0;

/// Scale applied to the cm/shoulder-width ratio.
pub const DEFAULT_LATERAL_SCALE_FACTOR: f64 = 2.0;

/// Floor for the ordinary lateral threshold.
pub const DEFAULT_MIN_LATERAL_THRESHOLD: f64 = 0.05;

/// Sensitivity presets, from most to least responsive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensitivityPreset {
    #[default]
    Sensitive,
    Standard,
    Conservative,
}

impl SensitivityPreset {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensitivityPreset::Sensitive => "sensitive",
            SensitivityPreset::Standard => "standard",
            SensitivityPreset::Conservative => "conservative",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "sensitive" => Some(SensitivityPreset::Sensitive),
            "standard" => Some(SensitivityPreset::Standard),
            "conservative" => Some(SensitivityPreset::Conservative),
            _ => None,
        }
    }

    /// `(slouch_deg, forward_lean_deg, lateral_lean_cm)` threshold deltas.
    fn deltas(&self) -> (f64, f64, f64) {
        match self {
            SensitivityPreset::Sensitive => (8.0, 8.0, 3.0),
            SensitivityPreset::Standard => (10.0, 10.0, 3.5),
            SensitivityPreset::Conservative => (12.0, 12.0, 4.0),
        }
    }

    /// `[slouch, forward_lean, lateral_lean]` sustain parameters.
    fn policy_params(&self) -> [SustainPolicyParams; 3] {
        let p = |window_sec, majority_fraction, gap_budget_sec, cumulative_min_sec, hs_delta, hs_window| {
            SustainPolicyParams {
                window_sec,
                majority_fraction,
                gap_budget_sec,
                cumulative_min_sec,
                high_severity_delta: hs_delta,
                high_severity_window_sec: hs_window,
            }
        };
        match self {
            SensitivityPreset::Sensitive => [
                p(30.0, 0.60, 3.0, 18.0, 20.0, 8.0),
                p(30.0, 0.60, 3.0, 18.0, 18.0, 8.0),
                p(40.0, 0.60, 3.0, 24.0, 6.0, 10.0),
            ],
            SensitivityPreset::Standard => [
                p(35.0, 0.65, 3.0, 23.0, 22.0, 10.0),
                p(35.0, 0.65, 3.0, 23.0, 20.0, 10.0),
                p(45.0, 0.65, 3.0, 29.0, 7.0, 12.0),
            ],
            SensitivityPreset::Conservative => [
                p(40.0, 0.70, 2.0, 28.0, 25.0, 12.0),
                p(40.0, 0.70, 2.0, 28.0, 22.0, 12.0),
                p(50.0, 0.70, 2.0, 35.0, 8.0, 15.0),
            ],
        }
    }
}

/// Full state machine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateConfig {
    pub preset: SensitivityPreset,

    /// Neck flexion degrees above baseline that count as slouching.
    pub slouch_threshold_deg: f64,
    /// Torso flexion degrees above baseline that count as leaning forward.
    pub forward_lean_threshold_deg: f64,
    /// Shoulder asymmetry in centimetres that counts as leaning sideways.
    pub lateral_lean_threshold_cm: f64,

    pub slouch_policy: SustainPolicy,
    pub forward_lean_policy: SustainPolicy,
    pub lateral_lean_policy: SustainPolicy,

    pub recovery_window_sec: f64,
    pub recovery_majority_fraction: f64,

    /// EMA factor for baseline drift while in `Good`. 0 disables drift.
    pub drift_alpha: f64,

    pub confidence_threshold: f64,

    pub typical_shoulder_width_cm: f64,
    pub lateral_scale_factor: f64,
    pub min_lateral_threshold: f64,
}

impl StateConfig {
    /// Build the configuration for a preset.
    pub fn from_preset(preset: SensitivityPreset) -> Self {
        let (slouch, forward, lateral_cm) = preset.deltas();
        let [slouch_policy, forward_policy, lateral_policy] = preset.policy_params();

        Self {
            preset,
            slouch_threshold_deg: slouch,
            forward_lean_threshold_deg: forward,
            lateral_lean_threshold_cm: lateral_cm,
            slouch_policy: SustainPolicy::preset(slouch_policy),
            forward_lean_policy: SustainPolicy::preset(forward_policy),
            lateral_lean_policy: SustainPolicy::preset(lateral_policy),
            recovery_window_sec: 12.0,
            recovery_majority_fraction: 0.60,
            drift_alpha: 0.0,
            confidence_threshold: 0.5,
            typical_shoulder_width_cm: DEFAULT_SHOULDER_WIDTH_CM,
            lateral_scale_factor: DEFAULT_LATERAL_SCALE_FACTOR,
            min_lateral_threshold: DEFAULT_MIN_LATERAL_THRESHOLD,
        }
    }

    /// Check the scalar fields; sustain policies validate themselves.
    pub fn validate(&self) -> Result<(), CoreError> {
        validate_non_negative(self.slouch_threshold_deg, "slouch_threshold_deg")?;
        validate_non_negative(self.forward_lean_threshold_deg, "forward_lean_threshold_deg")?;
        validate_non_negative(self.lateral_lean_threshold_cm, "lateral_lean_threshold_cm")?;
        validate_positive(self.recovery_window_sec, "recovery_window_sec")?;
        validate_duration(self.recovery_window_sec, "recovery_window_sec")?;
        validate_range(self.recovery_majority_fraction, 0.5, 1.0, "recovery_majority_fraction")?;
        validate_unit_range(self.drift_alpha, "drift_alpha")?;
        validate_unit_range(self.confidence_threshold, "confidence_threshold")?;
        validate_positive(self.typical_shoulder_width_cm, "typical_shoulder_width_cm")?;
        validate_positive(self.lateral_scale_factor, "lateral_scale_factor")?;
        validate_non_negative(self.min_lateral_threshold, "min_lateral_threshold")?;
        Ok(())
    }

    /// Convert a centimetre delta to an absolute lean-ratio threshold above
    /// `baseline`, without any floor.
    pub fn lateral_ratio_threshold(&self, baseline: f64, delta_cm: f64) -> f64 {
        let ratio = delta_cm / self.typical_shoulder_width_cm;
        baseline + baseline * ratio * self.lateral_scale_factor
    }

    /// Ordinary lateral threshold for `baseline` with `extra_cm` added to the
    /// configured delta, floored at `min_lateral_threshold`.
    pub fn lateral_threshold(&self, baseline: f64, extra_cm: f64) -> f64 {
        self.lateral_ratio_threshold(baseline, self.lateral_lean_threshold_cm + extra_cm)
            .max(self.min_lateral_threshold)
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self::from_preset(SensitivityPreset::Sensitive)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_are_valid() {
        for preset in [
            SensitivityPreset::Sensitive,
            SensitivityPreset::Standard,
            SensitivityPreset::Conservative,
        ] {
            let config = StateConfig::from_preset(preset);
            assert_eq!(config.preset, preset);
            assert!(config.validate().is_ok());
            for policy in preset.policy_params() {
                assert!(SustainPolicy::new(policy).is_ok(), "{preset:?} {policy:?}");
            }
        }
    }

    #[test]
    fn default_is_sensitive_preset() {
        let config = StateConfig::default();
        assert_eq!(config.preset, SensitivityPreset::Sensitive);
        assert_eq!(config.slouch_threshold_deg, 8.0);
        assert_eq!(config.recovery_window_sec, 12.0);
        assert_eq!(config.drift_alpha, 0.0);
    }

    #[test]
    fn conservative_preset_values() {
        let config = StateConfig::from_preset(SensitivityPreset::Conservative);
        assert_eq!(config.slouch_threshold_deg, 12.0);
        assert_eq!(config.lateral_lean_threshold_cm, 4.0);
        assert_eq!(config.slouch_policy.window_sec(), 40.0);
        assert_eq!(config.slouch_policy.gap_budget_sec(), 2.0);
        assert_eq!(config.lateral_lean_policy.high_severity_window_sec(), 15.0);
    }

    #[test]
    fn lateral_threshold_scales_with_baseline() {
        let config = StateConfig::default();
        // 0.1 + 0.1 * (3 / 40) * 2 = 0.115
        assert!((config.lateral_threshold(0.1, 0.0) - 0.115).abs() < 1e-9);
        // Dismiss backoff adds 1 cm: 0.1 + 0.1 * (4 / 40) * 2 = 0.12
        assert!((config.lateral_threshold(0.1, 1.0) - 0.12).abs() < 1e-9);
    }

    #[test]
    fn lateral_threshold_is_floored() {
        let config = StateConfig::default();
        assert_eq!(config.lateral_threshold(0.01, 0.0), 0.05);
    }

    #[test]
    fn preset_names_round_trip() {
        assert_eq!(
            SensitivityPreset::from_str("standard"),
            Some(SensitivityPreset::Standard)
        );
        assert_eq!(SensitivityPreset::from_str("bogus"), None);
    }

    #[test]
    fn validate_rejects_bad_recovery_fraction() {
        let mut config = StateConfig::default();
        config.recovery_majority_fraction = 0.3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_recovery_window_beyond_a_day() {
        let mut config = StateConfig::default();
        config.recovery_window_sec = 1e13;
        assert!(config.validate().is_err());
    }
}
