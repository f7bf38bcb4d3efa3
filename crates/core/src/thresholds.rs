//! Absolute detection thresholds derived from baselines and deltas.

use serde::{Deserialize, Serialize};

use crate::calibration::CalibrationBaseline;
use crate::state_config::StateConfig;
use crate::sustain::{Condition, ConditionThresholds};

/// Reference values thresholds are measured from.
///
/// The state machine keeps a drifting copy seeded from the calibration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Baselines {
    pub neck_deg: f64,
    pub torso_deg: f64,
    pub lateral_ratio: f64,
}

impl From<&CalibrationBaseline> for Baselines {
    fn from(baseline: &CalibrationBaseline) -> Self {
        Self {
            neck_deg: baseline.neck_flexion_baseline,
            torso_deg: baseline.torso_flexion_baseline,
            lateral_ratio: baseline.lateral_lean_baseline,
        }
    }
}

/// Extra deltas added on top of the configured ones (dismiss backoff).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ThresholdOffsets {
    pub neck_deg: f64,
    pub torso_deg: f64,
    pub lateral_cm: f64,
}

impl ThresholdOffsets {
    pub fn is_zero(&self) -> bool {
        self.neck_deg == 0.0 && self.torso_deg == 0.0 && self.lateral_cm == 0.0
    }
}

/// Ordinary and high-severity thresholds for every condition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AbsoluteThresholds {
    pub slouch: ConditionThresholds,
    pub forward_lean: ConditionThresholds,
    pub lateral_lean: ConditionThresholds,
}

impl AbsoluteThresholds {
    /// Compute thresholds for `baselines` under `config`, raised by `offsets`.
    ///
    /// Offsets apply to the ordinary thresholds only. The lateral high-severity
    /// threshold is never allowed below the ordinary lateral threshold.
    pub fn compute(config: &StateConfig, baselines: &Baselines, offsets: ThresholdOffsets) -> Self {
        let lateral = config.lateral_threshold(baselines.lateral_ratio, offsets.lateral_cm);
        let lateral_high = config
            .lateral_ratio_threshold(
                baselines.lateral_ratio,
                config.lateral_lean_policy.high_severity_delta(),
            )
            .max(lateral);

        Self {
            slouch: ConditionThresholds {
                ordinary: baselines.neck_deg + config.slouch_threshold_deg + offsets.neck_deg,
                high_severity: baselines.neck_deg + config.slouch_policy.high_severity_delta(),
            },
            forward_lean: ConditionThresholds {
                ordinary: baselines.torso_deg
                    + config.forward_lean_threshold_deg
                    + offsets.torso_deg,
                high_severity: baselines.torso_deg
                    + config.forward_lean_policy.high_severity_delta(),
            },
            lateral_lean: ConditionThresholds {
                ordinary: lateral,
                high_severity: lateral_high,
            },
        }
    }

    pub fn get(&self, condition: Condition) -> ConditionThresholds {
        match condition {
            Condition::Slouch => self.slouch,
            Condition::ForwardLean => self.forward_lean,
            Condition::LateralLean => self.lateral_lean,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASELINES: Baselines = Baselines {
        neck_deg: 5.0,
        torso_deg: 3.0,
        lateral_ratio: 0.1,
    };

    #[test]
    fn ordinary_thresholds_add_configured_deltas() {
        let t = AbsoluteThresholds::compute(&StateConfig::default(), &BASELINES, Default::default());
        assert_eq!(t.slouch.ordinary, 13.0);
        assert_eq!(t.forward_lean.ordinary, 11.0);
        assert!((t.lateral_lean.ordinary - 0.115).abs() < 1e-9);
        assert_eq!(t.slouch.high_severity, 25.0);
        assert_eq!(t.forward_lean.high_severity, 21.0);
        // 0.1 + 0.1 * (6 / 40) * 2 = 0.13
        assert!((t.lateral_lean.high_severity - 0.13).abs() < 1e-9);
    }

    #[test]
    fn offsets_raise_ordinary_thresholds_only() {
        let offsets = ThresholdOffsets {
            neck_deg: 5.0,
            torso_deg: 5.0,
            lateral_cm: 1.0,
        };
        let t = AbsoluteThresholds::compute(&StateConfig::default(), &BASELINES, offsets);
        assert_eq!(t.slouch.ordinary, 18.0);
        assert_eq!(t.slouch.high_severity, 25.0);
        assert!((t.lateral_lean.ordinary - 0.12).abs() < 1e-9);
    }

    #[test]
    fn lateral_high_severity_never_below_ordinary() {
        let tiny = Baselines {
            lateral_ratio: 0.001,
            ..BASELINES
        };
        let t = AbsoluteThresholds::compute(&StateConfig::default(), &tiny, Default::default());
        assert_eq!(t.lateral_lean.ordinary, 0.05);
        assert_eq!(t.lateral_lean.high_severity, 0.05);
    }
}
