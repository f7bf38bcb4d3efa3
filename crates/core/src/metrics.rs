//! Posture metric samples and posture states.

use serde::{Deserialize, Serialize};

use crate::types::Timestamp;

/// One processed frame's worth of posture metrics.
///
/// Produced by the external pose provider; the smoothed copy feeds the
/// state machine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub neck_flexion_deg: f64,
    pub torso_flexion_deg: f64,
    /// Shoulder height difference normalised by shoulder width.
    pub lateral_lean_ratio: f64,
    /// Mean landmark confidence in `[0, 1]`.
    pub confidence: f64,
    pub timestamp: Timestamp,
}

impl MetricSample {
    pub fn new(
        neck_flexion_deg: f64,
        torso_flexion_deg: f64,
        lateral_lean_ratio: f64,
        confidence: f64,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            neck_flexion_deg,
            torso_flexion_deg,
            lateral_lean_ratio,
            confidence,
            timestamp,
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            neck_flexion: self.neck_flexion_deg,
            torso_flexion: self.torso_flexion_deg,
            lateral_lean: self.lateral_lean_ratio,
            confidence: self.confidence,
        }
    }
}

/// Metric values captured on a state transition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub neck_flexion: f64,
    pub torso_flexion: f64,
    pub lateral_lean: f64,
    pub confidence: f64,
}

// ---------------------------------------------------------------------------
// PostureState
// ---------------------------------------------------------------------------

/// The monitored subject's posture classification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostureState {
    #[default]
    Good,
    Slouch,
    ForwardLean,
    LateralLean,
    Paused,
}

impl PostureState {
    pub const ALL: [PostureState; 5] = [
        PostureState::Good,
        PostureState::Slouch,
        PostureState::ForwardLean,
        PostureState::LateralLean,
        PostureState::Paused,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PostureState::Good => "good",
            PostureState::Slouch => "slouch",
            PostureState::ForwardLean => "forward_lean",
            PostureState::LateralLean => "lateral_lean",
            PostureState::Paused => "paused",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|state| state.as_str() == s)
    }

    /// Whether this state represents a posture problem worth nudging about.
    pub fn is_issue(&self) -> bool {
        matches!(
            self,
            PostureState::Slouch | PostureState::ForwardLean | PostureState::LateralLean
        )
    }
}

impl std::fmt::Display for PostureState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_names_round_trip() {
        for state in PostureState::ALL {
            assert_eq!(PostureState::from_str(state.as_str()), Some(state));
        }
        assert_eq!(PostureState::from_str("hunched"), None);
    }

    #[test]
    fn serde_uses_snake_case_names() {
        let json = serde_json::to_string(&PostureState::ForwardLean).unwrap();
        assert_eq!(json, "\"forward_lean\"");
    }

    #[test]
    fn only_posture_problems_are_issues() {
        assert!(PostureState::Slouch.is_issue());
        assert!(PostureState::LateralLean.is_issue());
        assert!(!PostureState::Good.is_issue());
        assert!(!PostureState::Paused.is_issue());
    }
}
