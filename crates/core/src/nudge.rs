//! Nudge policy configuration and the records the policy keeps.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::metrics::PostureState;
use crate::state_machine::Diagnostics;
use crate::thresholds::ThresholdOffsets;
use crate::types::Timestamp;

/// Cooldown, backoff, dedupe and DND settings. All durations in seconds,
/// at most one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct NudgeConfig {
    /// Global quiet period after the user clicks Done.
    #[validate(range(min = 0.0, max = 86400.0))]
    pub cooldown_done_sec: f64,
    /// Global quiet period after the user clicks Snooze.
    #[validate(range(min = 0.0, max = 86400.0))]
    pub cooldown_snooze_sec: f64,

    #[validate(range(min = 0.0))]
    pub dismiss_backoff_neck_deg: f64,
    #[validate(range(min = 0.0))]
    pub dismiss_backoff_torso_deg: f64,
    #[validate(range(min = 0.0))]
    pub dismiss_backoff_lateral_cm: f64,
    #[validate(range(min = 0.0, max = 86400.0))]
    pub dismiss_backoff_duration_sec: f64,

    /// Minimum spacing between nudges for the same state.
    #[validate(range(min = 0.0, max = 86400.0))]
    pub dedupe_window_sec: f64,

    /// How long a nudge queued under DND stays deliverable.
    #[validate(range(min = 0.0, max = 86400.0))]
    pub nudge_expiry_sec: f64,
    pub respect_dnd: bool,

    pub allow_stacking: bool,
    pub high_severity_bypass_dedupe: bool,
}

impl Default for NudgeConfig {
    fn default() -> Self {
        Self {
            cooldown_done_sec: 1800.0,
            cooldown_snooze_sec: 900.0,
            dismiss_backoff_neck_deg: 5.0,
            dismiss_backoff_torso_deg: 5.0,
            dismiss_backoff_lateral_cm: 1.0,
            dismiss_backoff_duration_sec: 3600.0,
            dedupe_window_sec: 1200.0,
            nudge_expiry_sec: 2700.0,
            respect_dnd: true,
            allow_stacking: false,
            high_severity_bypass_dedupe: true,
        }
    }
}

impl NudgeConfig {
    pub fn dismiss_offsets(&self) -> ThresholdOffsets {
        ThresholdOffsets {
            neck_deg: self.dismiss_backoff_neck_deg,
            torso_deg: self.dismiss_backoff_torso_deg,
            lateral_cm: self.dismiss_backoff_lateral_cm,
        }
    }
}

/// Feedback the user gives on a delivered nudge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserAction {
    Done,
    Snooze,
    Dismiss,
}

impl UserAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserAction::Done => "done",
            UserAction::Snooze => "snooze",
            UserAction::Dismiss => "dismiss",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "done" => Some(UserAction::Done),
            "snooze" => Some(UserAction::Snooze),
            "dismiss" => Some(UserAction::Dismiss),
            _ => None,
        }
    }
}

/// Temporary threshold relaxation set by a Dismiss action.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdBackoff {
    pub offsets: ThresholdOffsets,
    pub until: Timestamp,
}

impl ThresholdBackoff {
    pub fn is_active(&self, now: Timestamp) -> bool {
        now < self.until
    }

    /// The offsets while active, zero afterwards.
    pub fn offsets_at(&self, now: Timestamp) -> ThresholdOffsets {
        if self.is_active(now) {
            self.offsets
        } else {
            ThresholdOffsets::default()
        }
    }
}

/// Effective absolute thresholds quoted in a nudge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EffectiveThresholds {
    pub neck_deg: f64,
    pub torso_deg: f64,
    pub lateral_ratio: f64,
}

/// A nudge held back while Do-Not-Disturb is on. At most one exists.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueuedNudge {
    pub state: PostureState,
    pub reason: String,
    pub queued_at: Timestamp,
    pub expires_at: Timestamp,
    pub thresholds: EffectiveThresholds,
    pub diagnostics: Option<Diagnostics>,
}

impl QueuedNudge {
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn defaults_are_valid() {
        let config = NudgeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cooldown_done_sec, 1800.0);
        assert!(config.respect_dnd);
        assert!(!config.allow_stacking);
    }

    #[test]
    fn negative_durations_fail_validation() {
        let config = NudgeConfig {
            dedupe_window_sec: -1.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn durations_longer_than_a_day_fail_validation() {
        let config = NudgeConfig {
            cooldown_done_sec: 1e13,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        let config = NudgeConfig {
            nudge_expiry_sec: 86_401.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: NudgeConfig = serde_json::from_str(r#"{"respect_dnd": false}"#).unwrap();
        assert!(!config.respect_dnd);
        assert_eq!(config.nudge_expiry_sec, 2700.0);
    }

    #[test]
    fn backoff_offsets_expire() {
        let now = Utc::now();
        let backoff = ThresholdBackoff {
            offsets: NudgeConfig::default().dismiss_offsets(),
            until: now + Duration::seconds(60),
        };
        assert_eq!(backoff.offsets_at(now).neck_deg, 5.0);
        assert!(backoff.offsets_at(now + Duration::seconds(60)).is_zero());
    }
}
