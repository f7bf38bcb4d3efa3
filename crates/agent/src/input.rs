//! Newline-delimited JSON input protocol.
//!
//! One message per line, tagged by `type`:
//!
//! ```text
//! {"type":"sample","neck_flexion_deg":14.2,"torso_flexion_deg":6.0,"lateral_lean_ratio":0.03,"confidence":0.92}
//! {"type":"action","action":"dismiss"}
//! ```
//!
//! `timestamp` (RFC 3339) is optional on both and defaults to receipt time.

use std::time::Instant;

use chrono::{DateTime, Utc};
use posture_core::metrics::MetricSample;
use posture_core::nudge::UserAction;
use posture_core::types::add_secs;
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputMessage {
    Sample {
        neck_flexion_deg: f64,
        torso_flexion_deg: f64,
        lateral_lean_ratio: f64,
        confidence: f64,
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
    },
    Action {
        action: UserAction,
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
    },
}

impl InputMessage {
    /// Parse one line. Blank lines yield `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Self>, serde_json::Error> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        serde_json::from_str(line).map(Some)
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            InputMessage::Sample { timestamp, .. } | InputMessage::Action { timestamp, .. } => {
                *timestamp
            }
        }
    }

    /// The metric sample, stamped with `at` if it carried no timestamp.
    pub fn sample(&self, at: DateTime<Utc>) -> Option<MetricSample> {
        match *self {
            InputMessage::Sample {
                neck_flexion_deg,
                torso_flexion_deg,
                lateral_lean_ratio,
                confidence,
                timestamp,
            } => Some(MetricSample::new(
                neck_flexion_deg,
                torso_flexion_deg,
                lateral_lean_ratio,
                confidence,
                timestamp.unwrap_or(at),
            )),
            InputMessage::Action { .. } => None,
        }
    }
}

/// Monitor time, anchored to the most recent input timestamp.
///
/// Live input without timestamps tracks the wall clock. Replayed input
/// advances with the replayed timestamps, and timers (DND queue, cooldown
/// status) measure from there.
#[derive(Debug, Clone, Copy)]
pub struct InputClock {
    anchor: DateTime<Utc>,
    anchored_at: Instant,
}

impl InputClock {
    /// Start the clock at `anchor`.
    pub fn new(anchor: DateTime<Utc>) -> Self {
        Self {
            anchor,
            anchored_at: Instant::now(),
        }
    }

    /// Re-anchor on an input timestamp. Never moves backwards.
    pub fn observe(&mut self, at: DateTime<Utc>) {
        if at >= self.now() {
            self.anchor = at;
            self.anchored_at = Instant::now();
        }
    }

    /// The anchor plus the real time elapsed since it was set.
    pub fn now(&self) -> DateTime<Utc> {
        add_secs(self.anchor, self.anchored_at.elapsed().as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::TimeZone;

    #[test]
    fn parses_sample_without_timestamp() {
        let msg = InputMessage::parse(
            r#"{"type":"sample","neck_flexion_deg":14.2,"torso_flexion_deg":6,"lateral_lean_ratio":0.03,"confidence":0.9}"#,
        )
        .unwrap()
        .unwrap();
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap();
        let sample = msg.sample(at).unwrap();
        assert_eq!(sample.neck_flexion_deg, 14.2);
        assert_eq!(sample.timestamp, at);
    }

    #[test]
    fn sample_timestamp_is_kept() {
        let msg = InputMessage::parse(
            r#"{"type":"sample","neck_flexion_deg":1,"torso_flexion_deg":2,"lateral_lean_ratio":0.01,"confidence":0.9,"timestamp":"2025-02-01T08:00:00Z"}"#,
        )
        .unwrap()
        .unwrap();
        let expected = Utc.with_ymd_and_hms(2025, 2, 1, 8, 0, 0).unwrap();
        assert_eq!(msg.timestamp(), Some(expected));
        assert_eq!(msg.sample(Utc::now()).unwrap().timestamp, expected);
    }

    #[test]
    fn parses_actions() {
        let msg = InputMessage::parse(r#"{"type":"action","action":"snooze"}"#)
            .unwrap()
            .unwrap();
        assert_matches!(msg, InputMessage::Action { action: UserAction::Snooze, timestamp: None });
        assert!(msg.sample(Utc::now()).is_none());
    }

    #[test]
    fn blank_lines_skipped_and_garbage_rejected() {
        assert_matches!(InputMessage::parse("   "), Ok(None));
        assert!(InputMessage::parse("{\"type\":\"frame\"}").is_err());
        assert!(InputMessage::parse(r#"{"type":"action","action":"later"}"#).is_err());
    }

    #[test]
    fn clock_never_moves_backwards() {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap();
        let mut clock = InputClock::new(start);
        clock.observe(start + chrono::Duration::seconds(30));
        clock.observe(start);
        assert!(clock.now() >= start + chrono::Duration::seconds(30));
    }
}
