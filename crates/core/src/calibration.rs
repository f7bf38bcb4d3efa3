//! Calibration baseline and its aggregation from captured samples.
//!
//! A calibration session captures metrics while the user sits upright, keeps
//! only confident samples, and reduces each channel to its median.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::metrics::MetricSample;
use crate::types::Timestamp;

/// Samples below this confidence are ignored during capture.
pub const MIN_CALIBRATION_CONFIDENCE: f64 = 0.5;

/// Minimum number of accepted samples (about 5s at 10 fps).
pub const MIN_CALIBRATION_SAMPLES: usize = 50;

/// A user's neutral posture, captured once and never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationBaseline {
    pub neck_flexion_baseline: f64,
    pub torso_flexion_baseline: f64,
    pub lateral_lean_baseline: f64,
    pub shoulder_width_proxy: f64,
    pub sample_count: usize,
    pub confidence_mean: f64,
    pub calibrated_at: Timestamp,
}

// ---------------------------------------------------------------------------
// Progress reporting
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationPhase {
    Preparing,
    Capturing,
    Aggregating,
    Saving,
    Done,
    Error,
}

impl CalibrationPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            CalibrationPhase::Preparing => "preparing",
            CalibrationPhase::Capturing => "capturing",
            CalibrationPhase::Aggregating => "aggregating",
            CalibrationPhase::Saving => "saving",
            CalibrationPhase::Done => "done",
            CalibrationPhase::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CalibrationPhase::Done | CalibrationPhase::Error)
    }
}

/// Progress event emitted at each calibration phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationProgress {
    pub phase: CalibrationPhase,
    pub samples_captured: usize,
    pub confidence_mean: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_sec: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baseline: Option<CalibrationBaseline>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl CalibrationProgress {
    pub fn new(phase: CalibrationPhase, samples_captured: usize, confidence_mean: f64) -> Self {
        Self {
            phase,
            samples_captured,
            confidence_mean,
            elapsed_sec: None,
            baseline: None,
            error_message: None,
        }
    }

    pub fn done(baseline: CalibrationBaseline) -> Self {
        Self {
            baseline: Some(baseline),
            ..Self::new(
                CalibrationPhase::Done,
                baseline.sample_count,
                baseline.confidence_mean,
            )
        }
    }

    pub fn error(samples_captured: usize, message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
            ..Self::new(CalibrationPhase::Error, samples_captured, 0.0)
        }
    }
}

// ---------------------------------------------------------------------------
// Collector
// ---------------------------------------------------------------------------

/// Accumulates calibration samples and aggregates them into a baseline.
#[derive(Debug, Clone, Default)]
pub struct CalibrationCollector {
    neck: Vec<f64>,
    torso: Vec<f64>,
    lateral: Vec<f64>,
    confidence_sum: f64,
}

impl CalibrationCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept a sample if it is confident enough. Returns whether it was kept.
    pub fn push(&mut self, sample: &MetricSample) -> bool {
        if sample.confidence < MIN_CALIBRATION_CONFIDENCE {
            return false;
        }
        self.neck.push(sample.neck_flexion_deg);
        self.torso.push(sample.torso_flexion_deg);
        self.lateral.push(sample.lateral_lean_ratio);
        self.confidence_sum += sample.confidence;
        true
    }

    pub fn len(&self) -> usize {
        self.neck.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neck.is_empty()
    }

    pub fn confidence_mean(&self) -> f64 {
        if self.is_empty() {
            0.0
        } else {
            self.confidence_sum / self.len() as f64
        }
    }

    /// Progress event for the current capture state.
    pub fn progress(&self, phase: CalibrationPhase) -> CalibrationProgress {
        CalibrationProgress::new(phase, self.len(), self.confidence_mean())
    }

    /// Reduce the captured samples to a baseline of per-channel medians.
    pub fn aggregate(&self, calibrated_at: Timestamp) -> Result<CalibrationBaseline, CoreError> {
        if self.len() < MIN_CALIBRATION_SAMPLES {
            return Err(CoreError::InsufficientSamples {
                captured: self.len(),
                required: MIN_CALIBRATION_SAMPLES,
            });
        }
        let lateral = median(&self.lateral);
        Ok(CalibrationBaseline {
            neck_flexion_baseline: median(&self.neck),
            torso_flexion_baseline: median(&self.torso),
            lateral_lean_baseline: lateral,
            shoulder_width_proxy: lateral,
            sample_count: self.len(),
            confidence_mean: self.confidence_mean(),
            calibrated_at,
        })
    }
}

/// Median of a non-empty slice; even lengths average the middle pair.
fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::Utc;

    fn sample(neck: f64, confidence: f64) -> MetricSample {
        MetricSample::new(neck, neck / 2.0, 0.02, confidence, Utc::now())
    }

    #[test]
    fn low_confidence_samples_are_rejected() {
        let mut collector = CalibrationCollector::new();
        assert!(!collector.push(&sample(5.0, 0.3)));
        assert!(collector.push(&sample(5.0, 0.5)));
        assert_eq!(collector.len(), 1);
    }

    #[test]
    fn aggregate_requires_minimum_samples() {
        let mut collector = CalibrationCollector::new();
        for _ in 0..49 {
            collector.push(&sample(5.0, 0.9));
        }
        assert_matches!(
            collector.aggregate(Utc::now()),
            Err(CoreError::InsufficientSamples { captured: 49, required: 50 })
        );
    }

    #[test]
    fn aggregate_uses_medians() {
        let mut collector = CalibrationCollector::new();
        for i in 0..60 {
            // One wild outlier must not move the median.
            let neck = if i == 0 { 80.0 } else { 6.0 + (i % 3) as f64 };
            collector.push(&sample(neck, 0.8));
        }
        let baseline = collector.aggregate(Utc::now()).unwrap();
        assert_eq!(baseline.neck_flexion_baseline, 7.0);
        assert_eq!(baseline.sample_count, 60);
        assert!((baseline.confidence_mean - 0.8).abs() < 1e-9);
        assert_eq!(baseline.shoulder_width_proxy, baseline.lateral_lean_baseline);
    }

    #[test]
    fn median_of_even_length_averages_middle() {
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), 2.5);
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
    }

    #[test]
    fn progress_events_share_one_shape() {
        let error = CalibrationProgress::error(12, "Insufficient data captured");
        assert_eq!(error.phase, CalibrationPhase::Error);
        assert!(error.phase.is_terminal());
        let json = serde_json::to_value(&error).unwrap();
        assert_eq!(json["phase"], "error");
        assert!(json.get("baseline").is_none());
    }
}
