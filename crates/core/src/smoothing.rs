//! Exponential moving average smoothing for metric channels.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::CoreError;
use crate::metrics::MetricSample;
use crate::threshold_validation::validate_smoothing_alpha;

/// Default smoothing factor. Higher is more responsive, lower is smoother.
pub const DEFAULT_EMA_ALPHA: f64 = 0.3;

/// A single-channel exponential moving average.
///
/// The first update adopts the input as-is; subsequent updates blend with
/// `value = alpha * x + (1 - alpha) * value`.
#[derive(Debug, Clone, Copy)]
pub struct Ema {
    alpha: f64,
    value: Option<f64>,
}

impl Ema {
    /// Create an uninitialised average. `alpha` must lie in `(0, 1)`.
    pub fn new(alpha: f64) -> Result<Self, CoreError> {
        validate_smoothing_alpha(alpha, "ema_alpha")?;
        Ok(Self { alpha, value: None })
    }

    pub fn update(&mut self, x: f64) -> f64 {
        let next = match self.value {
            None => x,
            Some(prev) => self.alpha * x + (1.0 - self.alpha) * prev,
        };
        self.value = Some(next);
        next
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }

    pub fn reset(&mut self) {
        self.value = None;
    }
}

/// User-editable smoothing settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SmoothingConfig {
    #[validate(range(exclusive_min = 0.0, exclusive_max = 1.0))]
    pub ema_alpha: f64,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            ema_alpha: DEFAULT_EMA_ALPHA,
        }
    }
}

/// Independent EMAs for the neck, torso and lateral channels.
///
/// Confidence and timestamp pass through unsmoothed.
#[derive(Debug, Clone)]
pub struct MetricSmoother {
    neck: Ema,
    torso: Ema,
    lateral: Ema,
}

impl MetricSmoother {
    pub fn new(config: SmoothingConfig) -> Result<Self, CoreError> {
        config.validate()?;
        let ema = Ema::new(config.ema_alpha)?;
        Ok(Self {
            neck: ema,
            torso: ema,
            lateral: ema,
        })
    }

    /// Feed a raw sample and return its smoothed copy.
    pub fn smooth(&mut self, raw: &MetricSample) -> MetricSample {
        MetricSample {
            neck_flexion_deg: self.neck.update(raw.neck_flexion_deg),
            torso_flexion_deg: self.torso.update(raw.torso_flexion_deg),
            lateral_lean_ratio: self.lateral.update(raw.lateral_lean_ratio),
            confidence: raw.confidence,
            timestamp: raw.timestamp,
        }
    }

    /// Current smoothed values as `(neck, torso, lateral)`, if initialised.
    pub fn current(&self) -> Option<(f64, f64, f64)> {
        Some((self.neck.value()?, self.torso.value()?, self.lateral.value()?))
    }

    pub fn reset(&mut self) {
        self.neck.reset();
        self.torso.reset();
        self.lateral.reset();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn first_update_adopts_input() {
        let mut ema = Ema::new(0.3).unwrap();
        assert_eq!(ema.update(10.0), 10.0);
    }

    #[test]
    fn subsequent_updates_blend() {
        let mut ema = Ema::new(0.5).unwrap();
        ema.update(10.0);
        assert!((ema.update(20.0) - 15.0).abs() < 1e-9);
        assert!((ema.update(20.0) - 17.5).abs() < 1e-9);
    }

    #[test]
    fn reset_returns_to_uninitialised() {
        let mut ema = Ema::new(0.3).unwrap();
        ema.update(10.0);
        ema.reset();
        assert_eq!(ema.value(), None);
        assert_eq!(ema.update(4.0), 4.0);
    }

    #[test]
    fn rejects_alpha_outside_open_unit_interval() {
        assert!(Ema::new(0.0).is_err());
        assert!(Ema::new(1.0).is_err());
        assert!(MetricSmoother::new(SmoothingConfig { ema_alpha: 1.5 }).is_err());
    }

    #[test]
    fn smoother_keeps_channels_independent() {
        let mut smoother = MetricSmoother::new(SmoothingConfig { ema_alpha: 0.5 }).unwrap();
        let now = Utc::now();
        smoother.smooth(&MetricSample::new(10.0, 0.0, 0.1, 0.9, now));
        let out = smoother.smooth(&MetricSample::new(20.0, 4.0, 0.1, 0.8, now));

        assert!((out.neck_flexion_deg - 15.0).abs() < 1e-9);
        assert!((out.torso_flexion_deg - 2.0).abs() < 1e-9);
        assert!((out.lateral_lean_ratio - 0.1).abs() < 1e-9);
        assert_eq!(out.confidence, 0.8);
    }
}
