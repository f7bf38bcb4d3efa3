//! Agent configuration.
//!
//! Process-level settings come from environment variables
//! ([`AgentConfig::from_env`]); detection and nudge tuning comes from a JSON
//! settings file ([`MonitorSettings::load`]).

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use posture_core::error::CoreError;
use posture_core::nudge::NudgeConfig;
use posture_core::smoothing::{SmoothingConfig, DEFAULT_EMA_ALPHA};
use posture_core::state_config::{SensitivityPreset, StateConfig};
use posture_core::sustain::SustainPolicy;
use posture_events::audit_log::AUDIT_LOG_FILE;
use posture_events::status_publisher::STATUS_FILE;
use posture_events::store::{read_json, BaselineStore, StoreError};
use serde::{Deserialize, Serialize};
use validator::Validate;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be {expected}, got '{value}'")]
    InvalidVar {
        var: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("Invalid settings: {0}")]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// AgentConfig
// ---------------------------------------------------------------------------

/// Process configuration loaded from environment variables.
///
/// All fields have defaults suitable for local use.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub storage_dir: PathBuf,
    pub config_file: PathBuf,
    pub status_interval: Duration,
    pub dnd_check_interval: Duration,
    pub ema_alpha: f64,
    /// Log nudges instead of posting them.
    pub dry_run: bool,
    pub calibration_duration: Duration,
}

impl AgentConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                           | Default                 |
    /// |-----------------------------------|-------------------------|
    /// | `POSTURE_STORAGE_DIR`             | `./storage`             |
    /// | `POSTURE_CONFIG_FILE`             | `<storage>/config.json` |
    /// | `POSTURE_STATUS_INTERVAL_MS`      | `1000`                  |
    /// | `POSTURE_DND_CHECK_INTERVAL_SECS` | `5`                     |
    /// | `POSTURE_EMA_ALPHA`               | `0.3`                   |
    /// | `POSTURE_DRY_RUN`                 | `false`                 |
    /// | `POSTURE_CALIBRATION_SECS`        | `25`                    |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let storage_dir = PathBuf::from(
            lookup("POSTURE_STORAGE_DIR").unwrap_or_else(|| "./storage".into()),
        );
        let config_file = lookup("POSTURE_CONFIG_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| storage_dir.join("config.json"));

        let status_interval_ms: u64 = parse_var(
            &lookup,
            "POSTURE_STATUS_INTERVAL_MS",
            1000,
            "a positive integer",
        )?;
        let dnd_check_interval_secs: u64 = parse_var(
            &lookup,
            "POSTURE_DND_CHECK_INTERVAL_SECS",
            5,
            "a positive integer",
        )?;
        let ema_alpha: f64 = parse_var(
            &lookup,
            "POSTURE_EMA_ALPHA",
            DEFAULT_EMA_ALPHA,
            "a number in (0, 1)",
        )?;
        let calibration_secs: u64 =
            parse_var(&lookup, "POSTURE_CALIBRATION_SECS", 25, "a positive integer")?;
        let dry_run = match lookup("POSTURE_DRY_RUN") {
            None => false,
            Some(value) => parse_bool(&value).ok_or(ConfigError::InvalidVar {
                var: "POSTURE_DRY_RUN",
                value,
                expected: "true or false",
            })?,
        };

        if status_interval_ms == 0 {
            return Err(invalid("POSTURE_STATUS_INTERVAL_MS", "0", "a positive integer"));
        }
        if dnd_check_interval_secs == 0 {
            return Err(invalid("POSTURE_DND_CHECK_INTERVAL_SECS", "0", "a positive integer"));
        }
        if calibration_secs == 0 {
            return Err(invalid("POSTURE_CALIBRATION_SECS", "0", "a positive integer"));
        }
        SmoothingConfig { ema_alpha }.validate().map_err(CoreError::from)?;

        Ok(Self {
            storage_dir,
            config_file,
            status_interval: Duration::from_millis(status_interval_ms),
            dnd_check_interval: Duration::from_secs(dnd_check_interval_secs),
            ema_alpha,
            dry_run,
            calibration_duration: Duration::from_secs(calibration_secs),
        })
    }

    pub fn status_path(&self) -> PathBuf {
        self.storage_dir.join(STATUS_FILE)
    }

    pub fn audit_log_path(&self) -> PathBuf {
        self.storage_dir.join(AUDIT_LOG_FILE)
    }

    pub fn baseline_store(&self) -> BaselineStore {
        BaselineStore::in_dir(&self.storage_dir)
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
    expected: &'static str,
) -> Result<T, ConfigError> {
    match lookup(var) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| invalid(var, &value, expected)),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "" | "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn invalid(var: &'static str, value: &str, expected: &'static str) -> ConfigError {
    ConfigError::InvalidVar {
        var,
        value: value.to_string(),
        expected,
    }
}

// ---------------------------------------------------------------------------
// MonitorSettings
// ---------------------------------------------------------------------------

/// Per-field overrides applied on top of a sensitivity preset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StateOverrides {
    pub slouch_threshold_deg: Option<f64>,
    pub forward_lean_threshold_deg: Option<f64>,
    pub lateral_lean_threshold_cm: Option<f64>,
    pub slouch_policy: Option<SustainPolicy>,
    pub forward_lean_policy: Option<SustainPolicy>,
    pub lateral_lean_policy: Option<SustainPolicy>,
    pub recovery_window_sec: Option<f64>,
    pub recovery_majority_fraction: Option<f64>,
    pub drift_alpha: Option<f64>,
    pub confidence_threshold: Option<f64>,
    pub typical_shoulder_width_cm: Option<f64>,
    pub lateral_scale_factor: Option<f64>,
    pub min_lateral_threshold: Option<f64>,
}

/// User-editable monitor settings, stored as JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    pub preset: SensitivityPreset,
    pub overrides: StateOverrides,
    pub nudge: NudgeConfig,
    /// Overrides `POSTURE_EMA_ALPHA` when present.
    pub smoothing: Option<SmoothingConfig>,
}

impl MonitorSettings {
    /// Load settings from `path`. A missing file yields the defaults.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let settings = match read_json::<Self>(path).await? {
            Some(settings) => {
                tracing::info!(path = %path.display(), "Loaded monitor settings");
                settings
            }
            None => {
                tracing::info!(path = %path.display(), "No settings file, using defaults");
                Self::default()
            }
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.state_config()?;
        self.nudge.validate().map_err(CoreError::from)?;
        if let Some(smoothing) = &self.smoothing {
            smoothing.validate().map_err(CoreError::from)?;
        }
        Ok(())
    }

    /// The preset configuration with overrides applied.
    pub fn state_config(&self) -> Result<StateConfig, CoreError> {
        let o = &self.overrides;
        let mut config = StateConfig::from_preset(self.preset);

        if let Some(v) = o.slouch_threshold_deg {
            config.slouch_threshold_deg = v;
        }
        if let Some(v) = o.forward_lean_threshold_deg {
            config.forward_lean_threshold_deg = v;
        }
        if let Some(v) = o.lateral_lean_threshold_cm {
            config.lateral_lean_threshold_cm = v;
        }
        if let Some(p) = o.slouch_policy {
            config.slouch_policy = p;
        }
        if let Some(p) = o.forward_lean_policy {
            config.forward_lean_policy = p;
        }
        if let Some(p) = o.lateral_lean_policy {
            config.lateral_lean_policy = p;
        }
        if let Some(v) = o.recovery_window_sec {
            config.recovery_window_sec = v;
        }
        if let Some(v) = o.recovery_majority_fraction {
            config.recovery_majority_fraction = v;
        }
        if let Some(v) = o.drift_alpha {
            config.drift_alpha = v;
        }
        if let Some(v) = o.confidence_threshold {
            config.confidence_threshold = v;
        }
        if let Some(v) = o.typical_shoulder_width_cm {
            config.typical_shoulder_width_cm = v;
        }
        if let Some(v) = o.lateral_scale_factor {
            config.lateral_scale_factor = v;
        }
        if let Some(v) = o.min_lateral_threshold {
            config.min_lateral_threshold = v;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn smoothing(&self, env_alpha: f64) -> SmoothingConfig {
        self.smoothing
            .unwrap_or(SmoothingConfig { ema_alpha: env_alpha })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
