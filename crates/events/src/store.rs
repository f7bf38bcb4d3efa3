//! JSON file stores.
//!
//! All writes go through [`write_json_atomic`]: serialize, write a sibling
//! temp file, then rename over the target so readers never see a partial
//! file.

use std::path::{Path, PathBuf};

use posture_core::calibration::CalibrationBaseline;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Schema version written into the baseline file.
pub const BASELINE_FORMAT_VERSION: &str = "1.0";

/// File name of the baseline inside the storage directory.
pub const BASELINE_FILE: &str = "calibration.json";

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unsupported baseline format version '{0}'")]
    UnsupportedVersion(String),
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn json(path: &Path, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.to_path_buf(),
            source,
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Atomically write `value` as pretty JSON to `path`.
///
/// Creates the parent directory if needed. Returns the payload size in bytes.
pub async fn write_json_atomic<T: Serialize + ?Sized>(
    path: &Path,
    value: &T,
) -> Result<usize, StoreError> {
    let payload = serde_json::to_vec_pretty(value).map_err(|e| StoreError::json(path, e))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StoreError::io(parent, e))?;
    }

    let tmp = temp_path(path);
    tokio::fs::write(&tmp, &payload)
        .await
        .map_err(|e| StoreError::io(&tmp, e))?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(StoreError::io(path, e));
    }
    Ok(payload.len())
}

/// Read and parse a JSON file. A missing file yields `Ok(None)`.
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::io(path, e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| StoreError::json(path, e))
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

// ---------------------------------------------------------------------------
// BaselineStore
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct BaselineFile {
    version: String,
    baseline: CalibrationBaseline,
}

/// Persists the calibration baseline as versioned JSON.
#[derive(Debug, Clone)]
pub struct BaselineStore {
    path: PathBuf,
}

impl BaselineStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store rooted at `<storage_dir>/calibration.json`.
    pub fn in_dir(storage_dir: &Path) -> Self {
        Self::new(storage_dir.join(BASELINE_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the saved baseline, or `None` if never calibrated.
    pub async fn load(&self) -> Result<Option<CalibrationBaseline>, StoreError> {
        let Some(file) = read_json::<BaselineFile>(&self.path).await? else {
            return Ok(None);
        };
        if file.version != BASELINE_FORMAT_VERSION {
            return Err(StoreError::UnsupportedVersion(file.version));
        }
        Ok(Some(file.baseline))
    }

    pub async fn save(&self, baseline: &CalibrationBaseline) -> Result<(), StoreError> {
        let file = BaselineFile {
            version: BASELINE_FORMAT_VERSION.to_string(),
            baseline: *baseline,
        };
        write_json_atomic(&self.path, &file).await?;
        tracing::info!(path = %self.path.display(), "Calibration baseline saved");
        Ok(())
    }

    /// Delete the saved baseline. Returns whether a file was removed.
    pub async fn delete(&self) -> Result<bool, StoreError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(&self.path, e)),
        }
    }

    pub async fn is_calibrated(&self) -> bool {
        matches!(self.load().await, Ok(Some(_)))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
