//! Periodic status file writer.
//!
//! [`StatusPublisher`] reads the latest [`StatusSnapshot`] from a watch
//! channel and writes it atomically to disk on a fixed cadence. Repeated
//! failures back off exponentially so a broken disk does not spin the loop.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use posture_core::status::StatusSnapshot;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::store::{write_json_atomic, StoreError};
use crate::throttle::ErrorThrottle;

/// File name of the status snapshot inside the storage directory.
pub const STATUS_FILE: &str = "status.json";

/// Payload size above which a warning is logged.
pub const STATUS_SIZE_WARN_BYTES: usize = 5 * 1024;

/// Consecutive failures tolerated before backing off.
const BACKOFF_AFTER_FAILURES: u32 = 3;

/// Upper bound on the backoff delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Delay before the next write given the current failure streak.
pub fn next_delay(interval: Duration, consecutive_failures: u32) -> Duration {
    if consecutive_failures <= BACKOFF_AFTER_FAILURES {
        return interval;
    }
    let exponent = (consecutive_failures - BACKOFF_AFTER_FAILURES).min(16);
    interval.saturating_mul(1 << exponent).min(MAX_BACKOFF)
}

pub struct StatusPublisher {
    path: PathBuf,
    interval: Duration,
}

impl StatusPublisher {
    pub fn new(path: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            path: path.into(),
            interval,
        }
    }

    /// Write one snapshot now. Returns the payload size.
    pub async fn publish(&self, snapshot: &StatusSnapshot) -> Result<usize, StoreError> {
        let size = write_json_atomic(&self.path, snapshot).await?;
        if size > STATUS_SIZE_WARN_BYTES {
            tracing::warn!(
                size,
                limit = STATUS_SIZE_WARN_BYTES,
                "Status payload larger than expected"
            );
        }
        Ok(size)
    }

    /// Publish until `cancel` fires, then write the final snapshot once.
    pub async fn run(self, source: watch::Receiver<StatusSnapshot>, cancel: CancellationToken) {
        tracing::info!(
            path = %self.path.display(),
            interval_ms = self.interval.as_millis() as u64,
            "Status publisher started"
        );

        let mut failures: u32 = 0;
        let mut throttle = ErrorThrottle::default();

        loop {
            let delay = next_delay(self.interval, failures);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            let snapshot = source.borrow().clone();
            match self.publish(&snapshot).await {
                Ok(_) => {
                    if failures > 0 {
                        tracing::info!(failures, "Status publishing recovered");
                    }
                    failures = 0;
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    if let Some(suppressed) = throttle.check(Instant::now()) {
                        tracing::error!(
                            error = %e,
                            consecutive_failures = failures,
                            suppressed,
                            "Failed to publish status"
                        );
                    }
                }
            }
        }

        let snapshot = source.borrow().clone();
        if let Err(e) = self.publish(&snapshot).await {
            tracing::warn!(error = %e, "Failed to publish final status");
        }
        tracing::info!("Status publisher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use posture_core::lifecycle::MonitorLifecycle;

    #[test]
    fn delay_stays_at_interval_for_first_failures() {
        let interval = Duration::from_millis(1000);
        for failures in 0..=3 {
            assert_eq!(next_delay(interval, failures), interval);
        }
    }

    #[test]
    fn delay_doubles_then_caps() {
        let interval = Duration::from_millis(1000);
        assert_eq!(next_delay(interval, 4), Duration::from_secs(2));
        assert_eq!(next_delay(interval, 5), Duration::from_secs(4));
        assert_eq!(next_delay(interval, 8), Duration::from_secs(30));
        assert_eq!(next_delay(interval, u32::MAX), MAX_BACKOFF);
    }

    #[tokio::test]
    async fn publish_writes_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = StatusPublisher::new(dir.path().join(STATUS_FILE), Duration::from_secs(1));
        let snapshot = StatusSnapshot::idle(Utc::now(), MonitorLifecycle::Running, true);

        let size = publisher.publish(&snapshot).await.unwrap();
        assert!(size > 0 && size < STATUS_SIZE_WARN_BYTES);

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.path().join(STATUS_FILE)).unwrap()).unwrap();
        assert_eq!(raw["lifecycle"], "running");
        assert_eq!(raw["state"], "good");
    }

    #[tokio::test]
    async fn run_writes_final_snapshot_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(STATUS_FILE);
        let (tx, rx) = watch::channel(StatusSnapshot::idle(
            Utc::now(),
            MonitorLifecycle::Running,
            true,
        ));
        let cancel = CancellationToken::new();
        let publisher = StatusPublisher::new(&path, Duration::from_secs(3600));
        let task = tokio::spawn(publisher.run(rx, cancel.clone()));

        tx.send_replace(StatusSnapshot::idle(Utc::now(), MonitorLifecycle::Idle, true));
        cancel.cancel();
        task.await.unwrap();

        let raw: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["lifecycle"], "idle");
    }
}
