//! Append-only JSONL audit log.
//!
//! The policy records entries synchronously through [`AuditLogHandle`],
//! which only enqueues them. [`AuditLogWriter`] drains the queue on a
//! background task and appends one JSON object per line. Write failures are
//! logged (throttled) and never reach the policy.

use std::path::{Path, PathBuf};
use std::time::Instant;

use posture_core::audit::{AuditEntry, AuditSink};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use crate::store::StoreError;
use crate::throttle::ErrorThrottle;

/// File name of the audit log inside the storage directory.
pub const AUDIT_LOG_FILE: &str = "events.jsonl";

/// Sending half of the audit queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct AuditLogHandle {
    sender: mpsc::UnboundedSender<AuditEntry>,
}

impl AuditSink for AuditLogHandle {
    fn record(&self, entry: AuditEntry) {
        if self.sender.send(entry).is_err() {
            tracing::debug!("Audit writer stopped, entry dropped");
        }
    }
}

/// Background task that appends queued entries to the log file.
pub struct AuditLogWriter {
    path: PathBuf,
    receiver: mpsc::UnboundedReceiver<AuditEntry>,
    throttle: ErrorThrottle,
}

impl AuditLogWriter {
    /// Create a writer for `path` and the handle that feeds it.
    pub fn new(path: impl Into<PathBuf>) -> (Self, AuditLogHandle) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let writer = Self {
            path: path.into(),
            receiver,
            throttle: ErrorThrottle::default(),
        };
        (writer, AuditLogHandle { sender })
    }

    /// Drain entries until every handle is dropped.
    pub async fn run(mut self) {
        tracing::info!(path = %self.path.display(), "Audit log writer started");
        while let Some(entry) = self.receiver.recv().await {
            if let Err(e) = append_entry(&self.path, &entry).await {
                if let Some(suppressed) = self.throttle.check(Instant::now()) {
                    tracing::error!(
                        error = %e,
                        suppressed,
                        event_type = entry.event_type.as_str(),
                        "Failed to write audit entry"
                    );
                }
            }
        }
        tracing::info!("Audit log writer stopped");
    }
}

async fn append_entry(path: &Path, entry: &AuditEntry) -> Result<(), StoreError> {
    let mut line = serde_json::to_vec(entry).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    line.push(b'\n');

    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(io_err)?;
    file.write_all(&line).await.map_err(io_err)?;
    file.flush().await.map_err(io_err)
}

/// Read the last `limit` entries. Unparseable lines are skipped.
pub async fn read_recent(path: &Path, limit: usize) -> Result<Vec<AuditEntry>, StoreError> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let mut entries: Vec<AuditEntry> = content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str(line) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed audit line");
                None
            }
        })
        .collect();
    let skip = entries.len().saturating_sub(limit);
    entries.drain(..skip);
    Ok(entries)
}

/// Delete the audit log. Returns whether a file was removed.
pub async fn purge(path: &Path) -> Result<bool, StoreError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(StoreError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use posture_core::audit::AuditEventType;
    use uuid::Uuid;

    fn entry(event_type: AuditEventType, reason: &str) -> AuditEntry {
        AuditEntry::new(Uuid::nil(), event_type, "slouch", reason, Utc::now())
    }

    #[tokio::test]
    async fn writer_appends_one_line_per_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(AUDIT_LOG_FILE);
        let (writer, handle) = AuditLogWriter::new(&path);
        let task = tokio::spawn(writer.run());

        handle.record(entry(AuditEventType::Nudged, "first"));
        handle.record(entry(AuditEventType::ActionDone, "second"));
        drop(handle);
        task.await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
        let first: serde_json::Value = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert_eq!(first["event_type"], "nudged");
        assert_eq!(first["state"], "slouch");
    }

    #[tokio::test]
    async fn read_recent_returns_tail_and_skips_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(AUDIT_LOG_FILE);
        for i in 0..5 {
            append_entry(&path, &entry(AuditEventType::Nudged, &format!("n{i}")))
                .await
                .unwrap();
        }
        tokio::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .await
            .unwrap()
            .write_all(b"garbage\n")
            .await
            .unwrap();

        let recent = read_recent(&path, 2).await.unwrap();
        let reasons: Vec<_> = recent.iter().map(|e| e.reason.as_str()).collect();
        assert_eq!(reasons, vec!["n3", "n4"]);
    }

    #[tokio::test]
    async fn purge_removes_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(AUDIT_LOG_FILE);
        assert!(!purge(&path).await.unwrap());
        append_entry(&path, &entry(AuditEventType::Nudged, "x")).await.unwrap();
        assert!(purge(&path).await.unwrap());
        assert!(read_recent(&path, 10).await.unwrap().is_empty());
    }
}
