//! Structured audit records for notification policy decisions.
//!
//! Every nudge, suppression, user action and DND queue event produces one
//! [`AuditEntry`]. Records carry metrics and text only, never imagery.
//! Persistence is the sink's concern; this module defines the record shape.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::types::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    Nudged,
    Suppressed,
    ActionDone,
    ActionSnooze,
    ActionDismiss,
    QueuedUnderDnd,
    ExpiredUnderDnd,
    DeliveredAfterDnd,
    DeliveryFailed,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::Nudged => "nudged",
            AuditEventType::Suppressed => "suppressed",
            AuditEventType::ActionDone => "action_done",
            AuditEventType::ActionSnooze => "action_snooze",
            AuditEventType::ActionDismiss => "action_dismiss",
            AuditEventType::QueuedUnderDnd => "queued_under_dnd",
            AuditEventType::ExpiredUnderDnd => "expired_under_dnd",
            AuditEventType::DeliveredAfterDnd => "delivered_after_dnd",
            AuditEventType::DeliveryFailed => "delivery_failed",
        }
    }
}

/// One append-only audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: Timestamp,
    /// Identifies the monitoring session that produced the record.
    pub session_id: Uuid,
    pub event_type: AuditEventType,
    /// Posture state the record concerns (`"unknown"` before any nudge).
    pub state: String,
    pub reason: String,
    #[serde(default)]
    pub metadata: Value,
}

impl AuditEntry {
    pub fn new(
        session_id: Uuid,
        event_type: AuditEventType,
        state: impl Into<String>,
        reason: impl Into<String>,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            timestamp,
            session_id,
            event_type,
            state: state.into(),
            reason: reason.into(),
            metadata: Value::Object(Default::default()),
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Destination for audit records.
///
/// Recording is best-effort: implementations handle their own failures and
/// never propagate them into the policy.
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: AuditEntry);
}

/// In-memory sink, used for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    pub fn count(&self, event_type: AuditEventType) -> usize {
        self.entries()
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }
}

impl AuditSink for MemoryAuditLog {
    fn record(&self, entry: AuditEntry) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry);
        }
    }
}

impl<T: AuditSink + ?Sized> AuditSink for std::sync::Arc<T> {
    fn record(&self, entry: AuditEntry) {
        (**self).record(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn event_type_serialises_as_snake_case() {
        let json = serde_json::to_string(&AuditEventType::QueuedUnderDnd).unwrap();
        assert_eq!(json, "\"queued_under_dnd\"");
        assert_eq!(AuditEventType::QueuedUnderDnd.as_str(), "queued_under_dnd");
    }

    #[test]
    fn memory_log_counts_by_type() {
        let log = MemoryAuditLog::new();
        let session = Uuid::now_v7();
        log.record(AuditEntry::new(session, AuditEventType::Nudged, "slouch", "r", Utc::now()));
        log.record(AuditEntry::new(session, AuditEventType::Suppressed, "slouch", "r", Utc::now()));
        log.record(AuditEntry::new(session, AuditEventType::Nudged, "slouch", "r", Utc::now()));

        assert_eq!(log.entries().len(), 3);
        assert_eq!(log.count(AuditEventType::Nudged), 2);
    }

    #[test]
    fn metadata_defaults_to_empty_object() {
        let entry = AuditEntry::new(Uuid::now_v7(), AuditEventType::ActionDone, "unknown", "", Utc::now());
        assert!(entry.metadata.is_object());
    }
}
