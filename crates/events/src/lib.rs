//! Posture monitor event bus, persistence and notification delivery.
//!
//! This crate wraps the pure logic in `posture-core` with I/O:
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`MonitorEvent`]: envelope for transitions, decisions and lifecycle
//!   changes.
//! - [`audit_log`]: append-only JSONL audit log with a background writer.
//! - [`StatusPublisher`]: periodic atomic status-file writer.
//! - [`store`]: versioned JSON stores for the calibration baseline.
//! - [`delivery`]: OS notification delivery and DND query.

pub mod audit_log;
pub mod bus;
pub mod delivery;
pub mod status_publisher;
pub mod store;
pub mod throttle;

pub use audit_log::{AuditLogHandle, AuditLogWriter};
pub use bus::{EventBus, MonitorEvent};
pub use delivery::SystemNotifier;
pub use status_publisher::StatusPublisher;
pub use store::{BaselineStore, StoreError};
