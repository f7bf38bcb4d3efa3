//! Notification delivery interface.
//!
//! Defines [`Notifier`], implemented by OS-specific delivery backends, along
//! with [`Notification`] and [`DeliveryError`]. Delivery and DND queries may
//! block on an OS round trip, so both are async.

use std::future::Future;

use serde::{Deserialize, Serialize};

/// A user-facing notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub message: String,
    pub subtitle: Option<String>,
}

impl Notification {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            subtitle: None,
        }
    }

    pub fn with_subtitle(mut self, subtitle: impl Into<String>) -> Self {
        self.subtitle = Some(subtitle.into());
        self
    }
}

/// Errors that can occur while posting a notification.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// No delivery backend is available on this system.
    #[error("Notification backend unavailable: {0}")]
    Unavailable(String),

    /// The backend did not respond in time.
    #[error("Notification delivery timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    /// The backend ran but reported failure.
    #[error("Notification backend failed with exit code {exit_code}: {stderr}")]
    Failed { exit_code: i32, stderr: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Posts notifications and reports the system Do-Not-Disturb state.
pub trait Notifier: Send + Sync {
    /// Deliver `notification`. Delivery is not guaranteed to be synchronous.
    fn post(
        &self,
        notification: &Notification,
    ) -> impl Future<Output = Result<(), DeliveryError>> + Send;

    /// Whether Do-Not-Disturb / Focus is currently active.
    ///
    /// Implementations report `false` when the state cannot be determined.
    fn is_dnd_active(&self) -> impl Future<Output = bool> + Send;
}
