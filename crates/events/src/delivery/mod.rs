//! Notification delivery backends.
//!
//! - [`command`]: posts through the platform's notification command line
//!   tools and queries the system Do-Not-Disturb state.
//! - [`log`]: logs notifications instead of posting them (dry run).
//!
//! [`SystemNotifier`] selects one at startup.

pub mod command;
pub mod log;

pub use command::CommandNotifier;
pub use log::LogNotifier;

use posture_core::notifier::{DeliveryError, Notification, Notifier};

/// Notifier chosen from configuration.
#[derive(Debug, Clone)]
pub enum SystemNotifier {
    Command(CommandNotifier),
    Log(LogNotifier),
}

impl SystemNotifier {
    /// Log-only delivery when `dry_run`, otherwise the platform backend.
    pub fn from_dry_run(dry_run: bool) -> Self {
        if dry_run {
            Self::Log(LogNotifier::default())
        } else {
            Self::Command(CommandNotifier::for_current_platform())
        }
    }

    pub fn is_dry_run(&self) -> bool {
        matches!(self, Self::Log(_))
    }
}

impl Notifier for SystemNotifier {
    async fn post(&self, notification: &Notification) -> Result<(), DeliveryError> {
        match self {
            Self::Command(n) => n.post(notification).await,
            Self::Log(n) => n.post(notification).await,
        }
    }

    async fn is_dnd_active(&self) -> bool {
        match self {
            Self::Command(n) => n.is_dnd_active().await,
            Self::Log(n) => n.is_dnd_active().await,
        }
    }
}
