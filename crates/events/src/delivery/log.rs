//! Dry-run notifier.

use posture_core::notifier::{DeliveryError, Notification, Notifier};

/// Logs notifications at info level and never reports DND.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    async fn post(&self, notification: &Notification) -> Result<(), DeliveryError> {
        tracing::info!(
            title = %notification.title,
            message = %notification.message,
            subtitle = notification.subtitle.as_deref().unwrap_or(""),
            "Dry run: notification not posted"
        );
        Ok(())
    }

    async fn is_dnd_active(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn post_always_succeeds() {
        let notifier = LogNotifier;
        let n = Notification::new("Posture check", "Sit up");
        assert!(notifier.post(&n).await.is_ok());
        assert!(!notifier.is_dnd_active().await);
    }
}
