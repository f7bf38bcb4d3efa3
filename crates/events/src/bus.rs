//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] fans out [`MonitorEvent`]s from the sample pipeline to the
//! policy task and any loggers. It is shared via `Arc<EventBus>`.

use chrono::{DateTime, Utc};
use posture_core::lifecycle::MonitorLifecycle;
use posture_core::nudge::UserAction;
use posture_core::policy::NudgeDecision;
use posture_core::state_machine::{Diagnostics, StateTransitionEvent};
use serde::Serialize;
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// MonitorEvent
// ---------------------------------------------------------------------------

/// Something that happened in the monitor.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitorEvent {
    /// The posture state machine committed a transition.
    Transition {
        event: StateTransitionEvent,
        diagnostics: Option<Diagnostics>,
    },
    /// The notification policy decided on a transition.
    Decision {
        decision: NudgeDecision,
        timestamp: DateTime<Utc>,
    },
    /// The user responded to a nudge.
    UserAction {
        action: UserAction,
        timestamp: DateTime<Utc>,
    },
    /// The monitor moved between lifecycle states.
    Lifecycle {
        from: MonitorLifecycle,
        to: MonitorLifecycle,
        timestamp: DateTime<Utc>,
    },
}

impl MonitorEvent {
    /// Short name used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            MonitorEvent::Transition { .. } => "transition",
            MonitorEvent::Decision { .. } => "decision",
            MonitorEvent::UserAction { .. } => "user_action",
            MonitorEvent::Lifecycle { .. } => "lifecycle",
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// Wraps a [`broadcast::Sender`] so that any number of subscribers can
/// independently receive every published [`MonitorEvent`].
pub struct EventBus {
    sender: broadcast::Sender<MonitorEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers will observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// If there are no active subscribers the event is silently dropped.
    pub fn publish(&self, event: MonitorEvent) {
        let _ = self.sender.send(event);
    }

    /// Create a new receiver that sees every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Log every event on the bus until it closes.
pub async fn log_events(mut receiver: broadcast::Receiver<MonitorEvent>) {
    loop {
        match receiver.recv().await {
            Ok(MonitorEvent::Transition { event, .. }) => {
                tracing::info!(
                    from = %event.from_state,
                    to = %event.to_state,
                    reason = %event.reason,
                    time_in_previous_state_sec = event.time_in_previous_state_sec,
                    "Posture state changed"
                );
            }
            Ok(MonitorEvent::Decision { decision, .. }) => match decision {
                NudgeDecision::Ignored => {}
                NudgeDecision::Suppressed { reason } => {
                    tracing::info!(reason = %reason, "Nudge suppressed");
                }
                NudgeDecision::Queued { expires_at } => {
                    tracing::info!(%expires_at, "Nudge queued (DND active)");
                }
                NudgeDecision::Delivered { notification } => {
                    tracing::info!(title = %notification.title, message = %notification.message, "Nudge delivered");
                }
                NudgeDecision::DeliveryFailed { error } => {
                    tracing::warn!(error = %error, "Nudge delivery failed");
                }
            },
            Ok(MonitorEvent::UserAction { action, .. }) => {
                tracing::info!(action = action.as_str(), "User action received");
            }
            Ok(MonitorEvent::Lifecycle { from, to, .. }) => {
                tracing::info!(from = from.as_str(), to = to.as_str(), "Monitor lifecycle changed");
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(skipped = n, "Event logger lagged, some events were not logged");
            }
            Err(broadcast::error::RecvError::Closed) => {
                tracing::debug!("Event bus closed, logger shutting down");
                break;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn lifecycle(to: MonitorLifecycle) -> MonitorEvent {
        MonitorEvent::Lifecycle {
            from: MonitorLifecycle::Idle,
            to,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_event() {
        let bus = EventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(lifecycle(MonitorLifecycle::Starting));

        let e1 = rx1.recv().await.expect("subscriber 1 should receive");
        let e2 = rx2.recv().await.expect("subscriber 2 should receive");
        assert_matches!(e1, MonitorEvent::Lifecycle { to: MonitorLifecycle::Starting, .. });
        assert_eq!(e2.kind(), "lifecycle");
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.publish(lifecycle(MonitorLifecycle::Starting));
    }

    #[test]
    fn events_serialise_with_type_tag() {
        let json = serde_json::to_value(lifecycle(MonitorLifecycle::Running)).unwrap();
        assert_eq!(json["type"], "lifecycle");
        assert_eq!(json["to"], "running");
    }

    #[tokio::test]
    async fn logger_exits_when_bus_dropped() {
        let bus = EventBus::default();
        let rx = bus.subscribe();
        let handle = tokio::spawn(log_events(rx));
        bus.publish(lifecycle(MonitorLifecycle::Starting));
        drop(bus);
        handle.await.unwrap();
    }
}
