//! Monitor runtime.
//!
//! Wires the sample pipeline to the notification policy and persistence:
//!
//! ```text
//! stdin ──> ingestion ──(mpsc)──> policy task ──> notifier / audit log
//!              │   ^                  │
//!              │   └──(watch: backoff, policy status)
//!              ├──> EventBus ──> event logger
//!              └──(watch: snapshot)──> StatusPublisher ──> status.json
//! ```
//!
//! Ingestion never waits on notification delivery; the policy task owns
//! the policy and runs the DND queue timer.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use posture_core::audit::AuditSink;
use posture_core::calibration::CalibrationBaseline;
use posture_core::lifecycle::{LifecycleTracker, MonitorLifecycle};
use posture_core::metrics::PostureState;
use posture_core::notifier::Notifier;
use posture_core::nudge::{ThresholdBackoff, UserAction};
use posture_core::policy::{DndQueueOutcome, NotificationPolicy, NudgeDecision, PolicyStatus};
use posture_core::smoothing::SmoothingConfig;
use posture_core::status::StatusSnapshot;
use posture_core::types::Timestamp;
use posture_events::audit_log::AuditLogWriter;
use posture_events::bus::{self, EventBus, MonitorEvent};
use posture_events::status_publisher::StatusPublisher;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::config::{AgentConfig, MonitorSettings};
use crate::input::{InputClock, InputMessage};
use crate::session::{MonitorSession, SessionTransition};

/// Buffered commands between ingestion and the policy task.
const POLICY_QUEUE_CAPACITY: usize = 64;

/// Everything the runtime needs besides its input and notifier.
#[derive(Debug, Clone)]
pub struct MonitorOptions {
    pub baseline: CalibrationBaseline,
    pub settings: MonitorSettings,
    pub smoothing: SmoothingConfig,
    pub status_path: PathBuf,
    pub audit_log_path: PathBuf,
    pub status_interval: Duration,
    pub dnd_check_interval: Duration,
}

impl MonitorOptions {
    pub fn new(config: &AgentConfig, settings: MonitorSettings, baseline: CalibrationBaseline) -> Self {
        Self {
            smoothing: settings.smoothing(config.ema_alpha),
            baseline,
            settings,
            status_path: config.status_path(),
            audit_log_path: config.audit_log_path(),
            status_interval: config.status_interval,
            dnd_check_interval: config.dnd_check_interval,
        }
    }
}

/// Counters reported when the monitor stops.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub samples_processed: u64,
    /// Samples dropped for arriving with an earlier timestamp.
    pub samples_out_of_order: u64,
    pub malformed_lines: u64,
    pub transitions: u64,
    pub nudges_delivered: u64,
    pub final_state: PostureState,
}

enum PolicyCommand {
    Transition(SessionTransition),
    Action { action: UserAction, at: Timestamp },
}

/// Run the monitor until `input` closes or `cancel` fires.
pub async fn run_monitor<R, N>(
    options: MonitorOptions,
    notifier: N,
    input: R,
    cancel: CancellationToken,
) -> anyhow::Result<RunSummary>
where
    R: AsyncBufRead + Unpin,
    N: Notifier + 'static,
{
    let started_at = Utc::now();
    let mut lifecycle = LifecycleTracker::new(started_at);
    let bus = Arc::new(EventBus::default());
    let logger = tokio::spawn(bus::log_events(bus.subscribe()));

    advance(&mut lifecycle, MonitorLifecycle::Starting, &bus)?;

    let state_config = options
        .settings
        .state_config()
        .context("invalid state machine settings")?;
    let mut session = MonitorSession::new(
        options.baseline,
        state_config.clone(),
        options.smoothing,
        started_at,
    )
    .context("failed to start monitoring session")?;

    let (audit_writer, audit_handle) = AuditLogWriter::new(&options.audit_log_path);
    let policy = match NotificationPolicy::new(
        state_config,
        options.settings.nudge.clone(),
        notifier,
        audit_handle,
    ) {
        Ok(policy) => policy,
        Err(e) => {
            advance(&mut lifecycle, MonitorLifecycle::Stopping, &bus)?;
            advance(&mut lifecycle, MonitorLifecycle::Idle, &bus)?;
            return Err(e).context("invalid nudge settings");
        }
    };
    let audit_task = tokio::spawn(audit_writer.run());
    tracing::info!(session_id = %policy.session_id(), "Monitoring session created");

    let (clock_tx, clock_rx) = watch::channel(InputClock::new(started_at));
    let (backoff_tx, backoff_rx) = watch::channel::<Option<ThresholdBackoff>>(None);
    let (policy_status_tx, policy_status_rx) = watch::channel(policy.status(started_at));
    let (status_tx, status_rx) = watch::channel(session.snapshot(
        started_at,
        lifecycle.state(),
        Some(policy.status(started_at)),
    ));
    let (policy_tx, policy_rx) = mpsc::channel(POLICY_QUEUE_CAPACITY);

    let publisher_cancel = CancellationToken::new();
    let publisher = StatusPublisher::new(&options.status_path, options.status_interval);
    let publisher_task = tokio::spawn(publisher.run(status_rx, publisher_cancel.clone()));

    let policy_task = tokio::spawn(run_policy(
        policy,
        policy_rx,
        clock_rx,
        backoff_tx,
        policy_status_tx,
        Arc::clone(&bus),
        options.dnd_check_interval,
    ));

    advance(&mut lifecycle, MonitorLifecycle::Running, &bus)?;

    // -- Ingestion ----------------------------------------------------------

    let mut transitions: u64 = 0;
    let mut malformed_lines: u64 = 0;
    let mut lines = input.lines();

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Shutdown requested");
                break;
            }
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                tracing::info!("Input closed");
                break;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to read input");
                break;
            }
        };

        let message = match InputMessage::parse(&line) {
            Ok(Some(message)) => message,
            Ok(None) => continue,
            Err(e) => {
                malformed_lines += 1;
                tracing::warn!(error = %e, "Skipping malformed input line");
                continue;
            }
        };

        let at = message
            .timestamp()
            .unwrap_or_else(|| clock_tx.borrow().now());
        clock_tx.send_modify(|clock| clock.observe(at));

        match message {
            InputMessage::Sample { .. } => {
                let Some(sample) = message.sample(at) else {
                    continue;
                };
                let backoff = *backoff_rx.borrow();
                if let Some(transition) = session.process(&sample, backoff) {
                    transitions += 1;
                    bus.publish(MonitorEvent::Transition {
                        event: transition.event.clone(),
                        diagnostics: Some(transition.diagnostics),
                    });
                    if policy_tx
                        .send(PolicyCommand::Transition(transition))
                        .await
                        .is_err()
                    {
                        tracing::error!("Policy task stopped, transition not handled");
                    }
                }
                let policy_status = policy_status_rx.borrow().clone();
                status_tx.send_replace(session.snapshot(at, lifecycle.state(), Some(policy_status)));
            }
            InputMessage::Action { action, .. } => {
                bus.publish(MonitorEvent::UserAction {
                    action,
                    timestamp: at,
                });
                if policy_tx
                    .send(PolicyCommand::Action { action, at })
                    .await
                    .is_err()
                {
                    tracing::error!("Policy task stopped, action not handled");
                }
            }
        }
    }

    // -- Shutdown -----------------------------------------------------------

    advance(&mut lifecycle, MonitorLifecycle::Stopping, &bus)?;

    drop(policy_tx);
    let nudges_delivered = match policy_task.await {
        Ok(delivered) => delivered,
        Err(e) => {
            tracing::error!(error = %e, "Policy task panicked");
            0
        }
    };
    if let Err(e) = audit_task.await {
        tracing::error!(error = %e, "Audit writer panicked");
    }

    let stopped_at = clock_tx.borrow().now();
    advance(&mut lifecycle, MonitorLifecycle::Idle, &bus)?;
    session.set_backoff(*backoff_rx.borrow());
    let policy_status = policy_status_rx.borrow().clone();
    status_tx.send_replace(session.snapshot(stopped_at, lifecycle.state(), Some(policy_status)));

    publisher_cancel.cancel();
    if let Err(e) = publisher_task.await {
        tracing::error!(error = %e, "Status publisher panicked");
    }

    drop(bus);
    if let Err(e) = logger.await {
        tracing::error!(error = %e, "Event logger panicked");
    }

    let summary = RunSummary {
        samples_processed: session.samples_processed(),
        samples_out_of_order: session.samples_out_of_order(),
        malformed_lines,
        transitions,
        nudges_delivered,
        final_state: session.current_state(),
    };
    tracing::info!(
        samples = summary.samples_processed,
        out_of_order = summary.samples_out_of_order,
        transitions = summary.transitions,
        nudges = summary.nudges_delivered,
        final_state = %summary.final_state,
        "Monitor stopped"
    );
    Ok(summary)
}

fn advance(
    lifecycle: &mut LifecycleTracker,
    to: MonitorLifecycle,
    bus: &EventBus,
) -> anyhow::Result<()> {
    let now = Utc::now();
    let from = lifecycle.transition(to, now)?;
    bus.publish(MonitorEvent::Lifecycle {
        from,
        to,
        timestamp: now,
    });
    Ok(())
}

/// Own the policy: handle transitions and actions in order, and retry the
/// DND queue on a timer. Returns the number of nudges delivered.
async fn run_policy<N, A>(
    mut policy: NotificationPolicy<N, A>,
    mut commands: mpsc::Receiver<PolicyCommand>,
    clock: watch::Receiver<InputClock>,
    backoff_tx: watch::Sender<Option<ThresholdBackoff>>,
    status_tx: watch::Sender<PolicyStatus>,
    bus: Arc<EventBus>,
    dnd_check_interval: Duration,
) -> u64
where
    N: Notifier,
    A: AuditSink,
{
    let mut delivered: u64 = 0;
    let mut dnd_tick = tokio::time::interval(dnd_check_interval);
    dnd_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else { break };
                match command {
                    PolicyCommand::Transition(SessionTransition { event, diagnostics }) => {
                        let now = event.timestamp;
                        let decision = policy.on_transition(&event, Some(&diagnostics), now).await;
                        if matches!(decision, NudgeDecision::Delivered { .. }) {
                            delivered += 1;
                        }
                        if decision != NudgeDecision::Ignored {
                            bus.publish(MonitorEvent::Decision { decision, timestamp: now });
                        }
                    }
                    PolicyCommand::Action { action, at } => {
                        policy.on_user_action(action, at);
                    }
                }
            }
            _ = dnd_tick.tick() => {
                let now = clock.borrow().now();
                match policy.check_dnd_queue(now).await {
                    DndQueueOutcome::Empty | DndQueueOutcome::Pending => {}
                    DndQueueOutcome::Expired => {
                        tracing::info!("Queued nudge expired under DND");
                    }
                    DndQueueOutcome::Delivered(notification) => {
                        delivered += 1;
                        tracing::info!(title = %notification.title, "Queued nudge delivered after DND");
                    }
                    DndQueueOutcome::DeliveryFailed(error) => {
                        tracing::warn!(error = %error, "Queued nudge delivery failed, will retry");
                    }
                }
            }
        }

        let now = clock.borrow().now();
        backoff_tx.send_replace(policy.active_backoff(now));
        status_tx.send_replace(policy.status(now));
    }

    tracing::debug!("Policy task stopped");
    delivered
}

/// Status snapshot for an agent without a calibration baseline.
pub fn uncalibrated_status() -> StatusSnapshot {
    StatusSnapshot::idle(Utc::now(), MonitorLifecycle::Idle, false)
}
