//! Notification policy.
//!
//! Consumes [`StateTransitionEvent`]s and decides whether to nudge, subject to
//! layered suppression checked in order (first match wins):
//!
//! 1. Global cooldown set by a Done action.
//! 2. Snooze window set by a Snooze action.
//! 3. An unexpired notification still on screen (unless stacking is allowed).
//! 4. Per-state dedupe window, which high-severity transitions may bypass.
//!
//! Nudges that pass are either delivered or, under Do-Not-Disturb, held in a
//! single queue slot until DND ends or the nudge expires. User feedback
//! (Done/Snooze/Dismiss) mutates future suppression. Every decision that does
//! not deliver leaves an audit record with a human-readable reason.
//!
//! All entry points take `&mut self` and an explicit `now`; callers serialise
//! access.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use crate::audit::{AuditEntry, AuditEventType, AuditSink};
use crate::error::CoreError;
use crate::metrics::PostureState;
use crate::notifier::{Notification, Notifier};
use crate::nudge::{EffectiveThresholds, NudgeConfig, QueuedNudge, ThresholdBackoff, UserAction};
use crate::state_config::StateConfig;
use crate::state_machine::{Diagnostics, StateTransitionEvent};
use crate::sustain::Condition;
use crate::thresholds::{AbsoluteThresholds, Baselines};
use crate::types::{add_secs, secs_between, Timestamp};

/// A delivered notification counts as on screen for this long.
pub const ACTIVE_NOTIFICATION_TTL_SEC: f64 = 10.0;

pub const DND_ENDED_SUBTITLE: &str = "DND ended";

// ---------------------------------------------------------------------------
// Decisions
// ---------------------------------------------------------------------------

/// Why a nudge was held back.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SuppressionReason {
    GlobalCooldown { remaining_sec: f64 },
    Snooze { remaining_sec: f64 },
    ActiveNotification,
    DedupeWindow { state: PostureState, remaining_sec: f64 },
}

impl SuppressionReason {
    pub fn kind(&self) -> &'static str {
        match self {
            SuppressionReason::GlobalCooldown { .. } => "global_cooldown",
            SuppressionReason::Snooze { .. } => "snooze",
            SuppressionReason::ActiveNotification => "active_notification_exists",
            SuppressionReason::DedupeWindow { .. } => "dedupe_window",
        }
    }
}

impl fmt::Display for SuppressionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SuppressionReason::GlobalCooldown { remaining_sec }
            | SuppressionReason::Snooze { remaining_sec } => {
                write!(f, "{} ({:.1}m remaining)", self.kind(), remaining_sec / 60.0)
            }
            SuppressionReason::ActiveNotification => f.write_str(self.kind()),
            SuppressionReason::DedupeWindow {
                state,
                remaining_sec,
            } => write!(
                f,
                "{} ({:.1}m remaining for {})",
                self.kind(),
                remaining_sec / 60.0,
                state
            ),
        }
    }
}

/// Outcome of [`NotificationPolicy::on_transition`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum NudgeDecision {
    /// Transition into `Good` or `Paused`.
    Ignored,
    Suppressed { reason: SuppressionReason },
    Queued { expires_at: Timestamp },
    Delivered { notification: Notification },
    DeliveryFailed { error: String },
}

/// Outcome of [`NotificationPolicy::check_dnd_queue`].
#[derive(Debug, Clone, PartialEq)]
pub enum DndQueueOutcome {
    Empty,
    /// DND is still on and the nudge has not expired.
    Pending,
    Expired,
    Delivered(Notification),
    DeliveryFailed(String),
}

/// Point-in-time view of the policy for status reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyStatus {
    pub cooldown_remaining_sec: f64,
    pub snooze_remaining_sec: f64,
    pub backoff_remaining_sec: f64,
    pub last_nudge_age_sec: Option<f64>,
    pub last_nudge_state: Option<PostureState>,
    pub queued_nudge: bool,
    pub queued_expires_in_sec: Option<f64>,
}

// ---------------------------------------------------------------------------
// NotificationPolicy
// ---------------------------------------------------------------------------

pub struct NotificationPolicy<N, A> {
    state_config: StateConfig,
    config: NudgeConfig,
    notifier: N,
    audit: A,
    session_id: Uuid,

    last_nudge_at: Option<Timestamp>,
    last_nudge_state: Option<PostureState>,
    last_nudge_per_state: HashMap<PostureState, Timestamp>,
    active_notification_at: Option<Timestamp>,

    cooldown_until: Option<Timestamp>,
    snooze_until: Option<Timestamp>,
    backoff: Option<ThresholdBackoff>,

    queued: Option<QueuedNudge>,
    last_decision: Option<NudgeDecision>,
}

impl<N: Notifier, A: AuditSink> NotificationPolicy<N, A> {
    pub fn new(
        state_config: StateConfig,
        config: NudgeConfig,
        notifier: N,
        audit: A,
    ) -> Result<Self, CoreError> {
        config.validate()?;
        Ok(Self {
            state_config,
            config,
            notifier,
            audit,
            session_id: Uuid::now_v7(),
            last_nudge_at: None,
            last_nudge_state: None,
            last_nudge_per_state: HashMap::new(),
            active_notification_at: None,
            cooldown_until: None,
            snooze_until: None,
            backoff: None,
            queued: None,
            last_decision: None,
        })
    }

    /// Decide whether `event` results in a nudge, and act on the decision.
    pub async fn on_transition(
        &mut self,
        event: &StateTransitionEvent,
        diagnostics: Option<&Diagnostics>,
        now: Timestamp,
    ) -> NudgeDecision {
        if !event.to_state.is_issue() {
            return NudgeDecision::Ignored;
        }

        let decision = match self.check_suppression(event, now) {
            Some(reason) => {
                self.record(
                    AuditEventType::Suppressed,
                    event.to_state.as_str(),
                    &event.reason,
                    json!({
                        "suppression_type": reason.to_string(),
                        "suppression": reason,
                    }),
                    now,
                );
                NudgeDecision::Suppressed { reason }
            }
            None => self.deliver_or_queue(event, diagnostics, now).await,
        };

        self.last_decision = Some(decision.clone());
        decision
    }

    fn check_suppression(
        &mut self,
        event: &StateTransitionEvent,
        now: Timestamp,
    ) -> Option<SuppressionReason> {
        if let Some(remaining_sec) = remaining(self.cooldown_until, now) {
            return Some(SuppressionReason::GlobalCooldown { remaining_sec });
        }
        if let Some(remaining_sec) = remaining(self.snooze_until, now) {
            return Some(SuppressionReason::Snooze { remaining_sec });
        }

        if let Some(shown_at) = self.active_notification_at {
            if secs_between(shown_at, now) > ACTIVE_NOTIFICATION_TTL_SEC {
                self.active_notification_at = None;
            }
        }
        if !self.config.allow_stacking && self.active_notification_at.is_some() {
            return Some(SuppressionReason::ActiveNotification);
        }

        if let Some(&last) = self.last_nudge_per_state.get(&event.to_state) {
            let since = secs_between(last, now);
            let bypass = event.is_high_severity() && self.config.high_severity_bypass_dedupe;
            if since < self.config.dedupe_window_sec && !bypass {
                return Some(SuppressionReason::DedupeWindow {
                    state: event.to_state,
                    remaining_sec: self.config.dedupe_window_sec - since,
                });
            }
        }
        None
    }

    async fn deliver_or_queue(
        &mut self,
        event: &StateTransitionEvent,
        diagnostics: Option<&Diagnostics>,
        now: Timestamp,
    ) -> NudgeDecision {
        let thresholds = self.effective_thresholds(&event.baselines, now);
        let notification = Notification::new(
            notification_title(event.to_state),
            notification_message(event, diagnostics, &thresholds),
        );

        if self.config.respect_dnd && self.notifier.is_dnd_active().await {
            let expires_at = add_secs(now, self.config.nudge_expiry_sec);
            self.queued = Some(QueuedNudge {
                state: event.to_state,
                reason: event.reason.clone(),
                queued_at: now,
                expires_at,
                thresholds,
                diagnostics: diagnostics.copied(),
            });
            self.record(
                AuditEventType::QueuedUnderDnd,
                event.to_state.as_str(),
                &event.reason,
                json!({
                    "expires_at": expires_at,
                    "expires_in_sec": self.config.nudge_expiry_sec,
                }),
                now,
            );
            return NudgeDecision::Queued { expires_at };
        }

        match self.notifier.post(&notification).await {
            Ok(()) => {
                self.mark_delivered(event.to_state, now);
                self.record(
                    AuditEventType::Nudged,
                    event.to_state.as_str(),
                    &event.reason,
                    json!({
                        "thresholds": thresholds,
                        "diagnostics": diagnostics,
                        "detection_path": event.detection_path,
                    }),
                    now,
                );
                NudgeDecision::Delivered { notification }
            }
            Err(e) => {
                let error = e.to_string();
                self.record(
                    AuditEventType::DeliveryFailed,
                    event.to_state.as_str(),
                    &event.reason,
                    json!({ "error": error }),
                    now,
                );
                NudgeDecision::DeliveryFailed { error }
            }
        }
    }

    /// Apply user feedback on the most recent nudge.
    pub fn on_user_action(&mut self, action: UserAction, now: Timestamp) {
        let state = self
            .last_nudge_state
            .map(|s| s.as_str())
            .unwrap_or("unknown");
        let reason = format!("User clicked {}", action.as_str());

        let (event_type, metadata) = match action {
            UserAction::Done => {
                let until = add_secs(now, self.config.cooldown_done_sec);
                self.cooldown_until = Some(until);
                (
                    AuditEventType::ActionDone,
                    json!({
                        "cooldown_until": until,
                        "cooldown_remaining_sec": self.config.cooldown_done_sec,
                    }),
                )
            }
            UserAction::Snooze => {
                let until = add_secs(now, self.config.cooldown_snooze_sec);
                self.snooze_until = Some(until);
                (
                    AuditEventType::ActionSnooze,
                    json!({
                        "cooldown_until": until,
                        "cooldown_remaining_sec": self.config.cooldown_snooze_sec,
                    }),
                )
            }
            UserAction::Dismiss => {
                let backoff = ThresholdBackoff {
                    offsets: self.config.dismiss_offsets(),
                    until: add_secs(now, self.config.dismiss_backoff_duration_sec),
                };
                self.backoff = Some(backoff);
                (
                    AuditEventType::ActionDismiss,
                    json!({
                        "backoff_until": backoff.until,
                        "backoff_remaining_sec": self.config.dismiss_backoff_duration_sec,
                        "offsets": backoff.offsets,
                    }),
                )
            }
        };

        self.record(event_type, state, &reason, metadata, now);
        self.active_notification_at = None;
    }

    /// Expire or deliver the DND-queued nudge. Call periodically.
    pub async fn check_dnd_queue(&mut self, now: Timestamp) -> DndQueueOutcome {
        let Some(queued) = self.queued.clone() else {
            return DndQueueOutcome::Empty;
        };

        if queued.is_expired(now) {
            self.queued = None;
            self.record(
                AuditEventType::ExpiredUnderDnd,
                queued.state.as_str(),
                &queued.reason,
                json!({ "queued_at": queued.queued_at }),
                now,
            );
            return DndQueueOutcome::Expired;
        }

        if self.notifier.is_dnd_active().await {
            return DndQueueOutcome::Pending;
        }

        let queued_for = secs_between(queued.queued_at, now);
        let notification = Notification::new(
            notification_title(queued.state),
            format!("{} (queued {:.1}m ago)", queued.reason, queued_for / 60.0),
        )
        .with_subtitle(DND_ENDED_SUBTITLE);

        match self.notifier.post(&notification).await {
            Ok(()) => {
                self.queued = None;
                self.mark_delivered(queued.state, now);
                self.record(
                    AuditEventType::DeliveredAfterDnd,
                    queued.state.as_str(),
                    &queued.reason,
                    json!({
                        "queued_duration_sec": queued_for,
                        "thresholds": queued.thresholds,
                    }),
                    now,
                );
                DndQueueOutcome::Delivered(notification)
            }
            Err(e) => {
                // The nudge stays queued for the next check.
                let error = e.to_string();
                self.record(
                    AuditEventType::DeliveryFailed,
                    queued.state.as_str(),
                    &queued.reason,
                    json!({ "error": error, "queued": true }),
                    now,
                );
                DndQueueOutcome::DeliveryFailed(error)
            }
        }
    }

    fn mark_delivered(&mut self, state: PostureState, now: Timestamp) {
        self.last_nudge_at = Some(now);
        self.last_nudge_state = Some(state);
        self.last_nudge_per_state.insert(state, now);
        self.active_notification_at = Some(now);
    }

    fn record(
        &self,
        event_type: AuditEventType,
        state: &str,
        reason: &str,
        metadata: serde_json::Value,
        now: Timestamp,
    ) {
        self.audit.record(
            AuditEntry::new(self.session_id, event_type, state, reason, now).with_metadata(metadata),
        );
    }

    // -----------------------------------------------------------------------
    // Thresholds and status
    // -----------------------------------------------------------------------

    /// The dismiss backoff, if it is still in effect at `now`.
    pub fn active_backoff(&self, now: Timestamp) -> Option<ThresholdBackoff> {
        self.backoff.filter(|b| b.is_active(now))
    }

    /// Absolute thresholds for `baselines`, raised by any active backoff.
    pub fn effective_thresholds(&self, baselines: &Baselines, now: Timestamp) -> EffectiveThresholds {
        let offsets = self
            .active_backoff(now)
            .map(|b| b.offsets)
            .unwrap_or_default();
        let absolute = AbsoluteThresholds::compute(&self.state_config, baselines, offsets);
        EffectiveThresholds {
            neck_deg: absolute.slouch.ordinary,
            torso_deg: absolute.forward_lean.ordinary,
            lateral_ratio: absolute.lateral_lean.ordinary,
        }
    }

    pub fn status(&self, now: Timestamp) -> PolicyStatus {
        PolicyStatus {
            cooldown_remaining_sec: remaining(self.cooldown_until, now).unwrap_or(0.0),
            snooze_remaining_sec: remaining(self.snooze_until, now).unwrap_or(0.0),
            backoff_remaining_sec: remaining(self.backoff.map(|b| b.until), now).unwrap_or(0.0),
            last_nudge_age_sec: self.last_nudge_at.map(|at| secs_between(at, now)),
            last_nudge_state: self.last_nudge_state,
            queued_nudge: self.queued.is_some(),
            queued_expires_in_sec: self
                .queued
                .as_ref()
                .map(|q| secs_between(now, q.expires_at).max(0.0)),
        }
    }

    pub fn last_decision(&self) -> Option<&NudgeDecision> {
        self.last_decision.as_ref()
    }

    pub fn queued_nudge(&self) -> Option<&QueuedNudge> {
        self.queued.as_ref()
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    pub fn audit(&self) -> &A {
        &self.audit
    }
}

/// Seconds until `until`, if it lies after `now`.
fn remaining(until: Option<Timestamp>, now: Timestamp) -> Option<f64> {
    until
        .filter(|&until| now < until)
        .map(|until| secs_between(now, until))
}

pub fn notification_title(state: PostureState) -> &'static str {
    match state {
        PostureState::Slouch => "Posture Check: Slouching",
        PostureState::ForwardLean => "Posture Check: Leaning Forward",
        PostureState::LateralLean => "Posture Check: Leaning Sideways",
        PostureState::Good | PostureState::Paused => "Posture Check",
    }
}

fn notification_message(
    event: &StateTransitionEvent,
    diagnostics: Option<&Diagnostics>,
    thresholds: &EffectiveThresholds,
) -> String {
    let metrics = &event.metrics_snapshot;
    let Some(condition) = Condition::from_state(event.to_state) else {
        return event.reason.clone();
    };

    let mut message = match condition {
        Condition::Slouch => format!(
            "Neck {:.1}° > {:.1}°",
            metrics.neck_flexion, thresholds.neck_deg
        ),
        Condition::ForwardLean => format!(
            "Torso {:.1}° > {:.1}°",
            metrics.torso_flexion, thresholds.torso_deg
        ),
        Condition::LateralLean => format!(
            "Lateral {:.3} > {:.3}",
            metrics.lateral_lean, thresholds.lateral_ratio
        ),
    };

    if let Some(diag) = diagnostics.map(|d| d.get(condition)) {
        message.push_str(&format!(
            " ({:.0}% of last {:.0}s)",
            diag.stats.above_fraction * 100.0,
            diag.window_sec
        ));
    }
    message
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
