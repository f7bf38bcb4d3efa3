//! Posture monitoring domain logic.
//!
//! Pure logic with no I/O: condition windows, metric smoothing, the posture
//! state machine and the notification policy. Delivery, persistence and
//! scheduling live in `posture-events` and `posture-agent`.

pub mod audit;
pub mod calibration;
pub mod error;
pub mod lifecycle;
pub mod metrics;
pub mod notifier;
pub mod nudge;
pub mod policy;
pub mod smoothing;
pub mod state_config;
pub mod state_machine;
pub mod status;
pub mod sustain;
pub mod threshold_validation;
pub mod thresholds;
pub mod types;
pub mod window;
