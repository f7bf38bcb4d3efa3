//! `posture-agent` library crate.
//!
//! Re-exports internal modules for integration testing. The binary
//! entrypoint lives in `main.rs`.

pub mod calibrate;
pub mod config;
pub mod input;
pub mod runner;
pub mod session;
