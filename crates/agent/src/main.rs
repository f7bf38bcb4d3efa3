//! `posture-agent` -- posture monitoring daemon.
//!
//! Reads posture metric samples and user actions as newline-delimited JSON
//! on stdin, detects sustained poor posture, and posts nudges through the
//! desktop notification system.
//!
//! # Usage
//!
//! ```text
//! posture-agent [run]          monitor (default)
//! posture-agent calibrate      capture a neutral-posture baseline
//! posture-agent reset          delete the saved baseline and audit log
//! ```
//!
//! See [`AgentConfig::from_env`] for environment variables.

use anyhow::Context;
use posture_agent::calibrate::run_calibration;
use posture_agent::config::{AgentConfig, MonitorSettings};
use posture_agent::runner::{run_monitor, uncalibrated_status, MonitorOptions};
use posture_core::error::CoreError;
use posture_events::audit_log;
use posture_events::delivery::SystemNotifier;
use posture_events::status_publisher::StatusPublisher;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "posture_agent=info,posture_events=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = AgentConfig::from_env().context("invalid environment configuration")?;
    let mode = std::env::args().nth(1).unwrap_or_else(|| "run".into());

    tracing::info!(
        mode = %mode,
        storage_dir = %config.storage_dir.display(),
        dry_run = config.dry_run,
        "Starting posture-agent",
    );

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            cancel.cancel();
        }
    });

    let stdin = BufReader::new(tokio::io::stdin());

    match mode.as_str() {
        "run" => run(config, stdin, cancel).await,
        "calibrate" => {
            let store = config.baseline_store();
            run_calibration(
                stdin,
                tokio::io::stdout(),
                &store,
                config.calibration_duration,
                cancel,
            )
            .await?;
            Ok(())
        }
        "reset" => {
            let removed = config.baseline_store().delete().await?;
            let purged = audit_log::purge(&config.audit_log_path()).await?;
            tracing::info!(baseline_removed = removed, audit_log_purged = purged, "Storage reset");
            Ok(())
        }
        other => anyhow::bail!("unknown mode '{other}', expected run, calibrate or reset"),
    }
}

/// Wait for SIGINT (Ctrl-C) or, on Unix, SIGTERM.
///
/// A handler that fails to install never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), stopping");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, stopping");
        }
    }
}

async fn run(
    config: AgentConfig,
    input: BufReader<tokio::io::Stdin>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let settings = MonitorSettings::load(&config.config_file)
        .await
        .context("failed to load monitor settings")?;

    let store = config.baseline_store();
    let Some(baseline) = store.load().await.context("failed to load calibration")? else {
        StatusPublisher::new(config.status_path(), config.status_interval)
            .publish(&uncalibrated_status())
            .await?;
        return Err(CoreError::NotCalibrated).context("run `posture-agent calibrate` first");
    };

    tracing::info!(
        preset = settings.preset.as_str(),
        neck_baseline = baseline.neck_flexion_baseline,
        torso_baseline = baseline.torso_flexion_baseline,
        lateral_baseline = baseline.lateral_lean_baseline,
        calibrated_at = %baseline.calibrated_at,
        "Loaded calibration baseline",
    );

    let notifier = SystemNotifier::from_dry_run(config.dry_run);
    if notifier.is_dry_run() {
        tracing::info!("Dry run: nudges will be logged, not posted");
    }

    let options = MonitorOptions::new(&config, settings, baseline);
    run_monitor(options, notifier, input, cancel).await?;
    Ok(())
}
