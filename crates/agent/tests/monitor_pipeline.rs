//! End-to-end monitor runs over in-memory input.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use posture_agent::config::MonitorSettings;
use posture_agent::runner::{run_monitor, MonitorOptions};
use posture_core::audit::AuditEventType;
use posture_core::calibration::CalibrationBaseline;
use posture_core::metrics::PostureState;
use posture_core::smoothing::SmoothingConfig;
use posture_events::audit_log::{self, AUDIT_LOG_FILE};
use posture_events::delivery::LogNotifier;
use posture_events::status_publisher::STATUS_FILE;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;

fn t(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap() + chrono::Duration::seconds(secs)
}

fn baseline() -> CalibrationBaseline {
    CalibrationBaseline {
        neck_flexion_baseline: 5.0,
        torso_flexion_baseline: 3.0,
        lateral_lean_baseline: 0.02,
        shoulder_width_proxy: 0.02,
        sample_count: 100,
        confidence_mean: 0.9,
        calibrated_at: t(-60),
    }
}

fn options(dir: &std::path::Path) -> MonitorOptions {
    MonitorOptions {
        baseline: baseline(),
        settings: MonitorSettings::default(),
        smoothing: SmoothingConfig { ema_alpha: 0.5 },
        status_path: dir.join(STATUS_FILE),
        audit_log_path: dir.join(AUDIT_LOG_FILE),
        status_interval: Duration::from_millis(50),
        dnd_check_interval: Duration::from_secs(5),
    }
}

fn sample(secs: i64, neck: f64) -> String {
    format!(
        r#"{{"type":"sample","neck_flexion_deg":{neck},"torso_flexion_deg":3.0,"lateral_lean_ratio":0.02,"confidence":0.9,"timestamp":"{}"}}"#,
        t(secs).to_rfc3339()
    )
}

fn action(secs: i64, action: &str) -> String {
    format!(
        r#"{{"type":"action","action":"{action}","timestamp":"{}"}}"#,
        t(secs).to_rfc3339()
    )
}

fn read_status(dir: &std::path::Path) -> serde_json::Value {
    serde_json::from_slice(&std::fs::read(dir.join(STATUS_FILE)).unwrap()).unwrap()
}

#[tokio::test]
async fn sustained_slouch_is_nudged_then_dismissed() {
    let dir = tempfile::tempdir().unwrap();
    let mut lines = Vec::new();
    for i in 0..5 {
        lines.push(sample(i, 5.0));
    }
    for i in 5..30 {
        lines.push(sample(i, 20.0));
    }
    lines.push(action(30, "dismiss"));
    for i in 31..40 {
        lines.push(sample(i, 20.0));
    }
    lines.push("not json".to_string());
    let input = lines.join("\n");

    let summary = run_monitor(
        options(dir.path()),
        LogNotifier,
        input.as_bytes(),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(summary.samples_processed, 39);
    assert_eq!(summary.malformed_lines, 1);
    assert_eq!(summary.transitions, 1);
    assert_eq!(summary.nudges_delivered, 1);
    assert_eq!(summary.final_state, PostureState::Slouch);

    let entries = audit_log::read_recent(&dir.path().join(AUDIT_LOG_FILE), 10)
        .await
        .unwrap();
    let types: Vec<_> = entries.iter().map(|e| e.event_type).collect();
    assert_eq!(types, vec![AuditEventType::Nudged, AuditEventType::ActionDismiss]);
    assert_eq!(entries[1].state, "slouch");

    let status = read_status(dir.path());
    assert_eq!(status["lifecycle"], "idle");
    assert_eq!(status["state"], "slouch");
    // The stretch of good samples exceeds the gap budget, so only the
    // cumulative path can fire inside the first window.
    assert_eq!(status["detection_path"], "cumulative");
    // Dismiss backoff raised the ordinary slouch threshold from 13 to 18.
    assert_eq!(status["thresholds"]["slouch"]["ordinary"], 18.0);
    assert!(status["policy"]["backoff_remaining_sec"].as_f64().unwrap() > 3000.0);
}

#[tokio::test]
async fn good_posture_produces_no_nudges() {
    let dir = tempfile::tempdir().unwrap();
    let input: String = (0..40).map(|i| sample(i, 6.0) + "\n").collect();

    let summary = run_monitor(
        options(dir.path()),
        LogNotifier,
        input.as_bytes(),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(summary.transitions, 0);
    assert_eq!(summary.final_state, PostureState::Good);
    assert!(audit_log::read_recent(&dir.path().join(AUDIT_LOG_FILE), 10)
        .await
        .unwrap()
        .is_empty());
    assert_eq!(read_status(dir.path())["state"], "good");
}

#[tokio::test]
async fn cancellation_stops_open_input() {
    let dir = tempfile::tempdir().unwrap();
    let (mut writer, reader) = tokio::io::duplex(1024);
    let cancel = CancellationToken::new();

    let run = tokio::spawn(run_monitor(
        options(dir.path()),
        LogNotifier,
        BufReader::new(reader),
        cancel.clone(),
    ));

    writer
        .write_all((sample(0, 5.0) + "\n").as_bytes())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();

    let summary = run.await.unwrap().unwrap();
    assert_eq!(summary.samples_processed, 1);
    assert_eq!(read_status(dir.path())["lifecycle"], "idle");
    drop(writer);
}
