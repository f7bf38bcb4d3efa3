//! Calibration mode: capture neutral-posture samples and save a baseline.
//!
//! Progress is reported as one JSON object per line on the progress writer
//! and mirrored to the log.

use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use posture_core::calibration::{
    CalibrationBaseline, CalibrationCollector, CalibrationPhase, CalibrationProgress,
};
use posture_core::types::secs_between;
use posture_events::store::BaselineStore;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::input::{InputClock, InputMessage};

/// Emit a capturing update every this many accepted samples.
const PROGRESS_EVERY: usize = 25;

async fn report<W: AsyncWrite + Unpin>(
    out: &mut W,
    progress: &CalibrationProgress,
) -> anyhow::Result<()> {
    tracing::info!(
        phase = progress.phase.as_str(),
        samples = progress.samples_captured,
        confidence_mean = progress.confidence_mean,
        "Calibration progress"
    );
    let mut line = serde_json::to_vec(progress)?;
    line.push(b'\n');
    out.write_all(&line).await?;
    out.flush().await?;
    Ok(())
}

/// Capture samples for `duration` of sample time (or until input closes),
/// aggregate them and save the baseline to `store`.
pub async fn run_calibration<R, W>(
    input: R,
    mut progress_out: W,
    store: &BaselineStore,
    duration: Duration,
    cancel: CancellationToken,
) -> anyhow::Result<CalibrationBaseline>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut collector = CalibrationCollector::new();
    report(&mut progress_out, &collector.progress(CalibrationPhase::Preparing)).await?;

    let mut clock = InputClock::new(Utc::now());
    let mut started_at = None;
    let mut lines = input.lines();

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line.context("failed to read calibration input")?,
        };
        let Some(line) = line else { break };

        let message = match InputMessage::parse(&line) {
            Ok(Some(message)) => message,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed input line");
                continue;
            }
        };
        let at = message.timestamp().unwrap_or_else(|| clock.now());
        clock.observe(at);
        let Some(sample) = message.sample(at) else {
            tracing::debug!("Ignoring action during calibration");
            continue;
        };

        let start = *started_at.get_or_insert(at);
        let elapsed = secs_between(start, at);
        if elapsed >= duration.as_secs_f64() {
            break;
        }

        if collector.push(&sample) && collector.len() % PROGRESS_EVERY == 0 {
            let mut progress = collector.progress(CalibrationPhase::Capturing);
            progress.elapsed_sec = Some(elapsed);
            report(&mut progress_out, &progress).await?;
        }
    }

    report(&mut progress_out, &collector.progress(CalibrationPhase::Aggregating)).await?;
    let baseline = match collector.aggregate(clock.now()) {
        Ok(baseline) => baseline,
        Err(e) => {
            report(
                &mut progress_out,
                &CalibrationProgress::error(collector.len(), e.to_string()),
            )
            .await?;
            return Err(e).context("calibration failed");
        }
    };

    report(&mut progress_out, &collector.progress(CalibrationPhase::Saving)).await?;
    if let Err(e) = store.save(&baseline).await {
        report(
            &mut progress_out,
            &CalibrationProgress::error(collector.len(), e.to_string()),
        )
        .await?;
        return Err(e).context("failed to save calibration baseline");
    }

    report(&mut progress_out, &CalibrationProgress::done(baseline)).await?;
    Ok(baseline)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use posture_core::error::CoreError;

    fn sample_line(i: usize, neck: f64, confidence: f64) -> String {
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap()
            + chrono::Duration::milliseconds(i as i64 * 100);
        format!(
            r#"{{"type":"sample","neck_flexion_deg":{neck},"torso_flexion_deg":4.0,"lateral_lean_ratio":0.03,"confidence":{confidence},"timestamp":"{}"}}"#,
            at.to_rfc3339()
        )
    }

    fn phases(output: &[u8]) -> Vec<String> {
        String::from_utf8_lossy(output)
            .lines()
            .map(|l| {
                let v: serde_json::Value = serde_json::from_str(l).unwrap();
                v["phase"].as_str().unwrap().to_string()
            })
            .collect()
    }

    #[tokio::test]
    async fn captures_until_duration_and_saves() {
        let dir = tempfile::tempdir().unwrap();
        let store = BaselineStore::in_dir(dir.path());
        // 10 samples per second for 12s; only the first 10s are captured.
        let input: String = (0..120)
            .map(|i| sample_line(i, if i % 2 == 0 { 8.0 } else { 12.0 }, 0.9) + "\n")
            .collect();
        let mut out = Vec::new();

        let baseline = run_calibration(
            input.as_bytes(),
            &mut out,
            &store,
            Duration::from_secs(10),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(baseline.sample_count, 100);
        assert_eq!(baseline.neck_flexion_baseline, 10.0);
        assert_eq!(baseline.torso_flexion_baseline, 4.0);
        assert_eq!(store.load().await.unwrap(), Some(baseline));

        let phases = phases(&out);
        assert_eq!(phases.first().map(String::as_str), Some("preparing"));
        assert!(phases.iter().filter(|p| *p == "capturing").count() >= 3);
        assert_eq!(&phases[phases.len() - 3..], ["aggregating", "saving", "done"]);
    }

    #[tokio::test]
    async fn too_few_confident_samples_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = BaselineStore::in_dir(dir.path());
        let input: String = (0..80)
            .map(|i| sample_line(i, 10.0, if i < 30 { 0.9 } else { 0.2 }) + "\n")
            .collect();
        let mut out = Vec::new();

        let err = run_calibration(
            input.as_bytes(),
            &mut out,
            &store,
            Duration::from_secs(25),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<CoreError>(),
            Some(CoreError::InsufficientSamples { captured: 30, required: 50 })
        ));
        assert_eq!(phases(&out).last().map(String::as_str), Some("error"));
        assert!(!store.is_calibrated().await);
    }
}
