//! Wires the S3 backend to the upload pipeline and runs one upload.

use std::sync::Arc;

use anyhow::Context;
use chunkup_multipart::{UploadEvent, UploadOrchestrator};
use chunkup_s3::S3Storage;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;

/// Uploads the configured file. Ctrl-C cancels and aborts the session.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let credentials = config.load_credentials()?;
    if credentials.is_none() {
        tracing::debug!("no credentials file, using ambient AWS credentials");
    }
    let storage = S3Storage::connect(config.s3_settings(credentials))
        .await
        .context("configuring S3 client")?;
    tracing::debug!(storage = ?storage, "storage ready");

    let mut orchestrator = UploadOrchestrator::new(Arc::new(storage), config.upload_config());
    let events = orchestrator
        .take_events()
        .context("event receiver already taken")?;
    let printer = tokio::spawn(log_events(events));
    let watcher = tokio::spawn(cancel_on_ctrl_c(orchestrator.cancel_token()));

    let result = orchestrator.run().await;
    watcher.abort();
    // Closes the event channel so the printer drains and exits.
    drop(orchestrator);
    let _ = printer.await;

    let report = result.with_context(|| {
        format!(
            "uploading {} to {}/{}",
            config.source_path().display(),
            config.bucket,
            config.key
        )
    })?;

    let secs = report.elapsed.as_secs_f64();
    tracing::info!(
        location = report.object.location.as_deref().unwrap_or("-"),
        e_tag = report.object.e_tag.as_deref().unwrap_or("-"),
        version_id = report.object.version_id.as_deref().unwrap_or("-"),
        sha256 = %report.sha256,
        size = %human_bytes(report.bytes),
        parts = report.parts,
        peak_outstanding = report.peak_outstanding,
        rate = %format!("{}/s", human_bytes(rate(report.bytes, secs))),
        "upload finished"
    );
    Ok(())
}

async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("SIGINT received, cancelling upload");
        cancel.cancel();
    }
}

async fn log_events(mut events: mpsc::Receiver<UploadEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            UploadEvent::SessionOpened { upload_id } => {
                tracing::info!(upload_id = %upload_id, "multipart session opened");
            }
            UploadEvent::PartUploaded {
                part_number,
                bytes,
                attempts,
            } => {
                tracing::debug!(part = part_number, bytes, attempts, "part done");
            }
            UploadEvent::PartRetrying {
                part_number,
                attempt,
                delay,
                error,
            } => {
                tracing::warn!(
                    part = part_number,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "retrying part"
                );
            }
            UploadEvent::Progress(progress) => {
                tracing::info!(
                    parts = %format!("{}/{}", progress.parts_done, progress.parts_total),
                    percent = %format!("{:.1}", progress.percentage()),
                    outstanding = progress.outstanding,
                    eta_s = progress.eta_seconds.unwrap_or(0),
                    rate = %format!("{}/s", human_bytes(progress.bytes_per_second as u64)),
                    "progress"
                );
            }
            UploadEvent::Draining { parts } => {
                tracing::info!(parts, "all parts read, waiting for uploads");
            }
            UploadEvent::Finalizing { parts } => {
                tracing::info!(parts, "completing multipart upload");
            }
            UploadEvent::Completed { object } => {
                tracing::info!(object = %object.target, "object committed");
            }
            UploadEvent::Aborted { reason } => {
                tracing::warn!(reason = %reason, "multipart session aborted");
            }
        }
    }
}

fn rate(bytes: u64, secs: f64) -> u64 {
    if secs <= 0.0 {
        return 0;
    }
    (bytes as f64 / secs) as u64
}

/// Formats a byte count with binary units, e.g. `12.5 MiB`.
fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_bytes_units() {
        assert_eq!(human_bytes(0), "0 B");
        assert_eq!(human_bytes(1023), "1023 B");
        assert_eq!(human_bytes(1024), "1.0 KiB");
        assert_eq!(human_bytes(12 * 1024 * 1024 + 512 * 1024), "12.5 MiB");
        assert_eq!(human_bytes(3 * 1024 * 1024 * 1024), "3.0 GiB");
    }

    #[test]
    fn rate_handles_zero_elapsed() {
        assert_eq!(rate(100, 0.0), 0);
        assert_eq!(rate(100, 2.0), 50);
    }
}
