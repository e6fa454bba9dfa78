//! Upload orchestrator: runs one file through begin, dispatch, drain and
//! finalize.
//!
//! Part uploads run as tasks on a [`JoinSet`]. The [`Governor`] admits a
//! part only while fewer than `task_limit` uploads are outstanding, and
//! pauses the [`ChunkSource`] at the limit. Every fatal failure after the
//! session opened ends in exactly one abort.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use chunkup_protocol::constants::MAX_PART_COUNT;
use chunkup_protocol::{SessionState, UploadProgress};
use chunkup_transfer::{ChunkSource, SpeedCalculator};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use crate::error::UploadError;
use crate::events::{EventSink, UploadEvent};
use crate::governor::Governor;
use crate::retry::PartOutcome;
use crate::session::SessionFinalizer;
use crate::storage::ObjectStorage;
use crate::tracker::{CompletionTracker, OutstandingWork};
use crate::types::{UploadConfig, UploadReport};
use crate::uploader::PartUploader;

/// Orchestrates a multipart upload of one file.
pub struct UploadOrchestrator {
    storage: Arc<dyn ObjectStorage>,
    config: UploadConfig,
    events_tx: mpsc::Sender<UploadEvent>,
    events_rx: Option<mpsc::Receiver<UploadEvent>>,
    cancel: CancellationToken,
}

impl UploadOrchestrator {
    pub fn new(storage: Arc<dyn ObjectStorage>, config: UploadConfig) -> Self {
        let (events_tx, events_rx) = mpsc::channel(256);
        Self {
            storage,
            config,
            events_tx,
            events_rx: Some(events_rx),
            cancel: CancellationToken::new(),
        }
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<UploadEvent>> {
        self.events_rx.take()
    }

    /// Returns a cancellation token for this upload.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Uploads the configured file.
    ///
    /// Returns the committed object, or the first fatal error. When the
    /// error happened after the session opened, the session was aborted.
    pub async fn run(&self) -> Result<UploadReport, UploadError> {
        match self.run_inner().await {
            Ok(report) => {
                info!(
                    object = %self.config.target,
                    upload_id = %report.upload_id,
                    parts = report.parts,
                    bytes = report.bytes,
                    peak_outstanding = report.peak_outstanding,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "upload completed"
                );
                Ok(report)
            }
            Err(e) => {
                error!(object = %self.config.target, error = %e, "upload failed");
                Err(e)
            }
        }
    }

    async fn run_inner(&self) -> Result<UploadReport, UploadError> {
        let started = Instant::now();
        let config = &self.config;
        config.validate()?;

        let mut source =
            ChunkSource::open(&config.source, config.chunk_size, config.checksum_algorithm).await?;
        let total_bytes = source.file_size();
        if total_bytes == 0 {
            return Err(UploadError::EmptySource(config.source.display().to_string()));
        }
        let expected = source.expected_parts();
        if expected > u64::from(MAX_PART_COUNT) {
            return Err(UploadError::TooManyParts {
                parts: expected,
                max: MAX_PART_COUNT,
            });
        }
        let expected = expected as u32;

        if self.cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        info!(
            source = %config.source.display(),
            object = %config.target,
            bytes = total_bytes,
            parts = expected,
            task_limit = config.task_limit,
            chunk_size = config.chunk_size,
            "starting upload"
        );

        let events = EventSink::new(self.events_tx.clone());
        let mut finalizer = SessionFinalizer::new(Arc::clone(&self.storage));
        let session = finalizer
            .begin(&config.target, config.checksum_algorithm)
            .await?;
        events.emit(UploadEvent::SessionOpened {
            upload_id: session.upload_id.clone(),
        });

        let pipeline = self.cancel.child_token();
        let work = Arc::new(OutstandingWork::new());
        let tracker = Arc::new(CompletionTracker::new());
        let governor = Governor::new(config.task_limit, Arc::clone(&work))
            .with_source(source.pause_handle());
        let uploader = Arc::new(
            PartUploader::new(
                Arc::clone(&self.storage),
                session.clone(),
                config.retry.clone(),
                pipeline.clone(),
            )
            .with_events(events.clone()),
        );
        let reporter = Arc::new(ProgressReporter {
            upload_id: session.upload_id.clone(),
            total_bytes,
            parts_total: expected,
            started_at: Utc::now(),
            draining: AtomicBool::new(false),
            speed: SpeedCalculator::default(),
            tracker: Arc::clone(&tracker),
            work: Arc::clone(&work),
            events: events.clone(),
        });

        let mut tasks = JoinSet::new();
        let mut read_error = None;
        let mut exhausted = false;

        loop {
            let next = tokio::select! {
                biased;
                _ = pipeline.cancelled() => break,
                next = source.next_chunk() => next,
            };
            let part = match next {
                Ok(Some(part)) => part,
                Ok(None) => {
                    exhausted = true;
                    break;
                }
                Err(e) => {
                    read_error = Some(e);
                    pipeline.cancel();
                    break;
                }
            };

            let admission = tokio::select! {
                biased;
                _ = pipeline.cancelled() => break,
                admission = governor.admit() => match admission {
                    Ok(admission) => admission,
                    Err(_) => break,
                },
            };
            debug!(
                part = part.part_number,
                offset = part.offset,
                end = part.end(),
                bytes = part.len(),
                outstanding = governor.outstanding(),
                "dispatching part"
            );

            let uploader = Arc::clone(&uploader);
            let task_tracker = Arc::clone(&tracker);
            let reporter = Arc::clone(&reporter);
            let events = events.clone();
            let task_pipeline = pipeline.clone();
            tasks.spawn(async move {
                let bytes = part.len() as u64;
                match uploader.upload(&part).await {
                    PartOutcome::Uploaded { ack, attempts } => {
                        let part_number = part.part_number;
                        task_tracker.record(part_number, ack, bytes);
                        // Resolve only after the ack is stored, so drain never
                        // sees zero outstanding with an ack still missing.
                        drop(admission);
                        events.emit(UploadEvent::PartUploaded {
                            part_number,
                            bytes,
                            attempts,
                        });
                        reporter.report(bytes);
                    }
                    PartOutcome::Failed {
                        part_number,
                        attempts,
                        error,
                    } => {
                        if task_tracker.fail(UploadError::PartFailed {
                            part_number,
                            attempts,
                            source: error.clone(),
                        }) {
                            error!(part = part_number, attempts, error = %error, "part upload failed");
                        }
                        task_pipeline.cancel();
                        drop(admission);
                    }
                    PartOutcome::Cancelled { part_number } => {
                        trace!(part = part_number, "part upload cancelled");
                        drop(admission);
                    }
                }
            });

            // Surface panics early instead of after the whole file was read.
            while let Some(joined) = tasks.try_join_next() {
                if let Err(e) = joined {
                    tracker.fail(UploadError::Task(e.to_string()));
                    pipeline.cancel();
                }
            }
        }

        if exhausted && !pipeline.is_cancelled() {
            if let Err(err) = finalizer.drain() {
                pipeline.cancel();
                governor.close();
                return Err(abort(&mut finalizer, &events, err).await);
            }
            reporter.draining.store(true, Ordering::Relaxed);
            events.emit(UploadEvent::Draining { parts: expected });
            debug!(outstanding = work.current(), "source exhausted, draining");
            tokio::select! {
                biased;
                _ = pipeline.cancelled() => {}
                _ = work.wait_idle() => {}
            }
        }

        if pipeline.is_cancelled() {
            governor.close();
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracker.fail(UploadError::Task(e.to_string()));
            }
        }

        let failure = tracker
            .take_failure()
            .or_else(|| read_error.map(UploadError::from))
            .or_else(|| pipeline.is_cancelled().then_some(UploadError::Cancelled));
        if let Some(err) = failure {
            return Err(abort(&mut finalizer, &events, err).await);
        }

        let parts = match tracker.completed_parts(expected) {
            Ok(parts) => parts,
            Err(err) => return Err(abort(&mut finalizer, &events, err).await),
        };

        events.emit(UploadEvent::Finalizing { parts: expected });
        let object = match finalizer.finalize(&parts).await {
            Ok(object) => object,
            Err(err) => return Err(abort(&mut finalizer, &events, err).await),
        };
        events.emit(UploadEvent::Completed {
            object: object.clone(),
        });

        Ok(UploadReport {
            upload_id: session.upload_id,
            object,
            parts: expected,
            bytes: tracker.uploaded_bytes(),
            sha256: source.file_sha256().unwrap_or_default(),
            peak_outstanding: governor.peak(),
            elapsed: started.elapsed(),
        })
    }
}

async fn abort(finalizer: &mut SessionFinalizer, events: &EventSink, err: UploadError) -> UploadError {
    let reason = err.to_string();
    if finalizer.abort(&reason).await {
        events.emit(UploadEvent::Aborted { reason });
    }
    err
}

/// Builds progress snapshots after each acknowledged part.
struct ProgressReporter {
    upload_id: String,
    total_bytes: u64,
    parts_total: u32,
    started_at: DateTime<Utc>,
    draining: AtomicBool,
    speed: SpeedCalculator,
    tracker: Arc<CompletionTracker>,
    work: Arc<OutstandingWork>,
    events: EventSink,
}

impl ProgressReporter {
    fn report(&self, bytes: u64) {
        self.speed.record(bytes);
        let uploaded = self.tracker.uploaded_bytes();
        let state = if self.draining.load(Ordering::Relaxed) {
            SessionState::Draining
        } else {
            SessionState::SessionOpen
        };
        self.events.emit(UploadEvent::Progress(UploadProgress {
            upload_id: self.upload_id.clone(),
            state,
            total_bytes: self.total_bytes,
            uploaded_bytes: uploaded,
            parts_total: self.parts_total,
            parts_done: self.tracker.parts_done(),
            outstanding: self.work.current(),
            bytes_per_second: self.speed.bytes_per_second(),
            eta_seconds: self
                .speed
                .eta(self.total_bytes.saturating_sub(uploaded))
                .map(|eta| eta.as_secs()),
            started_at: self.started_at,
            updated_at: Utc::now(),
        }));
    }
}
