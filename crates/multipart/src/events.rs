//! Progress events emitted while an upload runs.

use std::time::Duration;

use chunkup_protocol::{ObjectDescriptor, UploadProgress};
use tokio::sync::mpsc;
use tracing::trace;

/// Event emitted by the upload pipeline.
#[derive(Debug, Clone)]
pub enum UploadEvent {
    /// Begin-session succeeded.
    SessionOpened { upload_id: String },
    /// One part was acknowledged.
    PartUploaded {
        part_number: u32,
        bytes: u64,
        attempts: u32,
    },
    /// One attempt of a part failed and will be repeated.
    PartRetrying {
        part_number: u32,
        attempt: u32,
        delay: Duration,
        error: String,
    },
    /// Aggregate progress, sent after each acknowledged part.
    Progress(UploadProgress),
    /// The source hit end of file; waiting for in-flight parts.
    Draining { parts: u32 },
    /// Every part resolved; the finalize request is being sent.
    Finalizing { parts: u32 },
    /// The object was committed.
    Completed { object: ObjectDescriptor },
    /// The session was released without producing an object.
    Aborted { reason: String },
}

/// Non-blocking sender for [`UploadEvent`]s.
///
/// A slow or absent consumer never stalls the pipeline: events that do
/// not fit the channel are dropped.
#[derive(Debug, Clone)]
pub(crate) struct EventSink {
    tx: mpsc::Sender<UploadEvent>,
}

impl EventSink {
    pub(crate) fn new(tx: mpsc::Sender<UploadEvent>) -> Self {
        Self { tx }
    }

    pub(crate) fn emit(&self, event: UploadEvent) {
        if let Err(e) = self.tx.try_send(event) {
            trace!(error = %e, "upload event dropped");
        }
    }
}
