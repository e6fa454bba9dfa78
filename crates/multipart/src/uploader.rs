//! Uploads one part, applying the retry policy.

use std::sync::Arc;

use chunkup_protocol::UploadSession;
use chunkup_transfer::Part;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::events::{EventSink, UploadEvent};
use crate::retry::{PartOutcome, RetryDecision, RetryPolicy};
use crate::storage::ObjectStorage;

/// Uploads parts of one session.
///
/// A failed part only ever produces a [`PartOutcome`]; it never touches
/// another part's state.
pub struct PartUploader {
    storage: Arc<dyn ObjectStorage>,
    session: UploadSession,
    policy: RetryPolicy,
    cancel: CancellationToken,
    events: Option<EventSink>,
}

impl PartUploader {
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        session: UploadSession,
        policy: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            storage,
            session,
            policy,
            cancel,
            events: None,
        }
    }

    pub(crate) fn with_events(mut self, events: EventSink) -> Self {
        self.events = Some(events);
        self
    }

    /// Uploads `part` until it is acknowledged, the policy gives up, or the
    /// uploader is cancelled.
    pub async fn upload(&self, part: &Part) -> PartOutcome {
        let part_number = part.part_number;
        let mut attempts = 0;

        loop {
            attempts += 1;

            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return PartOutcome::Cancelled { part_number };
                }
                result = self.storage.upload_part(
                    &self.session,
                    part_number,
                    part.data.clone(),
                    Some(part.checksum.as_str()),
                ) => result,
            };

            let error = match result {
                Ok(mut ack) => {
                    if ack.part_number != part_number {
                        warn!(
                            part = part_number,
                            echoed = ack.part_number,
                            "service echoed a different part number, keeping the dispatched one"
                        );
                        ack.part_number = part_number;
                    }
                    debug!(part = part_number, attempts, e_tag = %ack.e_tag, "part uploaded");
                    return PartOutcome::Uploaded { ack, attempts };
                }
                Err(error) => error,
            };

            let delay = match self.policy.decide(attempts, &error) {
                RetryDecision::Retry(delay) => delay,
                RetryDecision::GiveUp => {
                    return PartOutcome::Failed {
                        part_number,
                        attempts,
                        error,
                    };
                }
            };

            warn!(
                part = part_number,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "part upload failed, retrying"
            );
            if let Some(events) = &self.events {
                events.emit(UploadEvent::PartRetrying {
                    part_number,
                    attempt: attempts,
                    delay,
                    error: error.to_string(),
                });
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return PartOutcome::Cancelled { part_number };
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
