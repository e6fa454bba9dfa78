//! Session lifecycle: begin, drain, finalize or abort.
//!
//! ```text
//! NotStarted -> SessionOpen -> Draining -> Finalizing -> Completed
//!                   \______________\____________\-----> Aborted
//! ```

use std::sync::Arc;

use chunkup_protocol::{
    ChecksumAlgorithm, ObjectDescriptor, ObjectTarget, PartAck, SessionState, UploadSession,
};
use tracing::{info, warn};

use crate::error::UploadError;
use crate::storage::ObjectStorage;

/// Owns the remote session and guards its state transitions.
///
/// Finalize and abort each reach the storage service at most once.
pub struct SessionFinalizer {
    storage: Arc<dyn ObjectStorage>,
    state: SessionState,
    session: Option<UploadSession>,
    abort_sent: bool,
}

impl SessionFinalizer {
    pub fn new(storage: Arc<dyn ObjectStorage>) -> Self {
        Self {
            storage,
            state: SessionState::NotStarted,
            session: None,
            abort_sent: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, to: SessionState) -> Result<(), UploadError> {
        use SessionState::*;
        let allowed = matches!(
            (self.state, to),
            (NotStarted, SessionOpen)
                | (SessionOpen, Draining)
                | (Draining, Finalizing)
                | (Finalizing, Completed)
                | (SessionOpen | Draining | Finalizing, Aborted)
        );
        if !allowed {
            return Err(UploadError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    /// Opens the remote session. On failure the state stays `NotStarted`.
    pub async fn begin(
        &mut self,
        target: &ObjectTarget,
        algorithm: ChecksumAlgorithm,
    ) -> Result<UploadSession, UploadError> {
        if self.state != SessionState::NotStarted {
            return Err(UploadError::InvalidTransition {
                from: self.state,
                to: SessionState::SessionOpen,
            });
        }
        let session = self
            .storage
            .begin_session(target, algorithm)
            .await
            .map_err(UploadError::BeginSession)?;
        self.transition(SessionState::SessionOpen)?;
        info!(upload_id = %session.upload_id, object = %target, "session opened");
        self.session = Some(session.clone());
        Ok(session)
    }

    /// Marks the source as exhausted.
    pub fn drain(&mut self) -> Result<(), UploadError> {
        self.transition(SessionState::Draining)
    }

    /// Commits `parts`, which must be numbered `1..=N` in order.
    ///
    /// On failure the session stays `Finalizing`; the caller aborts it.
    pub async fn finalize(&mut self, parts: &[PartAck]) -> Result<ObjectDescriptor, UploadError> {
        let missing = ordering_gaps(parts);
        if !missing.is_empty() {
            return Err(UploadError::MissingParts(missing));
        }
        self.transition(SessionState::Finalizing)?;

        let Some(session) = self.session.as_ref() else {
            return Err(UploadError::InvalidTransition {
                from: self.state,
                to: SessionState::Completed,
            });
        };
        let object = self
            .storage
            .finalize_session(session, parts)
            .await
            .map_err(UploadError::Finalize)?;
        info!(upload_id = %session.upload_id, parts = parts.len(), "session finalized");
        self.transition(SessionState::Completed)?;
        Ok(object)
    }

    /// Releases the remote session.
    ///
    /// Does nothing when no session is open, when it already completed, or
    /// when abort was already sent. Returns `true` if this call sent it. A
    /// failed abort request is logged, not returned: the caller is already
    /// handling the error that caused it.
    pub async fn abort(&mut self, reason: &str) -> bool {
        if self.abort_sent || self.state.is_terminal() {
            return false;
        }
        if self.transition(SessionState::Aborted).is_err() {
            return false;
        }
        self.abort_sent = true;

        let Some(session) = self.session.as_ref() else {
            return false;
        };
        warn!(upload_id = %session.upload_id, reason, "aborting session");
        if let Err(e) = self.storage.abort_session(session).await {
            warn!(
                upload_id = %session.upload_id,
                error = %e,
                "abort failed, the session may linger until the service expires it"
            );
        }
        true
    }
}

/// Part numbers absent from an ordered `1..=N` list, or out of place.
fn ordering_gaps(parts: &[PartAck]) -> Vec<u32> {
    if parts.is_empty() {
        return vec![1];
    }
    parts
        .iter()
        .enumerate()
        .filter(|(i, p)| p.part_number != *i as u32 + 1)
        .map(|(i, _)| i as u32 + 1)
        .collect()
}
