//! Upload error types.

use chunkup_protocol::SessionState;
use chunkup_transfer::TransferError;

/// Failure reported by an [`ObjectStorage`](crate::ObjectStorage) call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("throttled: {0}")]
    Throttled(String),

    #[error("service error: {0}")]
    Service(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("invalid session: {0}")]
    InvalidSession(String),

    #[error("request rejected: {0}")]
    Rejected(String),
}

impl StorageError {
    /// Whether repeating the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Throttled(_) | Self::Service(_)
        )
    }
}

/// Errors produced while running an upload.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("source file is empty: {0}")]
    EmptySource(String),

    #[error("source needs {parts} parts, limit is {max}")]
    TooManyParts { parts: u64, max: u32 },

    #[error("begin session failed: {0}")]
    BeginSession(#[source] StorageError),

    #[error("part {part_number} failed after {attempts} attempt(s): {source}")]
    PartFailed {
        part_number: u32,
        attempts: u32,
        #[source]
        source: StorageError,
    },

    #[error("parts missing from finalize list: {0:?}")]
    MissingParts(Vec<u32>),

    #[error("finalize failed: {0}")]
    Finalize(#[source] StorageError),

    #[error("upload task failed: {0}")]
    Task(String),

    #[error("invalid session transition from {from} to {to}")]
    InvalidTransition { from: SessionState, to: SessionState },

    #[error("cancelled")]
    Cancelled,
}
