//! Sequential file chunking for multipart uploads.
//!
//! [`ChunkSource`] reads a file front to back and hands out numbered
//! [`Part`]s, each carrying its own checksum. Production can be paused
//! from outside through a [`PauseHandle`].

mod chunked;
mod progress;
mod types;
mod validation;

pub use chunked::{ChunkSource, PauseHandle, part_checksum, sha256_hex};
pub use progress::SpeedCalculator;
pub use types::Part;
pub use validation::validate_object_key;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("source shrank while reading: expected {expected} bytes at offset {offset}")]
    UnexpectedEof { offset: u64, expected: usize },

    #[error("part number overflow after part {0}")]
    PartNumberOverflow(u32),

    #[error("invalid chunk size: {0}")]
    InvalidChunkSize(usize),

    #[error("invalid object key: {0}")]
    InvalidKey(String),

    #[error("pause control closed")]
    PauseClosed,
}
