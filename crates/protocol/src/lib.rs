//! Data types shared by the chunkup crates.
//!
//! Everything here is plain data: the storage trait, the pipeline and the
//! S3 backend exchange these values and never each other's internals.

pub mod constants;
pub mod types;

// Re-export primary types for convenience.
pub use constants::ChecksumAlgorithm;
pub use types::{
    ObjectDescriptor, ObjectTarget, PartAck, SessionState, UploadProgress, UploadSession,
};
