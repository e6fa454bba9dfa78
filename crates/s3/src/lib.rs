//! S3 backend for the multipart upload pipeline.
//!
//! [`S3Storage`] implements [`ObjectStorage`](chunkup_multipart::ObjectStorage)
//! over the AWS SDK. It works against AWS S3 and S3-compatible services
//! (MinIO, Garage, R2) through a custom endpoint and path-style addressing.

mod errors;
mod storage;

pub use errors::classify;
pub use storage::{DEFAULT_MAX_CONNECTIONS, S3Settings, S3Storage, StaticCredentials};

/// Errors raised while building an [`S3Storage`].
#[derive(Debug, thiserror::Error)]
pub enum S3ConfigError {
    #[error("invalid S3 config: {0}")]
    Invalid(String),
}
