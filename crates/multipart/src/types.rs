//! Data types for the upload pipeline.

use std::path::PathBuf;
use std::time::Duration;

use chunkup_protocol::constants::{DEFAULT_CHUNK_SIZE, DEFAULT_TASK_LIMIT};
use chunkup_protocol::{ChecksumAlgorithm, ObjectDescriptor, ObjectTarget};

use crate::error::UploadError;
use crate::retry::RetryPolicy;

/// Everything the pipeline needs to upload one file.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Local file to read.
    pub source: PathBuf,
    pub target: ObjectTarget,
    /// Maximum part uploads in flight at once.
    pub task_limit: usize,
    /// Maximum part size in bytes.
    pub chunk_size: usize,
    pub checksum_algorithm: ChecksumAlgorithm,
    pub retry: RetryPolicy,
}

impl UploadConfig {
    /// Config with default limits for `source` -> `target`.
    pub fn new(source: impl Into<PathBuf>, target: ObjectTarget) -> Self {
        Self {
            source: source.into(),
            target,
            task_limit: DEFAULT_TASK_LIMIT,
            chunk_size: DEFAULT_CHUNK_SIZE,
            checksum_algorithm: ChecksumAlgorithm::default(),
            retry: RetryPolicy::default(),
        }
    }

    /// Checks the values that must hold before any session is opened.
    pub fn validate(&self) -> Result<(), UploadError> {
        if self.task_limit == 0 {
            return Err(UploadError::InvalidConfig(
                "task_limit must be at least 1".into(),
            ));
        }
        if self.chunk_size == 0 {
            return Err(UploadError::InvalidConfig(
                "chunk_size must be at least 1 byte".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(UploadError::InvalidConfig(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.target.bucket.is_empty() {
            return Err(UploadError::InvalidConfig("bucket is empty".into()));
        }
        chunkup_transfer::validate_object_key(&self.target.key)?;
        Ok(())
    }
}

/// Summary of a successful upload.
#[derive(Debug, Clone)]
pub struct UploadReport {
    pub upload_id: String,
    pub object: ObjectDescriptor,
    pub parts: u32,
    pub bytes: u64,
    /// Hex SHA-256 of the whole source file.
    pub sha256: String,
    /// Highest number of part uploads in flight at once.
    pub peak_outstanding: usize,
    pub elapsed: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> UploadConfig {
        UploadConfig::new("/tmp/file.bin", ObjectTarget::new("bucket", "file.bin"))
    }

    #[test]
    fn defaults_are_valid() {
        let config = config();
        assert_eq!(config.task_limit, DEFAULT_TASK_LIMIT);
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_limits_rejected() {
        let mut c = config();
        c.task_limit = 0;
        assert!(matches!(c.validate(), Err(UploadError::InvalidConfig(_))));

        let mut c = config();
        c.chunk_size = 0;
        assert!(matches!(c.validate(), Err(UploadError::InvalidConfig(_))));

        let mut c = config();
        c.retry.max_attempts = 0;
        assert!(matches!(c.validate(), Err(UploadError::InvalidConfig(_))));
    }

    #[test]
    fn bad_target_rejected() {
        let mut c = config();
        c.target.bucket.clear();
        assert!(c.validate().is_err());

        let mut c = config();
        c.target.key = "/abs".into();
        assert!(matches!(c.validate(), Err(UploadError::Transfer(_))));
    }
}
