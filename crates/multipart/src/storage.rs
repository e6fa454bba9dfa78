//! Object storage trait.
//!
//! Implemented by a concrete backend (S3 in `chunkup-s3`, a recording mock
//! in tests). Keeping the four remote operations behind a trait keeps the
//! pipeline decoupled from any SDK.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use chunkup_protocol::{ChecksumAlgorithm, ObjectDescriptor, ObjectTarget, PartAck, UploadSession};

use crate::error::StorageError;

/// Boxed future returned by every storage call.
pub type StorageFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StorageError>> + Send + 'a>>;

/// The remote side of a multipart upload.
pub trait ObjectStorage: Send + Sync {
    /// Opens a multipart session for `target`.
    fn begin_session<'a>(
        &'a self,
        target: &'a ObjectTarget,
        algorithm: ChecksumAlgorithm,
    ) -> StorageFuture<'a, UploadSession>;

    /// Uploads one part. `part_number` positions the payload in the object.
    fn upload_part<'a>(
        &'a self,
        session: &'a UploadSession,
        part_number: u32,
        payload: Bytes,
        checksum: Option<&'a str>,
    ) -> StorageFuture<'a, PartAck>;

    /// Commits the session. `parts` is ordered by part number, `1..=N`.
    fn finalize_session<'a>(
        &'a self,
        session: &'a UploadSession,
        parts: &'a [PartAck],
    ) -> StorageFuture<'a, ObjectDescriptor>;

    /// Releases the session without producing an object. Idempotent.
    fn abort_session<'a>(&'a self, session: &'a UploadSession) -> StorageFuture<'a, ()>;
}
