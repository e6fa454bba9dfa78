//! Concurrent multipart upload of one local file.
//!
//! This crate holds the upload **pipeline**. It has no transport of its
//! own: callers provide an [`ObjectStorage`] implementation that speaks to
//! the actual service.
//!
//! # Pipeline
//!
//! 1. **Begin**: open a session with the storage service
//! 2. **Dispatch**: read numbered parts and upload them concurrently,
//!    never more than `task_limit` at once
//! 3. **Drain**: wait until every dispatched upload has resolved
//! 4. **Finalize**: commit parts `1..=N` in order
//!
//! Any fatal failure after step 1 aborts the session instead.

pub mod error;
pub mod events;
pub mod governor;
pub mod pipeline;
pub mod retry;
pub mod session;
pub mod storage;
pub mod tracker;
pub mod types;
pub mod uploader;

#[cfg(test)]
pub(crate) mod testing;

// Re-export primary types for convenience.
pub use error::{StorageError, UploadError};
pub use events::UploadEvent;
pub use governor::{Admission, Governor};
pub use pipeline::UploadOrchestrator;
pub use retry::{PartOutcome, RetryDecision, RetryPolicy};
pub use session::SessionFinalizer;
pub use storage::{ObjectStorage, StorageFuture};
pub use tracker::{CompletionTracker, OutstandingWork};
pub use types::{UploadConfig, UploadReport};
pub use uploader::PartUploader;
