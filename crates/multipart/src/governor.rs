//! Concurrency governor: a strict bound on in-flight part uploads.
//!
//! A semaphore gates dispatch before it happens, so outstanding work never
//! exceeds the limit. The chunk source is paused while the limit is
//! reached so no part is read that could not be dispatched.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chunkup_transfer::PauseHandle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::trace;

use crate::error::UploadError;
use crate::tracker::OutstandingWork;

/// Bounds how many part uploads may be outstanding at once.
pub struct Governor {
    limit: usize,
    semaphore: Arc<Semaphore>,
    shared: Arc<Shared>,
}

struct Shared {
    limit: usize,
    work: Arc<OutstandingWork>,
    source: Option<PauseHandle>,
    peak: AtomicUsize,
}

impl Shared {
    fn on_admit(&self, outstanding: usize) {
        self.peak.fetch_max(outstanding, Ordering::Relaxed);
        if outstanding >= self.limit
            && let Some(source) = &self.source
        {
            trace!(outstanding, "limit reached, pausing source");
            source.pause();
        }
    }

    fn on_resolve(&self, outstanding: usize) {
        if outstanding < self.limit
            && let Some(source) = &self.source
            && source.is_paused()
        {
            trace!(outstanding, "below limit, resuming source");
            source.resume();
        }
    }
}

/// Proof that one upload was admitted. Dropping it resolves the upload.
pub struct Admission {
    shared: Arc<Shared>,
    // Released after the counter is decremented in `drop`.
    _permit: OwnedSemaphorePermit,
}

impl Drop for Admission {
    fn drop(&mut self) {
        let shared = &self.shared;
        shared.work.decrement(|n| shared.on_resolve(n));
    }
}

impl Governor {
    /// Creates a governor admitting at most `limit` uploads (minimum 1).
    pub fn new(limit: usize, work: Arc<OutstandingWork>) -> Self {
        let limit = limit.max(1);
        Self {
            limit,
            semaphore: Arc::new(Semaphore::new(limit)),
            shared: Arc::new(Shared {
                limit,
                work,
                source: None,
                peak: AtomicUsize::new(0),
            }),
        }
    }

    /// Pauses and resumes `source` as the limit is reached and released.
    pub fn with_source(self, source: PauseHandle) -> Self {
        let shared = Arc::new(Shared {
            limit: self.limit,
            work: Arc::clone(&self.shared.work),
            source: Some(source),
            peak: AtomicUsize::new(self.shared.peak.load(Ordering::Relaxed)),
        });
        Self { shared, ..self }
    }

    /// Waits for a free slot and admits one upload.
    ///
    /// Fails with [`UploadError::Cancelled`] once the governor is closed.
    pub async fn admit(&self) -> Result<Admission, UploadError> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| UploadError::Cancelled)?;
        let shared = &self.shared;
        shared.work.increment(|n| shared.on_admit(n));
        Ok(Admission {
            shared: Arc::clone(shared),
            _permit: permit,
        })
    }

    /// Stops admitting; pending and future `admit` calls fail.
    pub fn close(&self) {
        self.semaphore.close();
        if let Some(source) = &self.shared.source {
            source.resume();
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn outstanding(&self) -> usize {
        self.shared.work.current()
    }

    /// Highest outstanding count seen so far.
    pub fn peak(&self) -> usize {
        self.shared.peak.load(Ordering::Relaxed)
    }
}
