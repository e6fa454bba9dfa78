//! Recording in-memory storage for pipeline tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use chunkup_protocol::{ChecksumAlgorithm, ObjectDescriptor, ObjectTarget, PartAck, UploadSession};
use rand::Rng;

use crate::error::StorageError;
use crate::storage::{ObjectStorage, StorageFuture};

struct PartFailure {
    remaining: usize,
    error: StorageError,
}

#[derive(Default)]
struct Recorded {
    failures: HashMap<u32, PartFailure>,
    attempts: HashMap<u32, usize>,
    checksums: HashMap<u32, String>,
    payloads: BTreeMap<u32, Bytes>,
    finalize_calls: Vec<Vec<PartAck>>,
}

/// Storage that records every call and fails on request.
#[derive(Default)]
pub(crate) struct MockStorage {
    recorded: Mutex<Recorded>,
    begin_error: Option<StorageError>,
    finalize_error: Option<StorageError>,
    abort_error: Option<StorageError>,
    delay: Duration,
    jitter: Duration,
    echo_offset: u32,
    begin_count: AtomicUsize,
    abort_count: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockStorage {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fail_begin(mut self, error: StorageError) -> Self {
        self.begin_error = Some(error);
        self
    }

    pub(crate) fn fail_finalize(mut self, error: StorageError) -> Self {
        self.finalize_error = Some(error);
        self
    }

    pub(crate) fn fail_abort(mut self, error: StorageError) -> Self {
        self.abort_error = Some(error);
        self
    }

    /// Fails the first `times` attempts of `part_number`.
    pub(crate) fn fail_part(mut self, part_number: u32, times: usize, error: StorageError) -> Self {
        self.recorded.get_mut().unwrap().failures.insert(
            part_number,
            PartFailure {
                remaining: times,
                error,
            },
        );
        self
    }

    pub(crate) fn fail_part_always(self, part_number: u32, error: StorageError) -> Self {
        self.fail_part(part_number, usize::MAX, error)
    }

    /// Fixed latency of every part upload.
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Extra random latency up to `max`, so parts complete out of order.
    pub(crate) fn with_jitter(mut self, max: Duration) -> Self {
        self.jitter = max;
        self
    }

    /// Acknowledges every part under `part_number + offset`.
    pub(crate) fn misnumber_acks(mut self, offset: u32) -> Self {
        self.echo_offset = offset;
        self
    }

    pub(crate) fn begin_count(&self) -> usize {
        self.begin_count.load(Ordering::SeqCst)
    }

    pub(crate) fn abort_count(&self) -> usize {
        self.abort_count.load(Ordering::SeqCst)
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn upload_attempts(&self, part_number: u32) -> usize {
        let recorded = self.recorded.lock().unwrap();
        recorded.attempts.get(&part_number).copied().unwrap_or(0)
    }

    pub(crate) fn total_upload_attempts(&self) -> usize {
        self.recorded.lock().unwrap().attempts.values().sum()
    }

    pub(crate) fn checksum_sent(&self, part_number: u32) -> Option<String> {
        self.recorded.lock().unwrap().checksums.get(&part_number).cloned()
    }

    pub(crate) fn finalize_calls(&self) -> Vec<Vec<PartAck>> {
        self.recorded.lock().unwrap().finalize_calls.clone()
    }

    /// Accepted payloads concatenated in part-number order.
    pub(crate) fn assembled(&self) -> Vec<u8> {
        let recorded = self.recorded.lock().unwrap();
        recorded
            .payloads
            .values()
            .flat_map(|b| b.iter().copied())
            .collect()
    }

    fn latency(&self) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.delay;
        }
        self.delay + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}

impl ObjectStorage for MockStorage {
    fn begin_session<'a>(
        &'a self,
        target: &'a ObjectTarget,
        algorithm: ChecksumAlgorithm,
    ) -> StorageFuture<'a, UploadSession> {
        Box::pin(async move {
            let n = self.begin_count.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(error) = &self.begin_error {
                return Err(error.clone());
            }
            Ok(UploadSession {
                upload_id: format!("mock-upload-{n}"),
                target: target.clone(),
                checksum_algorithm: algorithm,
            })
        })
    }

    fn upload_part<'a>(
        &'a self,
        _session: &'a UploadSession,
        part_number: u32,
        payload: Bytes,
        checksum: Option<&'a str>,
    ) -> StorageFuture<'a, PartAck> {
        Box::pin(async move {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            let _guard = InFlightGuard(&self.in_flight);
            self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
            {
                let mut recorded = self.recorded.lock().unwrap();
                *recorded.attempts.entry(part_number).or_default() += 1;
                if let Some(checksum) = checksum {
                    recorded.checksums.insert(part_number, checksum.to_string());
                }
            }

            let latency = self.latency();
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }

            let mut recorded = self.recorded.lock().unwrap();
            if let Some(failure) = recorded.failures.get_mut(&part_number)
                && failure.remaining > 0
            {
                failure.remaining -= 1;
                return Err(failure.error.clone());
            }
            recorded.payloads.insert(part_number, payload);
            Ok(PartAck {
                part_number: part_number + self.echo_offset,
                e_tag: format!("\"etag-{part_number}\""),
                checksum: checksum.map(str::to_string),
            })
        })
    }

    fn finalize_session<'a>(
        &'a self,
        session: &'a UploadSession,
        parts: &'a [PartAck],
    ) -> StorageFuture<'a, ObjectDescriptor> {
        Box::pin(async move {
            self.recorded
                .lock()
                .unwrap()
                .finalize_calls
                .push(parts.to_vec());
            if let Some(error) = &self.finalize_error {
                return Err(error.clone());
            }
            Ok(ObjectDescriptor {
                target: session.target.clone(),
                location: Some(format!("mock://{}", session.target)),
                e_tag: Some(format!("\"final-{}\"", parts.len())),
                checksum: None,
                version_id: None,
            })
        })
    }

    fn abort_session<'a>(&'a self, _session: &'a UploadSession) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            self.abort_count.fetch_add(1, Ordering::SeqCst);
            match &self.abort_error {
                Some(error) => Err(error.clone()),
                None => Ok(()),
            }
        })
    }
}
