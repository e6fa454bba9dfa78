//! Outstanding-work counter and per-part acknowledgment store.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use chunkup_protocol::PartAck;
use tokio::sync::watch;
use tracing::warn;

use crate::error::UploadError;

/// Count of uploads dispatched but not yet resolved.
///
/// Backed by a watch channel, so waiting for zero is a wakeup on the last
/// resolution rather than a poll.
#[derive(Debug)]
pub struct OutstandingWork {
    tx: watch::Sender<usize>,
}

impl Default for OutstandingWork {
    fn default() -> Self {
        Self::new()
    }
}

impl OutstandingWork {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self { tx }
    }

    /// Current count.
    pub fn current(&self) -> usize {
        *self.tx.borrow()
    }

    /// Adds one dispatched upload. `then` runs with the new count while the
    /// counter is still locked.
    pub fn increment(&self, then: impl FnOnce(usize)) -> usize {
        self.update(|n| n + 1, then)
    }

    /// Resolves one upload. `then` runs with the new count while the
    /// counter is still locked.
    pub fn decrement(&self, then: impl FnOnce(usize)) -> usize {
        self.update(|n| n.saturating_sub(1), then)
    }

    fn update(&self, step: impl FnOnce(usize) -> usize, then: impl FnOnce(usize)) -> usize {
        let mut after = 0;
        self.tx.send_modify(|n| {
            *n = step(*n);
            after = *n;
            then(after);
        });
        after
    }

    /// Waits until the count is zero. Returns immediately if it already is.
    pub async fn wait_idle(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

/// Records part acknowledgments at their sequence position.
pub struct CompletionTracker {
    acks: Mutex<Vec<Option<PartAck>>>,
    failure: Mutex<Option<UploadError>>,
    uploaded_bytes: AtomicU64,
    parts_done: AtomicU32,
}

impl Default for CompletionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionTracker {
    pub fn new() -> Self {
        Self {
            acks: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
            uploaded_bytes: AtomicU64::new(0),
            parts_done: AtomicU32::new(0),
        }
    }

    /// Stores `ack` for `part_number`, growing the store as needed.
    pub fn record(&self, part_number: u32, ack: PartAck, bytes: u64) {
        debug_assert!(part_number >= 1, "part numbers start at 1");
        let index = part_number.saturating_sub(1) as usize;
        let mut acks = self.acks.lock().unwrap();
        if acks.len() <= index {
            acks.resize(index + 1, None);
        }
        if acks[index].replace(ack).is_some() {
            warn!(part = part_number, "part acknowledged twice, keeping the latest");
            return;
        }
        drop(acks);
        self.uploaded_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.parts_done.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a fatal failure. Only the first one is kept; returns `true`
    /// if this call stored it.
    pub fn fail(&self, err: UploadError) -> bool {
        let mut slot = self.failure.lock().unwrap();
        if slot.is_some() {
            return false;
        }
        *slot = Some(err);
        true
    }

    pub fn has_failed(&self) -> bool {
        self.failure.lock().unwrap().is_some()
    }

    /// Removes and returns the recorded failure.
    pub fn take_failure(&self) -> Option<UploadError> {
        self.failure.lock().unwrap().take()
    }

    pub fn parts_done(&self) -> u32 {
        self.parts_done.load(Ordering::Relaxed)
    }

    pub fn uploaded_bytes(&self) -> u64 {
        self.uploaded_bytes.load(Ordering::Relaxed)
    }

    /// Builds the finalize list for parts `1..=expected`.
    ///
    /// Fails with [`UploadError::MissingParts`] naming every absent number
    /// if the store has a gap.
    pub fn completed_parts(&self, expected: u32) -> Result<Vec<PartAck>, UploadError> {
        let acks = self.acks.lock().unwrap();
        let missing: Vec<u32> = (1..=expected)
            .filter(|n| {
                acks.get(*n as usize - 1)
                    .is_none_or(|slot| slot.is_none())
            })
            .collect();
        if !missing.is_empty() {
            return Err(UploadError::MissingParts(missing));
        }
        if expected == 0 {
            return Err(UploadError::MissingParts(vec![1]));
        }
        Ok(acks
            .iter()
            .take(expected as usize)
            .flatten()
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn ack(n: u32) -> PartAck {
        PartAck {
            part_number: n,
            e_tag: format!("\"etag-{n}\""),
            checksum: None,
        }
    }

    #[test]
    fn out_of_order_records_come_back_ordered() {
        let tracker = CompletionTracker::new();
        for n in [3, 1, 4, 2] {
            tracker.record(n, ack(n), 10);
        }
        let parts = tracker.completed_parts(4).unwrap();
        let numbers: Vec<u32> = parts.iter().map(|p| p.part_number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4]);
        assert_eq!(parts[2].e_tag, "\"etag-3\"");
        assert_eq!(tracker.parts_done(), 4);
        assert_eq!(tracker.uploaded_bytes(), 40);
    }

    #[test]
    fn gap_is_reported() {
        let tracker = CompletionTracker::new();
        tracker.record(1, ack(1), 1);
        tracker.record(3, ack(3), 1);
        match tracker.completed_parts(4) {
            Err(UploadError::MissingParts(missing)) => assert_eq!(missing, vec![2, 4]),
            other => panic!("expected MissingParts, got {other:?}"),
        }
    }

    #[test]
    fn empty_list_is_never_complete() {
        let tracker = CompletionTracker::new();
        assert!(matches!(
            tracker.completed_parts(0),
            Err(UploadError::MissingParts(_))
        ));
    }

    #[test]
    fn duplicate_ack_counted_once() {
        let tracker = CompletionTracker::new();
        tracker.record(1, ack(1), 5);
        tracker.record(1, ack(1), 5);
        assert_eq!(tracker.parts_done(), 1);
        assert_eq!(tracker.uploaded_bytes(), 5);
    }

    #[test]
    fn first_failure_wins() {
        let tracker = CompletionTracker::new();
        assert!(tracker.fail(UploadError::Task("first".into())));
        assert!(!tracker.fail(UploadError::Task("second".into())));
        assert!(tracker.has_failed());
        match tracker.take_failure() {
            Some(UploadError::Task(msg)) => assert_eq!(msg, "first"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(tracker.take_failure().is_none());
    }

    #[tokio::test]
    async fn wait_idle_returns_immediately_at_zero() {
        let work = OutstandingWork::new();
        tokio::time::timeout(Duration::from_millis(50), work.wait_idle())
            .await
            .expect("idle counter must not block");
    }

    #[tokio::test]
    async fn wait_idle_wakes_on_last_resolution() {
        let work = Arc::new(OutstandingWork::new());
        work.increment(|_| {});
        work.increment(|_| {});

        let waiter = {
            let work = Arc::clone(&work);
            tokio::spawn(async move { work.wait_idle().await })
        };

        work.decrement(|_| {});
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished(), "one upload still outstanding");

        assert_eq!(work.decrement(|_| {}), 0);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter must wake")
            .unwrap();
    }

    #[test]
    fn callback_sees_new_count() {
        let work = OutstandingWork::new();
        let mut seen = Vec::new();
        work.increment(|n| seen.push(n));
        work.increment(|n| seen.push(n));
        work.decrement(|n| seen.push(n));
        assert_eq!(seen, vec![1, 2, 1]);
        assert_eq!(work.current(), 1);
    }
}
