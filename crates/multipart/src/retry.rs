//! Per-part outcomes and the retry policy that absorbs transient failures.

use std::time::Duration;

use chunkup_protocol::PartAck;
use rand::Rng;

use crate::error::StorageError;

/// Final result of uploading one part.
#[derive(Debug, Clone, PartialEq)]
pub enum PartOutcome {
    /// The storage service acknowledged the part.
    Uploaded { ack: PartAck, attempts: u32 },
    /// Attempts ran out, or the error was not retryable.
    Failed {
        part_number: u32,
        attempts: u32,
        error: StorageError,
    },
    /// The pipeline was cancelled while the part was in flight.
    Cancelled { part_number: u32 },
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry(Duration),
    GiveUp,
}

/// Bounded retry with exponential backoff and jitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per part, including the first one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Decides after `attempts` failed tries ended with `error`.
    pub fn decide(&self, attempts: u32, error: &StorageError) -> RetryDecision {
        if !error.is_retryable() || attempts >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry(self.backoff(attempts))
    }

    /// Delay before the attempt following attempt number `attempts`.
    ///
    /// `initial * 2^(attempts-1)`, capped at `max_backoff`, plus up to 25%
    /// random jitter (the cap still holds).
    pub fn backoff(&self, attempts: u32) -> Duration {
        let exp = attempts.saturating_sub(1).min(16);
        let base = self
            .initial_backoff
            .saturating_mul(1u32 << exp)
            .min(self.max_backoff);
        let quarter = (base.as_millis() / 4) as u64;
        let jitter = if quarter > 0 {
            Duration::from_millis(rand::thread_rng().gen_range(0..=quarter))
        } else {
            Duration::ZERO
        };
        (base + jitter).min(self.max_backoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> StorageError {
        StorageError::Transport("connection reset".into())
    }

    #[test]
    fn retries_transient_until_attempts_run_out() {
        let policy = RetryPolicy::default();
        assert!(matches!(policy.decide(1, &transport()), RetryDecision::Retry(_)));
        assert!(matches!(policy.decide(2, &transport()), RetryDecision::Retry(_)));
        assert_eq!(policy.decide(3, &transport()), RetryDecision::GiveUp);
    }

    #[test]
    fn permanent_errors_are_not_retried() {
        let policy = RetryPolicy::default();
        let err = StorageError::InvalidSession("NoSuchUpload".into());
        assert_eq!(policy.decide(1, &err), RetryDecision::GiveUp);
    }

    #[test]
    fn none_policy_gives_up_at_once() {
        assert_eq!(RetryPolicy::none().decide(1, &transport()), RetryDecision::GiveUp);
    }

    #[test]
    fn backoff_grows_and_respects_cap() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(1000),
        };
        let first = policy.backoff(1);
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(125));
        let third = policy.backoff(3);
        assert!(third >= Duration::from_millis(400) && third <= Duration::from_millis(500));
        for attempt in 1..40 {
            assert!(policy.backoff(attempt) <= Duration::from_millis(1000));
        }
        assert_eq!(policy.backoff(10), Duration::from_millis(1000));
    }

    #[test]
    fn zero_backoff_stays_zero() {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::from_secs(1),
        };
        assert_eq!(policy.backoff(2), Duration::ZERO);
    }
}
