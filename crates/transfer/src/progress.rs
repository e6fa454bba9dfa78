use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Default window for speed calculation.
const DEFAULT_WINDOW: Duration = Duration::from_secs(5);

/// Default cap on retained samples.
const DEFAULT_MAX_SAMPLES: usize = 256;

/// Upload throughput over a sliding window of samples.
///
/// Samples arrive from concurrent part completions, so the window sits
/// behind a mutex.
pub struct SpeedCalculator {
    inner: Mutex<Window>,
}

struct Window {
    samples: VecDeque<(Instant, u64)>,
    span: Duration,
    max_samples: usize,
}

impl Window {
    fn prune(&mut self, now: Instant) {
        while let Some(&(at, _)) = self.samples.front() {
            if now.duration_since(at) > self.span || self.samples.len() > self.max_samples {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }
}

impl Default for SpeedCalculator {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_MAX_SAMPLES)
    }
}

impl SpeedCalculator {
    pub fn new(span: Duration, max_samples: usize) -> Self {
        Self {
            inner: Mutex::new(Window {
                samples: VecDeque::new(),
                span,
                max_samples: max_samples.max(2),
            }),
        }
    }

    /// Records `bytes` finished at the current instant.
    pub fn record(&self, bytes: u64) {
        self.record_at(Instant::now(), bytes);
    }

    fn record_at(&self, at: Instant, bytes: u64) {
        let mut w = self.inner.lock().unwrap();
        w.samples.push_back((at, bytes));
        w.prune(at);
    }

    /// Average bytes/second across the window; 0.0 with fewer than two samples.
    pub fn bytes_per_second(&self) -> f64 {
        let w = self.inner.lock().unwrap();
        let (Some(first), Some(last)) = (w.samples.front(), w.samples.back()) else {
            return 0.0;
        };
        let elapsed = last.0.duration_since(first.0);
        if w.samples.len() < 2 || elapsed.is_zero() {
            return 0.0;
        }
        // The first sample marks the window start; its bytes finished before it.
        let bytes: u64 = w.samples.iter().skip(1).map(|(_, b)| b).sum();
        bytes as f64 / elapsed.as_secs_f64()
    }

    /// Time left for `remaining` bytes at the current speed.
    pub fn eta(&self, remaining: u64) -> Option<Duration> {
        let speed = self.bytes_per_second();
        (speed > 0.0).then(|| Duration::from_secs_f64(remaining as f64 / speed))
    }

    #[cfg(test)]
    fn sample_count(&self) -> usize {
        self.inner.lock().unwrap().samples.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn empty_and_single_sample_report_zero() {
        let calc = SpeedCalculator::default();
        assert_eq!(calc.bytes_per_second(), 0.0);
        assert!(calc.eta(1000).is_none());

        calc.record(100);
        assert_eq!(calc.bytes_per_second(), 0.0);
    }

    #[test]
    fn speed_from_synthetic_samples() {
        let calc = SpeedCalculator::new(Duration::from_secs(10), 16);
        let start = Instant::now();
        calc.record_at(start, 1_000);
        calc.record_at(start + Duration::from_secs(1), 2_000);
        calc.record_at(start + Duration::from_secs(2), 2_000);

        let speed = calc.bytes_per_second();
        assert!((speed - 2_000.0).abs() < 1e-6);

        let eta = calc.eta(4_000).unwrap();
        assert!((eta.as_secs_f64() - 2.0).abs() < 1e-6);
    }

    #[test]
    fn old_samples_leave_the_window() {
        let calc = SpeedCalculator::new(Duration::from_secs(1), 16);
        let start = Instant::now();
        calc.record_at(start, 10);
        calc.record_at(start + Duration::from_secs(5), 10);
        assert_eq!(calc.sample_count(), 1);
    }

    #[test]
    fn sample_count_is_capped() {
        let calc = SpeedCalculator::new(Duration::from_secs(60), 5);
        let start = Instant::now();
        for i in 0..20u64 {
            calc.record_at(start + Duration::from_millis(i), i);
        }
        assert!(calc.sample_count() <= 6);
    }

    #[test]
    fn concurrent_recording() {
        let calc = Arc::new(SpeedCalculator::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let c = Arc::clone(&calc);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        c.record(1);
                        let _ = c.bytes_per_second();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(calc.sample_count() > 0);
    }
}
