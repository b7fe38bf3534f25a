// SPDX-License-Identifier: MPL-2.0
//! Expected frame retrieval cost, estimated from recent seek/read timings.
//!
//! Every decoder access records how long the container seek and the frame
//! read took. The prefetcher asks for the running average of recent samples
//! to decide whether a speculative fetch fits into the slack before the next
//! frame deadline.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// One observed decoder access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadSample {
    /// When the access completed.
    pub at: Instant,

    /// Container seek portion; zero when no repositioning was needed.
    pub seek: Duration,

    /// Decode/read portion.
    pub read: Duration,
}

impl ReadSample {
    /// Total cost of the access.
    #[must_use]
    pub fn total(&self) -> Duration {
        self.seek + self.read
    }
}

/// Windowed average over recent [`ReadSample`]s.
///
/// Samples older than the window are discarded on every touch; the average
/// only considers samples younger than the retention horizon. Thread-safe:
/// the worker records while the prefetcher queries.
#[derive(Debug)]
pub struct ReadCostEstimator {
    samples: Mutex<VecDeque<ReadSample>>,
    window: Duration,
    retention: Duration,
}

impl ReadCostEstimator {
    /// Creates an estimator keeping samples for `window`, averaging over the
    /// younger `retention` span.
    #[must_use]
    pub fn new(window: Duration, retention: Duration) -> Self {
        Self {
            samples: Mutex::new(VecDeque::new()),
            window,
            retention,
        }
    }

    /// Records one decoder access.
    pub fn record(&self, seek: Duration, read: Duration) {
        let now = Instant::now();
        let mut samples = self.samples.lock().expect("read-cost samples poisoned");
        samples.push_back(ReadSample {
            at: now,
            seek,
            read,
        });
        Self::evict(&mut samples, now, self.window);
    }

    /// Discards all samples (on media change the old costs are meaningless).
    pub fn clear(&self) {
        self.samples
            .lock()
            .expect("read-cost samples poisoned")
            .clear();
    }

    /// Running average of seek+read over retained samples, or `fallback`
    /// when no sample is recent enough.
    #[must_use]
    pub fn expected_cost(&self, fallback: Duration) -> Duration {
        let now = Instant::now();
        let mut samples = self.samples.lock().expect("read-cost samples poisoned");
        Self::evict(&mut samples, now, self.window);

        let mut total = Duration::ZERO;
        let mut count: u32 = 0;
        for sample in samples.iter().rev() {
            if now.duration_since(sample.at) > self.retention {
                break;
            }
            total += sample.total();
            count += 1;
        }

        if count == 0 {
            fallback
        } else {
            total / count
        }
    }

    /// Number of samples currently retained.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.lock().expect("read-cost samples poisoned").len()
    }

    /// Returns true if no sample is retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn evict(samples: &mut VecDeque<ReadSample>, now: Instant, window: Duration) {
        while let Some(front) = samples.front() {
            if now.duration_since(front.at) > window {
                samples.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn estimator() -> ReadCostEstimator {
        ReadCostEstimator::new(Duration::from_secs(30), Duration::from_secs(10))
    }

    #[test]
    fn empty_estimator_returns_the_fallback() {
        let est = estimator();
        assert_eq!(
            est.expected_cost(Duration::from_millis(100)),
            Duration::from_millis(100)
        );
        assert!(est.is_empty());
    }

    #[test]
    fn average_combines_seek_and_read() {
        let est = estimator();
        est.record(Duration::from_millis(10), Duration::from_millis(20));
        est.record(Duration::from_millis(0), Duration::from_millis(10));
        // (30 + 10) / 2 = 20ms
        assert_eq!(
            est.expected_cost(Duration::ZERO),
            Duration::from_millis(20)
        );
    }

    #[test]
    fn clear_forgets_everything() {
        let est = estimator();
        est.record(Duration::from_millis(5), Duration::from_millis(5));
        est.clear();
        assert!(est.is_empty());
        assert_eq!(
            est.expected_cost(Duration::from_millis(7)),
            Duration::from_millis(7)
        );
    }

    #[test]
    fn stale_samples_fall_out_of_the_window() {
        let est = ReadCostEstimator::new(Duration::ZERO, Duration::ZERO);
        est.record(Duration::from_millis(5), Duration::from_millis(5));
        std::thread::sleep(Duration::from_millis(2));
        // Window of zero: the sample is already stale on the next touch.
        assert_eq!(
            est.expected_cost(Duration::from_millis(42)),
            Duration::from_millis(42)
        );
        assert!(est.is_empty());
    }

    #[test]
    fn sample_total_adds_both_parts() {
        let sample = ReadSample {
            at: Instant::now(),
            seek: Duration::from_millis(3),
            read: Duration::from_millis(4),
        };
        assert_eq!(sample.total(), Duration::from_millis(7));
    }
}
