// SPDX-License-Identifier: MPL-2.0
//! Frame pacing against monotonic wall time.
//!
//! The pacer tracks the target instant of the next frame emission. Each tick
//! advances the target by the expected inter-frame interval and sleeps the
//! remainder, so a slow decode shortens the following sleep instead of
//! accumulating drift — the schedule is anchored to wall time, not to
//! `frame count × nominal period`.
//!
//! The target is stored as microseconds relative to a process-wide reference
//! instant, allowing lock-free reads from the prefetcher while the worker
//! advances the schedule.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Reference instant for converting `Instant` to/from atomic microseconds.
static REFERENCE_INSTANT: OnceLock<Instant> = OnceLock::new();

/// Sentinel for "no schedule".
const UNSET: u64 = 0;

/// Converts an `Instant` to microseconds since the reference instant.
/// The result is offset by 1 so a real instant never collides with
/// the unset sentinel.
#[allow(clippy::cast_possible_truncation)] // u128 microseconds won't overflow u64 for process lifetimes
fn instant_to_us(instant: Instant) -> u64 {
    let reference = REFERENCE_INSTANT.get_or_init(Instant::now);
    instant.saturating_duration_since(*reference).as_micros() as u64 + 1
}

/// Converts microseconds since reference back to an `Instant`.
/// Returns `None` for the sentinel value.
fn us_to_instant(us: u64) -> Option<Instant> {
    if us == UNSET {
        return None;
    }
    let reference = REFERENCE_INSTANT.get_or_init(Instant::now);
    Some(*reference + Duration::from_micros(us - 1))
}

/// Scheduler for the next frame deadline.
///
/// Fully lock-free; the worker owns the schedule, the prefetcher only reads
/// the remaining slack.
#[derive(Debug, Default)]
pub struct FramePacer {
    /// Target instant of the next emission, microseconds since reference.
    /// [`UNSET`] until the first tick after a reset.
    target_us: AtomicU64,
}

impl FramePacer {
    /// Creates an unscheduled pacer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            target_us: AtomicU64::new(UNSET),
        }
    }

    /// Advances the schedule by `interval` and returns how long to sleep.
    ///
    /// If no target is set, the schedule starts from now. Returns zero when
    /// the target is already in the past (the worker is running late and
    /// should proceed immediately).
    pub fn schedule_next(&self, interval: Duration) -> Duration {
        let now = Instant::now();
        let base = us_to_instant(self.target_us.load(Ordering::Acquire)).unwrap_or(now);
        let target = base + interval;
        self.target_us.store(instant_to_us(target), Ordering::Release);
        target.saturating_duration_since(now)
    }

    /// Re-anchors the schedule to the current instant.
    ///
    /// Used after a seek or a speed change: the next interval is measured
    /// from now, with no compensatory catch-up for time already spent.
    pub fn reset(&self) {
        self.target_us
            .store(instant_to_us(Instant::now()), Ordering::Release);
    }

    /// Clears the schedule entirely (no deadline until the next tick).
    pub fn clear(&self) {
        self.target_us.store(UNSET, Ordering::Release);
    }

    /// Time remaining until the scheduled deadline, if one is set.
    ///
    /// Zero when the deadline has already passed. This is the slack the
    /// prefetcher compares against the expected retrieval cost.
    #[must_use]
    pub fn slack(&self) -> Option<Duration> {
        us_to_instant(self.target_us.load(Ordering::Acquire))
            .map(|target| target.saturating_duration_since(Instant::now()))
    }
}
