// SPDX-License-Identifier: MPL-2.0
//! Worker loop driver with an error budget.
//!
//! The streamer runs a caller-supplied step function on a background thread,
//! publishing produced frames and caught errors. Two budgets bound failure:
//! a consecutive-error counter and a time-windowed error log; exceeding
//! either (with `exit_on_error` set) terminates the worker after a final
//! `BudgetExceeded` publication. A run of consecutive successes clears the
//! error state.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::config::StreamerOptions;
use crate::error::{Error, Result};
use crate::event_bus::{EventBus, FrameEvent};
use crate::frame::VideoFrame;

/// Outcome of one worker step: a frame tagged with the index it was
/// retrieved at, or nothing this tick.
pub type StepOutcome = Result<Option<(VideoFrame, u64)>>;

/// Sleep between completion polls while waiting for the worker to stop.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Epsilon for the fps division, so a single burst never divides by zero.
const FPS_EPSILON: f64 = 1e-6;

struct Shared {
    running: AtomicBool,
    /// Index of the most recently emitted frame; owned by the engine,
    /// zeroed through [`Streamer::reset_frame_id`].
    frame_id: Arc<AtomicU64>,
    /// Timestamps of successfully published frames, for the rolling fps.
    fps_samples: Mutex<VecDeque<Instant>>,
    /// Hook run when the error budget terminates the worker, before the
    /// final `BudgetExceeded` publication.
    on_budget_exceeded: Mutex<Option<Box<dyn Fn() + Send>>>,
}

/// Supervisor for a frame-producing worker loop.
pub struct Streamer {
    options: StreamerOptions,
    bus: Arc<EventBus>,
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
    worker_thread: Option<ThreadId>,
}

impl Streamer {
    /// Creates a stopped streamer. `frame_id` is the engine's current-frame
    /// counter; published frames do not consult it (the step tags each frame
    /// with its index), but [`reset_frame_id`](Self::reset_frame_id) zeroes
    /// it.
    #[must_use]
    pub fn new(options: StreamerOptions, bus: Arc<EventBus>, frame_id: Arc<AtomicU64>) -> Self {
        Self {
            options,
            bus,
            shared: Arc::new(Shared {
                running: AtomicBool::new(false),
                frame_id,
                fps_samples: Mutex::new(VecDeque::new()),
                on_budget_exceeded: Mutex::new(None),
            }),
            handle: None,
            worker_thread: None,
        }
    }

    /// Installs the hook run when the error budget terminates the worker.
    pub fn set_budget_exceeded_hook(&self, hook: impl Fn() + Send + 'static) {
        *self
            .shared
            .on_budget_exceeded
            .lock()
            .expect("budget hook poisoned") = Some(Box::new(hook));
    }

    /// Starts the worker loop. Idempotent: a second call while running is a
    /// no-op.
    pub fn start<S>(&mut self, mut step: S)
    where
        S: FnMut() -> StepOutcome + Send + 'static,
    {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let options = self.options.clone();
        let bus = Arc::clone(&self.bus);
        let shared = Arc::clone(&self.shared);

        let handle = thread::spawn(move || {
            Self::worker_loop(&options, &bus, &shared, &mut step);
            shared.running.store(false, Ordering::SeqCst);
        });
        self.worker_thread = Some(handle.thread().id());
        self.handle = Some(handle);
    }

    /// Returns a snapshot of the running flag.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Stops the worker.
    ///
    /// Flips the running flag, then waits up to `timeout_secs` for the
    /// worker to finish; a worker still alive after the grace period is
    /// detached with a warning (its in-flight decoder call completes on its
    /// own). A negative timeout flips the flag without waiting. Safe to call
    /// from the worker's own completion path — the join is skipped there.
    pub fn stop(&mut self, timeout_secs: f64) {
        self.shared.running.store(false, Ordering::SeqCst);

        if timeout_secs < 0.0 {
            return;
        }

        let Some(handle) = self.handle.take() else {
            return;
        };
        if self.worker_thread == Some(thread::current().id()) {
            // Called from inside the worker; joining would deadlock.
            return;
        }

        let deadline = Instant::now() + Duration::from_secs_f64(timeout_secs);
        while !handle.is_finished() && Instant::now() < deadline {
            thread::sleep(STOP_POLL_INTERVAL);
        }

        if handle.is_finished() {
            let _ = handle.join();
        } else {
            warn!("worker did not stop within the grace period, detaching");
        }
    }

    /// Rolling frame rate over the configured window: published frames in
    /// the window divided by the span back to the oldest of them. Zero with
    /// fewer than two samples.
    #[must_use]
    pub fn fps(&self) -> f64 {
        let window = Duration::from_secs_f64(self.options.fps_time_range_secs);
        let now = Instant::now();
        let mut samples = self
            .shared
            .fps_samples
            .lock()
            .expect("fps samples poisoned");
        while let Some(front) = samples.front() {
            if now.duration_since(*front) > window {
                samples.pop_front();
            } else {
                break;
            }
        }

        let Some(oldest) = samples.front() else {
            return 0.0;
        };
        if samples.len() < 2 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        {
            samples.len() as f64 / now.duration_since(*oldest).as_secs_f64().max(FPS_EPSILON)
        }
    }

    /// Zeroes the current-frame counter.
    pub fn reset_frame_id(&self) {
        self.shared.frame_id.store(0, Ordering::SeqCst);
    }

    fn worker_loop<S>(
        options: &StreamerOptions,
        bus: &EventBus,
        shared: &Shared,
        step: &mut S,
    ) where
        S: FnMut() -> StepOutcome,
    {
        let error_window = Duration::from_secs_f64(options.error_time_window_secs.max(0.0));
        let mut consecutive_errors: u32 = 0;
        let mut consecutive_successes: u32 = 0;
        let mut error_events: VecDeque<Instant> = VecDeque::new();
        let mut last_resolution: Option<(u32, u32)> = None;

        while shared.running.load(Ordering::SeqCst) {
            match step() {
                Ok(Some((frame, index))) => {
                    let resolution = frame.resolution();
                    bus.on_frame.emit(FrameEvent { frame, index });
                    if last_resolution != Some(resolution) {
                        last_resolution = Some(resolution);
                        bus.on_resolution_changed.emit(resolution);
                    }

                    shared
                        .fps_samples
                        .lock()
                        .expect("fps samples poisoned")
                        .push_back(Instant::now());

                    consecutive_successes += 1;
                    if consecutive_successes >= options.success_threshold {
                        consecutive_errors = 0;
                        error_events.clear();
                    }
                }
                Ok(None) => {}
                Err(error) => {
                    bus.on_error.emit(error);

                    let now = Instant::now();
                    error_events.push_back(now);
                    while let Some(front) = error_events.front() {
                        if now.duration_since(*front) > error_window {
                            error_events.pop_front();
                        } else {
                            break;
                        }
                    }

                    consecutive_successes = 0;
                    consecutive_errors += 1;

                    if options.exit_on_error
                        && (consecutive_errors >= options.error_threshold
                            || error_events.len() >= options.error_time_threshold)
                    {
                        debug!(
                            consecutive_errors,
                            windowed_errors = error_events.len(),
                            "error budget exceeded, terminating worker"
                        );
                        if let Some(hook) = shared
                            .on_budget_exceeded
                            .lock()
                            .expect("budget hook poisoned")
                            .as_ref()
                        {
                            hook();
                        }
                        bus.on_error.emit(Error::BudgetExceeded(format!(
                            "{consecutive_errors} consecutive errors, {} in window",
                            error_events.len()
                        )));
                        break;
                    }
                }
            }
        }
    }
}

impl Drop for Streamer {
    fn drop(&mut self) {
        self.stop(1.0);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn test_frame() -> VideoFrame {
        VideoFrame::packed(vec![0u8; 12], 2, 2, 3)
    }

    fn capture_errors(bus: &EventBus) -> Arc<Mutex<Vec<Error>>> {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        bus.on_error.subscribe(true, move |error| {
            sink.lock().unwrap().push(error);
        });
        errors
    }

    fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if check() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        check()
    }

    fn options(error_threshold: u32, success_threshold: u32) -> StreamerOptions {
        StreamerOptions {
            exit_on_error: true,
            error_threshold,
            error_time_window_secs: 10.0,
            error_time_threshold: 100,
            success_threshold,
            fps_time_range_secs: 2.0,
        }
    }

    #[test]
    fn start_is_idempotent() {
        let bus = Arc::new(EventBus::new());
        let mut streamer = Streamer::new(options(3, 2), bus, Arc::new(AtomicU64::new(0)));

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        streamer.start(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(1));
            Ok(None)
        });
        assert!(streamer.is_running());
        // Second start must not spawn a second worker.
        streamer.start(|| Ok(None));

        streamer.stop(1.0);
        assert!(!streamer.is_running());
    }

    #[test]
    fn frames_are_published_with_their_index() {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.on_frame.subscribe(true, move |event| {
            sink.lock().unwrap().push(event.index);
        });

        let mut streamer = Streamer::new(options(3, 2), bus, Arc::new(AtomicU64::new(0)));
        let next = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&next);
        streamer.start(move || {
            let index = counter.fetch_add(1, Ordering::SeqCst);
            if index < 3 {
                Ok(Some((test_frame(), index)))
            } else {
                thread::sleep(Duration::from_millis(1));
                Ok(None)
            }
        });

        assert!(wait_until(Duration::from_secs(1), || {
            seen.lock().unwrap().len() == 3
        }));
        streamer.stop(1.0);
        assert_eq!(seen.lock().unwrap().as_slice(), &[0, 1, 2]);
    }

    #[test]
    fn consecutive_errors_exhaust_the_budget() {
        let bus = Arc::new(EventBus::new());
        let errors = capture_errors(&bus);

        let mut streamer = Streamer::new(options(3, 2), bus, Arc::new(AtomicU64::new(0)));
        streamer.start(|| Err(Error::DecoderTransient("boom".into())));

        assert!(wait_until(Duration::from_secs(1), || !streamer.is_running()));
        let errors = errors.lock().unwrap();
        // Three transient errors, then the final budget publication.
        assert_eq!(errors.len(), 4);
        assert!(errors[..3]
            .iter()
            .all(|e| matches!(e, Error::DecoderTransient(_))));
        assert!(matches!(errors[3], Error::BudgetExceeded(_)));
    }

    #[test]
    fn budget_hook_runs_before_the_final_publication() {
        let bus = Arc::new(EventBus::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let hook_order = Arc::clone(&order);
        let error_order = Arc::clone(&order);
        bus.on_error.subscribe(true, move |error| {
            if matches!(error, Error::BudgetExceeded(_)) {
                error_order.lock().unwrap().push("published");
            }
        });

        let mut streamer = Streamer::new(options(1, 2), bus, Arc::new(AtomicU64::new(0)));
        streamer.set_budget_exceeded_hook(move || hook_order.lock().unwrap().push("hook"));
        streamer.start(|| Err(Error::DecoderTransient("boom".into())));

        assert!(wait_until(Duration::from_secs(1), || !streamer.is_running()));
        assert_eq!(order.lock().unwrap().as_slice(), &["hook", "published"]);
    }

    #[test]
    fn successes_clear_the_error_state() {
        let bus = Arc::new(EventBus::new());
        let errors = capture_errors(&bus);

        // Two errors, two successes (clearing), then two more errors: with a
        // threshold of three the worker must survive all of it.
        let script = Arc::new(AtomicUsize::new(0));
        let mut streamer = Streamer::new(options(3, 2), bus, Arc::new(AtomicU64::new(0)));
        let position = Arc::clone(&script);
        streamer.start(move || {
            let tick = position.fetch_add(1, Ordering::SeqCst);
            match tick {
                0 | 1 | 4 | 5 => Err(Error::DecoderTransient(format!("tick {tick}"))),
                2 | 3 => Ok(Some((test_frame(), tick as u64))),
                _ => {
                    thread::sleep(Duration::from_millis(1));
                    Ok(None)
                }
            }
        });

        assert!(wait_until(Duration::from_secs(1), || {
            script.load(Ordering::SeqCst) > 6
        }));
        assert!(streamer.is_running());
        streamer.stop(1.0);

        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 4);
        assert!(errors.iter().all(|e| matches!(e, Error::DecoderTransient(_))));
    }

    #[test]
    fn stop_with_negative_timeout_only_flips_the_flag() {
        let bus = Arc::new(EventBus::new());
        let mut streamer = Streamer::new(options(3, 2), bus, Arc::new(AtomicU64::new(0)));
        streamer.start(|| {
            thread::sleep(Duration::from_millis(1));
            Ok(None)
        });

        streamer.stop(-1.0);
        assert!(!streamer.is_running());
    }

    #[test]
    fn fps_needs_at_least_two_samples() {
        let bus = Arc::new(EventBus::new());
        let streamer = Streamer::new(options(3, 2), bus, Arc::new(AtomicU64::new(0)));
        assert!(streamer.fps().abs() < f64::EPSILON);
    }

    #[test]
    fn fps_reflects_published_frames() {
        let bus = Arc::new(EventBus::new());
        let mut streamer = Streamer::new(options(3, 2), bus, Arc::new(AtomicU64::new(0)));
        let next = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&next);
        streamer.start(move || {
            thread::sleep(Duration::from_millis(5));
            let index = counter.fetch_add(1, Ordering::SeqCst);
            Ok(Some((test_frame(), index)))
        });

        assert!(wait_until(Duration::from_secs(2), || {
            next.load(Ordering::SeqCst) >= 10
        }));
        let fps = streamer.fps();
        streamer.stop(1.0);
        // ~5ms per frame → on the order of 200 fps; just require a sane range.
        assert!(fps > 20.0, "fps was {fps}");
        assert!(fps < 1000.0, "fps was {fps}");
    }

    #[test]
    fn reset_frame_id_zeroes_the_shared_counter() {
        let bus = Arc::new(EventBus::new());
        let frame_id = Arc::new(AtomicU64::new(17));
        let streamer = Streamer::new(options(3, 2), bus, Arc::clone(&frame_id));
        streamer.reset_frame_id();
        assert_eq!(frame_id.load(Ordering::SeqCst), 0);
    }
}
