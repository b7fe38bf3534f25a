// SPDX-License-Identifier: MPL-2.0
//! Typed topic broadcast for engine events.
//!
//! Each topic publishes to zero or more subscribers. Delivery is best-effort
//! and non-blocking from the publisher's point of view:
//!
//! - **Blocking subscribers** run on the publisher's thread, inside a panic
//!   boundary — a panicking subscriber is logged and never disturbs other
//!   subscribers or the publisher.
//! - **Queued subscribers** run on one dispatcher thread per bus, fed by a
//!   bounded queue. When the queue is full the newest delivery is dropped
//!   with a warning rather than stalling the publisher.
//!
//! Subscribers may be added or removed at any time; each emission works on a
//! snapshot of the subscriber list, so changes apply to subsequent emissions.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Sender, TrySendError};
use tracing::warn;

use crate::error::Error;
use crate::frame::VideoFrame;
use crate::media_info::MediaInfo;
use crate::playback_state::{MediaState, PlaybackState};

/// Default capacity of the queued-delivery buffer.
const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Payload of the `on_frame` topic.
#[derive(Debug, Clone)]
pub struct FrameEvent {
    /// The decoded frame.
    pub frame: VideoFrame,

    /// Zero-based index the frame was retrieved at.
    pub index: u64,
}

/// Handle for removing a subscriber from a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionToken(u64);

enum DispatchJob {
    Run(Box<dyn FnOnce() + Send>),
    Shutdown,
}

struct Subscriber<T> {
    id: u64,
    priority: i32,
    blocking: bool,
    callback: Arc<dyn Fn(T) + Send + Sync>,
}

impl<T> Clone for Subscriber<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            priority: self.priority,
            blocking: self.blocking,
            callback: Arc::clone(&self.callback),
        }
    }
}

/// One broadcast topic with a typed payload.
pub struct Topic<T> {
    name: &'static str,
    subscribers: Mutex<Vec<Subscriber<T>>>,
    next_id: AtomicU64,
    queue_tx: Sender<DispatchJob>,
}

impl<T: Clone + Send + 'static> Topic<T> {
    fn new(name: &'static str, queue_tx: Sender<DispatchJob>) -> Self {
        Self {
            name,
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
            queue_tx,
        }
    }

    /// Returns the topic name (for diagnostics).
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Adds a subscriber with default priority.
    ///
    /// `blocking` subscribers run synchronously on the publishing thread;
    /// others run on the bus dispatcher.
    pub fn subscribe(
        &self,
        blocking: bool,
        callback: impl Fn(T) + Send + Sync + 'static,
    ) -> SubscriptionToken {
        self.subscribe_with_priority(blocking, 0, callback)
    }

    /// Adds a subscriber with an explicit priority. Higher priorities are
    /// delivered first; equal priorities keep subscription order.
    pub fn subscribe_with_priority(
        &self,
        blocking: bool,
        priority: i32,
        callback: impl Fn(T) + Send + Sync + 'static,
    ) -> SubscriptionToken {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let subscriber = Subscriber {
            id,
            priority,
            blocking,
            callback: Arc::new(callback),
        };

        let mut subscribers = self.subscribers.lock().expect("subscriber list poisoned");
        let position = subscribers
            .iter()
            .position(|existing| existing.priority < priority)
            .unwrap_or(subscribers.len());
        subscribers.insert(position, subscriber);

        SubscriptionToken(id)
    }

    /// Removes a subscriber. Returns false if the token was already gone.
    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        let mut subscribers = self.subscribers.lock().expect("subscriber list poisoned");
        let before = subscribers.len();
        subscribers.retain(|subscriber| subscriber.id != token.0);
        subscribers.len() != before
    }

    /// Returns the number of registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().expect("subscriber list poisoned").len()
    }

    /// Publishes `payload` to every subscriber.
    ///
    /// The subscriber list is snapshotted first, so subscribing or
    /// unsubscribing from inside a callback is safe and takes effect on the
    /// next emission.
    pub fn emit(&self, payload: T) {
        let snapshot: Vec<Subscriber<T>> = self
            .subscribers
            .lock()
            .expect("subscriber list poisoned")
            .clone();

        for subscriber in snapshot {
            let value = payload.clone();
            if subscriber.blocking {
                let callback = subscriber.callback;
                if catch_unwind(AssertUnwindSafe(|| callback(value))).is_err() {
                    warn!(topic = self.name, "blocking subscriber panicked");
                }
            } else {
                let topic = self.name;
                let callback = Arc::clone(&subscriber.callback);
                let job = DispatchJob::Run(Box::new(move || {
                    if catch_unwind(AssertUnwindSafe(|| callback(value))).is_err() {
                        warn!(topic, "queued subscriber panicked");
                    }
                }));
                match self.queue_tx.try_send(job) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        warn!(topic = self.name, "event queue full, dropping delivery");
                    }
                    Err(TrySendError::Disconnected(_)) => {
                        warn!(topic = self.name, "event dispatcher gone, dropping delivery");
                    }
                }
            }
        }
    }
}

/// The engine's event topics plus the shared queued-delivery dispatcher.
///
/// Construct one bus, hand it to the engine, and subscribe to the topics of
/// interest. Dropping the bus stops the dispatcher after the queue drains.
pub struct EventBus {
    /// A frame was produced, with the index it was retrieved at.
    pub on_frame: Topic<FrameEvent>,

    /// An error was observed (transient decode failures, budget exhaustion).
    pub on_error: Topic<Error>,

    /// A file was opened successfully.
    pub on_media_loaded: Topic<MediaInfo>,

    /// The media lifecycle state changed.
    pub on_media_state_changed: Topic<MediaState>,

    /// The playback state actually changed (no duplicate emissions).
    pub on_playback_state_changed: Topic<PlaybackState>,

    /// The published frame size changed.
    pub on_resolution_changed: Topic<(u32, u32)>,

    queue_tx: Sender<DispatchJob>,
    dispatcher: Option<JoinHandle<()>>,
}

impl EventBus {
    /// Creates a bus with the default queued-delivery capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_queue_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    /// Creates a bus whose queued-delivery buffer holds `capacity` jobs.
    #[must_use]
    pub fn with_queue_capacity(capacity: usize) -> Self {
        let (queue_tx, queue_rx) = bounded::<DispatchJob>(capacity.max(1));

        let dispatcher = std::thread::spawn(move || {
            while let Ok(job) = queue_rx.recv() {
                match job {
                    DispatchJob::Run(run) => run(),
                    DispatchJob::Shutdown => break,
                }
            }
        });

        Self {
            on_frame: Topic::new("on_frame", queue_tx.clone()),
            on_error: Topic::new("on_error", queue_tx.clone()),
            on_media_loaded: Topic::new("on_media_loaded", queue_tx.clone()),
            on_media_state_changed: Topic::new("on_media_state_changed", queue_tx.clone()),
            on_playback_state_changed: Topic::new("on_playback_state_changed", queue_tx.clone()),
            on_resolution_changed: Topic::new("on_resolution_changed", queue_tx.clone()),
            queue_tx,
            dispatcher: Some(dispatcher),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        // A full queue means pending jobs; blocking send preserves them.
        let _ = self.queue_tx.send(DispatchJob::Shutdown);
        if let Some(handle) = self.dispatcher.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    use super::*;

    fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if check() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        check()
    }

    #[test]
    fn blocking_subscriber_runs_on_the_publisher_thread() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.on_playback_state_changed
            .subscribe(true, move |state| sink.lock().unwrap().push(state));

        bus.on_playback_state_changed.emit(PlaybackState::PLAYING);
        // Blocking delivery completes before emit returns.
        assert_eq!(seen.lock().unwrap().as_slice(), &[PlaybackState::PLAYING]);
    }

    #[test]
    fn queued_subscriber_runs_on_the_dispatcher() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&count);
        bus.on_media_state_changed
            .subscribe(false, move |_| {
                sink.fetch_add(1, Ordering::SeqCst);
            });

        bus.on_media_state_changed.emit(MediaState::Loaded);
        assert!(wait_until(Duration::from_secs(1), || {
            count.load(Ordering::SeqCst) == 1
        }));
    }

    #[test]
    fn panicking_subscriber_does_not_disturb_others() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        bus.on_error.subscribe(true, |_| panic!("bad subscriber"));
        let sink = Arc::clone(&count);
        bus.on_error.subscribe(true, move |_| {
            sink.fetch_add(1, Ordering::SeqCst);
        });

        bus.on_error.emit(Error::DecoderTransient("x".into()));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&count);
        let token = bus.on_media_loaded.subscribe(true, move |_| {
            sink.fetch_add(1, Ordering::SeqCst);
        });

        let info = MediaInfo::new(30.0, 10, "clip.mp4");
        bus.on_media_loaded.emit(info.clone());
        assert!(bus.on_media_loaded.unsubscribe(token));
        assert!(!bus.on_media_loaded.unsubscribe(token));
        bus.on_media_loaded.emit(info);

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn priority_orders_blocking_delivery() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let low = Arc::clone(&order);
        bus.on_resolution_changed
            .subscribe_with_priority(true, 0, move |_| low.lock().unwrap().push("low"));
        let high = Arc::clone(&order);
        bus.on_resolution_changed
            .subscribe_with_priority(true, 10, move |_| high.lock().unwrap().push("high"));

        bus.on_resolution_changed.emit((640, 480));
        assert_eq!(order.lock().unwrap().as_slice(), &["high", "low"]);
    }

    #[test]
    fn full_queue_drops_the_newest_delivery() {
        let bus = EventBus::with_queue_capacity(1);
        let gate = Arc::new(Mutex::new(()));
        let count = Arc::new(AtomicUsize::new(0));

        // Stall the dispatcher on the first delivery.
        let held = gate.lock().unwrap();
        let blocker = Arc::clone(&gate);
        let sink = Arc::clone(&count);
        bus.on_frame.subscribe(false, move |_| {
            let _wait = blocker.lock().unwrap();
            sink.fetch_add(1, Ordering::SeqCst);
        });

        let event = FrameEvent {
            frame: VideoFrame::packed(vec![0; 12], 2, 2, 3),
            index: 0,
        };
        // First emission occupies the dispatcher, second fills the queue,
        // further ones are dropped.
        for index in 0..5 {
            bus.on_frame.emit(FrameEvent {
                index,
                ..event.clone()
            });
        }
        drop(held);

        assert!(wait_until(Duration::from_secs(1), || {
            count.load(Ordering::SeqCst) >= 1
        }));
        std::thread::sleep(Duration::from_millis(50));
        assert!(count.load(Ordering::SeqCst) < 5);
    }

    #[test]
    fn subscriber_count_tracks_registrations() {
        let bus = EventBus::new();
        assert_eq!(bus.on_frame.subscriber_count(), 0);
        let token = bus.on_frame.subscribe(true, |_| {});
        assert_eq!(bus.on_frame.subscriber_count(), 1);
        bus.on_frame.unsubscribe(token);
        assert_eq!(bus.on_frame.subscriber_count(), 0);
    }
}
