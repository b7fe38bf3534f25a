// SPDX-License-Identifier: MPL-2.0
//! The playback engine: state machine, worker step, and cache prefetcher.
//!
//! [`VideoEngine`] binds the decoder, frame cache, pacer, seek arbiter and
//! streamer supervisor into one component. The host drives it through plain
//! method calls and observes it through the [`EventBus`] handed in at
//! construction.
//!
//! # Threads
//!
//! At most two long-running threads per engine: the worker (runs the
//! playback step under the supervisor) and the optional cache prefetcher.
//! Shared state is partitioned into independently locked pieces; the lock
//! order is media → playback → counters → seek → decoder → cache, and no
//! lock is held across a sleep, a decoder call, or an event publication.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::{CacheOptions, StreamerOptions};
use crate::decoder::{FfmpegDecoder, FrameDecoder};
use crate::error::{Error, Result};
use crate::event_bus::{EventBus, FrameEvent};
use crate::frame::VideoFrame;
use crate::frame_cache::{CacheStats, FrameCache, ScanDirection};
use crate::media_info::MediaInfo;
use crate::pacer::FramePacer;
use crate::playback_speed::PlaybackSpeed;
use crate::playback_state::{MediaState, PlaybackState};
use crate::read_cost::ReadCostEstimator;
use crate::seek::SeekArbiter;
use crate::supervisor::{StepOutcome, Streamer};

/// Worker sleep while no media is loaded.
const IDLE_INTERVAL: Duration = Duration::from_millis(10);

/// Grace period for worker shutdown on drop.
const DROP_STOP_TIMEOUT_SECS: f64 = 1.0;

type Opener<D> = Arc<dyn Fn(&Path) -> Result<(D, MediaInfo)> + Send + Sync>;

#[derive(Default)]
struct MediaSlot {
    state: MediaState,
    info: Option<MediaInfo>,
}

struct PlaybackMode {
    state: PlaybackState,
    speed: PlaybackSpeed,
}

/// State shared between the host thread, the worker and the prefetcher.
struct EngineShared<D> {
    media: Mutex<MediaSlot>,
    playback: Mutex<PlaybackMode>,
    next_frame: AtomicU64,
    current_frame: Arc<AtomicU64>,
    seek: SeekArbiter,
    vcap: Mutex<Option<D>>,
    cache: Mutex<FrameCache>,
    cache_enabled: AtomicBool,
    pacer: FramePacer,
    read_cost: ReadCostEstimator,
    bus: Arc<EventBus>,
}

impl<D: FrameDecoder> EngineShared<D> {
    /// Applies a playback transition atomically, publishing only on an
    /// actual change. The closure sees the current state and returns the
    /// desired one (or `None` to leave it alone); the read-modify-write runs
    /// under the playback lock, the publication after releasing it.
    fn transition_playback(&self, transition: impl FnOnce(PlaybackState) -> Option<PlaybackState>) {
        let changed = {
            let mut playback = self.playback.lock().expect("playback state poisoned");
            match transition(playback.state) {
                Some(new_state) if new_state != playback.state => {
                    debug_assert!(new_state.is_valid(), "invalid playback state {new_state}");
                    playback.state = new_state;
                    Some(new_state)
                }
                _ => None,
            }
        };
        if let Some(new_state) = changed {
            self.bus.on_playback_state_changed.emit(new_state);
        }
    }

    /// Unconditionally sets the playback state.
    fn set_playback_state(&self, new_state: PlaybackState) {
        self.transition_playback(|_| Some(new_state));
    }

    /// Sets the media state, publishing only on an actual change.
    fn set_media_state(&self, new_state: MediaState) {
        let changed = {
            let mut media = self.media.lock().expect("media state poisoned");
            if media.state == new_state {
                false
            } else {
                media.state = new_state;
                true
            }
        };
        if changed {
            self.bus.on_media_state_changed.emit(new_state);
        }
    }

    /// Snapshot of the media descriptor while loaded.
    fn loaded_info(&self) -> Option<MediaInfo> {
        let media = self.media.lock().expect("media state poisoned");
        if media.state == MediaState::Loaded {
            media.info.clone()
        } else {
            None
        }
    }

    /// Retrieves the frame at `index`: from the cache when possible,
    /// otherwise from the decoder (recording the seek/read cost and feeding
    /// the cache).
    fn retrieve(&self, index: u64) -> Result<VideoFrame> {
        let cache_enabled = self.cache_enabled.load(Ordering::SeqCst);
        if cache_enabled {
            if let Some(frame) = self.cache.lock().expect("frame cache poisoned").get(index) {
                return Ok(frame);
            }
        }

        let frame = self.fetch_from_decoder(index)?;
        let frame =
            frame.ok_or_else(|| Error::DecoderTransient(format!("no frame at index {index}")))?;

        if cache_enabled {
            self.cache
                .lock()
                .expect("frame cache poisoned")
                .put(index, frame.clone());
        }
        Ok(frame)
    }

    /// Positioned read straight from the decoder, bypassing the cache
    /// lookup. Records the observed cost.
    fn fetch_from_decoder(&self, index: u64) -> Result<Option<VideoFrame>> {
        let (frame, timing) = {
            let mut vcap = self.vcap.lock().expect("decoder slot poisoned");
            let Some(decoder) = vcap.as_mut() else {
                return Err(Error::DecoderTransient("no decoder attached".into()));
            };
            decoder.position_to(index)?;
            let frame = decoder.read_next()?;
            let timing = decoder.take_timing();
            (frame, timing)
        };
        self.read_cost.record(timing.seek, timing.read);
        Ok(frame)
    }

    /// One worker iteration: pending seek first, then directional
    /// advancement while playing, then the pacing sleep.
    fn step(&self) -> StepOutcome {
        let Some(info) = self.loaded_info() else {
            thread::sleep(IDLE_INTERVAL);
            return Ok(None);
        };
        let frame_count = info.frame_count();

        // A pending seek outranks normal advancement, in any playback state.
        if let Some(target) = self.seek.consume() {
            if target < frame_count {
                let frame = self.retrieve(target)?;
                let backward = self
                    .playback
                    .lock()
                    .expect("playback state poisoned")
                    .state
                    .is_backward();
                self.current_frame.store(target, Ordering::SeqCst);
                let next = if backward {
                    target.saturating_sub(1)
                } else {
                    target + 1
                };
                self.next_frame.store(next, Ordering::SeqCst);
                self.pacer.reset();
                return Ok(Some((frame, target)));
            }
        }

        let (playing, backward, speed) = {
            let playback = self.playback.lock().expect("playback state poisoned");
            (
                playback.state.is_playing(),
                playback.state.is_backward(),
                playback.speed,
            )
        };

        let mut outcome: StepOutcome = Ok(None);
        if playing {
            let index = self.next_frame.load(Ordering::SeqCst);
            if index >= frame_count {
                // End of stream, deferred one tick so the final frame's
                // publication precedes the STOPPED change.
                self.rewind_to_start();
            } else {
                match self.retrieve(index) {
                    Ok(frame) => {
                        self.current_frame.store(index, Ordering::SeqCst);
                        let next = if backward {
                            index.saturating_sub(1)
                        } else {
                            index + 1
                        };
                        self.next_frame.store(next, Ordering::SeqCst);
                        outcome = Ok(Some((frame, index)));
                    }
                    // The tick still paces on a failed read, so a stream of
                    // transient errors cannot spin the worker.
                    Err(error) => outcome = Err(error),
                }
            }
        }

        let sleep = self.pacer.schedule_next(info.frame_interval(speed));
        if !sleep.is_zero() {
            thread::sleep(sleep);
        }
        outcome
    }

    /// End-of-stream handling: reposition to frame 0, zero the counters and
    /// stop playback.
    fn rewind_to_start(&self) {
        {
            let mut vcap = self.vcap.lock().expect("decoder slot poisoned");
            if let Some(decoder) = vcap.as_mut() {
                if let Err(error) = decoder.position_to(0) {
                    debug!(%error, "rewind reposition failed");
                }
                let _ = decoder.take_timing();
            }
        }
        self.next_frame.store(0, Ordering::SeqCst);
        self.current_frame.store(0, Ordering::SeqCst);
        self.set_playback_state(PlaybackState::STOPPED);
    }

    /// One prefetcher iteration. Returns false when the prefetcher should
    /// terminate (media gone or cache disabled).
    fn prefetch_tick(&self) -> bool {
        if !self.cache_enabled.load(Ordering::SeqCst) {
            return false;
        }
        let Some(info) = self.loaded_info() else {
            return false;
        };

        let fallback = Duration::from_secs_f64(1.0 / info.fps());
        let expected = self.read_cost.expected_cost(fallback);
        // No scheduled deadline means no pacing pressure at all.
        let slack = self.pacer.slack().unwrap_or(Duration::MAX);
        if slack <= expected {
            return true;
        }

        let current = self.current_frame.load(Ordering::SeqCst);
        let direction = ScanDirection::from(
            self.playback
                .lock()
                .expect("playback state poisoned")
                .state,
        );
        let plan = self
            .cache
            .lock()
            .expect("frame cache poisoned")
            .plan_next(current, direction, info.frame_count());
        let Some(index) = plan else {
            return true;
        };

        match self.fetch_from_decoder(index) {
            Ok(Some(frame)) => {
                self.cache
                    .lock()
                    .expect("frame cache poisoned")
                    .put(index, frame);
            }
            Ok(None) => {}
            Err(error) => {
                // Speculative work: log, never charge the error budget.
                debug!(index, %error, "prefetch fetch failed");
            }
        }
        true
    }
}

struct PrefetchHandle {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PrefetchHandle {
    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// The playback engine.
///
/// Owns the decoder, cache, counters and worker threads exclusively; the
/// host owns the [`EventBus`] and subscribes to its topics. All methods are
/// cheap control-plane calls — decoding happens on the worker.
pub struct VideoEngine<D: FrameDecoder + 'static> {
    shared: Arc<EngineShared<D>>,
    opener: Opener<D>,
    streamer: Streamer,
    prefetch: Option<PrefetchHandle>,
    cache_options: CacheOptions,
}

impl VideoEngine<FfmpegDecoder> {
    /// Creates an engine backed by the FFmpeg decoder.
    #[must_use]
    pub fn new(
        bus: Arc<EventBus>,
        streamer_options: StreamerOptions,
        cache_options: CacheOptions,
    ) -> Self {
        Self::with_opener(bus, streamer_options, cache_options, FfmpegDecoder::open)
    }
}

impl<D: FrameDecoder + 'static> VideoEngine<D> {
    /// Creates an engine with a custom decoder opener (used by tests and
    /// alternative decoder backends).
    #[must_use]
    pub fn with_opener(
        bus: Arc<EventBus>,
        streamer_options: StreamerOptions,
        cache_options: CacheOptions,
        opener: impl Fn(&Path) -> Result<(D, MediaInfo)> + Send + Sync + 'static,
    ) -> Self {
        let current_frame = Arc::new(AtomicU64::new(0));
        let shared = Arc::new(EngineShared {
            media: Mutex::new(MediaSlot::default()),
            playback: Mutex::new(PlaybackMode {
                state: PlaybackState::STOPPED,
                speed: PlaybackSpeed::default(),
            }),
            next_frame: AtomicU64::new(0),
            current_frame: Arc::clone(&current_frame),
            seek: SeekArbiter::new(),
            vcap: Mutex::new(None),
            cache: Mutex::new(FrameCache::new()),
            cache_enabled: AtomicBool::new(cache_options.enabled),
            pacer: FramePacer::new(),
            read_cost: ReadCostEstimator::new(
                Duration::from_millis(cache_options.sample_window_ms),
                Duration::from_millis(cache_options.sample_retention_ms),
            ),
            bus: Arc::clone(&bus),
        });

        let streamer = Streamer::new(streamer_options, bus, current_frame);
        let hook_shared = Arc::clone(&shared);
        streamer.set_budget_exceeded_hook(move || {
            hook_shared.set_playback_state(PlaybackState::STOPPED);
        });

        Self {
            shared,
            opener: Arc::new(opener),
            streamer,
            prefetch: None,
            cache_options,
        }
    }

    /// Returns the event bus the engine publishes on.
    #[must_use]
    pub fn bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.shared.bus)
    }

    /// Opens `path`, replacing any currently loaded media.
    ///
    /// On success: playback is stopped, the cache cleared and re-capped for
    /// the new fps, `on_media_loaded` and the `Loaded` state are published,
    /// frame 0 is read and published, and the worker (plus prefetcher, if
    /// caching is enabled) is running. On failure the current media is
    /// untouched.
    pub fn open_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let (decoder, info) = (self.opener)(path)?;

        self.stop_prefetcher();
        self.shared.set_playback_state(PlaybackState::STOPPED);
        self.shared.set_media_state(MediaState::Unloaded);

        {
            let mut cache = self.shared.cache.lock().expect("frame cache poisoned");
            cache.clear();
            cache.set_target_frames(FrameCache::target_frames_for(
                self.cache_options.cache_duration_ms,
                info.fps(),
            ));
        }

        let old = {
            let mut vcap = self.shared.vcap.lock().expect("decoder slot poisoned");
            vcap.replace(decoder)
        };
        if let Some(mut old) = old {
            old.close();
        }

        self.shared.seek.clear();
        self.shared.pacer.clear();
        self.shared.read_cost.clear();
        self.shared.next_frame.store(0, Ordering::SeqCst);
        self.shared.current_frame.store(0, Ordering::SeqCst);

        {
            let mut media = self.shared.media.lock().expect("media state poisoned");
            media.info = Some(info.clone());
        }
        self.shared.bus.on_media_loaded.emit(info);
        self.shared.set_media_state(MediaState::Loaded);

        // First frame straight away, so the host has something to show.
        match self.shared.retrieve(0) {
            Ok(frame) => {
                self.shared.next_frame.store(1, Ordering::SeqCst);
                self.shared
                    .bus
                    .on_frame
                    .emit(FrameEvent { frame, index: 0 });
            }
            Err(error) => {
                warn!(%error, "initial frame read failed");
                self.shared.bus.on_error.emit(error);
            }
        }

        self.ensure_worker();
        if self.shared.cache_enabled.load(Ordering::SeqCst) {
            self.start_prefetcher();
        }
        Ok(())
    }

    /// Starts or resumes forward playback. Idempotent while playing.
    pub fn play(&self) {
        if self.shared.loaded_info().is_none() {
            return;
        }
        self.shared
            .transition_playback(|state| (!state.is_playing()).then_some(PlaybackState::PLAYING));
    }

    /// Starts playback in the backward direction.
    pub fn play_backward(&self) {
        if self.shared.loaded_info().is_none() {
            return;
        }
        self.shared
            .transition_playback(|_| Some(PlaybackState::BACKWARD));
    }

    /// Pauses playback. A no-op unless currently playing.
    pub fn pause(&self) {
        self.shared
            .transition_playback(|state| state.is_playing().then_some(PlaybackState::PAUSED));
    }

    /// Stops playback, keeping the media loaded.
    pub fn stop_playback(&self) {
        if self.shared.loaded_info().is_some() {
            self.shared.set_playback_state(PlaybackState::STOPPED);
        }
    }

    /// Toggles the informational fast flag. Never touches the speed.
    pub fn set_fast(&self, fast: bool) {
        self.shared.transition_playback(|state| {
            if !state.is_playing() {
                return None;
            }
            Some(if fast {
                state.with(PlaybackState::FAST)
            } else {
                state.without(PlaybackState::FAST)
            })
        });
    }

    /// Requests a jump to `index`. Out-of-range requests (negative or past
    /// the last frame) are silently dropped; a later request overwrites a
    /// pending one.
    pub fn seek(&self, index: i64) {
        let Ok(index) = u64::try_from(index) else {
            return;
        };
        let Some(info) = self.shared.loaded_info() else {
            return;
        };
        if index < info.frame_count() {
            self.shared.seek.request(index);
        }
    }

    /// Seeks to a position expressed as a percentage of the media.
    #[allow(clippy::cast_possible_truncation)]
    pub fn seek_percent(&self, percent: f64) {
        let Some(info) = self.shared.loaded_info() else {
            return;
        };
        #[allow(clippy::cast_precision_loss)]
        let index = ((percent / 100.0) * info.frame_count() as f64).floor() as i64;
        self.seek(index);
    }

    /// Seeks to a position expressed as a media timestamp in milliseconds.
    #[allow(clippy::cast_possible_truncation)]
    pub fn seek_timestamp_ms(&self, timestamp_ms: u64) {
        let Some(info) = self.shared.loaded_info() else {
            return;
        };
        #[allow(clippy::cast_precision_loss)]
        let index = ((timestamp_ms as f64 / 1000.0) * info.fps()).floor() as i64;
        self.seek(index);
    }

    /// Sets the playback speed multiplier (floored at 0.1×) and re-anchors
    /// pacing so the new rate applies from now, without catch-up.
    pub fn set_speed(&self, speed: f64) {
        {
            let mut playback = self.shared.playback.lock().expect("playback state poisoned");
            playback.speed = PlaybackSpeed::new(speed);
        }
        self.shared.pacer.reset();
    }

    /// Overrides the effective fps used for pacing and cache sizing.
    pub fn set_fps(&self, fps: f64) {
        self.update_fps(|info| info.set_fps(fps));
    }

    /// Restores the fps probed from the container.
    pub fn reset_fps(&self) {
        self.update_fps(MediaInfo::reset_fps);
    }

    fn update_fps(&self, apply: impl Fn(&mut MediaInfo)) {
        let new_fps = {
            let mut media = self.shared.media.lock().expect("media state poisoned");
            let Some(info) = media.info.as_mut() else {
                return;
            };
            apply(info);
            info.fps()
        };
        let mut cache = self.shared.cache.lock().expect("frame cache poisoned");
        cache.set_target_frames(FrameCache::target_frames_for(
            self.cache_options.cache_duration_ms,
            new_fps,
        ));
    }

    /// Turns caching on and starts the prefetcher if media is loaded.
    pub fn enable_cache(&mut self) {
        self.shared.cache_enabled.store(true, Ordering::SeqCst);
        if self.shared.loaded_info().is_some() {
            self.start_prefetcher();
        }
    }

    /// Turns caching off. Cached frames survive for a later re-enable; the
    /// prefetcher terminates.
    pub fn disable_cache(&mut self) {
        self.shared.cache_enabled.store(false, Ordering::SeqCst);
        self.stop_prefetcher();
    }

    /// Empties the frame cache.
    pub fn clear_cache(&self) {
        self.shared.cache.lock().expect("frame cache poisoned").clear();
    }

    /// Snapshot of the cache performance counters.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.shared.cache.lock().expect("frame cache poisoned").stats()
    }

    /// Index of the most recently emitted frame.
    #[must_use]
    pub fn current_frame(&self) -> u64 {
        self.shared.current_frame.load(Ordering::SeqCst)
    }

    /// Index the worker will request next (absent a pending seek).
    #[must_use]
    pub fn next_frame(&self) -> u64 {
        self.shared.next_frame.load(Ordering::SeqCst)
    }

    /// Current position as a percentage of the media, zero when nothing is
    /// loaded.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn position_percent(&self) -> f64 {
        let Some(info) = self.shared.loaded_info() else {
            return 0.0;
        };
        if info.frame_count() == 0 {
            return 0.0;
        }
        self.current_frame() as f64 / info.frame_count() as f64 * 100.0
    }

    /// Snapshot of the playback state.
    #[must_use]
    pub fn playback_state(&self) -> PlaybackState {
        self.shared
            .playback
            .lock()
            .expect("playback state poisoned")
            .state
    }

    /// Snapshot of the media state.
    #[must_use]
    pub fn media_state(&self) -> MediaState {
        self.shared.media.lock().expect("media state poisoned").state
    }

    /// Descriptor of the loaded media, if any.
    #[must_use]
    pub fn media_info(&self) -> Option<MediaInfo> {
        self.shared
            .media
            .lock()
            .expect("media state poisoned")
            .info
            .clone()
    }

    /// Rolling output frame rate measured by the supervisor.
    #[must_use]
    pub fn fps(&self) -> f64 {
        self.streamer.fps()
    }

    /// Whether the worker loop is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.streamer.is_running()
    }

    /// Stops the worker and prefetcher. See [`Streamer::stop`] for the
    /// timeout semantics.
    pub fn stop(&mut self, timeout_secs: f64) {
        self.stop_prefetcher();
        self.streamer.stop(timeout_secs);
    }

    fn ensure_worker(&mut self) {
        let shared = Arc::clone(&self.shared);
        self.streamer.start(move || shared.step());
    }

    fn start_prefetcher(&mut self) {
        if let Some(prefetch) = &self.prefetch {
            if prefetch.running.load(Ordering::SeqCst) {
                return;
            }
        }

        let running = Arc::new(AtomicBool::new(true));
        let shared = Arc::clone(&self.shared);
        let interval = Duration::from_millis(self.cache_options.timer_interval_ms.max(1));
        let flag = Arc::clone(&running);
        let handle = thread::spawn(move || {
            while flag.load(Ordering::SeqCst) {
                if !shared.prefetch_tick() {
                    break;
                }
                thread::sleep(interval);
            }
            flag.store(false, Ordering::SeqCst);
        });

        self.prefetch = Some(PrefetchHandle {
            running,
            handle: Some(handle),
        });
    }

    fn stop_prefetcher(&mut self) {
        if let Some(mut prefetch) = self.prefetch.take() {
            prefetch.stop();
        }
    }
}

impl<D: FrameDecoder + 'static> Drop for VideoEngine<D> {
    fn drop(&mut self) {
        self.stop(DROP_STOP_TIMEOUT_SECS);
    }
}
