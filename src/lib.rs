// SPDX-License-Identifier: MPL-2.0
//! `playhead` is a threaded video playback engine.
//!
//! It owns a video-file decoder, drives it forward or backward at a
//! controllable speed, services random-access seeks, prefetches frames into
//! a bounded cache, and publishes decoded frames plus lifecycle events to
//! subscribers. The GUI (or any other host) stays outside: it hands the
//! engine an [`EventBus`] and a pair of option structs, then drives it
//! through plain method calls.
//!
//! ```no_run
//! use std::sync::Arc;
//! use playhead::{CacheOptions, EventBus, StreamerOptions, VideoEngine};
//!
//! let bus = Arc::new(EventBus::new());
//! bus.on_frame.subscribe(false, |event| {
//!     println!("frame {} ({}x{})", event.index, event.frame.width, event.frame.height);
//! });
//!
//! let mut engine = VideoEngine::new(bus, StreamerOptions::default(), CacheOptions::default());
//! engine.open_file("clip.mp4").expect("unsupported file");
//! engine.play();
//! ```

#![doc(html_root_url = "https://docs.rs/playhead/0.2.0")]

pub mod config;
pub mod decoder;
pub mod engine;
pub mod error;
pub mod event_bus;
pub mod frame;
pub mod frame_cache;
pub mod media_info;
pub mod pacer;
pub mod playback_speed;
pub mod playback_state;
pub mod read_cost;
pub mod seek;
pub mod supervisor;
#[cfg(test)]
mod test_utils;

pub use config::{CacheOptions, StreamerOptions};
pub use decoder::{DecodeTiming, FfmpegDecoder, FrameDecoder};
pub use engine::VideoEngine;
pub use error::{Error, Result};
pub use event_bus::{EventBus, FrameEvent, SubscriptionToken, Topic};
pub use frame::VideoFrame;
pub use frame_cache::{CacheStats, FrameCache, ScanDirection};
pub use media_info::MediaInfo;
pub use pacer::FramePacer;
pub use playback_speed::PlaybackSpeed;
pub use playback_state::{MediaState, PlaybackState};
pub use read_cost::{ReadCostEstimator, ReadSample};
pub use seek::SeekArbiter;
pub use supervisor::{StepOutcome, Streamer};
