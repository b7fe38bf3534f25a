// SPDX-License-Identifier: MPL-2.0
//! Centralized default values and engine option structs.
//!
//! This module serves as the single source of truth for the engine's
//! tunables. Constants are organized by category; the option structs are
//! plain data handed to [`crate::VideoEngine`] at construction — there is no
//! global configuration state.
//!
//! # Categories
//!
//! - **Playback speed**: speed multiplier floor
//! - **Frame cache**: cache span and prefetch cadence
//! - **Streamer**: error/success budgets and fps measurement window

use serde::{Deserialize, Serialize};

// ==========================================================================
// Playback Speed Defaults
// ==========================================================================

/// Minimum playback speed multiplier. `set_speed` floors at this value.
pub const MIN_PLAYBACK_SPEED: f64 = 0.1;

/// Default playback speed multiplier (1.0 = realtime).
pub const DEFAULT_PLAYBACK_SPEED: f64 = 1.0;

/// Lower bound for fps overrides; a zero or negative fps would stall pacing.
pub const MIN_FPS: f64 = 0.1;

// ==========================================================================
// Frame Cache Defaults
// ==========================================================================

/// Default span of media, in milliseconds, the cache aims to hold around the
/// current position.
pub const DEFAULT_CACHE_DURATION_MS: u64 = 20_000;

/// Default sleep between prefetcher iterations (in milliseconds).
pub const DEFAULT_CACHE_TIMER_INTERVAL_MS: u64 = 10;

/// Default lifetime of a seek/read timing sample (in milliseconds).
pub const DEFAULT_SAMPLE_WINDOW_MS: u64 = 30_000;

/// Default age limit for samples entering the expected-cost average
/// (in milliseconds).
pub const DEFAULT_SAMPLE_RETENTION_MS: u64 = 10_000;

// ==========================================================================
// Streamer Defaults
// ==========================================================================

/// Default number of consecutive step errors that terminates the worker.
pub const DEFAULT_ERROR_THRESHOLD: u32 = 5;

/// Default sliding window, in seconds, for the time-based error budget.
pub const DEFAULT_ERROR_TIME_WINDOW_SECS: f64 = 10.0;

/// Default number of errors within the window that terminates the worker.
pub const DEFAULT_ERROR_TIME_THRESHOLD: usize = 10;

/// Default number of consecutive successes that clears the error state.
pub const DEFAULT_SUCCESS_THRESHOLD: u32 = 3;

/// Default sliding window, in seconds, for the rolling fps measurement.
pub const DEFAULT_FPS_TIME_RANGE_SECS: f64 = 2.0;

/// Options for the frame cache and its prefetcher.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheOptions {
    /// Span of media around the current position the cache aims to hold,
    /// in milliseconds. The frame capacity is derived from this and the
    /// media fps once a file is opened.
    pub cache_duration_ms: u64,

    /// Sleep between prefetcher iterations, in milliseconds.
    pub timer_interval_ms: u64,

    /// How long a seek/read timing sample is kept at all, in milliseconds.
    pub sample_window_ms: u64,

    /// Maximum sample age entering the expected-cost average, in
    /// milliseconds.
    pub sample_retention_ms: u64,

    /// Whether caching (and prefetching) is active.
    pub enabled: bool,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            cache_duration_ms: DEFAULT_CACHE_DURATION_MS,
            timer_interval_ms: DEFAULT_CACHE_TIMER_INTERVAL_MS,
            sample_window_ms: DEFAULT_SAMPLE_WINDOW_MS,
            sample_retention_ms: DEFAULT_SAMPLE_RETENTION_MS,
            enabled: true,
        }
    }
}

impl CacheOptions {
    /// Creates options with caching disabled; the other fields keep their
    /// defaults so a later `enable_cache` behaves predictably.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }
}

/// Options for the streamer supervisor's error budget and fps measurement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamerOptions {
    /// Whether exceeding either error budget terminates the worker.
    pub exit_on_error: bool,

    /// Consecutive step errors that exhaust the budget.
    pub error_threshold: u32,

    /// Sliding window for the time-based error budget, in seconds.
    pub error_time_window_secs: f64,

    /// Errors within the window that exhaust the budget.
    pub error_time_threshold: usize,

    /// Consecutive successes that clear the error counters and log.
    pub success_threshold: u32,

    /// Sliding window for the rolling fps measurement, in seconds.
    pub fps_time_range_secs: f64,
}

impl Default for StreamerOptions {
    fn default() -> Self {
        Self {
            exit_on_error: true,
            error_threshold: DEFAULT_ERROR_THRESHOLD,
            error_time_window_secs: DEFAULT_ERROR_TIME_WINDOW_SECS,
            error_time_threshold: DEFAULT_ERROR_TIME_THRESHOLD,
            success_threshold: DEFAULT_SUCCESS_THRESHOLD,
            fps_time_range_secs: DEFAULT_FPS_TIME_RANGE_SECS,
        }
    }
}
