// SPDX-License-Identifier: MPL-2.0
//! Frame cache keyed by frame index.
//!
//! This module provides a bounded cache of decoded frames centred around the
//! current playback position, biased in the playback direction.
//!
//! # Design
//!
//! - **Index-keyed**: frames are addressed by their zero-based frame index
//! - **LRU eviction**: capacity is a frame count derived from the configured
//!   cache span and the media fps; least recently used entries go first
//! - **Centred planning**: [`FrameCache::plan_next`] picks the next index to
//!   prefetch inside a window around the current position, scanning the
//!   playback direction first

use std::num::NonZeroUsize;

use lru::LruCache;

use crate::frame::VideoFrame;
use crate::playback_state::PlaybackState;

/// Capacity used before a file is opened (fps unknown).
const DEFAULT_TARGET_FRAMES: usize = 64;

/// Scan order for [`FrameCache::plan_next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanDirection {
    /// Fill ahead of the position first.
    Forward,
    /// Fill behind the position first.
    Backward,
}

impl From<PlaybackState> for ScanDirection {
    fn from(state: PlaybackState) -> Self {
        if state.is_backward() {
            ScanDirection::Backward
        } else {
            ScanDirection::Forward
        }
    }
}

/// Statistics about cache performance.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    /// Number of frames currently in cache.
    pub frame_count: usize,

    /// Number of cache hits (frame found).
    pub hits: u64,

    /// Number of cache misses (frame not found).
    pub misses: u64,

    /// Number of frames evicted due to the capacity limit.
    pub evictions: u64,

    /// Number of frames inserted.
    pub insertions: u64,
}

impl CacheStats {
    /// Returns the cache hit rate as a percentage (0.0 - 100.0).
    // Allow cast_precision_loss: statistics only; counts stay far below 2^52.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Bounded frame cache with centred prefetch planning.
pub struct FrameCache {
    /// LRU map from frame index to frame.
    cache: LruCache<u64, VideoFrame>,

    /// Frame capacity target; also the planning window size.
    target_frames: usize,

    /// Performance statistics.
    stats: CacheStats,
}

impl FrameCache {
    /// Creates a cache with the pre-open default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_target_frames(DEFAULT_TARGET_FRAMES)
    }

    /// Creates a cache capped at `target_frames` entries (at least 1).
    #[must_use]
    pub fn with_target_frames(target_frames: usize) -> Self {
        let capacity = NonZeroUsize::new(target_frames.max(1)).expect("capacity is at least 1");
        Self {
            cache: LruCache::new(capacity),
            target_frames: target_frames.max(1),
            stats: CacheStats::default(),
        }
    }

    /// Derives the frame capacity from a cache span and fps:
    /// `ceil(cache_duration_ms / 1000 * fps)`.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    #[must_use]
    pub fn target_frames_for(cache_duration_ms: u64, fps: f64) -> usize {
        ((cache_duration_ms as f64 / 1000.0) * fps).ceil().max(1.0) as usize
    }

    /// Returns the current frame capacity target.
    #[must_use]
    pub fn target_frames(&self) -> usize {
        self.target_frames
    }

    /// Re-caps the cache, evicting LRU entries if it shrinks.
    pub fn set_target_frames(&mut self, target_frames: usize) {
        self.target_frames = target_frames.max(1);
        let capacity = NonZeroUsize::new(self.target_frames).expect("capacity is at least 1");
        while self.cache.len() > self.target_frames {
            if self.cache.pop_lru().is_some() {
                self.stats.evictions += 1;
            }
        }
        self.cache.resize(capacity);
        self.stats.frame_count = self.cache.len();
    }

    /// Looks up the frame at `index`, updating LRU order on a hit.
    pub fn get(&mut self, index: u64) -> Option<VideoFrame> {
        match self.cache.get(&index) {
            Some(frame) => {
                self.stats.hits += 1;
                Some(frame.clone())
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Inserts or overwrites the frame at `index`.
    pub fn put(&mut self, index: u64, frame: VideoFrame) {
        if let Some((evicted_index, _)) = self.cache.push(index, frame) {
            // push returns the displaced entry: either the old value under the
            // same key (overwrite) or the LRU entry (eviction).
            if evicted_index != index {
                self.stats.evictions += 1;
            }
        }
        self.stats.insertions += 1;
        self.stats.frame_count = self.cache.len();
    }

    /// Checks for `index` without touching LRU order.
    #[must_use]
    pub fn contains(&self, index: u64) -> bool {
        self.cache.contains(&index)
    }

    /// Empties the cache.
    pub fn clear(&mut self) {
        self.cache.clear();
        self.stats.frame_count = 0;
    }

    /// Picks the next index to prefetch, or `None` when the window is full.
    ///
    /// The window spans `target_frames` entries around `current`, split into
    /// `left = min(target / 2, current)` behind and `target - left` ahead,
    /// clipped to `[0, total_frames)`. The playback direction's side is
    /// scanned first, one step at a time outward from `current`; the first
    /// uncached index wins.
    #[must_use]
    pub fn plan_next(
        &self,
        current: u64,
        direction: ScanDirection,
        total_frames: u64,
    ) -> Option<u64> {
        if total_frames == 0 {
            return None;
        }
        let last = total_frames - 1;
        let current = current.min(last);

        let target = self.target_frames as u64;
        let left_budget = (target / 2).min(current);
        let right_budget = target - left_budget;

        let lo = current - left_budget;
        let hi = last.min(current.saturating_add(right_budget));

        let scan_right = |cache: &Self| {
            (current + 1..=hi).find(|&index| !cache.contains(index))
        };
        let scan_left = |cache: &Self| {
            (lo..current).rev().find(|&index| !cache.contains(index))
        };

        match direction {
            ScanDirection::Forward => scan_right(self).or_else(|| scan_left(self)),
            ScanDirection::Backward => scan_left(self).or_else(|| scan_right(self)),
        }
    }

    /// Returns the current cache statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Returns the current number of cached frames.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Returns whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

impl Default for FrameCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FrameCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameCache")
            .field("frame_count", &self.cache.len())
            .field("target_frames", &self.target_frames)
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::assert_abs_diff_eq;

    fn test_frame(tag: u8) -> VideoFrame {
        VideoFrame::packed(vec![tag; 48], 4, 4, 3)
    }

    #[test]
    fn new_cache_is_empty() {
        let cache = FrameCache::new();
        assert!(cache.is_empty());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn insert_and_get_frame() {
        let mut cache = FrameCache::new();
        cache.put(5, test_frame(1));

        let hit = cache.get(5);
        assert!(hit.is_some());
        assert_eq!(cache.stats().hits, 1);

        assert!(cache.get(6).is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn overwrite_replaces_without_evicting() {
        let mut cache = FrameCache::with_target_frames(4);
        cache.put(1, test_frame(1));
        cache.put(1, test_frame(2));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().evictions, 0);
        assert_eq!(cache.get(1).unwrap().data[0], 2);
    }

    #[test]
    fn capacity_is_enforced_with_lru_eviction() {
        let mut cache = FrameCache::with_target_frames(3);
        for index in 0..5 {
            cache.put(index, test_frame(index as u8));
        }
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.stats().evictions, 2);
        // Oldest entries are gone.
        assert!(!cache.contains(0));
        assert!(!cache.contains(1));
        assert!(cache.contains(4));
    }

    #[test]
    fn shrinking_the_target_evicts_excess() {
        let mut cache = FrameCache::with_target_frames(8);
        for index in 0..8 {
            cache.put(index, test_frame(0));
        }
        cache.set_target_frames(2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn clear_removes_all_frames() {
        let mut cache = FrameCache::new();
        for index in 0..5 {
            cache.put(index, test_frame(0));
        }
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn target_frames_for_rounds_up() {
        assert_eq!(FrameCache::target_frames_for(20_000, 30.0), 600);
        assert_eq!(FrameCache::target_frames_for(1000, 29.97), 30);
        // Never below one frame.
        assert_eq!(FrameCache::target_frames_for(0, 30.0), 1);
    }

    #[test]
    fn plan_next_prefers_the_playback_direction() {
        let cache = FrameCache::with_target_frames(10);
        assert_eq!(
            cache.plan_next(50, ScanDirection::Forward, 1000),
            Some(51)
        );
        assert_eq!(
            cache.plan_next(50, ScanDirection::Backward, 1000),
            Some(49)
        );
    }

    #[test]
    fn plan_next_skips_cached_indices() {
        let mut cache = FrameCache::with_target_frames(10);
        cache.put(51, test_frame(0));
        cache.put(52, test_frame(0));
        assert_eq!(
            cache.plan_next(50, ScanDirection::Forward, 1000),
            Some(53)
        );
    }

    #[test]
    fn plan_next_falls_back_to_the_other_side() {
        let mut cache = FrameCache::with_target_frames(4);
        // right budget = 4 - min(2, 50) = 2 → right side is 51..=52
        cache.put(51, test_frame(0));
        cache.put(52, test_frame(0));
        assert_eq!(
            cache.plan_next(50, ScanDirection::Forward, 1000),
            Some(49)
        );
    }

    #[test]
    fn plan_next_clips_at_the_media_edges() {
        let cache = FrameCache::with_target_frames(10);
        // Near the start the left budget collapses to the available frames.
        assert_eq!(cache.plan_next(0, ScanDirection::Backward, 1000), Some(1));
        // Near the end the right side is clipped at the last index.
        assert_eq!(
            cache.plan_next(999, ScanDirection::Forward, 1000),
            Some(998)
        );
    }

    #[test]
    fn plan_next_returns_none_when_the_window_is_full() {
        let mut cache = FrameCache::with_target_frames(5);
        for index in 3..=7 {
            cache.put(index, test_frame(0));
        }
        // Window around 5 with target 5: left = 2, right = 3, clipped at the
        // last index → 3..=7, all cached.
        assert_eq!(cache.plan_next(5, ScanDirection::Forward, 8), None);
    }

    #[test]
    fn plan_next_on_empty_media_returns_none() {
        let cache = FrameCache::new();
        assert_eq!(cache.plan_next(0, ScanDirection::Forward, 0), None);
    }

    #[test]
    fn stats_track_hit_rate() {
        let mut cache = FrameCache::new();
        cache.put(1, test_frame(0));
        let _ = cache.get(1);
        let _ = cache.get(2);
        assert_abs_diff_eq!(cache.stats().hit_rate(), 50.0, epsilon = 0.01);
    }

    #[test]
    fn scan_direction_follows_playback_state() {
        assert_eq!(
            ScanDirection::from(PlaybackState::BACKWARD),
            ScanDirection::Backward
        );
        assert_eq!(
            ScanDirection::from(PlaybackState::FORWARD),
            ScanDirection::Forward
        );
        assert_eq!(
            ScanDirection::from(PlaybackState::PLAYING),
            ScanDirection::Forward
        );
    }
}
