// SPDX-License-Identifier: MPL-2.0
//! Immutable per-file media descriptor.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::{MIN_FPS, MIN_PLAYBACK_SPEED};
use crate::playback_speed::PlaybackSpeed;

/// Descriptor for an opened media file.
///
/// Created by the decoder on open and republished to subscribers via
/// `on_media_loaded`. The fps can be overridden at runtime (changing the
/// pacing of playback without re-opening the file); `original_fps` shadows
/// the probed value so the override can be reset.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaInfo {
    fps: f64,
    original_fps: f64,
    frame_count: u64,
    file_path: PathBuf,
}

impl MediaInfo {
    /// Creates a descriptor for a probed file. `fps` is floored at a small
    /// positive bound so pacing arithmetic stays finite.
    #[must_use]
    pub fn new(fps: f64, frame_count: u64, file_path: impl Into<PathBuf>) -> Self {
        let fps = fps.max(MIN_FPS);
        Self {
            fps,
            original_fps: fps,
            frame_count,
            file_path: file_path.into(),
        }
    }

    /// Returns the effective frames-per-second used for pacing.
    #[must_use]
    pub fn fps(&self) -> f64 {
        self.fps
    }

    /// Returns the fps probed from the container, unaffected by overrides.
    #[must_use]
    pub fn original_fps(&self) -> f64 {
        self.original_fps
    }

    /// Overrides the effective fps, floored at the same positive bound.
    pub fn set_fps(&mut self, fps: f64) {
        self.fps = fps.max(MIN_FPS);
    }

    /// Restores the probed fps.
    pub fn reset_fps(&mut self) {
        self.fps = self.original_fps;
    }

    /// Returns the total number of frames in the file.
    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Returns the path the file was opened from.
    #[must_use]
    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Expected interval between frames at the given speed multiplier.
    ///
    /// `1 / (fps * speed)` seconds, with the speed floored at
    /// [`MIN_PLAYBACK_SPEED`].
    #[must_use]
    pub fn estimated_delay(&self, speed: f64) -> Duration {
        let speed = speed.max(MIN_PLAYBACK_SPEED);
        Duration::from_secs_f64(1.0 / (self.fps * speed))
    }

    /// Same as [`estimated_delay`](Self::estimated_delay) for an
    /// already-clamped [`PlaybackSpeed`].
    #[must_use]
    pub fn frame_interval(&self, speed: PlaybackSpeed) -> Duration {
        Duration::from_secs_f64(1.0 / (self.fps * speed.value()))
    }

    /// Index of the last frame, or `None` for an empty file.
    #[must_use]
    pub fn last_frame_index(&self) -> Option<u64> {
        self.frame_count.checked_sub(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::assert_abs_diff_eq;

    #[test]
    fn estimated_delay_follows_fps_and_speed() {
        let info = MediaInfo::new(10.0, 100, "clip.mp4");
        assert_abs_diff_eq!(info.estimated_delay(1.0).as_secs_f64(), 0.1);
        assert_abs_diff_eq!(info.estimated_delay(2.0).as_secs_f64(), 0.05);
    }

    #[test]
    fn estimated_delay_floors_the_speed() {
        let info = MediaInfo::new(10.0, 100, "clip.mp4");
        // speed 0.0 is treated as 0.1
        assert_abs_diff_eq!(info.estimated_delay(0.0).as_secs_f64(), 1.0);
    }

    #[test]
    fn fps_override_and_reset() {
        let mut info = MediaInfo::new(30.0, 100, "clip.mp4");
        info.set_fps(60.0);
        assert_abs_diff_eq!(info.fps(), 60.0);
        assert_abs_diff_eq!(info.original_fps(), 30.0);

        info.reset_fps();
        assert_abs_diff_eq!(info.fps(), 30.0);
    }

    #[test]
    fn fps_is_floored_at_a_positive_bound() {
        let info = MediaInfo::new(0.0, 10, "broken.mp4");
        assert!(info.fps() > 0.0);
    }

    #[test]
    fn last_frame_index_handles_empty_files() {
        assert_eq!(MediaInfo::new(10.0, 0, "empty.mp4").last_frame_index(), None);
        assert_eq!(MediaInfo::new(10.0, 3, "clip.mp4").last_frame_index(), Some(2));
    }
}
