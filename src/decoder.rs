// SPDX-License-Identifier: MPL-2.0
//! Decoder boundary: the capability set the engine consumes, and its FFmpeg
//! implementation.
//!
//! The engine talks to `{position_to, read_next, close}` with per-call
//! timing; opening is a separate function handed to the engine at
//! construction, so tests can substitute a scripted decoder.

use std::path::Path;
use std::sync::Once;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::frame::VideoFrame;
use crate::media_info::MediaInfo;

/// Static flag to ensure FFmpeg is initialized only once.
static FFMPEG_INIT: Once = Once::new();

/// Initialize FFmpeg with appropriate log level.
///
/// Safe to call multiple times — initialization only happens once. The log
/// level is set to ERROR to suppress per-file warning chatter.
pub fn init_ffmpeg() -> Result<()> {
    let mut init_result: Result<()> = Ok(());

    FFMPEG_INIT.call_once(|| {
        if let Err(e) = ffmpeg_next::init() {
            init_result = Err(Error::Io(format!("FFmpeg initialization failed: {e}")));
            return;
        }

        // SAFETY: av_log_set_level is thread-safe and only affects logging
        unsafe {
            ffmpeg_next::ffi::av_log_set_level(ffmpeg_next::ffi::AV_LOG_ERROR);
        }
    });

    init_result
}

/// Measured cost of the most recent decoder access.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeTiming {
    /// Container repositioning time; zero when no seek was needed.
    pub seek: Duration,

    /// Frame decode/read time.
    pub read: Duration,
}

/// Capability set of a positionable frame reader.
///
/// Implementations report per-call timing through [`take_timing`]
/// (`FrameDecoder::take_timing`), which drains the measurements accumulated
/// since the previous call.
pub trait FrameDecoder: Send {
    /// Arranges for the next [`read_next`](Self::read_next) to return the
    /// frame at `index`. Calling with the already-current index is a no-op.
    fn position_to(&mut self, index: u64) -> Result<()>;

    /// Returns the frame at the current position and advances, or `None` at
    /// end of stream.
    fn read_next(&mut self) -> Result<Option<VideoFrame>>;

    /// Drains the seek/read measurements accumulated since the last call.
    fn take_timing(&mut self) -> DecodeTiming;

    /// Releases codec resources early; reads after this return `None`.
    fn close(&mut self) {}
}

/// FFmpeg-backed [`FrameDecoder`].
///
/// Container seeks land on the nearest preceding keyframe; `read_next` then
/// decodes without scaling until the target index is reached, so positioned
/// reads return the exact requested frame.
pub struct FfmpegDecoder {
    ictx: ffmpeg_next::format::context::Input,
    decoder: ffmpeg_next::decoder::Video,
    scaler: ffmpeg_next::software::scaling::Context,
    stream_index: usize,
    time_base: f64,
    fps: f64,
    width: u32,
    height: u32,
    /// Index the next successful read returns.
    next_index: u64,
    timing: DecodeTiming,
    eof_sent: bool,
    closed: bool,
}

// SAFETY: FFmpeg contexts are not thread-affine; they only forbid concurrent
// use. The engine keeps the decoder behind a mutex, so access is exclusive.
unsafe impl Send for FfmpegDecoder {}

impl FfmpegDecoder {
    /// Opens `path` and probes its media descriptor.
    ///
    /// This is the engine's default opener. Refusal of the container, a
    /// missing video stream, or codec setup failure all surface as
    /// [`Error::FileUnsupported`].
    pub fn open(path: &Path) -> Result<(Self, MediaInfo)> {
        init_ffmpeg()?;

        let ictx = ffmpeg_next::format::input(&path)
            .map_err(|e| Error::FileUnsupported(format!("{}: {e}", path.display())))?;

        let input = ictx
            .streams()
            .best(ffmpeg_next::media::Type::Video)
            .ok_or_else(|| {
                Error::FileUnsupported(format!("{}: no video stream", path.display()))
            })?;
        let stream_index = input.index();

        let time_base = input.time_base();
        let time_base =
            f64::from(time_base.numerator()) / f64::from(time_base.denominator());

        let fps = {
            let frame_rate = input.avg_frame_rate();
            if frame_rate.denominator() > 0 && frame_rate.numerator() > 0 {
                f64::from(frame_rate.numerator()) / f64::from(frame_rate.denominator())
            } else {
                0.0
            }
        };

        // Prefer the container's frame count; fall back to duration × fps.
        let frame_count = if input.frames() > 0 {
            input.frames().unsigned_abs()
        } else {
            let duration_secs = if input.duration() > 0 {
                input.duration() as f64 * time_base
            } else if ictx.duration() > 0 {
                ictx.duration() as f64 / f64::from(ffmpeg_next::ffi::AV_TIME_BASE)
            } else {
                0.0
            };
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            {
                (duration_secs * fps).round().max(0.0) as u64
            }
        };

        let context_decoder =
            ffmpeg_next::codec::context::Context::from_parameters(input.parameters())
                .map_err(|e| Error::FileUnsupported(format!("codec context: {e}")))?;
        let decoder = context_decoder
            .decoder()
            .video()
            .map_err(|e| Error::FileUnsupported(format!("video decoder: {e}")))?;

        let width = decoder.width();
        let height = decoder.height();
        if width == 0 || height == 0 {
            return Err(Error::FileUnsupported(format!(
                "invalid video dimensions: {width}x{height}"
            )));
        }

        let scaler = ffmpeg_next::software::scaling::Context::get(
            decoder.format(),
            width,
            height,
            ffmpeg_next::format::Pixel::RGBA,
            width,
            height,
            ffmpeg_next::software::scaling::Flags::BILINEAR,
        )
        .map_err(|e| Error::FileUnsupported(format!("scaler: {e}")))?;

        let info = MediaInfo::new(fps, frame_count, path);
        let adapter = Self {
            ictx,
            decoder,
            scaler,
            stream_index,
            time_base,
            fps: info.fps(),
            width,
            height,
            next_index: 0,
            timing: DecodeTiming::default(),
            eof_sent: false,
            closed: false,
        };

        Ok((adapter, info))
    }

    /// Index of a decoded frame, derived from its presentation timestamp.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn frame_index(&self, pts: i64) -> u64 {
        (pts as f64 * self.time_base * self.fps).round().max(0.0) as u64
    }

    /// Copies the scaled frame out row by row, honouring the scaler's stride.
    fn extract_frame(&self, frame: &ffmpeg_next::frame::Video) -> VideoFrame {
        let width = self.width;
        let height = self.height;
        let data = frame.data(0);
        let stride = frame.stride(0);

        let mut rgba_bytes = Vec::with_capacity((width * height * 4) as usize);
        for y in 0..height {
            let row_start = y as usize * stride;
            let row_end = row_start + width as usize * 4;
            rgba_bytes.extend_from_slice(&data[row_start..row_end]);
        }

        VideoFrame::packed(rgba_bytes, width, height, 4)
    }

    /// Receives the next decoded frame, feeding packets as needed.
    /// Returns `None` once the stream is fully drained.
    fn next_decoded(&mut self) -> Result<Option<ffmpeg_next::frame::Video>> {
        let mut decoded = ffmpeg_next::frame::Video::empty();

        loop {
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                return Ok(Some(decoded));
            }
            if self.eof_sent {
                return Ok(None);
            }

            let mut sent = false;
            for (stream, packet) in self.ictx.packets() {
                if stream.index() != self.stream_index {
                    continue;
                }
                // A refused packet is skipped; the decoder resynchronizes on
                // the next keyframe.
                sent = self.decoder.send_packet(&packet).is_ok();
                if sent {
                    break;
                }
            }
            if !sent {
                self.decoder
                    .send_eof()
                    .map_err(|e| Error::DecoderTransient(format!("flush: {e}")))?;
                self.eof_sent = true;
            }
        }
    }
}

impl FrameDecoder for FfmpegDecoder {
    fn position_to(&mut self, index: u64) -> Result<()> {
        if self.closed {
            return Err(Error::DecoderTransient("decoder is closed".into()));
        }
        if index == self.next_index {
            self.timing.seek = Duration::ZERO;
            return Ok(());
        }

        let started = Instant::now();
        #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
        let timestamp = (index as f64 / self.fps
            * f64::from(ffmpeg_next::ffi::AV_TIME_BASE)) as i64;
        self.ictx
            .seek(timestamp, ..timestamp)
            .map_err(|e| Error::DecoderTransient(format!("seek to frame {index}: {e}")))?;
        self.decoder.flush();
        self.eof_sent = false;
        self.next_index = index;
        self.timing.seek = started.elapsed();
        Ok(())
    }

    fn read_next(&mut self) -> Result<Option<VideoFrame>> {
        if self.closed {
            return Ok(None);
        }

        let started = Instant::now();
        loop {
            let Some(decoded) = self.next_decoded()? else {
                self.timing.read = started.elapsed();
                return Ok(None);
            };

            let index = match decoded.timestamp() {
                Some(pts) => self.frame_index(pts),
                None => self.next_index,
            };
            // Burn through pre-target frames after a keyframe-aligned seek;
            // decode-only, no scaling.
            if index < self.next_index {
                continue;
            }

            let mut scaled = ffmpeg_next::frame::Video::empty();
            self.scaler
                .run(&decoded, &mut scaled)
                .map_err(|e| Error::DecoderTransient(format!("scaling: {e}")))?;

            let frame = self.extract_frame(&scaled);
            self.next_index = index + 1;
            self.timing.read = started.elapsed();
            return Ok(Some(frame));
        }
    }

    fn take_timing(&mut self) -> DecodeTiming {
        std::mem::take(&mut self.timing)
    }

    fn close(&mut self) {
        if !self.closed {
            let _ = self.decoder.send_eof();
            self.closed = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_fails_for_nonexistent_file() {
        let result = FfmpegDecoder::open(Path::new("/nonexistent/video.mp4"));
        assert!(matches!(result, Err(Error::FileUnsupported(_))));
    }

    #[test]
    fn open_refuses_non_video_bytes() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("not_video.mp4");
        std::fs::write(&path, b"definitely not a container").unwrap();

        let result = FfmpegDecoder::open(&path);
        assert!(matches!(result, Err(Error::FileUnsupported(_))));
    }

    #[test]
    fn timing_is_drained_on_take() {
        let mut timing = DecodeTiming {
            seek: Duration::from_millis(3),
            read: Duration::from_millis(4),
        };
        let taken = std::mem::take(&mut timing);
        assert_eq!(taken.seek, Duration::from_millis(3));
        assert_eq!(timing, DecodeTiming::default());
    }
}
