// SPDX-License-Identifier: MPL-2.0
//! Opaque decoded frame payload.
//!
//! The engine forwards frames without interpreting pixels. The byte buffer is
//! reference-counted so publication to many subscribers never copies pixel
//! data, and no mutable alias survives into a subscriber.

use std::sync::Arc;

/// A decoded video frame.
///
/// The buffer holds `height` rows of `stride` bytes each, in the decoder's
/// native channel order; only the first `width * channels` bytes of each row
/// are pixel data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    /// Raw pixel bytes, shared between the cache and subscribers.
    pub data: Arc<Vec<u8>>,

    /// Frame width in pixels.
    pub width: u32,

    /// Frame height in pixels.
    pub height: u32,

    /// Number of colour channels per pixel.
    pub channels: u8,

    /// Row stride in bytes.
    pub stride: usize,
}

impl VideoFrame {
    /// Creates a frame from a tightly packed buffer (stride = width × channels).
    #[must_use]
    pub fn packed(data: Vec<u8>, width: u32, height: u32, channels: u8) -> Self {
        let stride = width as usize * channels as usize;
        Self {
            data: Arc::new(data),
            width,
            height,
            channels,
            stride,
        }
    }

    /// Returns the total size of the buffer in bytes.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }

    /// Returns `(width, height)` in pixels.
    #[must_use]
    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_frame_derives_stride() {
        let frame = VideoFrame::packed(vec![0u8; 120 * 80 * 3], 120, 80, 3);
        assert_eq!(frame.stride, 360);
        assert_eq!(frame.size_bytes(), 120 * 80 * 3);
        assert_eq!(frame.resolution(), (120, 80));
    }

    #[test]
    fn clone_shares_the_buffer() {
        let frame = VideoFrame::packed(vec![7u8; 64], 4, 4, 4);
        let copy = frame.clone();
        assert!(Arc::ptr_eq(&frame.data, &copy.data));
    }
}
