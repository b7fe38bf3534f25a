// SPDX-License-Identifier: MPL-2.0
//! Playback and media state types.
//!
//! `PlaybackState` is a small bitflag set rather than a plain enum because a
//! playing state can carry orthogonal modifiers (a direction, the
//! informational fast flag). The validity rules below keep the set closed:
//! base states never mix, and modifiers only ever ride on `PLAYING`.

use std::fmt;

/// Whether a media file is currently loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MediaState {
    /// No media; the engine emits no frames and does not touch the decoder.
    #[default]
    Unloaded,

    /// A file is open and frames can be produced.
    Loaded,
}

impl fmt::Display for MediaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaState::Unloaded => write!(f, "unloaded"),
            MediaState::Loaded => write!(f, "loaded"),
        }
    }
}

/// Playback state bitflags.
///
/// Base states: [`STOPPED`](Self::STOPPED), [`PLAYING`](Self::PLAYING),
/// [`PAUSED`](Self::PAUSED). `PLAYING` may additionally carry
/// [`FAST`](Self::FAST) and at most one direction
/// ([`FORWARD`](Self::FORWARD) / [`BACKWARD`](Self::BACKWARD), both of which
/// include the `PLAYING` bit). `STOPPED` and `PAUSED` always appear alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlaybackState(u8);

impl PlaybackState {
    /// No playback. The zero value; contains no other flag.
    pub const STOPPED: Self = Self(0x00);
    /// Frames are being produced.
    pub const PLAYING: Self = Self(0x01);
    /// Playback is suspended at the current position.
    pub const PAUSED: Self = Self(0x02);
    /// Informational "fast" marker; never consulted by the pacer.
    pub const FAST: Self = Self(0x04);
    /// Playing forward (includes the `PLAYING` bit).
    pub const FORWARD: Self = Self(0x01 | 0x08);
    /// Playing backward (includes the `PLAYING` bit).
    pub const BACKWARD: Self = Self(0x01 | 0x10);

    const DIRECTION_BITS: u8 = 0x08 | 0x10;

    /// Returns the raw bit pattern.
    #[must_use]
    pub fn bits(self) -> u8 {
        self.0
    }

    /// Returns true if every flag of `other` is set in `self`.
    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns `self` with the flags of `other` added.
    #[must_use]
    pub fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Returns `self` with every bit of `other` removed. Removing a
    /// direction composite also removes its `PLAYING` bit.
    #[must_use]
    pub fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// Returns true if the `PLAYING` bit is set.
    #[must_use]
    pub fn is_playing(self) -> bool {
        self.contains(Self::PLAYING)
    }

    /// Returns true for the paused state.
    #[must_use]
    pub fn is_paused(self) -> bool {
        self.contains(Self::PAUSED)
    }

    /// Returns true for the stopped state.
    #[must_use]
    pub fn is_stopped(self) -> bool {
        self.0 == 0
    }

    /// Returns true if playing with the backward direction.
    #[must_use]
    pub fn is_backward(self) -> bool {
        self.contains(Self::BACKWARD)
    }

    /// Validates the combination.
    ///
    /// - `PLAYING` and `PAUSED` are mutually exclusive.
    /// - `STOPPED` and `PAUSED` must appear alone.
    /// - `PLAYING` may carry `FAST` and at most one direction flag.
    #[must_use]
    pub fn is_valid(self) -> bool {
        if self.contains(Self::PLAYING) && self.contains(Self::PAUSED) {
            return false;
        }

        if self.is_stopped() {
            return true;
        }
        if self.contains(Self::PAUSED) {
            // PAUSED must be alone: no FAST, no direction.
            return self.0 == Self::PAUSED.0;
        }

        if self.contains(Self::PLAYING) {
            let direction = self.0 & Self::DIRECTION_BITS;
            if direction != 0
                && direction != (Self::FORWARD.0 & Self::DIRECTION_BITS)
                && direction != (Self::BACKWARD.0 & Self::DIRECTION_BITS)
            {
                // both direction bits at once
                return false;
            }
            let known = Self::PLAYING.0 | Self::FAST.0 | direction;
            return self.0 & !known == 0;
        }

        // direction or FAST bits without PLAYING
        false
    }
}

impl std::ops::BitOr for PlaybackState {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.with(rhs)
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_stopped() {
            return write!(f, "stopped");
        }
        let mut parts: Vec<&str> = Vec::new();
        if self.contains(Self::PAUSED) {
            parts.push("paused");
        }
        if self.contains(Self::PLAYING) {
            parts.push("playing");
        }
        if self.contains(Self::BACKWARD) {
            parts.push("backward");
        } else if self.contains(Self::FORWARD) {
            parts.push("forward");
        }
        if self.contains(Self::FAST) {
            parts.push("fast");
        }
        write!(f, "{}", parts.join("+"))
    }
}
