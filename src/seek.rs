// SPDX-License-Identifier: MPL-2.0
//! Single-slot seek request register.

use std::sync::atomic::{AtomicI64, Ordering};

/// Sentinel stored while no request is pending.
const NO_REQUEST: i64 = -1;

/// A single-slot, thread-safe seek target register.
///
/// Holds at most one pending frame index. Later requests overwrite earlier
/// pending ones — while the user drags a position slider only the freshest
/// target matters. Consumption clears the slot atomically, so a request
/// arriving mid-consume is either fully taken or left for the next tick,
/// never lost halfway.
#[derive(Debug)]
pub struct SeekArbiter(AtomicI64);

impl Default for SeekArbiter {
    fn default() -> Self {
        Self::new()
    }
}

impl SeekArbiter {
    /// Creates an empty register.
    #[must_use]
    pub fn new() -> Self {
        Self(AtomicI64::new(NO_REQUEST))
    }

    /// Registers `index` as the pending target, replacing any earlier one.
    ///
    /// Indices beyond `i64::MAX` are unrepresentable in the slot and are
    /// ignored; real media never comes close.
    pub fn request(&self, index: u64) {
        let Ok(value) = i64::try_from(index) else {
            return;
        };
        self.0.store(value, Ordering::Release);
    }

    /// Takes the pending target, leaving the slot empty.
    #[allow(clippy::cast_sign_loss)]
    pub fn consume(&self) -> Option<u64> {
        let value = self.0.swap(NO_REQUEST, Ordering::AcqRel);
        (value >= 0).then_some(value as u64)
    }

    /// Returns true while a target is pending.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.0.load(Ordering::Acquire) >= 0
    }

    /// Discards any pending target.
    pub fn clear(&self) {
        self.0.store(NO_REQUEST, Ordering::Release);
    }
}
