//! Deferred work flags shared between the byte handlers and the cooperative loop.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Work scheduled by a byte handler and executed later by `process()`
///
/// The handlers only ever set bits; `process()` takes them with an atomic
/// swap, so a flag raised while a previous batch is running is never lost.
#[derive(Debug, Default)]
pub struct PendingWork {
    restore: AtomicBool,
    callbacks: AtomicU32,
}

impl PendingWork {
    /// Create an empty set of pending work
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true while a backup restore is waiting for `process()`
    pub fn restore_pending(&self) -> bool {
        self.restore.load(Ordering::Acquire)
    }

    /// Bitmask of callbacks waiting for `process()`
    pub fn pending_callbacks(&self) -> u32 {
        self.callbacks.load(Ordering::Acquire)
    }

    /// Returns true if `process()` has anything to do
    pub fn has_work(&self) -> bool {
        self.restore_pending() || self.pending_callbacks() != 0
    }

    pub(crate) fn arm_restore(&self) {
        self.restore.store(true, Ordering::Release);
    }

    /// Atomically check and clear the restore flag
    pub(crate) fn try_take_pending_restore(&self) -> bool {
        self.restore.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn schedule_callbacks(&self, mask: u32) {
        if mask != 0 {
            self.callbacks.fetch_or(mask, Ordering::AcqRel);
        }
    }

    /// Atomically take every scheduled callback bit
    pub(crate) fn take_callbacks(&self) -> u32 {
        self.callbacks.swap(0, Ordering::AcqRel)
    }
}
