//! 32-group message filter.
//!
//! Bit `g` of the mask enables filter group `g`. The gate is the first thing every
//! logging call consults, so the reject path is a single relaxed load and a bit test.
//!
//! # Lock
//! With `filter_lock` active, a mask of zero is sticky: [`FilterGate::set`] refuses to
//! leave it. Only [`FilterGate::force`], [`FilterGate::restore`], a re-initialization or
//! an external debugger writing the mask can enable logging again.

use crate::sync::{AtomicU32, Ordering};

/// Mask value enabling every group.
pub const ALL_GROUPS: u32 = u32::MAX;

pub struct FilterGate {
    mask: AtomicU32,
    saved: AtomicU32,
    filtering: bool,
    lock: bool,
}

impl FilterGate {
    /// Logging starts disabled; `init` installs the first mask.
    pub fn new(filtering: bool, lock: bool) -> Self {
        Self {
            mask: AtomicU32::new(0),
            saved: AtomicU32::new(0),
            filtering,
            lock,
        }
    }

    #[inline(always)]
    pub fn is_enabled(&self, group: u8) -> bool {
        if !self.filtering {
            return true;
        }
        if group > 31 {
            return false;
        }
        self.mask.load(Ordering::Relaxed) & (1u32 << group) != 0
    }

    #[inline]
    pub fn get(&self) -> u32 {
        self.mask.load(Ordering::Relaxed)
    }

    /// Install `mask` unless the lock holds the current mask at zero.
    /// Returns whether the mask was changed; the replaced value becomes the restore point.
    pub fn set(&self, mask: u32) -> bool {
        let lock = self.lock;
        let swapped = self
            .mask
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                if lock && current == 0 && mask != 0 {
                    None
                } else {
                    Some(mask)
                }
            });
        match swapped {
            Ok(previous) => {
                self.saved.store(previous, Ordering::Relaxed);
                true
            }
            Err(_) => false,
        }
    }

    /// Install `mask` regardless of the lock.
    pub fn force(&self, mask: u32) {
        let previous = self.mask.swap(mask, Ordering::Relaxed);
        self.saved.store(previous, Ordering::Relaxed);
    }

    /// Install `mask` regardless of the lock and keep the current restore point.
    pub fn replace(&self, mask: u32) {
        self.mask.store(mask, Ordering::Relaxed);
    }

    /// Return to the mask replaced by the last `set`/`force` (one slot, not a stack).
    pub fn restore(&self) {
        let saved = self.saved.load(Ordering::Relaxed);
        self.mask.store(saved, Ordering::Relaxed);
    }

    pub(crate) fn reset(&self, mask: u32) {
        self.mask.store(mask, Ordering::Relaxed);
        self.saved.store(mask, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn is_locked_off(&self) -> bool {
        self.lock && self.get() == 0
    }
}
