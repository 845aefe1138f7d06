//! Fixed circular word buffer with lock-free range reservation.
//!
//! # Overview
//! - Any number of producers (threads, interrupt handlers, the fault handler).
//! - A producer first reserves a word range by advancing the shared cursor with one
//!   compare-and-swap, then writes its record into that range with no further
//!   synchronization. Ranges never overlap, so writers never touch the same word.
//! - Continuous mode wraps modulo `N` and overwrites the oldest words silently.
//! - Single-shot mode caps the cursor at `N`; see [`SingleShotOverflow`].
//!
//! # Memory ordering
//! Words are stored with relaxed atomics: the reservation protocol, not the word
//! accesses, provides exclusivity. A reader must quiesce producers (force the filter
//! to zero and let in-flight writers finish) before draining; reading a live ring is
//! memory-safe but may observe partially written records.
//!
//! # Erased state
//! A new ring and an erasing init fill every word with [`ERASED`], which no record
//! ever contains.
//!
//! # Visible order
//! Records occupy positions in reservation order. If a writer is preempted between
//! its reservation and its write, a later record can become visible first. Consumers
//! relying on strictly increasing timestamps must tolerate such inversions.

use crate::config::SingleShotOverflow;
use crate::encode::{ERASED, WordSink};
use crate::mode::LogMode;
use crate::sync::{AtomicBool, AtomicU32, Ordering, atomic_u32_array};

/// Buffer state as seen by a reader.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BufferInfo {
    /// Next word index to be reserved.
    pub cursor: u32,
    /// Number of valid words.
    pub len: usize,
    /// Continuous mode has wrapped at least once.
    pub wrapped: bool,
    pub mode: LogMode,
    /// Single-shot logging stopped by [`SingleShotOverflow::StopLogging`].
    pub halted: bool,
}

pub struct Ring<const N: usize> {
    cursor: AtomicU32,
    wrapped: AtomicBool,
    single_shot: AtomicBool,
    halted: AtomicBool,
    words: [AtomicU32; N],
}

impl<const N: usize> Ring<N> {
    pub fn new() -> Self {
        assert!(N > 0);
        assert!(N <= (u32::MAX >> 1) as usize);
        Self {
            cursor: AtomicU32::new(0),
            wrapped: AtomicBool::new(false),
            single_shot: AtomicBool::new(false),
            halted: AtomicBool::new(false),
            words: atomic_u32_array::<N>(ERASED),
        }
    }

    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }

    #[inline]
    pub fn cursor(&self) -> u32 {
        self.cursor.load(Ordering::Acquire)
    }

    #[inline]
    pub fn mode(&self) -> LogMode {
        if self.single_shot.load(Ordering::Relaxed) {
            LogMode::SingleShot
        } else {
            LogMode::Continuous
        }
    }

    pub(crate) fn set_mode(&self, mode: LogMode) {
        self.single_shot
            .store(mode == LogMode::SingleShot, Ordering::Relaxed);
    }

    pub(crate) fn reset_index(&self) {
        self.cursor.store(0, Ordering::Release);
        self.wrapped.store(false, Ordering::Relaxed);
        self.halted.store(false, Ordering::Relaxed);
    }

    pub(crate) fn erase(&self) {
        for word in &self.words {
            word.store(ERASED, Ordering::Relaxed);
        }
    }

    /// Raw word at a physical index.
    #[inline]
    pub fn word(&self, index: usize) -> Option<u32> {
        self.words.get(index).map(|w| w.load(Ordering::Relaxed))
    }

    /// Reserve `count` words. `None` means nothing was reserved: zero count, a record
    /// longer than the ring in continuous mode, or a single-shot overflow.
    pub fn reserve(&self, count: u32, overflow: SingleShotOverflow) -> Option<Reservation<'_, N>> {
        if count == 0 {
            return None;
        }
        if self.single_shot.load(Ordering::Relaxed) {
            self.reserve_capped(count, overflow)
        } else {
            self.reserve_wrapping(count)
        }
    }

    fn reserve_wrapping(&self, count: u32) -> Option<Reservation<'_, N>> {
        let capacity = N as u32;
        if count > capacity {
            return None;
        }

        let mut current = self.cursor.load(Ordering::Relaxed);
        loop {
            let mut next = current + count;
            let wraps = next >= capacity;
            if wraps {
                next -= capacity;
            }
            match self.cursor.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    if wraps {
                        self.wrapped.store(true, Ordering::Relaxed);
                    }
                    return Some(Reservation::new(self, current, count, false));
                }
                Err(actual) => current = actual,
            }
        }
    }

    fn reserve_capped(
        &self,
        count: u32,
        overflow: SingleShotOverflow,
    ) -> Option<Reservation<'_, N>> {
        if self.halted.load(Ordering::Relaxed) {
            return None;
        }

        let capacity = N as u32;
        let mut current = self.cursor.load(Ordering::Relaxed);
        loop {
            let remaining = capacity.saturating_sub(current);
            let (len, truncated) = if count <= remaining {
                (count, false)
            } else {
                match overflow {
                    SingleShotOverflow::DropRecord => return None,
                    SingleShotOverflow::StopLogging => {
                        self.halted.store(true, Ordering::Relaxed);
                        return None;
                    }
                    SingleShotOverflow::Truncate if remaining > 0 => (remaining, true),
                    SingleShotOverflow::Truncate => return None,
                }
            };
            match self.cursor.compare_exchange_weak(
                current,
                current + len,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Some(Reservation::new(self, current, len, truncated)),
                Err(actual) => current = actual,
            }
        }
    }

    pub fn info(&self) -> BufferInfo {
        let cursor = self.cursor();
        let wrapped = self.wrapped.load(Ordering::Relaxed);
        let mode = self.mode();
        let len = match mode {
            LogMode::SingleShot => (cursor as usize).min(N),
            LogMode::Continuous if wrapped => N,
            LogMode::Continuous => cursor as usize,
        };
        BufferInfo {
            cursor,
            len,
            wrapped,
            mode,
            halted: self.halted.load(Ordering::Relaxed),
        }
    }

    /// Chronological view of the valid words, oldest first.
    pub fn snapshot(&self) -> Snapshot<'_, N> {
        let info = self.info();
        let first = if info.mode == LogMode::Continuous && info.wrapped {
            info.cursor as usize % N
        } else {
            0
        };
        Snapshot {
            ring: self,
            info,
            first,
        }
    }
}

impl<const N: usize> Default for Ring<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive right to write `len` words starting at `start` (modulo `N`).
#[must_use]
pub struct Reservation<'a, const N: usize> {
    ring: &'a Ring<N>,
    start: u32,
    len: u32,
    written: u32,
    truncated: bool,
}

impl<'a, const N: usize> Reservation<'a, N> {
    fn new(ring: &'a Ring<N>, start: u32, len: u32, truncated: bool) -> Self {
        Self {
            ring,
            start,
            len,
            written: 0,
            truncated,
        }
    }

    #[inline]
    pub fn start(&self) -> u32 {
        self.start
    }

    #[inline]
    pub fn len(&self) -> u32 {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The ring granted fewer words than requested.
    #[inline]
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    #[inline]
    fn physical(&self, offset: u32) -> usize {
        let index = self.start + offset;
        let capacity = N as u32;
        (if index >= capacity { index - capacity } else { index }) as usize
    }

    /// Append one word; words past the granted length are dropped.
    #[inline]
    pub fn push(&mut self, word: u32) {
        if self.written == self.len {
            return;
        }
        let index = self.physical(self.written);
        self.ring.words[index].store(word, Ordering::Relaxed);
        self.written += 1;
    }

    /// Append a run of words, splitting it at the physical end of the buffer.
    pub fn push_slice(&mut self, words: &[u32]) {
        let room = (self.len - self.written) as usize;
        let words = &words[..words.len().min(room)];
        if words.is_empty() {
            return;
        }
        let at = self.physical(self.written);
        let (tail, head) = words.split_at(words.len().min(N - at));
        for (slot, &word) in self.ring.words[at..].iter().zip(tail) {
            slot.store(word, Ordering::Relaxed);
        }
        for (slot, &word) in self.ring.words.iter().zip(head) {
            slot.store(word, Ordering::Relaxed);
        }
        self.written += words.len() as u32;
    }
}

impl<const N: usize> WordSink for Reservation<'_, N> {
    #[inline]
    fn put(&mut self, word: u32) {
        self.push(word);
    }
}

/// Valid words of a ring, oldest first.
pub struct Snapshot<'a, const N: usize> {
    ring: &'a Ring<N>,
    info: BufferInfo,
    first: usize,
}

impl<const N: usize> Snapshot<'_, N> {
    #[inline]
    pub fn info(&self) -> BufferInfo {
        self.info
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.info.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.info.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.info.len).map(move |i| {
            self.ring.words[(self.first + i) % N].load(Ordering::Relaxed)
        })
    }

    /// Copy as many words as fit into `out`; returns the number copied.
    pub fn copy_to(&self, out: &mut [u32]) -> usize {
        let mut copied = 0;
        for (slot, word) in out.iter_mut().zip(self.iter()) {
            *slot = word;
            copied += 1;
        }
        copied
    }
}
