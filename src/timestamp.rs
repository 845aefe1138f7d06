//! Per-record short timestamps and periodic long-timestamp compaction.
//!
//! The short timestamp stored in every header is `counter >> shift`, truncated to the
//! `31 - F` timestamp bits. It wraps quickly, so a long-timestamp record carrying the
//! bits above the short field is emitted periodically; the host joins the two.

use crate::encode::low_mask;
use crate::sync::{AtomicU32, Ordering};

/// Free-running hardware counter used for timestamps.
pub trait Clock {
    /// Number of implemented counter bits (1..=32).
    const COUNTER_BITS: u32 = 32;

    /// Start or reset the counter peripheral.
    fn init_counter(&self) {}

    /// Current counter value; monotonic within one counter period.
    fn read_counter(&self) -> u32;
}

impl<C: Clock> Clock for &C {
    const COUNTER_BITS: u32 = C::COUNTER_BITS;

    fn init_counter(&self) {
        (**self).init_counter()
    }

    #[inline(always)]
    fn read_counter(&self) -> u32 {
        (**self).read_counter()
    }
}

/// Bit geometry shared by short and long timestamps.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TimestampFormat {
    shift: u32,
    bits: u32,
    counter_bits: u32,
}

impl TimestampFormat {
    pub const fn new(shift: u32, bits: u32, counter_bits: u32) -> Self {
        Self {
            shift,
            bits,
            counter_bits,
        }
    }

    /// Width of the header timestamp field.
    #[inline]
    pub const fn bits(&self) -> u32 {
        self.bits
    }

    #[inline(always)]
    pub const fn short(&self, counter: u32) -> u32 {
        (counter >> self.shift) & low_mask(self.bits)
    }

    /// Shift from the 64-bit normalized time down to the long-timestamp record value.
    #[inline]
    pub const fn long_shift(&self) -> u32 {
        self.bits + self.shift + (32 - self.counter_bits)
    }

    /// Counter value aligned to the top of a 32-bit word, so a wrap always shows up
    /// as the new value being smaller than the previous one.
    #[inline]
    pub const fn normalize(&self, counter: u32) -> u32 {
        counter << (32 - self.counter_bits)
    }
}

/// High-order time carried across counter wraps.
///
/// Not reentrant: [`LongTimestamp::advance`] must only ever run from one execution
/// context (typically a periodic timer interrupt). Calling it from two contexts is a
/// misuse the engine does not detect.
pub struct LongTimestamp {
    low: AtomicU32,
    high: AtomicU32,
}

impl LongTimestamp {
    pub fn new() -> Self {
        Self {
            low: AtomicU32::new(0),
            high: AtomicU32::new(0),
        }
    }

    pub fn reset(&self) {
        self.low.store(0, Ordering::Relaxed);
        self.high.store(0, Ordering::Relaxed);
    }

    /// Fold a new counter reading into the state and return the 64-bit normalized time
    /// (`high << 32 | counter << (32 - W)`). Must be called at least once per counter period.
    pub fn advance(&self, format: &TimestampFormat, counter: u32) -> u64 {
        let normalized = format.normalize(counter);
        let mut high = self.high.load(Ordering::Relaxed);
        if self.low.load(Ordering::Relaxed) > normalized {
            high = high.wrapping_add(1);
            self.high.store(high, Ordering::Relaxed);
        }
        self.low.store(normalized, Ordering::Relaxed);
        (u64::from(high) << 32) | u64::from(normalized)
    }
}

impl Default for LongTimestamp {
    fn default() -> Self {
        Self::new()
    }
}

/// Normalized 64-bit time expressed in counter ticks.
#[inline]
pub const fn ticks(format: &TimestampFormat, normalized: u64) -> u64 {
    normalized >> (32 - format.counter_bits)
}

/// Value carried by a long-timestamp record.
#[inline]
pub const fn long_value(format: &TimestampFormat, normalized: u64) -> u32 {
    match normalized.checked_shr(format.long_shift()) {
        Some(value) => value as u32,
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::{LongTimestamp, TimestampFormat, long_value, ticks};
    use std::vec::Vec;

    #[test]
    fn short_applies_shift_and_width() {
        let format = TimestampFormat::new(1, 21, 32);
        assert_eq!(format.short(0x0000_0010), 0x8);
        assert_eq!(format.short(0xFFFF_FFFF), 0x1F_FFFF);
    }

    #[test]
    fn narrow_counter_wraps_into_high_word() {
        let format = TimestampFormat::new(0, 21, 24);
        let state = LongTimestamp::new();

        let a = state.advance(&format, 0x00FF_FFF0);
        let b = state.advance(&format, 0x0000_0010);
        assert!(b > a);
        assert_eq!(ticks(&format, a), 0x00FF_FFF0);
        assert_eq!(ticks(&format, b), 0x0100_0010);
    }

    #[test]
    fn reconstructs_across_two_wraps() {
        let format = TimestampFormat::new(1, 21, 16);
        let state = LongTimestamp::new();
        let readings = [0x1000u32, 0x8000, 0xF000, 0x0100, 0x7000, 0xFFFF, 0x0001, 0x4000];

        let times: Vec<u64> = readings
            .iter()
            .map(|&c| ticks(&format, state.advance(&format, c)))
            .collect();

        assert!(times.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(times[7], 2 * 0x1_0000 + 0x4000);
    }

    #[test]
    fn long_value_sits_above_short_field() {
        let format = TimestampFormat::new(1, 21, 32);
        let state = LongTimestamp::new();
        state.advance(&format, 0xF000_0000);
        let normalized = state.advance(&format, 0x0000_0002);

        let long = long_value(&format, normalized);
        let short = format.short(0x0000_0002);
        let joined = (u64::from(long) << format.bits()) | u64::from(short);
        assert_eq!(joined, (1u64 << 32 | 2) >> 1);
    }

    #[test]
    fn reset_clears_carry() {
        let format = TimestampFormat::new(0, 21, 32);
        let state = LongTimestamp::new();
        state.advance(&format, 10);
        state.advance(&format, 5);
        state.reset();
        assert_eq!(state.advance(&format, 7), 7);
    }
}
