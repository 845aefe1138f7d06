//! Runtime configuration of the logging engine.
//!
//! Every switch that firmware would traditionally set at build time is a field of
//! [`Config`]. The value is validated once by [`Config::validate`] (called from
//! `EventLogger::new`) and never changes afterwards.

use thiserror::Error;

use crate::encode::{HeaderLayout, IdBits, MIN_FMT_BITS};

/// Largest supported sub-packet count; keeps the stored byte count within 16 bits.
pub const MAX_SUBPACKETS_LIMIT: u16 = 4095;

/// What a single-shot reservation does when the record does not fit.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SingleShotOverflow {
    /// Drop this record; smaller records may still fit later.
    DropRecord,
    /// Drop this record and every record after it.
    StopLogging,
    /// Write as much of this record as fits, then stop.
    Truncate,
}

/// Handling of variable-length data above `max_subpackets * 16` bytes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OversizePolicy {
    Discard,
    /// Keep the first `max_subpackets * 16` bytes and flag the count word.
    Truncate,
}

/// When the timestamp counter is read during a logging call.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Sampling {
    /// At call entry, before sizing and reservation.
    Eager,
    /// After the reservation, just before the header is written.
    Lazy,
}

/// Handling of binary payloads whose start address is not word aligned.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnalignedPolicy {
    CopyBytes,
    Discard,
}

/// Format ids the engine itself emits.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SystemFormats {
    pub long_timestamp: u16,
    pub frequency: u16,
    pub fault: u16,
}

impl SystemFormats {
    pub const fn new() -> Self {
        Self {
            long_timestamp: 2,
            frequency: 4,
            fault: 16,
        }
    }
}

impl Default for SystemFormats {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Width F of the format id field. The timestamp gets the remaining `31 - F` bits
    /// and the top 16 ids are reserved for continuation words.
    pub fmt_id_bits: u8,
    pub max_subpackets: u16,
    /// The counter value is divided by `2^timestamp_shift` before it is stored.
    pub timestamp_shift: u8,
    pub single_shot_enabled: bool,
    pub single_shot_overflow: SingleShotOverflow,
    /// When false every filter group is always enabled. Required for single-shot mode.
    pub filtering_enabled: bool,
    /// When true a zero mask can only be left through a forced or restoring call.
    pub filter_lock: bool,
    pub oversize: OversizePolicy,
    pub sampling: Sampling,
    pub unaligned: UnalignedPolicy,
    /// Filter group of engine generated records (long timestamp, frequency, fault dump).
    pub system_group: u8,
    pub formats: SystemFormats,
    pub disable_after_fault: bool,
}

impl Config {
    pub const fn new() -> Self {
        Self {
            fmt_id_bits: 10,
            max_subpackets: 16,
            timestamp_shift: 1,
            single_shot_enabled: false,
            single_shot_overflow: SingleShotOverflow::DropRecord,
            filtering_enabled: true,
            filter_lock: true,
            oversize: OversizePolicy::Discard,
            sampling: Sampling::Lazy,
            unaligned: UnalignedPolicy::CopyBytes,
            system_group: 0,
            formats: SystemFormats::new(),
            disable_after_fault: true,
        }
    }

    pub const fn with_fmt_id_bits(mut self, bits: u8) -> Self {
        self.fmt_id_bits = bits;
        self
    }

    pub const fn with_max_subpackets(mut self, count: u16) -> Self {
        self.max_subpackets = count;
        self
    }

    pub const fn with_timestamp_shift(mut self, shift: u8) -> Self {
        self.timestamp_shift = shift;
        self
    }

    pub const fn with_single_shot(mut self, overflow: SingleShotOverflow) -> Self {
        self.single_shot_enabled = true;
        self.single_shot_overflow = overflow;
        self
    }

    pub const fn with_filtering(mut self, enabled: bool) -> Self {
        self.filtering_enabled = enabled;
        self
    }

    pub const fn with_filter_lock(mut self, lock: bool) -> Self {
        self.filter_lock = lock;
        self
    }

    pub const fn with_oversize(mut self, policy: OversizePolicy) -> Self {
        self.oversize = policy;
        self
    }

    pub const fn with_sampling(mut self, sampling: Sampling) -> Self {
        self.sampling = sampling;
        self
    }

    pub const fn with_unaligned(mut self, policy: UnalignedPolicy) -> Self {
        self.unaligned = policy;
        self
    }

    pub const fn with_system_group(mut self, group: u8) -> Self {
        self.system_group = group;
        self
    }

    pub const fn with_formats(mut self, formats: SystemFormats) -> Self {
        self.formats = formats;
        self
    }

    pub const fn with_disable_after_fault(mut self, disable: bool) -> Self {
        self.disable_after_fault = disable;
        self
    }

    /// Number of timestamp bits in a header word.
    #[inline]
    pub const fn timestamp_bits(&self) -> u32 {
        31 - self.fmt_id_bits as u32
    }

    /// Largest variable-length payload accepted without truncation.
    #[inline]
    pub const fn max_payload_bytes(&self) -> usize {
        self.max_subpackets as usize * 16
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_FMT_BITS..=16).contains(&self.fmt_id_bits) {
            return Err(ConfigError::FmtIdBits(self.fmt_id_bits));
        }
        if self.timestamp_shift > 16 {
            return Err(ConfigError::TimestampShift(self.timestamp_shift));
        }
        if self.max_subpackets == 0 || self.max_subpackets > MAX_SUBPACKETS_LIMIT {
            return Err(ConfigError::MaxSubpackets(self.max_subpackets));
        }
        if self.system_group > 31 {
            return Err(ConfigError::SystemGroup(self.system_group));
        }
        if self.single_shot_enabled && !self.filtering_enabled {
            return Err(ConfigError::SingleShotWithoutFiltering);
        }
        let layout = HeaderLayout::new(self.fmt_id_bits);
        let formats = self.formats;
        let reserved = [
            (formats.long_timestamp, IdBits::words(1)),
            (formats.frequency, IdBits::words(1)),
            (formats.fault, IdBits::variable()),
        ];
        for (id, bits) in reserved {
            let last = u32::from(id) | ((1u32 << bits.total()) - 1);
            if !bits.is_aligned(id) || last >= layout.first_reserved_id() {
                return Err(ConfigError::ReservedFormat {
                    id,
                    bits: self.fmt_id_bits,
                });
            }
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

/// Rejected configuration values.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("format id width {0} outside 5..=16")]
    FmtIdBits(u8),
    #[error("timestamp shift {0} above 16")]
    TimestampShift(u8),
    #[error("sub-packet limit {0} outside 1..=4095")]
    MaxSubpackets(u16),
    #[error("timer counter width {0} outside 1..=32")]
    CounterBits(u32),
    #[error("system filter group {0} above 31")]
    SystemGroup(u8),
    #[error("single-shot logging needs message filtering")]
    SingleShotWithoutFiltering,
    #[error("reserved format id {id} is misaligned or outside the {bits}-bit record id range")]
    ReservedFormat { id: u16, bits: u8 },
}

#[cfg(test)]
mod tests {
    use super::{Config, ConfigError, SingleShotOverflow, SystemFormats};

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.timestamp_bits(), 21);
        assert_eq!(config.max_payload_bytes(), 256);
    }

    #[test]
    fn rejects_out_of_range_fields() {
        assert_eq!(
            Config::new().with_fmt_id_bits(4).validate(),
            Err(ConfigError::FmtIdBits(4))
        );
        assert_eq!(
            Config::new().with_fmt_id_bits(17).validate(),
            Err(ConfigError::FmtIdBits(17))
        );
        assert_eq!(
            Config::new().with_timestamp_shift(17).validate(),
            Err(ConfigError::TimestampShift(17))
        );
        assert_eq!(
            Config::new().with_max_subpackets(0).validate(),
            Err(ConfigError::MaxSubpackets(0))
        );
        assert_eq!(
            Config::new().with_system_group(32).validate(),
            Err(ConfigError::SystemGroup(32))
        );
    }

    #[test]
    fn reserved_formats_must_fit_the_id_field() {
        let config = Config::new().with_fmt_id_bits(5);
        assert_eq!(
            config.validate(),
            Err(ConfigError::ReservedFormat { id: 16, bits: 5 })
        );

        let formats = SystemFormats {
            fault: 8,
            ..SystemFormats::new()
        };
        assert_eq!(
            Config::new().with_formats(formats).validate(),
            Err(ConfigError::ReservedFormat { id: 8, bits: 10 })
        );

        let formats = SystemFormats {
            frequency: 5,
            ..SystemFormats::new()
        };
        assert_eq!(
            Config::new().with_formats(formats).validate(),
            Err(ConfigError::ReservedFormat { id: 5, bits: 10 })
        );
    }

    #[test]
    fn single_shot_requires_filtering() {
        let config = Config::new()
            .with_single_shot(SingleShotOverflow::DropRecord)
            .with_filtering(false);
        assert_eq!(
            config.validate(),
            Err(ConfigError::SingleShotWithoutFiltering)
        );
        assert_eq!(config.with_filtering(true).validate(), Ok(()));
    }
}
