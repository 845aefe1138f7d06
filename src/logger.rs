//! The logging engine: one explicitly owned value holding the ring, the filter and
//! the timestamp state, shared by reference between every calling context.
//!
//! Every logging call follows the same path:
//! 1. filter gate (a disabled group returns before anything else happens),
//! 2. eager timestamp sample when configured,
//! 3. record sizing by the encoder,
//! 4. range reservation in the ring,
//! 5. lazy timestamp sample when configured,
//! 6. header and payload written into the reserved range.
//!
//! Calls never block, never allocate and never report errors: a record that cannot
//! be stored is simply lost. So is a record whose format id falls in the top 16 ids,
//! which belong to continuation words.

use crate::config::{Config, ConfigError, Sampling};
use crate::encode::{Channel, HeaderLayout, Limits, MAX_ARGS, MAX_EXT_ARGS, Message, until_nul};
use crate::fault::{ExceptionState, FaultOutcome, FaultPlatform, FaultSnapshot};
use crate::filter::{ALL_GROUPS, FilterGate};
use crate::mode::{self, InitMode, LogMode};
use crate::ring::{BufferInfo, Ring, Snapshot};
use crate::timestamp::{self, Clock, LongTimestamp, TimestampFormat};

pub struct EventLogger<C: Clock, const N: usize> {
    ring: Ring<N>,
    filter: FilterGate,
    clock: C,
    long_ts: LongTimestamp,
    faults: ExceptionState,
    config: Config,
    layout: HeaderLayout,
    ts_format: TimestampFormat,
    limits: Limits,
}

impl<C: Clock, const N: usize> EventLogger<C, N> {
    /// Build an engine with logging disabled; call [`EventLogger::init`] before use.
    pub fn new(config: Config, clock: C) -> Result<Self, ConfigError> {
        if let Err(err) = config.validate() {
            log::warn!("event log config rejected: {err}");
            return Err(err);
        }
        if !(1..=32).contains(&C::COUNTER_BITS) {
            log::warn!("event log clock has {} counter bits", C::COUNTER_BITS);
            return Err(ConfigError::CounterBits(C::COUNTER_BITS));
        }

        log::debug!(
            "event log: {} words, {} format id bits, {} sub-packets max",
            N,
            config.fmt_id_bits,
            config.max_subpackets
        );
        Ok(Self {
            ring: Ring::new(),
            filter: FilterGate::new(config.filtering_enabled, config.filter_lock),
            clock,
            long_ts: LongTimestamp::new(),
            faults: ExceptionState::new(),
            layout: HeaderLayout::new(config.fmt_id_bits),
            ts_format: TimestampFormat::new(
                u32::from(config.timestamp_shift),
                config.timestamp_bits(),
                C::COUNTER_BITS,
            ),
            limits: Limits::from_config(&config),
            config,
        })
    }

    /// Select the logging mode, set the filter and restart the timestamp state.
    ///
    /// Must run before the periodic [`EventLogger::long_timestamp`] trigger is enabled.
    /// With [`InitMode::ContinueKeepingData`] and the filter lock active, a mask left
    /// at zero (e.g. by the fault path) stays zero so the logged data survives; use
    /// [`EventLogger::init_forced`] to enable logging anyway.
    pub fn init(&self, mask: u32, init: InitMode) -> LogMode {
        self.start(mask, init, false)
    }

    /// Like [`EventLogger::init`], but always installs `mask`, also over a locked
    /// zero mask.
    pub fn init_forced(&self, mask: u32, init: InitMode) -> LogMode {
        self.start(mask, init, true)
    }

    fn start(&self, mask: u32, init: InitMode, forced: bool) -> LogMode {
        let mode = mode::apply(&self.ring, init, self.config.single_shot_enabled);

        if !forced && init == InitMode::ContinueKeepingData && self.filter.is_locked_off() {
            log::info!("event log filter left at zero, keeping logged data");
        } else {
            self.filter.reset(mask);
        }

        self.clock.init_counter();
        self.long_ts.reset();
        log::debug!("event log init {init:?} -> {mode:?}, mask {mask:#010x}");
        mode
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn layout(&self) -> HeaderLayout {
        self.layout
    }

    #[inline]
    pub fn clock(&self) -> &C {
        &self.clock
    }

    #[inline(always)]
    fn sample(&self) -> u32 {
        self.ts_format.short(self.clock.read_counter())
    }

    fn submit(&self, fmt: u16, group: u8, message: Message<'_>) {
        if !self.filter.is_enabled(group) || !self.layout.is_record_id(fmt) {
            return;
        }
        let early = match self.config.sampling {
            Sampling::Eager => Some(self.sample()),
            Sampling::Lazy => None,
        };
        let Some(plan) = message.plan(&self.limits) else {
            return;
        };
        let Some(mut reservation) = self
            .ring
            .reserve(plan.words, self.config.single_shot_overflow)
        else {
            return;
        };
        let timestamp = early.unwrap_or_else(|| self.sample());
        message.emit(&self.layout, fmt, timestamp, &plan, &mut reservation);
    }

    /// Fixed-arity record with up to eight argument words. The kind owns
    /// `2^min(K, 4)` format ids starting at `fmt`.
    #[inline]
    pub fn log<const K: usize>(&self, fmt: u16, group: u8, args: [u32; K]) {
        const { assert!(K <= MAX_ARGS) };
        self.submit(fmt, group, Message::Words(&args));
    }

    /// Record with no arguments: a single header word.
    #[inline]
    pub fn log0(&self, fmt: u16, group: u8) {
        self.submit(fmt, group, Message::Words(&[]));
    }

    /// Up to three arguments plus a `4 - K` bit tag stored in the header word, e.g. a
    /// small sequence counter or state code that costs no extra word. The kind owns 16
    /// format ids starting at `fmt`.
    #[inline]
    pub fn log_ext<const K: usize>(&self, fmt: u16, group: u8, args: [u32; K], tag: u32) {
        const { assert!(K <= MAX_EXT_ARGS) };
        self.submit(fmt, group, Message::Extended { args: &args, tag });
    }

    /// Variable-length binary record framed in 16-byte sub-packets. The kind owns 16
    /// format ids starting at `fmt`.
    pub fn log_bytes(&self, fmt: u16, group: u8, data: &[u8]) {
        self.submit(
            fmt,
            group,
            Message::Binary {
                data,
                channel: Channel::Main,
            },
        );
    }

    /// Like [`EventLogger::log_bytes`], and the host also exports the bytes to its
    /// auxiliary channel.
    pub fn log_bytes_aux(&self, fmt: u16, group: u8, data: &[u8]) {
        self.submit(
            fmt,
            group,
            Message::Binary {
                data,
                channel: Channel::Aux,
            },
        );
    }

    pub fn log_str(&self, fmt: u16, group: u8, text: &str) {
        self.submit(fmt, group, Message::Text(text.as_bytes()));
    }

    /// String of at most `max_len` bytes that ends at the first NUL.
    pub fn log_str_bounded(&self, fmt: u16, group: u8, bytes: &[u8], max_len: usize) {
        self.submit(fmt, group, Message::Text(until_nul(bytes, max_len)));
    }

    /// Fold the counter into the long timestamp and log it in the system group.
    /// Returns the 64-bit time in counter ticks.
    ///
    /// Not reentrant: call from a single periodic context, at least once per counter
    /// period, and only after [`EventLogger::init`].
    pub fn long_timestamp(&self) -> u64 {
        let normalized = self.long_ts.advance(&self.ts_format, self.clock.read_counter());
        let value = timestamp::long_value(&self.ts_format, normalized);
        self.log(
            self.config.formats.long_timestamp,
            self.config.system_group,
            [value],
        );
        timestamp::ticks(&self.ts_format, normalized)
    }

    /// Log the counter frequency so the host can convert timestamps to seconds.
    /// The logged value is in timestamp units, i.e. already divided by `2^shift`.
    pub fn timestamp_frequency(&self, counter_hz: u32) {
        let hz = counter_hz >> self.config.timestamp_shift;
        self.log(self.config.formats.frequency, self.config.system_group, [hz]);
    }

    #[inline]
    pub fn is_enabled(&self, group: u8) -> bool {
        self.filter.is_enabled(group)
    }

    /// Returns false when the filter lock keeps a zero mask.
    pub fn set_filter(&self, mask: u32) -> bool {
        self.filter.set(mask)
    }

    /// Set the mask even when the filter lock holds it at zero.
    pub fn force_filter(&self, mask: u32) {
        self.filter.force(mask)
    }

    #[inline]
    pub fn filter(&self) -> u32 {
        self.filter.get()
    }

    pub fn restore_filter(&self) {
        self.filter.restore()
    }

    pub fn info(&self) -> BufferInfo {
        self.ring.info()
    }

    /// Logged words, oldest first. Quiesce producers first (force the filter to
    /// zero and let interrupted writers finish), or the view may contain records that
    /// are still being written.
    pub fn snapshot(&self) -> Snapshot<'_, N> {
        self.ring.snapshot()
    }

    pub fn ring(&self) -> &Ring<N> {
        &self.ring
    }

    /// Log a fault snapshot from a fault handler running with interrupts masked.
    ///
    /// The first fault forces every filter group on, writes one binary record with
    /// the snapshot and, if configured, turns logging off so the record survives until
    /// it is retrieved. The restore point is the mask in place before the fault. A
    /// fault raised while a previous one is still being handled logs nothing: the
    /// engine state may be what faulted.
    pub fn log_fault(&self, capture: impl FnOnce() -> FaultSnapshot) -> FaultOutcome {
        let entries = self.faults.enter();
        if entries > 1 {
            return FaultOutcome::Reentered;
        }

        let mut snapshot = capture();
        snapshot.total_exceptions = entries;
        self.filter.force(ALL_GROUPS);
        self.log_bytes(
            self.config.formats.fault,
            self.config.system_group,
            &snapshot.to_bytes(),
        );
        if self.config.disable_after_fault {
            self.filter.replace(0);
        }
        FaultOutcome::Logged
    }

    /// Fault handler body: log the platform snapshot once, then shut down.
    pub fn handle_fault<P: FaultPlatform>(&self, platform: &P) -> ! {
        let _ = self.log_fault(|| platform.capture());
        platform.shutdown()
    }

    #[inline]
    pub fn fault_count(&self) -> u8 {
        self.faults.count()
    }
}

#[cfg(test)]
mod tests {
    use super::EventLogger;
    use crate::config::{Config, ConfigError, OversizePolicy, Sampling, SingleShotOverflow};
    use crate::decode::{Body, Shape, frames, parse};
    use crate::mode::{InitMode, LogMode};
    use crate::timestamp::Clock;
    use core::cell::Cell;
    use std::vec::Vec;

    struct StepClock {
        now: Cell<u32>,
        step: u32,
    }

    impl StepClock {
        fn new(step: u32) -> Self {
            Self {
                now: Cell::new(0),
                step,
            }
        }
    }

    impl Clock for StepClock {
        fn read_counter(&self) -> u32 {
            let now = self.now.get();
            self.now.set(now.wrapping_add(self.step));
            now
        }
    }

    struct NarrowClock;

    impl Clock for NarrowClock {
        const COUNTER_BITS: u32 = 0;

        fn read_counter(&self) -> u32 {
            0
        }
    }

    fn logger<const N: usize>(config: Config) -> EventLogger<StepClock, N> {
        EventLogger::new(config, StepClock::new(1)).unwrap_or_else(|e| panic!("{e}"))
    }

    fn words<const N: usize>(logger: &EventLogger<StepClock, N>) -> Vec<u32> {
        logger.snapshot().iter().collect()
    }

    #[test]
    fn starts_disabled_until_init() {
        let logger = logger::<8>(Config::new());
        logger.log0(5, 0);
        assert_eq!(logger.info().cursor, 0);

        logger.init(u32::MAX, InitMode::RestartErasing);
        logger.log0(5, 0);
        assert_eq!(logger.info().cursor, 1);
    }

    #[test]
    fn rejects_bad_clock_width() {
        let result = EventLogger::<_, 8>::new(Config::new(), NarrowClock);
        assert!(matches!(result, Err(ConfigError::CounterBits(0))));
    }

    #[test]
    fn filtered_call_leaves_ring_untouched() {
        let logger = logger::<8>(Config::new());
        logger.init(0b10, InitMode::RestartErasing);
        logger.log(8, 0, [1, 2]);
        assert_eq!(logger.info().cursor, 0);
        assert_eq!(logger.clock().now.get(), 0);

        logger.log(8, 1, [1, 2]);
        let words = words(&logger);
        let Ok(record) = parse(&logger.layout(), Shape::Words(2), &words) else {
            panic!("parse failed");
        };
        let Body::Words(args) = record.body else {
            panic!("expected words");
        };
        assert_eq!(*args, [1, 2]);
    }

    #[test]
    fn reserved_format_ids_are_dropped() {
        let logger = logger::<8>(Config::new());
        logger.init(u32::MAX, InitMode::RestartErasing);
        logger.log0(1008, 0);
        logger.log0(u16::MAX, 0);
        assert_eq!(logger.info().cursor, 0);
        logger.log0(1007, 0);
        assert_eq!(logger.info().cursor, 1);
    }

    #[test]
    fn header_carries_fmt_and_shifted_timestamp() {
        let logger = EventLogger::<_, 16>::new(Config::new(), StepClock::new(10))
            .unwrap_or_else(|e| panic!("{e}"));
        logger.init(u32::MAX, InitMode::RestartErasing);
        logger.clock().now.set(100);
        logger.log(40, 3, [0x8000_0007]);

        let words = words(&logger);
        let record = parse(&logger.layout(), Shape::Words(1), &words);
        let Ok(record) = record else {
            panic!("{record:?}");
        };
        assert_eq!(record.fmt, 40);
        assert_eq!(record.timestamp, 50);
        let Body::Words(args) = record.body else {
            panic!("expected words");
        };
        assert_eq!(*args, [0x8000_0007]);
    }

    #[test]
    fn extended_tag_costs_no_word() {
        let logger = logger::<8>(Config::new());
        logger.init(u32::MAX, InitMode::RestartErasing);
        logger.log_ext(32, 0, [], 0x9);
        assert_eq!(logger.info().cursor, 1);
        logger.log_ext(48, 0, [100], 0x5);
        assert_eq!(logger.info().cursor, 3);

        let layout = logger.layout();
        let words = words(&logger);
        let Ok(record) = parse(&layout, Shape::Extended(1), &words[1..]) else {
            panic!("parse failed");
        };
        assert_eq!(record.fmt, 48);
        let Body::Extended { args, tag } = record.body else {
            panic!("expected an extended body");
        };
        assert_eq!(*args, [100]);
        assert_eq!(tag, 0x5);
        assert_eq!(layout.id_field(words[0]), 0x9);
    }

    #[test]
    fn eager_and_lazy_sampling_both_stamp_once() {
        for sampling in [Sampling::Eager, Sampling::Lazy] {
            let config = Config::new().with_sampling(sampling).with_timestamp_shift(0);
            let logger = logger::<16>(config);
            logger.init(u32::MAX, InitMode::RestartErasing);
            logger.log(8, 0, [0]);
            logger.log(8, 0, [0]);
            assert_eq!(logger.clock().now.get(), 2);
            let words = words(&logger);
            assert_eq!(logger.layout().timestamp(words[2]), 1);
        }
    }

    #[test]
    fn lazy_sampling_happens_after_reservation() {
        let config = Config::new()
            .with_single_shot(SingleShotOverflow::DropRecord)
            .with_sampling(Sampling::Lazy);
        let logger = logger::<4>(config);
        logger.init(u32::MAX, InitMode::SingleShotEraseAll);
        logger.log(8, 0, [1, 2]);
        assert_eq!(logger.clock().now.get(), 1);

        logger.log(8, 0, [1, 2]);
        assert_eq!(logger.info().cursor, 3);
        assert_eq!(logger.clock().now.get(), 1);
    }

    #[test]
    fn eager_sampling_happens_before_reservation() {
        let config = Config::new()
            .with_single_shot(SingleShotOverflow::DropRecord)
            .with_sampling(Sampling::Eager);
        let logger = logger::<4>(config);
        logger.init(u32::MAX, InitMode::SingleShotEraseAll);
        logger.log(8, 0, [1, 2]);
        logger.log(8, 0, [1, 2]);
        assert_eq!(logger.info().cursor, 3);
        assert_eq!(logger.clock().now.get(), 2);
    }

    #[test]
    fn oversize_payloads_are_discarded_end_to_end() {
        let config = Config::new()
            .with_max_subpackets(1)
            .with_oversize(OversizePolicy::Discard);
        let logger = logger::<64>(config);
        logger.init(u32::MAX, InitMode::RestartErasing);

        logger.log_bytes(16, 0, &[0xAB; 17]);
        logger.log_str(32, 0, "seventeen bytes!!");
        logger.log_str_bounded(32, 0, b"seventeen bytes!!", 64);
        assert_eq!(logger.info().cursor, 0);

        logger.log_bytes(16, 0, &[0xAB; 16]);
        logger.log_str(32, 0, "sixteen bytes!!!");
        assert_eq!(logger.info().cursor, 7 + 7);
    }

    #[test]
    fn too_long_record_is_skipped_in_continuous_mode() {
        let logger = logger::<4>(Config::new());
        logger.init(u32::MAX, InitMode::RestartErasing);
        logger.log(8, 0, [1, 2, 3, 4]);
        assert_eq!(logger.info().cursor, 0);
    }

    #[test]
    fn single_shot_truncation_is_visible_to_the_decoder() {
        let config = Config::new().with_single_shot(SingleShotOverflow::Truncate);
        let logger = logger::<4>(config);
        assert_eq!(
            logger.init(u32::MAX, InitMode::SingleShotEraseAll),
            LogMode::SingleShot
        );
        logger.log(8, 0, [1, 2]);
        logger.log(12, 0, [3, 4]);

        let layout = logger.layout();
        let words = words(&logger);
        assert_eq!(words.len(), 4);
        let records: Vec<_> = frames(&layout, &words)
            .filter_map(|frame| parse(&layout, Shape::Words(2), frame).ok())
            .collect();
        assert_eq!(records.len(), 2);
        assert!(!records[0].truncated);
        assert_eq!(records[1].fmt, 12);
        assert!(records[1].truncated);

        logger.log0(16, 0);
        assert_eq!(logger.info().cursor, 4);
    }

    #[test]
    fn continue_keeps_locked_zero_filter() {
        let logger = logger::<8>(Config::new());
        logger.init(u32::MAX, InitMode::RestartErasing);
        logger.log0(1, 0);
        assert!(logger.set_filter(0));

        logger.init(u32::MAX, InitMode::ContinueKeepingData);
        assert_eq!(logger.filter(), 0);
        logger.log0(1, 0);
        assert_eq!(logger.info().cursor, 1);

        logger.init(u32::MAX, InitMode::RestartErasing);
        assert_eq!(logger.filter(), u32::MAX);
    }

    #[test]
    fn forced_init_leaves_locked_zero_filter() {
        let logger = logger::<8>(Config::new());
        logger.init(u32::MAX, InitMode::RestartErasing);
        logger.log0(1, 0);
        assert!(logger.set_filter(0));

        logger.init_forced(0x1, InitMode::ContinueKeepingData);
        assert_eq!(logger.filter(), 0x1);
        logger.log0(1, 0);
        assert_eq!(logger.info().cursor, 2);
    }

    #[test]
    fn frequency_is_logged_in_timestamp_units() {
        let logger = logger::<8>(Config::new());
        logger.init(1, InitMode::RestartErasing);
        logger.timestamp_frequency(64_000_000);

        let words = words(&logger);
        let Ok(record) = parse(&logger.layout(), Shape::Words(1), &words) else {
            panic!("parse failed");
        };
        assert_eq!(record.fmt, 4);
        let Body::Words(args) = record.body else {
            panic!("expected words");
        };
        assert_eq!(*args, [32_000_000]);
    }

    #[test]
    fn bounded_string_stops_at_nul() {
        let logger = logger::<16>(Config::new());
        logger.init(u32::MAX, InitMode::RestartErasing);
        logger.log_str_bounded(32, 0, b"quick\0brown", 32);

        let words = words(&logger);
        let Ok(record) = parse(&logger.layout(), Shape::Text, &words) else {
            panic!("parse failed");
        };
        let Body::Bytes { bytes, .. } = record.body else {
            panic!("expected bytes");
        };
        assert_eq!(bytes.iter().collect::<Vec<u8>>(), b"quick");
    }
}
