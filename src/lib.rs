//! Binary event logging for no-std embedded targets.
//!
//! # Highlights
//! - Records are packed into a fixed circular buffer of 32-bit words.
//! - Lock-free range reservation: safe to call from thread code, interrupt handlers
//!   and the fault handler at the same time.
//! - No allocation, no dynamic dispatch, no blocking; a call either stores its record
//!   or silently drops it.
//! - Header words are marked, so a host can find whole records in a wrapped buffer.
//! - Decoding happens off-device; [`decode`] has the layout helpers for host tools.
//!
//! # Quick start
//! ```
//! use ph_eventlog::decode::{Body, Shape, frames, parse};
//! use ph_eventlog::{Clock, Config, EventLogger, InitMode};
//!
//! struct Cycles;
//!
//! impl Clock for Cycles {
//!     fn read_counter(&self) -> u32 {
//!         1234
//!     }
//! }
//!
//! let logger = EventLogger::<_, 256>::new(Config::new(), Cycles).unwrap();
//! logger.init(u32::MAX, InitMode::RestartErasing);
//!
//! logger.log(32, 1, [42, 7]);
//! logger.log_str(64, 1, "boot done");
//!
//! let words: Vec<u32> = logger.snapshot().iter().collect();
//! let layout = logger.layout();
//! let first = frames(&layout, &words).next().unwrap();
//! let record = parse(&layout, Shape::Words(2), first).unwrap();
//! assert_eq!(record.fmt, 32);
//! assert!(matches!(record.body, Body::Words(args) if *args == [42, 7]));
//! ```
//!
//! # No-std
//! The crate is `#![no_std]`. Tests require `std`.
//!
//! # Safety and concurrency
//! Single core (or one engine per core). The only synchronization point is the cursor
//! compare-and-swap that reserves a word range; payload writes go to disjoint ranges.
//! Enable `portable-atomic-unsafe-assume-single-core` or
//! `portable-atomic-critical-section` on cores without native CAS.
//!
//! # Semantics
//! - A disabled filter group returns before the ring or the clock is touched.
//! - Continuous mode overwrites the oldest words; single-shot mode stops at capacity.
//! - `long_timestamp` is not reentrant and must run from one periodic context.
//! - Drain only after quiescing producers: force the filter to zero and let
//!   interrupted writers finish.
#![no_std]

pub mod config;
pub mod decode;
pub mod encode;
pub mod fault;
pub mod filter;
pub mod logger;
pub mod mode;
pub mod ring;
mod sync;
pub mod timestamp;

pub use config::{
    Config, ConfigError, OversizePolicy, Sampling, SingleShotOverflow, SystemFormats,
    UnalignedPolicy,
};
pub use encode::{Channel, HeaderLayout};
pub use fault::{FaultOutcome, FaultPlatform, FaultSnapshot};
pub use filter::ALL_GROUPS;
pub use logger::EventLogger;
pub use mode::{InitMode, LogMode};
pub use ring::{BufferInfo, Reservation, Ring, Snapshot};
pub use timestamp::Clock;

#[cfg(test)]
extern crate std;
