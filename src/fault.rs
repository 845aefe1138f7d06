//! Fault-handler support: register snapshot, reentrancy guard, platform hooks.
//!
//! The assembly entry that saves registers before any compiler-generated prologue runs
//! is platform code; it hands the engine a [`FaultSnapshot`] through
//! [`FaultPlatform::capture`]. The logging side lives in `EventLogger::handle_fault`.

use crate::sync::{AtomicU8, Ordering};

/// Size of [`FaultSnapshot::to_bytes`].
pub const SNAPSHOT_BYTES: usize = 92;

/// Core registers and fault status at the moment of a fatal exception.
///
/// Serialized little-endian in declaration order; the host format description for
/// the fault record relies on these offsets.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FaultSnapshot {
    /// R0..R12.
    pub r: [u32; 13],
    pub sp: u32,
    pub lr: u32,
    pub pc: u32,
    pub xpsr: u32,
    /// Low byte of EXC_RETURN (stack used, thread/handler mode, FPU context).
    pub exc_return: u8,
    pub basepri: u8,
    pub control: u8,
    /// Filled in by the engine with the reentrancy count.
    pub total_exceptions: u8,
    /// Configurable fault status.
    pub cfsr: u32,
    /// Hard fault status.
    pub hfsr: u32,
    /// Auxiliary bus fault status; zero on cores without it.
    pub abfsr: u32,
    /// MMFAR or BFAR when the matching valid bit is set in CFSR, otherwise zero.
    pub offending_address: u32,
    pub icsr: u32,
}

impl FaultSnapshot {
    pub fn to_bytes(&self) -> [u8; SNAPSHOT_BYTES] {
        let mut out = [0u8; SNAPSHOT_BYTES];
        let mut at = 0;
        let mut put = |bytes: &[u8]| {
            out[at..at + bytes.len()].copy_from_slice(bytes);
            at += bytes.len();
        };
        for reg in self.r {
            put(&reg.to_le_bytes());
        }
        for reg in [self.sp, self.lr, self.pc, self.xpsr] {
            put(&reg.to_le_bytes());
        }
        put(&[
            self.exc_return,
            self.basepri,
            self.control,
            self.total_exceptions,
        ]);
        for reg in [
            self.cfsr,
            self.hfsr,
            self.abfsr,
            self.offending_address,
            self.icsr,
        ] {
            put(&reg.to_le_bytes());
        }
        out
    }

    pub fn from_bytes(bytes: &[u8; SNAPSHOT_BYTES]) -> Self {
        let word = |i: usize| {
            let at = i * 4;
            u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
        };
        Self {
            r: core::array::from_fn(word),
            sp: word(13),
            lr: word(14),
            pc: word(15),
            xpsr: word(16),
            exc_return: bytes[68],
            basepri: bytes[69],
            control: bytes[70],
            total_exceptions: bytes[71],
            cfsr: word(18),
            hfsr: word(19),
            abfsr: word(20),
            offending_address: word(21),
            icsr: word(22),
        }
    }
}

/// Platform capabilities needed by the fault path.
pub trait FaultPlatform {
    /// Registers and fault status saved by the trap entry.
    fn capture(&self) -> FaultSnapshot;

    /// Shut down or restart the system.
    fn shutdown(&self) -> !;
}

/// Outcome of logging a fault.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FaultOutcome {
    /// The snapshot was handed to the ring.
    Logged,
    /// A fault occurred while a previous one was being handled; nothing was logged.
    Reentered,
}

/// Number of fatal exceptions seen since power-up. Never reset except by restart.
pub struct ExceptionState {
    entries: AtomicU8,
}

impl ExceptionState {
    pub fn new() -> Self {
        Self {
            entries: AtomicU8::new(0),
        }
    }

    /// Count one more fault and return the new total. Runs with interrupts masked.
    pub fn enter(&self) -> u8 {
        let entries = self.entries.load(Ordering::Relaxed).saturating_add(1);
        self.entries.store(entries, Ordering::Relaxed);
        entries
    }

    #[inline]
    pub fn count(&self) -> u8 {
        self.entries.load(Ordering::Relaxed)
    }
}

impl Default for ExceptionState {
    fn default() -> Self {
        Self::new()
    }
}
