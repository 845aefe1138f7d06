//! Atomic backend used by every shared engine field.
//!
//! With the `portable-atomic` feature the engine runs on cores without native CAS
//! (the single-core and critical-section features turn the reservation CAS into a
//! short interrupt-masked section).

#[cfg(feature = "portable-atomic")]
pub(crate) use portable_atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};

#[cfg(not(feature = "portable-atomic"))]
pub(crate) use core::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};

pub(crate) fn atomic_u32_array<const N: usize>(init: u32) -> [AtomicU32; N] {
    core::array::from_fn(|_| AtomicU32::new(init))
}
