//! Logging mode selection at initialization.

use crate::ring::Ring;

/// How the ring behaves once it is full.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LogMode {
    /// Post-mortem logging: the oldest words are overwritten.
    Continuous,
    /// Logging stops at capacity.
    SingleShot,
}

/// Mode and buffer handling requested by `init`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InitMode {
    /// Erase the buffer, rewind the cursor and log continuously.
    RestartErasing,
    /// Keep the buffer, cursor and mode; only the timestamp state restarts.
    /// Used after a non power-on reset to keep the history from before the reset.
    ContinueKeepingData,
    /// Rewind the cursor and stop at capacity; old words stay until overwritten.
    SingleShotResetIndex,
    /// Erase the buffer, rewind the cursor and stop at capacity.
    SingleShotEraseAll,
}

impl InitMode {
    #[inline]
    pub const fn erases(&self) -> bool {
        matches!(self, InitMode::RestartErasing | InitMode::SingleShotEraseAll)
    }
}

/// Put the ring into the state `init` asks for and return the resulting mode.
/// Single-shot requests fall back to continuous logging when single shot is disabled.
pub(crate) fn apply<const N: usize>(
    ring: &Ring<N>,
    init: InitMode,
    single_shot_enabled: bool,
) -> LogMode {
    if init == InitMode::ContinueKeepingData {
        let mode = ring.mode();
        let cursor = ring.cursor() as usize;
        let in_range = match mode {
            LogMode::Continuous => cursor < N,
            LogMode::SingleShot => cursor <= N,
        };
        if !in_range {
            log::warn!("event log cursor {cursor} out of range, rewinding");
            ring.reset_index();
        }
        return mode;
    }

    let mode = match init {
        InitMode::SingleShotResetIndex | InitMode::SingleShotEraseAll if single_shot_enabled => {
            LogMode::SingleShot
        }
        InitMode::SingleShotResetIndex | InitMode::SingleShotEraseAll => {
            log::warn!("single-shot logging disabled, {init:?} falls back to continuous");
            LogMode::Continuous
        }
        _ => LogMode::Continuous,
    };

    if init.erases() {
        ring.erase();
    }
    ring.reset_index();
    ring.set_mode(mode);
    mode
}
