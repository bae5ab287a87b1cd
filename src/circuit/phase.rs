//! # Frame phase: `Load → Active → Terminated`.
//!
//! Monotonic, no phase is revisited. Configuration happens in `Load`;
//! hooks and the routine run in `Active`; `Terminated` is permanent, and a
//! second `start()` on the same frame fails there.

use parking_lot::Mutex;

use crate::error::FrameError;

/// Lifecycle phase of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    /// Built, configurable, not yet started.
    Load,
    /// Hooks and routine executing.
    Active,
    /// Finished; permanent.
    Terminated,
}

/// Mutex-guarded phase with checked transitions.
#[derive(Debug)]
pub(crate) struct PhaseCell {
    current: Mutex<Phase>,
}

impl PhaseCell {
    pub(crate) fn new() -> Self {
        Self { current: Mutex::new(Phase::Load) }
    }

    pub(crate) fn current(&self) -> Phase {
        *self.current.lock()
    }

    /// Runs `f` while still in `Load`; configuration guard.
    pub(crate) fn while_load<R>(
        &self,
        name: &str,
        f: impl FnOnce() -> R,
    ) -> Result<R, FrameError> {
        let guard = self.current.lock();
        match *guard {
            Phase::Load => Ok(f()),
            _ => Err(FrameError::AlreadyStarted { name: name.to_string() }),
        }
    }

    /// `Load → Active`; fails on any other current phase.
    pub(crate) fn to_active(&self, name: &str) -> Result<(), FrameError> {
        let mut guard = self.current.lock();
        match *guard {
            Phase::Load => {
                *guard = Phase::Active;
                Ok(())
            }
            _ => Err(FrameError::AlreadyStarted { name: name.to_string() }),
        }
    }

    /// `Active → Terminated`. Idempotent on a terminated cell; a cell still
    /// in `Load` terminates directly (start-time validation failures).
    pub(crate) fn to_terminated(&self) {
        let mut guard = self.current.lock();
        *guard = Phase::Terminated;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_are_monotonic() {
        let cell = PhaseCell::new();
        assert_eq!(cell.current(), Phase::Load);
        cell.to_active("f").unwrap();
        assert_eq!(cell.current(), Phase::Active);
        cell.to_terminated();
        assert_eq!(cell.current(), Phase::Terminated);
        // Terminated is permanent: no way back to Load/Active.
        assert!(cell.to_active("f").is_err());
        assert!(cell.while_load("f", || ()).is_err());
    }

    #[test]
    fn double_start_fails() {
        let cell = PhaseCell::new();
        cell.to_active("f").unwrap();
        let err = cell.to_active("f").unwrap_err();
        assert_eq!(err.as_label(), "frame_already_started");
    }

    #[test]
    fn load_guard_allows_configuration_once() {
        let cell = PhaseCell::new();
        assert!(cell.while_load("f", || 1).is_ok());
        cell.to_active("f").unwrap();
        assert!(cell.while_load("f", || 1).is_err());
    }
}
