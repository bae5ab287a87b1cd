//! # Runtime configuration.
//!
//! Provides [`Config`], the per-tree settings a root frame carries into its
//! session: event delivery capacity, the worker sync cadence, and the grace
//! window a cooperative stop grants a worker process before it is killed.
//!
//! ## Sentinel values
//! - `bus_capacity` is clamped to a minimum of 1 by the bus.
//! - `stop_grace = 0s` → a cooperative stop kills the worker immediately.

use std::time::Duration;

/// Per-tree runtime configuration.
///
/// Attached to a root frame before start; every frame of the tree inherits
/// it.
#[derive(Clone, Debug)]
pub struct Config {
    /// Capacity of the event bus ring buffer.
    ///
    /// Receivers lagging more than this many events observe `Lagged` and skip
    /// the oldest items. Minimum 1 (clamped by the bus).
    pub bus_capacity: usize,

    /// How often a worker-process pump checks the `request`/`common` stores
    /// for changes to forward.
    pub sync_interval: Duration,

    /// How long a cooperative stop waits for a worker process to report back
    /// before killing it.
    pub stop_grace: Duration,
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `bus_capacity = 1024`
    /// - `sync_interval = 50ms`
    /// - `stop_grace = 2s`
    fn default() -> Self {
        Self {
            bus_capacity: 1024,
            sync_interval: Duration::from_millis(50),
            stop_grace: Duration::from_secs(2),
        }
    }
}

impl Config {
    /// Bus capacity clamped to the bus's minimum.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}
