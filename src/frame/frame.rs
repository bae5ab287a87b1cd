//! # Frame nodes: identity, realm, capability flags, and per-frame state.
//!
//! A frame is a named node in a tree. Its shape — name, qualname, realm,
//! handler capability, hooks, routine — is fixed during the `Load` phase and
//! immutable once started. The node also owns the frame's `local` channel
//! store, the only channel that never leaves the frame.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::circuit::{Hooks, PhaseCell, Routine};
use crate::error::FrameError;
use crate::frame::arena::FrameId;
use crate::messages::Store;

/// Execution realm of a frame tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Realm {
    /// Thread-per-frame with a private cooperative loop; hooks allowed.
    Concurrent,
    /// Process-per-frame; no hooks exist in this realm.
    Parallel,
}

impl Realm {
    /// Stable lowercase name for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Realm::Concurrent => "concurrent",
            Realm::Parallel => "parallel",
        }
    }
}

/// The shared channel stores of one frame tree.
///
/// `environment`, `request`, and `common` are tree-wide; `local` lives on
/// each node.
pub(crate) struct TreeChannels {
    pub environment: Arc<Store>,
    pub request: Arc<Store>,
    pub common: Arc<Store>,
}

impl TreeChannels {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            environment: Arc::new(Store::new("environment")),
            request: Arc::new(Store::new("request")),
            common: Arc::new(Store::new("common")),
        })
    }
}

/// One frame in the arena.
pub(crate) struct FrameNode {
    pub id: FrameId,
    pub name: String,
    pub qualname: String,
    pub realm: Realm,
    pub handler_capable: bool,
    /// True when the routine crosses a process boundary; such a frame is a
    /// leaf of that boundary.
    pub remote_routine: bool,
    pub phase: PhaseCell,
    pub parent: Option<FrameId>,
    pub children: Mutex<Vec<FrameId>>,
    /// Hook set; configured in `Load`, taken by the agent at start.
    pub hooks: Mutex<Hooks>,
    /// Routine; taken by the agent at start.
    pub routine: Mutex<Option<Routine>>,
    /// The frame's private channel store.
    pub local: Arc<Store>,
}

impl FrameNode {
    /// Runs `f` against the hook set, enforcing handler capability and the
    /// load-phase configuration window.
    pub(crate) fn with_hooks(&self, f: impl FnOnce(&mut Hooks)) -> Result<(), FrameError> {
        if !self.handler_capable {
            return Err(FrameError::HandlerIncapable { name: self.name.clone() });
        }
        self.phase.while_load(&self.name, || {
            let mut hooks = self.hooks.lock();
            f(&mut hooks);
        })
    }
}
