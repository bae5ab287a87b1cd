//! # Execution agent: binds one circuit to its concurrency substrate.
//!
//! One agent per frame. The substrate is always a dedicated OS thread that
//! builds a private current-thread runtime and drives exactly one circuit
//! future to completion — parallelism across frames comes from each frame
//! owning its own loop thread (plus, for remote routines, its own worker
//! process), never from sharing a loop.
//!
//! ## Flow
//! ```text
//! start_agent(seed)
//!   ├─► phase Load → Active (second start fails here)
//!   ├─► take hooks + routine from the node
//!   ├─► derive child CancellationToken from the parent frame's token
//!   └─► spawn loop thread
//!          └─► current-thread runtime
//!                 └─► run_circuit(...)            (hooks, routine, redo, close)
//!                        └─► publish FrameResult  (exactly once, store lock)
//!                        └─► phase → Terminated
//! ```
//!
//! ## Rules
//! - `start` is phase-guarded: a frame past `Load` cannot start again.
//! - Cancellation is advisory: `cancel(false)` cancels the token (and lets a
//!   worker process stop cooperatively); `cancel(true)` additionally kills
//!   the worker process outright. Neither touches the loop thread itself.
//! - The agent publishes exactly one result, whatever path the circuit took.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::process::Child;
use tokio_util::sync::CancellationToken;

use crate::circuit::{run_circuit, Hooks, Routine};
use crate::error::FrameError;
use crate::events::{Event, EventKind};
use crate::frame::{Context, ContextShared, FrameNode};
use crate::session::ResultStore;

/// Everything needed to start one frame's agent.
pub(crate) struct AgentSeed {
    pub shared: Arc<ContextShared>,
    pub node: Arc<FrameNode>,
    pub store: Arc<ResultStore>,
    /// Parent frame's token; the agent derives a child token so a parent
    /// cancel propagates down the tree.
    pub parent_cancel: Option<CancellationToken>,
}

/// Handle to a running frame agent.
pub(crate) struct AgentHandle {
    cancel: CancellationToken,
    child_slot: Arc<Mutex<Option<Child>>>,
}

impl AgentHandle {
    /// Offers a cooperative stop; with `force`, also kills a worker process.
    pub(crate) fn cancel(&self, force: bool) {
        self.cancel.cancel();
        if force {
            if let Some(child) = self.child_slot.lock().as_mut() {
                let _ = child.start_kill();
            }
        }
    }
}

/// Starts the agent for `seed.node`. Phase-guarded; returns the handle the
/// owning session uses for stop offers.
pub(crate) fn start_agent(seed: AgentSeed) -> Result<Arc<AgentHandle>, FrameError> {
    let AgentSeed { shared, node, store, parent_cancel } = seed;

    node.phase.to_active(&node.name)?;

    let hooks: Hooks = std::mem::take(&mut *node.hooks.lock());
    let routine: Routine = node.routine.lock().take().ok_or_else(|| {
        // A node is built with its routine; only a previous start takes it.
        FrameError::AlreadyStarted { name: node.name.clone() }
    })?;

    let cancel = match &parent_cancel {
        Some(parent) => parent.child_token(),
        None => CancellationToken::new(),
    };
    let child_slot: Arc<Mutex<Option<Child>>> = Arc::new(Mutex::new(None));

    let ctx = Context::new_local(
        Arc::clone(&shared),
        &node,
        cancel.clone(),
        Arc::clone(&child_slot),
    );

    let handle = Arc::new(AgentHandle { cancel: cancel.clone(), child_slot });

    shared
        .bus
        .publish(Event::now(EventKind::FrameStarting).with_frame(node.qualname.clone()));

    let bus = shared.bus.clone();
    let thread_node = Arc::clone(&node);
    let thread_store = Arc::clone(&store);
    std::thread::Builder::new()
        .name(node.qualname.clone())
        .spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(rt) => rt,
                Err(e) => {
                    // Without a loop the circuit cannot run; record the frame
                    // as failed rather than leaving the store waiting.
                    thread_store.publish(
                        thread_node.id,
                        Some(Arc::new(crate::error::FrameFailure::new(
                            thread_node.qualname.clone(),
                            crate::error::FailureStage::Open,
                            crate::error::FailureSource::Raised(Box::new(e)),
                        ))),
                        None,
                        false,
                        0,
                    );
                    thread_node.phase.to_terminated();
                    return;
                }
            };

            let outcome = rt.block_on(run_circuit(
                &thread_node.qualname,
                ctx.clone(),
                hooks,
                routine,
                cancel,
                bus.clone(),
            ));

            let nested = ctx.take_sub_results();

            match &outcome.failure {
                Some(failure) => {
                    let mut ev = Event::now(EventKind::FrameFailed)
                        .with_frame(thread_node.qualname.clone())
                        .with_reason(failure.to_string());
                    if outcome.cycles > 0 {
                        ev = ev.with_cycle(outcome.cycles);
                    }
                    bus.publish(ev);
                }
                None => {
                    let mut ev = Event::now(EventKind::FrameStopped)
                        .with_frame(thread_node.qualname.clone());
                    if outcome.cycles > 0 {
                        ev = ev.with_cycle(outcome.cycles);
                    }
                    bus.publish(ev);
                }
            }

            thread_store.publish(
                thread_node.id,
                outcome.failure,
                nested,
                outcome.cancelled,
                outcome.cycles,
            );
            thread_node.phase.to_terminated();
        })
        .map_err(|e| {
            node.phase.to_terminated();
            FrameError::Spawn { name: node.name.clone(), reason: e.to_string() }
        })?;

    Ok(handle)
}
