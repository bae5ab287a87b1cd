//! # Context: the execution interface handed to routines and hooks.
//!
//! A context exposes the frame's identity, its four channel views with the
//! capability its role grants, cooperative-stop observation, and subframe
//! creation. Contexts are cheap to clone and only meaningful while their
//! frame runs; holding one past frame termination keeps the arena alive but
//! grants nothing new.
//!
//! ## Channel capabilities through a context
//! - `environment()`: read only
//! - `request()`: read only (the owning session writes)
//! - `common()`: read + update (the owning session defines)
//! - `local()`: full control, private to this frame

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::process::Child;
use tokio_util::sync::CancellationToken;

use crate::agent::{start_agent, AgentSeed};
use crate::config::Config;
use crate::error::FrameError;
use crate::events::{Bus, Event, EventKind};
use crate::frame::arena::{FrameArena, FrameId};
use crate::frame::builder::{derive_name, FrameOptions, SubFrame};
use crate::frame::frame::{FrameNode, Realm, TreeChannels};
use crate::messages::codec::encode_store;
use crate::messages::{
    Backend, MessageManager, MessageReader, MessageUpdater, Store,
};
use crate::session::{ResultStore, SessionResult, SubSession};

/// Tree-wide pieces every context of one frame tree shares.
pub(crate) struct ContextShared {
    pub arena: Arc<FrameArena>,
    pub tree: Arc<TreeChannels>,
    pub config: Config,
    pub bus: Bus,
}

pub(crate) struct ContextInner {
    shared: Arc<ContextShared>,
    frame: FrameId,
    name: String,
    qualname: String,
    realm: Realm,
    handler_capable: bool,
    remote_routine: bool,
    /// True inside a worker process, where subframes cannot exist.
    in_worker: bool,
    environment: MessageReader,
    request: MessageReader,
    common: MessageUpdater,
    local: MessageManager,
    cancel: CancellationToken,
    child_slot: Arc<Mutex<Option<Child>>>,
    /// Summaries of the subframe scopes this frame's routine opened; folded
    /// into the frame's own result at publication.
    sub_results: Mutex<Vec<SessionResult>>,
}

/// Execution interface for routine and hook bodies.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    /// Builds the in-process context of one frame.
    pub(crate) fn new_local(
        shared: Arc<ContextShared>,
        node: &FrameNode,
        cancel: CancellationToken,
        child_slot: Arc<Mutex<Option<Child>>>,
    ) -> Self {
        let environment =
            MessageReader::new(Backend::Mem(Arc::clone(&shared.tree.environment)));
        let request = MessageReader::new(Backend::Mem(Arc::clone(&shared.tree.request)));
        let common = MessageUpdater::new(Backend::Mem(Arc::clone(&shared.tree.common)));
        let local = MessageManager::new(Backend::Mem(Arc::clone(&node.local)));
        Self {
            inner: Arc::new(ContextInner {
                shared,
                frame: node.id,
                name: node.name.clone(),
                qualname: node.qualname.clone(),
                realm: node.realm,
                handler_capable: node.handler_capable,
                remote_routine: node.remote_routine,
                in_worker: false,
                environment,
                request,
                common,
                local,
                cancel,
                child_slot,
                sub_results: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Builds the worker-process context around already-populated stores.
    pub(crate) fn new_worker(
        qualname: String,
        realm: Realm,
        environment: MessageReader,
        request: MessageReader,
        common: MessageUpdater,
        cancel: CancellationToken,
    ) -> Self {
        let shared = Arc::new(ContextShared {
            arena: FrameArena::new(),
            tree: TreeChannels::new(),
            config: Config::default(),
            bus: Bus::new(1),
        });
        let name = qualname.rsplit('.').next().unwrap_or(&qualname).to_string();
        let local = MessageManager::new(Backend::Mem(Arc::new(Store::new("local"))));
        Self {
            inner: Arc::new(ContextInner {
                frame: shared.arena.alloc_id(),
                shared,
                name,
                qualname,
                realm,
                handler_capable: false,
                remote_routine: true,
                in_worker: true,
                environment,
                request,
                common,
                local,
                cancel,
                child_slot: Arc::new(Mutex::new(None)),
                sub_results: Mutex::new(Vec::new()),
            }),
        }
    }

    /// This frame's name (unique among siblings).
    pub fn frame_name(&self) -> &str {
        &self.inner.name
    }

    /// Dotted path from the root frame.
    pub fn frame_qualname(&self) -> &str {
        &self.inner.qualname
    }

    /// Realm this frame executes in.
    pub fn realm(&self) -> Realm {
        self.inner.realm
    }

    /// Read-only view of the environment channel.
    pub fn environment(&self) -> MessageReader {
        self.inner.environment.clone()
    }

    /// Read-only view of the request channel.
    pub fn request(&self) -> MessageReader {
        self.inner.request.clone()
    }

    /// Read/update view of the common channel.
    pub fn common(&self) -> MessageUpdater {
        self.inner.common.clone()
    }

    /// Full-control view of this frame's private channel.
    pub fn local(&self) -> MessageManager {
        self.inner.local.clone()
    }

    /// True when this frame accepts handlers (realm and construction flags
    /// both allow them).
    pub fn supports_handlers(&self) -> bool {
        self.inner.handler_capable
    }

    /// True once a cooperative stop has been offered to this frame.
    pub fn is_stop_requested(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Completes when a cooperative stop is offered. For suspending routines
    /// that want to react without polling.
    pub async fn stop_requested(&self) {
        self.inner.cancel.cancelled().await
    }

    /// Adds a child frame with defaults derived from the routine.
    ///
    /// Shorthand for [`Context::define_subframe`] with default options.
    pub fn create_subframe(&self, routine: crate::circuit::Routine) -> Result<SubFrame, FrameError> {
        self.define_subframe(routine, FrameOptions::default())
    }

    /// Adds a child frame with explicit options.
    ///
    /// Fails with `SubframeInWorker` from a worker process or from a frame
    /// whose routine runs in one, `DuplicateName` when a sibling already uses
    /// the name, and `NameMissing` when neither the options nor the routine
    /// yield an identifier. In the parallel realm the routine must be a
    /// registered remote routine, and handlers are rejected.
    pub fn define_subframe(
        &self,
        routine: crate::circuit::Routine,
        options: FrameOptions,
    ) -> Result<SubFrame, FrameError> {
        if self.inner.in_worker || self.inner.remote_routine {
            return Err(FrameError::SubframeInWorker { name: self.inner.name.clone() });
        }
        let realm = self.inner.realm;
        if realm == Realm::Parallel && !routine.is_remote() {
            return Err(FrameError::RemoteRoutineRequired { name: self.inner.name.clone() });
        }

        let name = derive_name(options.name.as_deref(), &routine)?;
        let arena = &self.inner.shared.arena;
        let parent = arena
            .get(self.inner.frame)
            .ok_or_else(|| FrameError::UnknownFrame { name: self.inner.name.clone() })?;

        let mut children = parent.children.lock();
        for child_id in children.iter() {
            if let Some(child) = arena.get(*child_id) {
                if child.name == name {
                    return Err(FrameError::DuplicateName { name });
                }
            }
        }

        // Hooks always run in-process, so a concurrent frame keeps its
        // handler capability even when its routine crosses into a worker.
        let handler_capable = realm == Realm::Concurrent && options.handler;
        let id = arena.alloc_id();
        let node = Arc::new(FrameNode {
            id,
            qualname: format!("{}.{}", self.inner.qualname, name),
            name,
            realm,
            handler_capable,
            remote_routine: routine.is_remote(),
            phase: crate::circuit::PhaseCell::new(),
            parent: Some(self.inner.frame),
            children: Mutex::new(Vec::new()),
            hooks: Mutex::new(Default::default()),
            routine: Mutex::new(Some(routine)),
            local: Arc::new(Store::new("local")),
        });
        arena.insert(Arc::clone(&node));
        children.push(id);
        drop(children);

        Ok(SubFrame::new(Arc::clone(arena), id, self.inner.frame))
    }

    /// Launches the given subframes and returns the scope session
    /// coordinating them.
    ///
    /// Every subframe must have been created by this context; the set must be
    /// non-empty. For subframes whose routine crosses a process boundary, the
    /// shared channels are validated as serializable first — an opaque value
    /// surfaces as an encode error here, before anything starts.
    pub fn start_subframes(
        &self,
        subframes: Vec<SubFrame>,
    ) -> Result<SubSession, FrameError> {
        if subframes.is_empty() {
            return Err(FrameError::NoSubframes);
        }
        let shared = &self.inner.shared;
        let mut nodes = Vec::with_capacity(subframes.len());
        for sub in &subframes {
            if sub.owner() != self.inner.frame {
                return Err(FrameError::CrossContext { name: sub.name().to_string() });
            }
            let node = shared
                .arena
                .get(sub.id())
                .ok_or_else(|| FrameError::UnknownFrame { name: sub.name().to_string() })?;
            nodes.push(node);
        }

        if nodes.iter().any(|n| n.remote_routine) {
            // Scenario: a non-serializable value on a shared channel must
            // fail the start, not the worker.
            encode_store(&shared.tree.environment)?;
            encode_store(&shared.tree.request)?;
            encode_store(&shared.tree.common)?;
        }

        let bound = nodes
            .iter()
            .map(|n| (n.id, n.name.clone(), n.qualname.clone()))
            .collect::<Vec<_>>();
        let store = ResultStore::new(
            format!("{}/sub", self.inner.qualname),
            bound,
            shared.bus.clone(),
        );

        let mut agents = Vec::with_capacity(nodes.len());
        for node in &nodes {
            let agent = start_agent(AgentSeed {
                shared: Arc::clone(shared),
                node: Arc::clone(node),
                store: Arc::clone(&store),
                parent_cancel: Some(self.inner.cancel.clone()),
            })?;
            agents.push(agent);
        }

        let names =
            nodes.iter().map(|n| n.name.as_str()).collect::<Vec<_>>().join(",");
        shared.bus.publish(
            Event::now(EventKind::SubframesStarted)
                .with_frame(self.inner.qualname.clone())
                .with_reason(names),
        );

        Ok(SubSession::new(store, agents, self.results_sink()))
    }

    /// Sink collecting sub-scope summaries for this frame's own result.
    pub(crate) fn results_sink(&self) -> Arc<dyn Fn(SessionResult) + Send + Sync> {
        let inner = Arc::clone(&self.inner);
        Arc::new(move |summary| {
            inner.sub_results.lock().push(summary);
        })
    }

    /// Takes the collected sub-scope summaries, folded into one.
    pub(crate) fn take_sub_results(&self) -> Option<SessionResult> {
        let collected = std::mem::take(&mut *self.inner.sub_results.lock());
        SessionResult::merge(collected)
    }

    pub(crate) fn shared(&self) -> &Arc<ContextShared> {
        &self.inner.shared
    }

    pub(crate) fn child_slot(&self) -> &Arc<Mutex<Option<Child>>> {
        &self.inner.child_slot
    }
}
