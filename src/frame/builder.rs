//! # Construction surface: factories, root frames, and subframes.
//!
//! [`create_frame`] builds a root frame around a routine; the returned
//! [`RootFrame`] is the pre-start builder: initial `environment`/`request`
//! values, hook registration, configuration, then `start()` for a
//! [`Session`]. Subframes come from a [`Context`](crate::frame::Context) and
//! expose the same hook surface.
//!
//! ## Name fallback
//! An explicit name wins. Otherwise the routine contributes its identifier —
//! the function-item name for local routines, the registered name for remote
//! ones. Anonymous closures contribute nothing, and no usable identifier is
//! a construction error.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::agent::{routine_registered, start_agent, AgentSeed};
use crate::circuit::{EventHook, ExceptionHook, PhaseCell, RedoHook, Routine};
use crate::config::Config;
use crate::error::FrameError;
use crate::events::Bus;
use crate::frame::arena::{FrameArena, FrameId};
use crate::frame::context::ContextShared;
use crate::frame::frame::{FrameNode, Realm, TreeChannels};
use crate::messages::{Backend, MessageDefiner, MessageManager, MessageReader, Store, Value};
use crate::session::{ResultStore, Session};
use crate::subscribers::{Subscribe, SubscriberSet};

/// Options accepted by the frame factories.
pub struct FrameOptions {
    /// Explicit frame name; `None` falls back to the routine's identifier.
    pub name: Option<String>,
    /// Execution realm. Subframes ignore this and inherit their parent's.
    pub realm: Realm,
    /// Whether the frame accepts handlers. Forced off in the parallel realm.
    pub handler: bool,
}

impl Default for FrameOptions {
    /// Concurrent realm, handlers enabled, name derived from the routine.
    fn default() -> Self {
        Self { name: None, realm: Realm::Concurrent, handler: true }
    }
}

impl FrameOptions {
    /// Options with an explicit name and everything else defaulted.
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: Some(name.into()), ..Self::default() }
    }
}

/// Resolves the effective frame name from options and routine.
pub(crate) fn derive_name(
    explicit: Option<&str>,
    routine: &Routine,
) -> Result<String, FrameError> {
    let candidate = match explicit {
        Some(name) if !name.is_empty() => Some(name.to_string()),
        _ => routine.ident.clone(),
    };
    match candidate {
        Some(name) if !name.is_empty() && !name.contains('.') => Ok(name),
        _ => Err(FrameError::NameMissing),
    }
}

/// Validates a remote routine reference against the registry.
fn check_routine(routine: &Routine, realm: Realm, name: &str) -> Result<(), FrameError> {
    match &routine.kind {
        crate::circuit::RoutineKind::Remote(registered) => {
            if !routine_registered(registered) {
                return Err(FrameError::UnknownRoutine { name: registered.clone() });
            }
        }
        crate::circuit::RoutineKind::Local(_) => {
            if realm == Realm::Parallel {
                return Err(FrameError::RemoteRoutineRequired { name: name.to_string() });
            }
        }
    }
    Ok(())
}

macro_rules! hook_setters {
    () => {
        /// Registers the `on_open` hook. Pre-start only.
        pub fn set_on_open(&self, hook: EventHook) -> Result<(), FrameError> {
            self.node()?.with_hooks(|h| h.on_open = Some(hook))
        }

        /// Registers the `on_start` hook. Pre-start only.
        pub fn set_on_start(&self, hook: EventHook) -> Result<(), FrameError> {
            self.node()?.with_hooks(|h| h.on_start = Some(hook))
        }

        /// Registers the `on_end` hook. Pre-start only.
        pub fn set_on_end(&self, hook: EventHook) -> Result<(), FrameError> {
            self.node()?.with_hooks(|h| h.on_end = Some(hook))
        }

        /// Registers the `on_close` hook. Pre-start only.
        pub fn set_on_close(&self, hook: EventHook) -> Result<(), FrameError> {
            self.node()?.with_hooks(|h| h.on_close = Some(hook))
        }

        /// Registers the `on_redo` hook. Pre-start only.
        pub fn set_on_redo(&self, hook: RedoHook) -> Result<(), FrameError> {
            self.node()?.with_hooks(|h| h.on_redo = Some(hook))
        }

        /// Registers the `on_exception` hook. Pre-start only.
        pub fn set_on_exception(&self, hook: ExceptionHook) -> Result<(), FrameError> {
            self.node()?.with_hooks(|h| h.on_exception = Some(hook))
        }

        /// True when this frame accepts handlers.
        pub fn supports_handlers(&self) -> bool {
            self.node().map(|n| n.handler_capable).unwrap_or(false)
        }
    };
}

/// A child frame created by a context, before launch.
///
/// Subframes cannot start themselves; hand them to
/// [`Context::start_subframes`](crate::frame::Context::start_subframes).
pub struct SubFrame {
    arena: Arc<FrameArena>,
    id: FrameId,
    owner: FrameId,
    name: String,
    qualname: String,
}

impl SubFrame {
    pub(crate) fn new(arena: Arc<FrameArena>, id: FrameId, owner: FrameId) -> Self {
        let (name, qualname) = match arena.get(id) {
            Some(node) => (node.name.clone(), node.qualname.clone()),
            None => (String::new(), String::new()),
        };
        Self { arena, id, owner, name, qualname }
    }

    /// Frame name (unique among siblings).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Dotted path from the root frame.
    pub fn qualname(&self) -> &str {
        &self.qualname
    }

    pub(crate) fn id(&self) -> FrameId {
        self.id
    }

    pub(crate) fn owner(&self) -> FrameId {
        self.owner
    }

    fn node(&self) -> Result<Arc<FrameNode>, FrameError> {
        self.arena
            .get(self.id)
            .ok_or_else(|| FrameError::UnknownFrame { name: self.name.clone() })
    }

    hook_setters!();
}

/// A root frame: the pre-start builder and entry point of one frame tree.
pub struct RootFrame {
    arena: Arc<FrameArena>,
    tree: Arc<TreeChannels>,
    id: FrameId,
    name: String,
    config: Config,
    subscribers: Vec<Arc<dyn Subscribe>>,
    session_name: Option<String>,
}

impl std::fmt::Debug for RootFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootFrame")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("session_name", &self.session_name)
            .field("subscribers", &self.subscribers.len())
            .finish_non_exhaustive()
    }
}

impl RootFrame {
    /// Frame name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Dotted path; for a root frame this equals the name.
    pub fn qualname(&self) -> &str {
        &self.name
    }

    /// Replaces the runtime configuration this tree will use.
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Attaches event subscribers; the session spawns their dispatcher.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Names the session `start()` will return.
    pub fn with_session_name(mut self, name: impl Into<String>) -> Self {
        self.session_name = Some(name.into());
        self
    }

    /// Defines initial `environment` values. Pre-start only; the channel is
    /// fixed once the frame starts.
    pub fn set_environments<K, I>(&self, values: I) -> Result<(), FrameError>
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let node = self.node()?;
        node.phase.while_load(&self.name, || -> Result<(), FrameError> {
            for (key, value) in values {
                self.tree.environment.define(&key.into(), value)?;
            }
            Ok(())
        })?
    }

    /// Defines initial `request` values. Pre-start only; the owning session
    /// keeps full control afterwards.
    pub fn set_requests<K, I>(&self, values: I) -> Result<(), FrameError>
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let node = self.node()?;
        node.phase.while_load(&self.name, || -> Result<(), FrameError> {
            for (key, value) in values {
                self.tree.request.define(&key.into(), value)?;
            }
            Ok(())
        })?
    }

    /// Defines initial `common` values. Pre-start only; the session defines
    /// further keys and frames update them afterwards.
    pub fn set_commons<K, I>(&self, values: I) -> Result<(), FrameError>
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let node = self.node()?;
        node.phase.while_load(&self.name, || -> Result<(), FrameError> {
            for (key, value) in values {
                self.tree.common.define(&key.into(), value)?;
            }
            Ok(())
        })?
    }

    /// Defines an initial opaque `common` value. Pre-start only.
    ///
    /// Opaque values never serialize; a frame tree whose routine crosses a
    /// process boundary will refuse to start with one on a shared channel.
    pub fn set_common_opaque<T: std::any::Any + Send + Sync>(
        &self,
        key: &str,
        value: T,
    ) -> Result<(), FrameError> {
        let node = self.node()?;
        node.phase.while_load(&self.name, || -> Result<(), FrameError> {
            self.tree
                .common
                .define(key, Value::Opaque(crate::messages::OpaqueValue::new(value)))?;
            Ok(())
        })?
    }

    fn node(&self) -> Result<Arc<FrameNode>, FrameError> {
        self.arena
            .get(self.id)
            .ok_or_else(|| FrameError::UnknownFrame { name: self.name.clone() })
    }

    hook_setters!();

    /// Starts the frame and returns the controlling session.
    ///
    /// A frame whose routine crosses a process boundary has its shared
    /// channels validated as serializable first; an opaque value surfaces
    /// here as an encode error, distinct from any type mismatch. A second
    /// start fails with `AlreadyStarted`.
    pub fn start(&self) -> Result<Session, FrameError> {
        let node = self.node()?;

        if node.remote_routine {
            crate::messages::codec::encode_store(&self.tree.environment)?;
            crate::messages::codec::encode_store(&self.tree.request)?;
            crate::messages::codec::encode_store(&self.tree.common)?;
        }

        let bus = Bus::new(self.config.bus_capacity_clamped());
        let subscriber_set = SubscriberSet::spawn(&bus, self.subscribers.clone());

        let shared = Arc::new(ContextShared {
            arena: Arc::clone(&self.arena),
            tree: Arc::clone(&self.tree),
            config: self.config.clone(),
            bus: bus.clone(),
        });

        let session_name =
            self.session_name.clone().unwrap_or_else(|| self.name.clone());
        let store = ResultStore::new(
            session_name,
            vec![(node.id, node.name.clone(), node.qualname.clone())],
            bus.clone(),
        );

        let agent = start_agent(AgentSeed {
            shared,
            node,
            store: Arc::clone(&store),
            parent_cancel: None,
        })?;

        Ok(Session::new_root(
            store,
            vec![agent],
            MessageReader::new(Backend::Mem(Arc::clone(&self.tree.environment))),
            MessageManager::new(Backend::Mem(Arc::clone(&self.tree.request))),
            MessageDefiner::new(Backend::Mem(Arc::clone(&self.tree.common))),
            bus,
            subscriber_set,
        ))
    }
}

/// Creates a root frame.
///
/// The realm comes from `options`; a parallel frame rejects handlers and
/// requires a registered remote routine. With no usable name the factory
/// fails with `NameMissing`.
pub fn create_frame(routine: Routine, options: FrameOptions) -> Result<RootFrame, FrameError> {
    let realm = options.realm;
    let name = derive_name(options.name.as_deref(), &routine)?;
    check_routine(&routine, realm, &name)?;

    let handler_capable = realm == Realm::Concurrent && options.handler;
    let arena = FrameArena::new();
    let id = arena.alloc_id();
    let node = Arc::new(FrameNode {
        id,
        name: name.clone(),
        qualname: name.clone(),
        realm,
        handler_capable,
        remote_routine: routine.is_remote(),
        phase: PhaseCell::new(),
        parent: None,
        children: Mutex::new(Vec::new()),
        hooks: Mutex::new(Default::default()),
        routine: Mutex::new(Some(routine)),
        local: Arc::new(Store::new("local")),
    });
    arena.insert(node);

    Ok(RootFrame {
        arena,
        tree: TreeChannels::new(),
        id,
        name,
        config: Config::default(),
        subscribers: Vec::new(),
        session_name: None,
    })
}

/// Creates a concurrent-realm root frame with handlers enabled.
pub fn create_concurrent_frame(routine: Routine) -> Result<RootFrame, FrameError> {
    create_frame(routine, FrameOptions { handler: true, ..FrameOptions::default() })
}

/// Creates a parallel-realm root frame. No hooks exist in this realm.
pub fn create_parallel_frame(routine: Routine) -> Result<RootFrame, FrameError> {
    create_frame(
        routine,
        FrameOptions { realm: Realm::Parallel, handler: false, ..FrameOptions::default() },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::register_routine_sync;
    use crate::circuit::EventHook;
    use crate::error::ChannelError;

    #[test]
    fn parallel_frames_require_a_registered_remote_routine() {
        let err = create_parallel_frame(Routine::sync(|_ctx| Ok(()))).unwrap_err();
        assert_eq!(err.as_label(), "frame_remote_routine_required");

        let err = create_parallel_frame(Routine::remote("never-registered")).unwrap_err();
        assert_eq!(err.as_label(), "routine_unknown");
    }

    #[test]
    fn parallel_frames_reject_handlers() {
        register_routine_sync("builder-test-noop", |_ctx| Ok(())).unwrap();
        let root = create_parallel_frame(Routine::remote("builder-test-noop")).unwrap();
        assert!(!root.supports_handlers());
        let err = root.set_on_open(EventHook::sync(|_ctx| Ok(()))).unwrap_err();
        assert_eq!(err.as_label(), "frame_handler_incapable");
    }

    #[test]
    fn unserializable_shared_values_fail_the_start_not_the_worker() {
        register_routine_sync("builder-test-opaque", |_ctx| Ok(())).unwrap();
        let root = create_parallel_frame(Routine::remote("builder-test-opaque")).unwrap();
        root.set_common_opaque("pool", vec![1u8, 2, 3]).unwrap();

        // The frame never starts: the boundary check precedes the spawn and
        // reports an encode failure, not a type mismatch.
        let err = root.start().unwrap_err();
        match err {
            FrameError::Channel(ChannelError::Encode { channel, key, .. }) => {
                assert_eq!(channel, "common");
                assert_eq!(key, "pool");
            }
            other => panic!("expected an encode error, got {other}"),
        }
        // The failed validation leaves the frame in its load phase; a later
        // fix could still start it.
        assert!(root.node().is_ok());
    }

    #[test]
    fn initial_values_are_rejected_after_start() {
        let root = create_frame(
            Routine::sync(|_ctx| Ok(())),
            FrameOptions::named("sealed"),
        )
        .unwrap();
        root.set_environments([("limit", Value::Int(1))]).unwrap();
        let session = root.start().unwrap();
        session.wait_done(Some(std::time::Duration::from_secs(5)));

        let err = root.set_environments([("late", Value::Int(2))]).unwrap_err();
        assert_eq!(err.as_label(), "frame_already_started");
        let err = root.set_requests([("late", Value::Int(2))]).unwrap_err();
        assert_eq!(err.as_label(), "frame_already_started");
    }

    #[test]
    fn duplicate_initial_keys_are_rejected() {
        let root =
            create_frame(Routine::sync(|_ctx| Ok(())), FrameOptions::named("dupkeys")).unwrap();
        root.set_environments([("limit", Value::Int(1))]).unwrap();
        let err = root.set_environments([("limit", Value::Int(2))]).unwrap_err();
        assert_eq!(err.as_label(), "channel_key_defined");
    }
}
