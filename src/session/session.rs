//! # Session: the caller-held control handle over running frames.
//!
//! A [`Session`] controls one root frame; a [`SubSession`] controls the
//! subframes one routine launched. Both share the coordination surface:
//! polling, blocking waits, result accessors with at-most-once delivery, and
//! the fault-consumption protocol.
//!
//! ## Two control styles
//! Bulk wait:
//! ```no_run
//! # fn demo(session: framevisor::Session) -> Result<(), framevisor::CollectedError> {
//! session.wait_done_and_collect(None)?;
//! # Ok(()) }
//! ```
//!
//! Polling:
//! ```no_run
//! # fn handle(_e: &framevisor::UncheckedError) {}
//! # fn demo(session: framevisor::Session) {
//! while session.running() {
//!     if let Some(fault) = session.take_fault() {
//!         handle(&fault);
//!         fault.check();
//!     }
//!     std::thread::sleep(std::time::Duration::from_millis(100));
//! }
//! # }
//! ```
//!
//! ## Scope exit
//! Dropping a session finalizes its [`SessionResult`]. Unresolved failures
//! at that point produce a best-effort warning (stderr + bus event) unless
//! [`abandon_unresolved`](Session::abandon_unresolved) was called — the
//! suppression is one-way. A sub-session's summary rolls up into the parent
//! frame's own result.

use std::sync::Arc;
use std::time::Duration;

use crate::agent::AgentHandle;
use crate::error::{CollectedError, FrameError, FrameFailure, UncheckedError};
use crate::events::{Bus, Event, EventKind};
use crate::messages::{MessageDefiner, MessageManager, MessageReader};
use crate::session::result::{FrameResult, SessionResult};
use crate::session::store::{ResolveHandle, ResultStore};
use crate::subscribers::SubscriberSet;

macro_rules! coordination_api {
    () => {
        /// Current session name (log correlation).
        pub fn session_name(&self) -> String {
            self.store.session_name()
        }

        /// Renames this session.
        pub fn set_session_name(&self, name: impl Into<String>) {
            self.store.set_session_name(name.into());
        }

        /// True until every bound frame has produced its result.
        pub fn running(&self) -> bool {
            self.store.running()
        }

        /// Blocks until all bound frames finish or `timeout` elapses.
        ///
        /// Returns `true` when everything finished. A timeout is never an
        /// error; `running()` may still be true afterwards and the caller
        /// decides what that means.
        pub fn wait_done(&self, timeout: Option<Duration>) -> bool {
            self.store.wait_done(timeout)
        }

        /// Waits like [`wait_done`](Self::wait_done), then surfaces every
        /// failure still unresolved as one [`CollectedError`], resolving
        /// them in the same step.
        pub fn wait_done_and_collect(
            &self,
            timeout: Option<Duration>,
        ) -> Result<(), CollectedError> {
            self.store.wait_done(timeout);
            self.collect_if_faulted()
        }

        /// Surfaces every unresolved failure as one [`CollectedError`],
        /// resolving them in the same step. No-op when none exist.
        pub fn collect_if_faulted(&self) -> Result<(), CollectedError> {
            let failures = self.store.drain(true);
            if failures.is_empty() {
                return Ok(());
            }
            self.store.note_aggregate_raised();
            Err(CollectedError::new(self.store.session_name(), failures))
        }

        /// True while any failure remains unresolved.
        pub fn faulted(&self) -> bool {
            self.store.faulted()
        }

        /// Returns one not-yet-returned broken frame result, if any.
        ///
        /// At-most-once per result: a result this accessor returned is never
        /// returned by it again.
        pub fn get_broken_frame(&self) -> Option<Arc<FrameResult>> {
            self.store.next_broken()
        }

        /// Returns one not-yet-returned successful frame result, if any.
        pub fn get_successful_frame(&self) -> Option<Arc<FrameResult>> {
            self.store.next_successful()
        }

        /// Returns one not-yet-returned finished frame result, if any,
        /// broken or not.
        pub fn get_finished_frame(&self) -> Option<Arc<FrameResult>> {
            self.store.next_finished()
        }

        /// Every broken result the single-item accessor has not yet
        /// delivered. Does not consume them.
        pub fn get_all_broken_frames(&self) -> Vec<Arc<FrameResult>> {
            self.store.all_broken()
        }

        /// Every successful result the single-item accessor has not yet
        /// delivered. Does not consume them.
        pub fn get_all_successful_frames(&self) -> Vec<Arc<FrameResult>> {
            self.store.all_successful()
        }

        /// Every finished result the single-item accessor has not yet
        /// delivered. Does not consume them.
        pub fn get_all_finished_frames(&self) -> Vec<Arc<FrameResult>> {
            self.store.all_finished()
        }

        /// Yields one frame failure wrapped for the consumption protocol.
        ///
        /// Each underlying failure is yielded at most once through this
        /// path, resolved or not — repeated polling never hands out the same
        /// fault twice. Call [`UncheckedError::check`] to resolve it;
        /// `faulted()` keeps reporting it until something does.
        pub fn take_fault(&self) -> Option<UncheckedError> {
            let (id, name, failure) = self.store.take_fault(false)?;
            Some(UncheckedError::new(name, failure, ResolveHandle::new(&self.store, id)))
        }

        /// Like [`take_fault`](Self::take_fault) but yields the original
        /// failure directly and resolves it in the same step.
        pub fn take_fault_unwrapped(&self) -> Option<(String, Arc<FrameFailure>)> {
            let (_, name, failure) = self.store.take_fault(true)?;
            Some((name, failure))
        }

        /// Returns every unresolved failure, resolving them.
        pub fn drain(&self) -> Vec<(String, Arc<FrameFailure>)> {
            self.store.drain(true)
        }

        /// Returns every unresolved failure without resolving them.
        pub fn peek_drain(&self) -> Vec<(String, Arc<FrameFailure>)> {
            self.store.drain(false)
        }

        /// Suppresses the scope-exit warning for everything left
        /// unresolved. One-way: there is no way to re-enable it. Intended
        /// for the moment a caller gives up on frames that did not stop in
        /// time.
        pub fn abandon_unresolved(&self, log: bool) {
            self.store.abandon(log);
        }

        /// Non-consuming peek at one frame: `(running, failure)`.
        ///
        /// The failure, if any, stays unresolved.
        pub fn get_frame_status(
            &self,
            name: &str,
        ) -> Result<(bool, Option<Arc<FrameFailure>>), FrameError> {
            self.store.status(name)
        }

        /// Releases a finished frame's bookkeeping, for sessions that spawn
        /// and retire frames repeatedly.
        ///
        /// Fails with `StillRunning` on a live frame. An unresolved failure
        /// is warned about unless `suppress`; `log` additionally prints it.
        pub fn clear_ended_frame(
            &self,
            name: &str,
            suppress: bool,
            log: bool,
        ) -> Result<(), FrameError> {
            self.store.clear_ended(name, suppress, log)
        }

        /// Offers a cooperative stop to every bound frame.
        ///
        /// Advisory only: loop tasks observe it between suspension points,
        /// worker processes get a stop message and then `stop_grace`. With
        /// `force`, worker processes are killed outright instead. Nothing
        /// forcibly ends a loop thread; be prepared for `wait_done` to time
        /// out regardless.
        pub fn offer_frame_stop(&self, force: bool) {
            self.bus.publish(
                Event::now(EventKind::CancelOffered)
                    .with_frame(self.store.session_name())
                    .with_reason(if force { "force" } else { "cooperative" }),
            );
            for agent in &self.agents {
                agent.cancel(force);
            }
        }

        /// Computes the current scope summary without closing the scope.
        pub fn summary(&self) -> SessionResult {
            self.store.finalize(false)
        }
    };
}

/// Control handle over a started root frame.
pub struct Session {
    store: Arc<ResultStore>,
    agents: Vec<Arc<AgentHandle>>,
    environment: MessageReader,
    request: MessageManager,
    common: MessageDefiner,
    bus: Bus,
    /// Keeps the event dispatcher alive for the session's lifetime.
    _subscribers: SubscriberSet,
    finalized: bool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("agents", &self.agents.len())
            .field("finalized", &self.finalized)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub(crate) fn new_root(
        store: Arc<ResultStore>,
        agents: Vec<Arc<AgentHandle>>,
        environment: MessageReader,
        request: MessageManager,
        common: MessageDefiner,
        bus: Bus,
        subscribers: SubscriberSet,
    ) -> Self {
        Self {
            store,
            agents,
            environment,
            request,
            common,
            bus,
            _subscribers: subscribers,
            finalized: false,
        }
    }

    coordination_api!();

    /// Read-only view of the environment channel.
    pub fn environment(&self) -> MessageReader {
        self.environment.clone()
    }

    /// Full-control view of the request channel: define and update for the
    /// session's whole lifetime.
    pub fn request(&self) -> MessageManager {
        self.request.clone()
    }

    /// Define-capable view of the common channel; frames do the updating.
    pub fn common(&self) -> MessageDefiner {
        self.common.clone()
    }

    /// Closes the scope explicitly and returns its summary.
    ///
    /// Equivalent to dropping the session, but hands back the
    /// [`SessionResult`].
    pub fn finish(mut self) -> SessionResult {
        self.finalized = true;
        self.store.finalize(true)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.finalized {
            let _ = self.store.finalize(true);
        }
    }
}

/// Control handle over one routine's launched subframes.
///
/// Channel access goes through the routine's [`Context`]; this handle only
/// coordinates. Its summary rolls up into the owning frame's result when the
/// scope closes.
///
/// [`Context`]: crate::frame::Context
pub struct SubSession {
    store: Arc<ResultStore>,
    agents: Vec<Arc<AgentHandle>>,
    bus: Bus,
    sink: Arc<dyn Fn(SessionResult) + Send + Sync>,
    finalized: bool,
}

impl SubSession {
    pub(crate) fn new(
        store: Arc<ResultStore>,
        agents: Vec<Arc<AgentHandle>>,
        sink: Arc<dyn Fn(SessionResult) + Send + Sync>,
    ) -> Self {
        let bus = store.bus().clone();
        Self { store, agents, bus, sink, finalized: false }
    }

    coordination_api!();

    /// Closes the scope explicitly and returns its summary. The summary
    /// still rolls up into the owning frame's result.
    pub fn finish(mut self) -> SessionResult {
        self.finalized = true;
        let summary = self.store.finalize(true);
        (self.sink)(summary.clone());
        summary
    }
}

impl Drop for SubSession {
    fn drop(&mut self) {
        if !self.finalized {
            let summary = self.store.finalize(true);
            (self.sink)(summary);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use crate::circuit::{EventHook, RedoHook, Routine};
    use crate::error::{BoxError, FrameError};
    use crate::frame::{create_concurrent_frame, create_frame, Context, FrameOptions, Realm};
    use crate::session::Mark;

    #[derive(Debug, thiserror::Error)]
    #[error("boom: {0}")]
    struct Boom(&'static str);

    fn ok_routine(_ctx: Context) -> Result<(), BoxError> {
        Ok(())
    }

    #[test]
    fn redo_runs_the_cycle_until_the_hook_declines() {
        let starts = Arc::new(AtomicU32::new(0));
        let runs = Arc::new(AtomicU32::new(0));
        let ends = Arc::new(AtomicU32::new(0));
        let closes = Arc::new(AtomicU32::new(0));
        let redos = Arc::new(AtomicU32::new(0));

        let runs_in = Arc::clone(&runs);
        let root = create_frame(
            Routine::sync(move |_ctx| {
                runs_in.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
            FrameOptions::named("redoer"),
        )
        .unwrap();

        let starts_in = Arc::clone(&starts);
        root.set_on_start(EventHook::sync(move |_ctx| {
            starts_in.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }))
        .unwrap();
        let ends_in = Arc::clone(&ends);
        root.set_on_end(EventHook::sync(move |_ctx| {
            ends_in.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }))
        .unwrap();
        let closes_in = Arc::clone(&closes);
        root.set_on_close(EventHook::sync(move |_ctx| {
            closes_in.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }))
        .unwrap();
        // Redo twice, then stop: three full cycles.
        let redos_in = Arc::clone(&redos);
        root.set_on_redo(RedoHook::sync(move |_ctx| {
            Ok(redos_in.fetch_add(1, Ordering::SeqCst) < 2)
        }))
        .unwrap();

        let session = root.start().unwrap();
        assert!(session.wait_done(Some(Duration::from_secs(5))));

        let result = session.get_finished_frame().expect("result published");
        assert_eq!(result.cycles(), 3);
        assert!(result.successful());
        assert_eq!(starts.load(Ordering::SeqCst), 3);
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert_eq!(ends.load(Ordering::SeqCst), 3);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        session.abandon_unresolved(false);
    }

    #[test]
    fn double_start_fails_and_phase_never_regresses() {
        let root = create_frame(Routine::sync(ok_routine), FrameOptions::named("once")).unwrap();
        let session = root.start().unwrap();
        assert!(session.wait_done(Some(Duration::from_secs(5))));

        let err = root.start().unwrap_err();
        assert_eq!(err.as_label(), "frame_already_started");
    }

    #[test]
    fn broken_frame_carries_the_original_error() {
        let root = create_frame(
            Routine::sync(|_ctx| Err(Box::new(Boom("routine")) as BoxError)),
            FrameOptions::named("breaker"),
        )
        .unwrap();
        let session = root.start().unwrap();
        assert!(session.wait_done(Some(Duration::from_secs(5))));

        let broken = session.get_broken_frame().expect("one broken frame");
        let failure = broken.get_error().expect("failure recorded");
        assert!(failure.source_as::<Boom>().is_some());
        assert!(!broken.successful());
        // At-most-once delivery for the single-item accessor.
        assert!(session.get_broken_frame().is_none());
        session.abandon_unresolved(false);
    }

    #[test]
    fn exception_hook_suppresses_a_failure() {
        let root = create_frame(
            Routine::sync(|_ctx| Err(Box::new(Boom("suppress me")) as BoxError)),
            FrameOptions::named("handled"),
        )
        .unwrap();
        root.set_on_exception(crate::circuit::ExceptionHook::sync(|_ctx, failure| {
            Ok(failure.source_as::<Boom>().is_some())
        }))
        .unwrap();

        let session = root.start().unwrap();
        assert!(session.wait_done(Some(Duration::from_secs(5))));
        let result = session.get_finished_frame().expect("result published");
        assert!(result.successful());
        assert!(!session.faulted());
    }

    #[test]
    fn open_failure_still_runs_shielded_close() {
        let closes = Arc::new(AtomicU32::new(0));
        let root = create_frame(Routine::sync(ok_routine), FrameOptions::named("openfail"))
            .unwrap();
        root.set_on_open(EventHook::sync(|_ctx| Err(Box::new(Boom("open")) as BoxError)))
            .unwrap();
        let closes_in = Arc::clone(&closes);
        root.set_on_close(EventHook::sync(move |_ctx| {
            closes_in.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }))
        .unwrap();

        let session = root.start().unwrap();
        assert!(session.wait_done(Some(Duration::from_secs(5))));
        let result = session.get_broken_frame().expect("open failure breaks the frame");
        // No cycle ever started, close still ran exactly once.
        assert_eq!(result.cycles(), 0);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        session.abandon_unresolved(false);
    }

    #[test]
    fn routine_panic_becomes_a_failure_not_a_crash() {
        let root = create_frame(
            Routine::sync(|_ctx| panic!("kaboom")),
            FrameOptions::named("panicker"),
        )
        .unwrap();
        let session = root.start().unwrap();
        assert!(session.wait_done(Some(Duration::from_secs(5))));
        let broken = session.get_broken_frame().expect("panic breaks the frame");
        assert!(broken.get_error().map(|f| f.is_panic()).unwrap_or(false));
        session.abandon_unresolved(false);
    }

    #[test]
    fn wait_done_with_zero_timeout_never_errors() {
        let root = create_frame(
            Routine::new(|_ctx| async {
                tokio::time::sleep(Duration::from_millis(300)).await;
                Ok(())
            }),
            FrameOptions::named("sleeper"),
        )
        .unwrap();
        let session = root.start().unwrap();

        assert!(!session.wait_done(Some(Duration::ZERO)));
        assert!(session.running());
        assert!(session.wait_done(Some(Duration::from_secs(5))));
        assert!(!session.running());
    }

    #[test]
    fn take_fault_yields_each_failure_once_but_faulted_persists() {
        let root = create_frame(
            Routine::sync(|_ctx| Err(Box::new(Boom("sticky")) as BoxError)),
            FrameOptions::named("sticky"),
        )
        .unwrap();
        let session = root.start().unwrap();
        session.wait_done(Some(Duration::from_secs(5)));

        let fault = session.take_fault().expect("first take yields the fault");
        // Never yielded twice through this path, resolved or not.
        assert!(session.take_fault().is_none());
        assert!(session.faulted());

        fault.check();
        assert!(!session.faulted());
        assert!(session.collect_if_faulted().is_ok());
    }

    #[test]
    fn drain_resolves_and_peek_does_not() {
        let root = create_frame(
            Routine::sync(|_ctx| Err(Box::new(Boom("drainable")) as BoxError)),
            FrameOptions::named("drainme"),
        )
        .unwrap();
        let session = root.start().unwrap();
        session.wait_done(Some(Duration::from_secs(5)));

        assert_eq!(session.peek_drain().len(), 1);
        assert!(session.faulted());
        let drained = session.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].0, "drainme");
        assert!(!session.faulted());
        assert!(session.drain().is_empty());
    }

    #[test]
    fn collect_surfaces_everything_unresolved() {
        let root = create_frame(
            Routine::sync(|_ctx| Err(Box::new(Boom("collect")) as BoxError)),
            FrameOptions::named("collectme"),
        )
        .unwrap();
        let session = root.start().unwrap();
        let err = session.wait_done_and_collect(Some(Duration::from_secs(5))).unwrap_err();
        assert_eq!(err.failures().len(), 1);
        // Collection resolved the failure and counts as the scope raising.
        assert!(!session.faulted());
        let summary = session.finish();
        assert!(!summary.completes());
    }

    #[test]
    fn ignored_mark_unblocks_completion_without_making_it_successful() {
        let root = create_frame(
            Routine::sync(|_ctx| Err(Box::new(Boom("ignored")) as BoxError)),
            FrameOptions::named("ignorable"),
        )
        .unwrap();
        let session = root.start().unwrap();
        session.wait_done(Some(Duration::from_secs(5)));

        let broken = session.get_broken_frame().expect("broken frame");
        broken.mark_as_ignored().unwrap();
        assert!(!broken.successful());
        assert_eq!(broken.mark(), Mark::Ignored);
        // Same mark again: no-op. Conflicting mark: rejected.
        broken.mark_as_ignored().unwrap();
        let err = broken.mark_as_unexpected("late severity").unwrap_err();
        assert_eq!(err.as_label(), "frame_mark_conflict");

        assert!(!session.faulted());
        let summary = session.finish();
        assert!(summary.completes());
        assert_eq!(summary.broken_frames(), ["ignorable"]);
    }

    #[test]
    fn unexpected_mark_blocks_completion() {
        let root = create_frame(
            Routine::sync(|_ctx| Err(Box::new(Boom("severe")) as BoxError)),
            FrameOptions::named("severe"),
        )
        .unwrap();
        let session = root.start().unwrap();
        session.wait_done(Some(Duration::from_secs(5)));

        let broken = session.get_broken_frame().expect("broken frame");
        broken.mark_as_unexpected("must surface").unwrap();
        // Unlike an ignored mark, the failure stays live for the scope exit.
        assert!(session.faulted());
        let err = session.collect_if_faulted().unwrap_err();
        assert_eq!(err.failures().len(), 1);
        let summary = session.finish();
        assert!(!summary.completes());
        assert_eq!(summary.unexpected(), [("severe".to_string(), "must surface".to_string())]);
    }

    #[test]
    fn subframe_failures_roll_up_into_the_parent_result() {
        fn parent(ctx: Context) -> Result<(), BoxError> {
            let bad = ctx
                .define_subframe(
                    Routine::sync(|_ctx| Err(Box::new(Boom("child")) as BoxError)),
                    FrameOptions::named("child"),
                )
                .map_err(Box::new)?;
            let sub = ctx.start_subframes(vec![bad]).map_err(Box::new)?;
            sub.wait_done(Some(Duration::from_secs(5)));
            // Leave the child's failure unresolved: the scope summary must
            // mark the parent as incomplete.
            Ok(())
        }

        let root = create_frame(Routine::sync(parent), FrameOptions::named("tree")).unwrap();
        let session = root.start().unwrap();
        assert!(session.wait_done(Some(Duration::from_secs(10))));

        let result = session.get_broken_frame().expect("nested incompleteness breaks the root");
        assert!(result.get_error().is_none());
        let nested = result.nested().expect("sub-scope summary embedded");
        assert!(!nested.completes());
        session.abandon_unresolved(false);
    }

    #[test]
    fn resolved_subframe_failures_leave_the_parent_successful() {
        fn parent(ctx: Context) -> Result<(), BoxError> {
            let bad = ctx
                .define_subframe(
                    Routine::sync(|_ctx| Err(Box::new(Boom("child")) as BoxError)),
                    FrameOptions::named("child"),
                )
                .map_err(Box::new)?;
            let sub = ctx.start_subframes(vec![bad]).map_err(Box::new)?;
            sub.wait_done(Some(Duration::from_secs(5)));
            let drained = sub.drain();
            if drained.len() != 1 {
                return Err(Box::new(Boom("expected one child failure")));
            }
            Ok(())
        }

        let root = create_frame(Routine::sync(parent), FrameOptions::named("tended")).unwrap();
        let session = root.start().unwrap();
        assert!(session.wait_done(Some(Duration::from_secs(10))));

        let result = session.get_successful_frame().expect("drained child failure resolves");
        // Broken children stay visible in the summary even once resolved.
        let nested = result.nested().expect("sub-scope summary embedded");
        assert!(nested.completes());
        assert_eq!(nested.broken_frames().len(), 1);
    }

    #[test]
    fn single_item_accessors_dedup_and_batch_variants_resurface() {
        fn parent(ctx: Context) -> Result<(), BoxError> {
            let good = ctx
                .define_subframe(Routine::sync(ok_routine), FrameOptions::named("good"))
                .map_err(Box::new)?;
            let bad = ctx
                .define_subframe(
                    Routine::sync(|_ctx| Err(Box::new(Boom("bad")) as BoxError)),
                    FrameOptions::named("bad"),
                )
                .map_err(Box::new)?;
            let sub = ctx.start_subframes(vec![good, bad]).map_err(Box::new)?;
            sub.wait_done(Some(Duration::from_secs(5)));

            if sub.get_all_broken_frames().len() != 1 {
                return Err(Box::new(Boom("expected one broken before draining")));
            }
            let broken = sub.get_broken_frame().ok_or(Boom("missing broken"))?;
            if broken.frame_name() != "bad" || sub.get_broken_frame().is_some() {
                return Err(Box::new(Boom("broken accessor must dedup")));
            }
            // Drained through the single-item accessor: the batch variant no
            // longer resurfaces it.
            if !sub.get_all_broken_frames().is_empty() {
                return Err(Box::new(Boom("batch resurfaced a drained result")));
            }
            let successful = sub.get_successful_frame().ok_or(Boom("missing successful"))?;
            if successful.frame_name() != "good" {
                return Err(Box::new(Boom("wrong successful frame")));
            }
            sub.abandon_unresolved(false);
            Ok(())
        }

        let root = create_frame(Routine::sync(parent), FrameOptions::named("dedup")).unwrap();
        let session = root.start().unwrap();
        assert!(session.wait_done(Some(Duration::from_secs(10))));
        let result = session.get_finished_frame().expect("root finished");
        assert!(result.get_error().is_none(), "in-frame assertions failed: {:?}", result.get_error());
    }

    #[test]
    fn environment_is_readable_and_requests_flow_down() {
        fn reader(ctx: Context) -> Result<(), BoxError> {
            let limit: i64 = ctx.environment().get("limit")?;
            if limit != 10 {
                return Err(Box::new(Boom("wrong limit")));
            }
            ctx.common().set("seen", limit)?;
            Ok(())
        }

        let root = create_frame(Routine::sync(reader), FrameOptions::named("envread")).unwrap();
        root.set_environments([("limit", crate::messages::Value::Int(10))]).unwrap();
        root.set_commons([("seen", crate::messages::Value::Int(0))]).unwrap();

        let session = root.start().unwrap();
        assert!(session.wait_done(Some(Duration::from_secs(5))));
        assert!(session.get_finished_frame().expect("finished").successful());
        // The session reads what the frame reported through common.
        assert_eq!(session.common().get::<i64>("seen").unwrap(), 10);
    }

    #[test]
    fn cooperative_stop_is_advisory_and_close_stays_shielded() {
        let closes = Arc::new(AtomicU32::new(0));
        let root = create_frame(
            Routine::new(|ctx: Context| async move {
                ctx.stop_requested().await;
                Ok(())
            }),
            FrameOptions::named("stoppable"),
        )
        .unwrap();
        let closes_in = Arc::clone(&closes);
        root.set_on_close(EventHook::sync(move |_ctx| {
            closes_in.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }))
        .unwrap();
        let session = root.start().unwrap();
        assert!(!session.wait_done(Some(Duration::from_millis(50))));

        session.offer_frame_stop(false);
        assert!(session.wait_done(Some(Duration::from_secs(5))));
        let result = session.get_finished_frame().expect("finished");
        // A cooperative stop is a graceful exit, not a failure, and the
        // shielded close still ran.
        assert!(result.get_error().is_none());
        assert!(!session.faulted());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn close_failure_is_terminal_only_without_a_pending_error() {
        // Clean cycle, failing close: the close error is the terminal one.
        let root = create_frame(Routine::sync(ok_routine), FrameOptions::named("badclose"))
            .unwrap();
        root.set_on_close(EventHook::sync(|_ctx| Err(Box::new(Boom("close")) as BoxError)))
            .unwrap();
        let session = root.start().unwrap();
        session.wait_done(Some(Duration::from_secs(5)));
        let broken = session.get_broken_frame().expect("close failure breaks the frame");
        let failure = broken.get_error().expect("failure recorded");
        assert_eq!(failure.stage, crate::error::FailureStage::Close);
        session.abandon_unresolved(false);

        // Failing routine and failing close: the routine error wins and the
        // close failure is kept as context.
        let root = create_frame(
            Routine::sync(|_ctx| Err(Box::new(Boom("routine")) as BoxError)),
            FrameOptions::named("bothfail"),
        )
        .unwrap();
        root.set_on_close(EventHook::sync(|_ctx| Err(Box::new(Boom("close")) as BoxError)))
            .unwrap();
        let session = root.start().unwrap();
        session.wait_done(Some(Duration::from_secs(5)));
        let broken = session.get_broken_frame().expect("routine failure breaks the frame");
        let failure = broken.get_error().expect("failure recorded");
        assert_eq!(failure.stage, crate::error::FailureStage::Routine);
        assert!(failure.close_failure().is_some());
        session.abandon_unresolved(false);
    }

    #[test]
    fn frame_status_and_clearing() {
        let root = create_frame(
            Routine::sync(|_ctx| Err(Box::new(Boom("status")) as BoxError)),
            FrameOptions::named("inspectable"),
        )
        .unwrap();
        let session = root.start().unwrap();
        session.wait_done(Some(Duration::from_secs(5)));

        let (running, failure) = session.get_frame_status("inspectable").unwrap();
        assert!(!running);
        assert!(failure.is_some());
        // Status is non-consuming: the failure stays unresolved.
        assert!(session.faulted());

        assert!(matches!(
            session.get_frame_status("nonesuch"),
            Err(FrameError::UnknownFrame { .. })
        ));

        session.clear_ended_frame("inspectable", true, false).unwrap();
        assert!(!session.running());
        assert!(!session.faulted());
        assert!(matches!(
            session.clear_ended_frame("inspectable", true, false),
            Err(FrameError::UnknownFrame { .. })
        ));
    }

    #[test]
    fn handler_setters_reject_incapable_frames() {
        let root = create_frame(
            Routine::sync(ok_routine),
            FrameOptions { name: Some("nohooks".into()), realm: Realm::Concurrent, handler: false },
        )
        .unwrap();
        assert!(!root.supports_handlers());
        let err = root.set_on_open(EventHook::sync(|_ctx| Ok(()))).unwrap_err();
        assert_eq!(err.as_label(), "frame_handler_incapable");
    }

    #[test]
    fn anonymous_routines_need_an_explicit_name() {
        let err = create_concurrent_frame(Routine::sync(|_ctx| Ok(()))).unwrap_err();
        assert_eq!(err.as_label(), "frame_name_missing");

        // A function item carries its own identifier.
        let root = create_concurrent_frame(Routine::sync(ok_routine)).unwrap();
        assert_eq!(root.name(), "ok_routine");
    }

    #[test]
    fn duplicate_sibling_names_and_cross_context_are_rejected() {
        fn parent(ctx: Context) -> Result<(), BoxError> {
            let _first = ctx
                .define_subframe(Routine::sync(ok_routine), FrameOptions::named("twin"))
                .map_err(Box::new)?;
            match ctx.define_subframe(Routine::sync(ok_routine), FrameOptions::named("twin")) {
                Err(FrameError::DuplicateName { .. }) => Ok(()),
                _ => Err(Box::new(Boom("duplicate sibling accepted"))),
            }
        }

        let root = create_frame(Routine::sync(parent), FrameOptions::named("dupes")).unwrap();
        let session = root.start().unwrap();
        assert!(session.wait_done(Some(Duration::from_secs(5))));
        assert!(session.get_finished_frame().expect("finished").successful());
    }

    #[test]
    fn empty_subframe_sets_are_rejected() {
        fn parent(ctx: Context) -> Result<(), BoxError> {
            match ctx.start_subframes(Vec::new()) {
                Err(FrameError::NoSubframes) => Ok(()),
                _ => Err(Box::new(Boom("empty set accepted"))),
            }
        }
        let root = create_frame(Routine::sync(parent), FrameOptions::named("empty")).unwrap();
        let session = root.start().unwrap();
        assert!(session.wait_done(Some(Duration::from_secs(5))));
        assert!(session.get_finished_frame().expect("finished").successful());
    }
}
