//! # Result store: publication, delivery bookkeeping, and fault tags.
//!
//! One store per coordination scope. Agents publish exactly one
//! [`FrameResult`] per frame; sessions read them back through accessors with
//! at-most-once delivery per category, and the fault-consumption protocol
//! lives here as per-failure state tags mutated only under the store's lock:
//!
//! - `resolved` — the failure has been handled (drained, checked, collected,
//!   or marked). Unresolved failures drive `faulted()` and the scope-exit
//!   warning.
//! - `raised` — the failure was already yielded once by `take_fault`; it is
//!   never yielded through that path again, resolved or not.
//!
//! The store's lock is disjoint from every channel lock; a condvar on it
//! backs the blocking waits. Timeout on a wait is never an error.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{FrameError, FrameFailure};
use crate::events::{Bus, Event, EventKind};
use crate::frame::FrameId;
use crate::session::result::{FrameResult, Mark, SessionResult};

/// Per-frame bookkeeping.
struct Entry {
    name: String,
    qualname: String,
    result: Option<Arc<FrameResult>>,
    mark: Mark,
    resolved: bool,
    raised: bool,
    delivered_broken: bool,
    delivered_successful: bool,
    delivered_finished: bool,
    cleared: bool,
}

impl Entry {
    fn new(name: String, qualname: String) -> Self {
        Self {
            name,
            qualname,
            result: None,
            mark: Mark::Unmarked,
            resolved: false,
            raised: false,
            delivered_broken: false,
            delivered_successful: false,
            delivered_finished: false,
            cleared: false,
        }
    }

    fn published(&self) -> Option<&Arc<FrameResult>> {
        if self.cleared {
            None
        } else {
            self.result.as_ref()
        }
    }

    fn failure(&self) -> Option<&Arc<FrameFailure>> {
        self.published().and_then(|r| r.failure.as_ref())
    }

    fn broken(&self) -> bool {
        self.published().map(|r| !r.successful()).unwrap_or(false)
    }
}

/// Accessor categories with independent at-most-once delivery.
#[derive(Clone, Copy)]
enum Delivery {
    Broken,
    Successful,
    Finished,
}

impl Delivery {
    fn matches(&self, entry: &Entry) -> bool {
        match self {
            Delivery::Broken => entry.broken(),
            Delivery::Successful => !entry.broken(),
            Delivery::Finished => true,
        }
    }

    fn delivered(&self, entry: &Entry) -> bool {
        match self {
            Delivery::Broken => entry.delivered_broken,
            Delivery::Successful => entry.delivered_successful,
            Delivery::Finished => entry.delivered_finished,
        }
    }

    fn flag<'a>(&self, entry: &'a mut Entry) -> &'a mut bool {
        match self {
            Delivery::Broken => &mut entry.delivered_broken,
            Delivery::Successful => &mut entry.delivered_successful,
            Delivery::Finished => &mut entry.delivered_finished,
        }
    }
}

struct Inner {
    session_name: String,
    order: Vec<FrameId>,
    entries: HashMap<FrameId, Entry>,
    abandoned: bool,
    raised_aggregate: bool,
}

/// Shared result store of one coordination scope.
pub(crate) struct ResultStore {
    inner: Mutex<Inner>,
    cv: Condvar,
    bus: Bus,
}

impl ResultStore {
    pub(crate) fn new(
        session_name: String,
        bound: Vec<(FrameId, String, String)>,
        bus: Bus,
    ) -> Arc<Self> {
        let mut order = Vec::with_capacity(bound.len());
        let mut entries = HashMap::with_capacity(bound.len());
        for (id, name, qualname) in bound {
            order.push(id);
            entries.insert(id, Entry::new(name, qualname));
        }
        Arc::new(Self {
            inner: Mutex::new(Inner {
                session_name,
                order,
                entries,
                abandoned: false,
                raised_aggregate: false,
            }),
            cv: Condvar::new(),
            bus,
        })
    }

    pub(crate) fn session_name(&self) -> String {
        self.inner.lock().session_name.clone()
    }

    pub(crate) fn bus(&self) -> &Bus {
        &self.bus
    }

    pub(crate) fn set_session_name(&self, name: String) {
        self.inner.lock().session_name = name;
    }

    /// Publishes one frame's result. Exactly-once: a second publication for
    /// the same frame is dropped.
    pub(crate) fn publish(
        self: &Arc<Self>,
        id: FrameId,
        failure: Option<Arc<FrameFailure>>,
        nested: Option<SessionResult>,
        cancelled: bool,
        cycles: u32,
    ) {
        let mut inner = self.inner.lock();
        let Some(entry) = inner.entries.get_mut(&id) else { return };
        if entry.result.is_some() {
            return;
        }
        let outcome = match &failure {
            Some(f) => f.stage.as_str(),
            None if cancelled => "cancelled",
            None => "ok",
        };
        let result = Arc::new(FrameResult {
            id,
            name: entry.name.clone(),
            qualname: entry.qualname.clone(),
            failure,
            nested,
            cancelled,
            cycles,
            store: Arc::downgrade(self),
        });
        let frame = entry.qualname.clone();
        entry.result = Some(result);
        drop(inner);
        self.bus
            .publish(Event::now(EventKind::ResultPublished).with_frame(frame).with_reason(outcome));
        self.cv.notify_all();
    }

    /// True until every bound (and uncleared) frame has published.
    pub(crate) fn running(&self) -> bool {
        let inner = self.inner.lock();
        inner.entries.values().any(|e| !e.cleared && e.result.is_none())
    }

    /// Blocks until all bound frames publish or `timeout` elapses. Returns
    /// `true` when everything finished. Timeout is never an error.
    pub(crate) fn wait_done(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut inner = self.inner.lock();
        loop {
            let running = inner.entries.values().any(|e| !e.cleared && e.result.is_none());
            if !running {
                return true;
            }
            match deadline {
                None => self.cv.wait(&mut inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    if self.cv.wait_for(&mut inner, deadline - now).timed_out() {
                        // Re-check once more before reporting a timeout.
                        let running =
                            inner.entries.values().any(|e| !e.cleared && e.result.is_none());
                        return !running;
                    }
                }
            }
        }
    }

    /// One not-yet-delivered result matching `category`, tagging it
    /// delivered for that category.
    fn next_matching(&self, category: Delivery) -> Option<Arc<FrameResult>> {
        let mut inner = self.inner.lock();
        let order = inner.order.clone();
        for id in order {
            let Some(entry) = inner.entries.get_mut(&id) else { continue };
            if entry.published().is_none() || !category.matches(entry) {
                continue;
            }
            let delivered = category.flag(entry);
            if *delivered {
                continue;
            }
            *delivered = true;
            return entry.result.clone();
        }
        None
    }

    /// Batch accessor: everything matching `category` not yet delivered
    /// through the single-item accessor, without consuming it.
    fn all_matching(&self, category: Delivery) -> Vec<Arc<FrameResult>> {
        let inner = self.inner.lock();
        inner
            .order
            .iter()
            .filter_map(|id| inner.entries.get(id))
            .filter(|e| {
                e.published().is_some() && category.matches(e) && !category.delivered(e)
            })
            .filter_map(|e| e.result.clone())
            .collect()
    }

    pub(crate) fn next_broken(&self) -> Option<Arc<FrameResult>> {
        self.next_matching(Delivery::Broken)
    }

    pub(crate) fn next_successful(&self) -> Option<Arc<FrameResult>> {
        self.next_matching(Delivery::Successful)
    }

    pub(crate) fn next_finished(&self) -> Option<Arc<FrameResult>> {
        self.next_matching(Delivery::Finished)
    }

    pub(crate) fn all_broken(&self) -> Vec<Arc<FrameResult>> {
        self.all_matching(Delivery::Broken)
    }

    pub(crate) fn all_successful(&self) -> Vec<Arc<FrameResult>> {
        self.all_matching(Delivery::Successful)
    }

    pub(crate) fn all_finished(&self) -> Vec<Arc<FrameResult>> {
        self.all_matching(Delivery::Finished)
    }

    /// Yields one failure not yet raised through this path, tagging it
    /// raised. `resolve` additionally tags it resolved in the same step.
    pub(crate) fn take_fault(
        &self,
        resolve: bool,
    ) -> Option<(FrameId, String, Arc<FrameFailure>)> {
        let mut inner = self.inner.lock();
        let order = inner.order.clone();
        for id in order {
            let Some(entry) = inner.entries.get_mut(&id) else { continue };
            if entry.raised || entry.resolved || entry.cleared {
                continue;
            }
            let Some(failure) = entry.failure().cloned() else { continue };
            entry.raised = true;
            if resolve {
                entry.resolved = true;
            }
            return Some((id, entry.name.clone(), failure));
        }
        None
    }

    /// Every unresolved failure; `resolve` tags them resolved.
    pub(crate) fn drain(&self, resolve: bool) -> Vec<(String, Arc<FrameFailure>)> {
        let mut inner = self.inner.lock();
        let order = inner.order.clone();
        let mut out = Vec::new();
        for id in order {
            let Some(entry) = inner.entries.get_mut(&id) else { continue };
            if entry.resolved || entry.cleared {
                continue;
            }
            let Some(failure) = entry.failure().cloned() else { continue };
            if resolve {
                entry.resolved = true;
            }
            out.push((entry.name.clone(), failure));
        }
        out
    }

    /// True when any failure remains unresolved.
    pub(crate) fn faulted(&self) -> bool {
        let inner = self.inner.lock();
        inner
            .entries
            .values()
            .any(|e| !e.resolved && !e.cleared && e.failure().is_some())
    }

    /// Marks a frame's result. First mark wins; the same mark twice is a
    /// no-op; a conflicting mark is rejected.
    ///
    /// `Ignored` resolves the failure — it stops blocking completion and
    /// warnings. `Unexpected` does the opposite: the failure stays live so
    /// the owning root scope surfaces it on exit.
    pub(crate) fn mark(&self, id: FrameId, mark: Mark) -> Result<(), FrameError> {
        let mut inner = self.inner.lock();
        let Some(entry) = inner.entries.get_mut(&id) else {
            return Ok(());
        };
        match (&entry.mark, &mark) {
            (Mark::Unmarked, _) => {
                if matches!(mark, Mark::Ignored) {
                    entry.resolved = true;
                }
                entry.mark = mark;
                Ok(())
            }
            (Mark::Ignored, Mark::Ignored) => Ok(()),
            (Mark::Unexpected(_), Mark::Unexpected(_)) => Ok(()),
            (existing, _) => Err(FrameError::MarkConflict {
                name: entry.name.clone(),
                existing: existing.label(),
            }),
        }
    }

    pub(crate) fn mark_of(&self, id: FrameId) -> Mark {
        let inner = self.inner.lock();
        inner.entries.get(&id).map(|e| e.mark.clone()).unwrap_or(Mark::Unmarked)
    }

    /// Resolves one frame's failure (the `check()` path).
    pub(crate) fn resolve(&self, id: FrameId) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.get_mut(&id) {
            entry.resolved = true;
        }
    }

    /// One-way warning suppression for everything left unresolved.
    pub(crate) fn abandon(&self, log: bool) {
        let mut inner = self.inner.lock();
        inner.abandoned = true;
        if log {
            for entry in inner.entries.values() {
                if !entry.resolved && !entry.cleared {
                    if let Some(failure) = entry.failure() {
                        eprintln!(
                            "[framevisor] abandoning unresolved failure: {} ({failure})",
                            entry.name
                        );
                    }
                }
            }
        }
    }

    /// Non-consuming peek at one frame's state: `(running, failure)`.
    pub(crate) fn status(
        &self,
        name: &str,
    ) -> Result<(bool, Option<Arc<FrameFailure>>), FrameError> {
        let inner = self.inner.lock();
        let entry = inner
            .entries
            .values()
            .find(|e| e.name == name && !e.cleared)
            .ok_or_else(|| FrameError::UnknownFrame { name: name.to_string() })?;
        Ok((entry.result.is_none(), entry.failure().cloned()))
    }

    /// Releases a finished frame's bookkeeping.
    ///
    /// An unresolved failure is warned about (suppressible) and optionally
    /// logged; the abandon flag does not apply here.
    pub(crate) fn clear_ended(
        &self,
        name: &str,
        suppress: bool,
        log: bool,
    ) -> Result<(), FrameError> {
        let mut inner = self.inner.lock();
        let session = inner.session_name.clone();
        let entry = inner
            .entries
            .values_mut()
            .find(|e| e.name == name && !e.cleared)
            .ok_or_else(|| FrameError::UnknownFrame { name: name.to_string() })?;
        if entry.result.is_none() {
            return Err(FrameError::StillRunning { name: name.to_string() });
        }
        if let Some(failure) = entry.failure().cloned() {
            if !entry.resolved {
                if !suppress {
                    eprintln!(
                        "[framevisor] session '{session}': clearing frame '{name}' with an unresolved failure"
                    );
                }
                if log {
                    eprintln!("[framevisor] cleared failure from '{name}': {failure}");
                }
            }
        }
        entry.cleared = true;
        drop(inner);
        self.cv.notify_all();
        Ok(())
    }

    /// Notes that this scope surfaced an aggregate error to its caller.
    pub(crate) fn note_aggregate_raised(&self) {
        self.inner.lock().raised_aggregate = true;
    }

    /// Computes the scope summary and emits the scope-exit warning for
    /// unresolved failures (unless abandoned).
    pub(crate) fn finalize(&self, warn: bool) -> SessionResult {
        let inner = self.inner.lock();
        let mut broken = Vec::new();
        let mut running_at_end = Vec::new();
        let mut unexpected = Vec::new();
        let mut unresolved = 0usize;

        for id in &inner.order {
            let Some(entry) = inner.entries.get(id) else { continue };
            if entry.cleared {
                continue;
            }
            match &entry.result {
                None => running_at_end.push(entry.name.clone()),
                Some(result) => {
                    if !result.successful() {
                        broken.push(entry.name.clone());
                    }
                }
            }
            if entry.failure().is_some() && !entry.resolved {
                unresolved += 1;
            }
            if let Mark::Unexpected(reason) = &entry.mark {
                unexpected.push((entry.name.clone(), reason.clone()));
            }
        }

        let completes = running_at_end.is_empty()
            && unresolved == 0
            && unexpected.is_empty()
            && !inner.raised_aggregate;

        let summary = SessionResult {
            session_name: inner.session_name.clone(),
            completes,
            broken,
            running_at_end,
            unexpected,
        };

        if warn && unresolved > 0 && !inner.abandoned {
            let detail = format!("{unresolved} unresolved failure(s)");
            eprintln!(
                "[framevisor] session '{}' closed with {detail}; mark, drain, or abandon them",
                inner.session_name
            );
            self.bus.publish(
                Event::now(EventKind::UnresolvedWarning)
                    .with_frame(inner.session_name.clone())
                    .with_reason(detail),
            );
        }

        summary
    }
}

/// Resolution handle carried by [`crate::error::UncheckedError`].
#[derive(Clone)]
pub struct ResolveHandle {
    store: Weak<ResultStore>,
    frame: FrameId,
}

impl ResolveHandle {
    pub(crate) fn new(store: &Arc<ResultStore>, frame: FrameId) -> Self {
        Self { store: Arc::downgrade(store), frame }
    }

    pub(crate) fn resolve(&self) {
        if let Some(store) = self.store.upgrade() {
            store.resolve(self.frame);
        }
    }
}

impl std::fmt::Debug for ResolveHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolveHandle").field("frame", &self.frame).finish()
    }
}
