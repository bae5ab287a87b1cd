//! # Post-completion records: `FrameResult` and `SessionResult`.
//!
//! A [`FrameResult`] is created the instant a frame's circuit finishes and
//! never changes afterwards, with one exception: its **mark**. Marks classify
//! how the caller wants the outcome treated:
//!
//! - `Ignored`: the outcome (including a failure) is intentionally
//!   disregarded; it stops blocking the session's completion summary.
//! - `Unexpected(reason)`: the failure is asserted severe; the owning root
//!   session surfaces it on scope exit.
//! - unmarked: a programming omission if the frame failed; the session warns
//!   at scope exit.
//!
//! Marks are terminal: the first mark wins, re-marking with the same mark is
//! a no-op, and a conflicting mark is rejected.
//!
//! A [`SessionResult`] summarizes a whole coordination scope and rolls up
//! into the parent frame's own result, so incompleteness is never lost on the
//! way to the root.

use std::sync::{Arc, Weak};

use crate::error::{FrameError, FrameFailure};
use crate::frame::FrameId;
use crate::session::store::ResultStore;

/// Caller classification of a finished frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mark {
    /// No classification yet.
    Unmarked,
    /// Outcome intentionally disregarded.
    Ignored,
    /// Failure asserted severe; surfaces at the root scope exit.
    Unexpected(String),
}

impl Mark {
    pub(crate) fn label(&self) -> &'static str {
        match self {
            Mark::Unmarked => "unmarked",
            Mark::Ignored => "ignored",
            Mark::Unexpected(_) => "unexpected",
        }
    }
}

/// Immutable record of one finished frame.
#[derive(Debug)]
pub struct FrameResult {
    pub(crate) id: FrameId,
    pub(crate) name: String,
    pub(crate) qualname: String,
    pub(crate) failure: Option<Arc<FrameFailure>>,
    pub(crate) nested: Option<SessionResult>,
    pub(crate) cancelled: bool,
    pub(crate) cycles: u32,
    pub(crate) store: Weak<ResultStore>,
}

impl FrameResult {
    /// Frame name (unique among its siblings).
    pub fn frame_name(&self) -> &str {
        &self.name
    }

    /// Dotted path from the root frame.
    pub fn frame_qualname(&self) -> &str {
        &self.qualname
    }

    /// The terminal failure, if the frame did not stop cleanly.
    pub fn get_error(&self) -> Option<&Arc<FrameFailure>> {
        self.failure.as_ref()
    }

    /// Summary of the subframe scopes this frame's routine opened, if any.
    pub fn nested(&self) -> Option<&SessionResult> {
        self.nested.as_ref()
    }

    /// True when a cooperative cancel ended the frame early.
    pub fn was_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Number of `on_start → routine → on_end` cycles the circuit entered.
    pub fn cycles(&self) -> u32 {
        self.cycles
    }

    /// True iff the frame carries no own error and no nested incompleteness.
    pub fn successful(&self) -> bool {
        self.failure.is_none() && self.nested.as_ref().map_or(true, SessionResult::completes)
    }

    /// The current mark.
    pub fn mark(&self) -> Mark {
        match self.store.upgrade() {
            Some(store) => store.mark_of(self.id),
            None => Mark::Unmarked,
        }
    }

    /// Commits that this outcome — nested incompleteness included — is
    /// intentionally disregarded. The session's completion summary stops
    /// treating the frame as blocking.
    pub fn mark_as_ignored(&self) -> Result<(), FrameError> {
        match self.store.upgrade() {
            Some(store) => store.mark(self.id, Mark::Ignored),
            None => Ok(()),
        }
    }

    /// Commits the opposite: this failure must surface at the owning root
    /// session's scope exit.
    pub fn mark_as_unexpected(&self, reason: impl Into<String>) -> Result<(), FrameError> {
        match self.store.upgrade() {
            Some(store) => store.mark(self.id, Mark::Unexpected(reason.into())),
            None => Ok(()),
        }
    }
}

/// Record of one coordination scope's control outcome.
#[derive(Debug, Clone)]
pub struct SessionResult {
    pub(crate) session_name: String,
    pub(crate) completes: bool,
    pub(crate) broken: Vec<String>,
    pub(crate) running_at_end: Vec<String>,
    pub(crate) unexpected: Vec<(String, String)>,
}

impl SessionResult {
    /// Name of the scope this summarizes.
    pub fn session_name(&self) -> &str {
        &self.session_name
    }

    /// True iff every bound frame stopped, no failure was left unresolved,
    /// nothing was marked unexpected, and the scope's own control logic
    /// raised nothing.
    pub fn completes(&self) -> bool {
        self.completes
    }

    /// Names of frames that finished broken (own error or nested
    /// incompleteness), whether or not they were later resolved.
    pub fn broken_frames(&self) -> &[String] {
        &self.broken
    }

    /// Names of frames still running when control ended.
    pub fn running_at_end(&self) -> &[String] {
        &self.running_at_end
    }

    /// `(frame, reason)` pairs marked unexpected in this scope.
    pub fn unexpected(&self) -> &[(String, String)] {
        &self.unexpected
    }

    /// Folds several scope summaries into one, for a frame whose routine
    /// opened more than one subframe scope.
    pub(crate) fn merge(mut results: Vec<SessionResult>) -> Option<SessionResult> {
        let first = results.pop()?;
        let mut merged = first;
        for r in results {
            merged.completes &= r.completes;
            merged.broken.extend(r.broken);
            merged.running_at_end.extend(r.running_at_end);
            merged.unexpected.extend(r.unexpected);
        }
        Some(merged)
    }
}
