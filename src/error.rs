//! Error types used by the framevisor runtime.
//!
//! Four families, matching where a failure can originate:
//!
//! - [`ChannelError`]: contract violations on a message channel (missing key,
//!   redefinition, type mismatch, consumed value, wire encode/transport).
//! - [`FrameError`]: construction and frame-state violations (bad names,
//!   cross-context subframes, double start, handler-incapable frames).
//! - [`FrameFailure`]: the terminal error record of a frame that did not stop
//!   cleanly, recording which stage failed and the underlying cause.
//! - [`UncheckedError`] / [`CollectedError`]: session-level wrappers used by
//!   the fault-consumption protocol.
//!
//! Channel and frame errors propagate directly to the caller of the API that
//! raised them; they are never routed through a frame's `on_exception` hook.
//! Routine/hook errors become a [`FrameFailure`] recorded in the frame's
//! result, never silently dropped.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::messages::ValueKind;
use crate::session::ResolveHandle;

/// Boxed error type accepted from routines and hooks.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// # Errors produced by message channel operations.
///
/// These represent contract violations local to the call that raised them.
/// They are not interceptable by `on_exception`.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum ChannelError {
    /// The key was never defined on this channel.
    #[error("channel '{channel}': key '{key}' is not defined")]
    KeyNotFound {
        /// Channel name (environment/request/common/local).
        channel: &'static str,
        /// The missing key.
        key: String,
    },

    /// The key is already defined; keys are defined exactly once.
    #[error("channel '{channel}': key '{key}' is already defined")]
    KeyAlreadyDefined {
        /// Channel name.
        channel: &'static str,
        /// The offending key.
        key: String,
    },

    /// The declared kind of the key does not match the requested/offered kind.
    #[error("channel '{channel}': key '{key}' holds {expected:?}, not {found:?}")]
    TypeMismatch {
        /// Channel name.
        channel: &'static str,
        /// The key in question.
        key: String,
        /// Kind declared at `define` time.
        expected: ValueKind,
        /// Kind the caller asked for or supplied.
        found: ValueKind,
    },

    /// The value was consumed and not re-set.
    #[error("channel '{channel}': value for key '{key}' has been consumed")]
    ValueConsumed {
        /// Channel name.
        channel: &'static str,
        /// The consumed key.
        key: String,
    },

    /// Null payloads cannot be defined or stored.
    #[error("channel '{channel}': key '{key}' rejects null values")]
    NullValue {
        /// Channel name.
        channel: &'static str,
        /// The key in question.
        key: String,
    },

    /// A string coercion helper received a value its validator rejected.
    #[error("channel '{channel}': key '{key}' failed validation: {reason}")]
    InvalidValue {
        /// Channel name.
        channel: &'static str,
        /// The key in question.
        key: String,
        /// Validator/parser detail.
        reason: String,
    },

    /// The value cannot cross a process boundary.
    ///
    /// Distinct from [`ChannelError::TypeMismatch`]: the value satisfies the
    /// key's declared kind but has no wire representation (opaque payload).
    #[error("channel '{channel}': value for key '{key}' is not serializable: {reason}")]
    Encode {
        /// Channel name.
        channel: &'static str,
        /// The key whose value failed to encode.
        key: String,
        /// Encoder detail.
        reason: String,
    },

    /// The IPC transport itself failed (broken pipe, malformed message,
    /// worker exited without a terminal report).
    #[error("channel transport failure: {reason}")]
    Transport {
        /// Transport detail.
        reason: String,
    },
}

impl ChannelError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ChannelError::KeyNotFound { .. } => "channel_key_not_found",
            ChannelError::KeyAlreadyDefined { .. } => "channel_key_defined",
            ChannelError::TypeMismatch { .. } => "channel_type_mismatch",
            ChannelError::ValueConsumed { .. } => "channel_value_consumed",
            ChannelError::NullValue { .. } => "channel_null_value",
            ChannelError::InvalidValue { .. } => "channel_invalid_value",
            ChannelError::Encode { .. } => "channel_encode",
            ChannelError::Transport { .. } => "channel_transport",
        }
    }
}

/// # Construction and frame-state errors.
///
/// Raised by the factory surface, subframe creation, and state-guarded
/// operations such as `start()`.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum FrameError {
    /// Neither an explicit name nor the routine yielded a usable identifier.
    #[error("no usable frame name: pass an explicit name or a named routine")]
    NameMissing,

    /// A sibling frame already uses this name.
    #[error("frame name '{name}' already exists among siblings")]
    DuplicateName {
        /// The duplicated name.
        name: String,
    },

    /// A subframe built by one context was handed to another.
    #[error("subframe '{name}' belongs to a different context")]
    CrossContext {
        /// The foreign subframe's name.
        name: String,
    },

    /// `start_subframes` was called with an empty set.
    #[error("start_subframes requires at least one subframe")]
    NoSubframes,

    /// Hook setters on a frame that rejects handlers.
    #[error("frame '{name}' does not accept handlers")]
    HandlerIncapable {
        /// The frame's name.
        name: String,
    },

    /// `start()` on a frame already past its load phase.
    #[error("frame '{name}' was already started")]
    AlreadyStarted {
        /// The frame's name.
        name: String,
    },

    /// Inspection or deletion of a frame that has not terminated.
    #[error("frame '{name}' is still running")]
    StillRunning {
        /// The frame's name.
        name: String,
    },

    /// Lookup of a frame name this session does not coordinate.
    #[error("no frame named '{name}' in this session")]
    UnknownFrame {
        /// The unknown name.
        name: String,
    },

    /// A remote routine name with no registry entry.
    #[error("no routine registered under '{name}'")]
    UnknownRoutine {
        /// The unregistered name.
        name: String,
    },

    /// Double registration of a remote routine name.
    #[error("routine '{name}' is already registered")]
    RoutineAlreadyRegistered {
        /// The duplicated name.
        name: String,
    },

    /// A parallel-realm frame was given an in-process routine.
    ///
    /// Closures cannot cross a process boundary; parallel frames take
    /// routines registered by name for worker execution.
    #[error("frame '{name}' is parallel and requires a registered remote routine")]
    RemoteRoutineRequired {
        /// The frame's name.
        name: String,
    },

    /// The frame's execution thread could not be spawned.
    #[error("frame '{name}' failed to spawn its loop thread: {reason}")]
    Spawn {
        /// The frame's name.
        name: String,
        /// OS detail.
        reason: String,
    },

    /// Subframe creation from a routine running in a worker process.
    ///
    /// A routine crossing a process boundary is a leaf there; it may still
    /// build brand-new root frames of its own.
    #[error("frame '{name}' runs its routine in a worker process and cannot host subframes")]
    SubframeInWorker {
        /// The leaf frame's name.
        name: String,
    },

    /// A second, conflicting mark on a frame result.
    #[error("frame '{name}' is already marked as {existing}")]
    MarkConflict {
        /// The frame's name.
        name: String,
        /// The mark already in place.
        existing: &'static str,
    },

    /// A channel contract violation surfaced through frame construction
    /// (initial values, pre-start serializability checks).
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

impl FrameError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            FrameError::NameMissing => "frame_name_missing",
            FrameError::DuplicateName { .. } => "frame_duplicate_name",
            FrameError::CrossContext { .. } => "frame_cross_context",
            FrameError::NoSubframes => "frame_no_subframes",
            FrameError::HandlerIncapable { .. } => "frame_handler_incapable",
            FrameError::AlreadyStarted { .. } => "frame_already_started",
            FrameError::StillRunning { .. } => "frame_still_running",
            FrameError::UnknownFrame { .. } => "frame_unknown",
            FrameError::UnknownRoutine { .. } => "routine_unknown",
            FrameError::RoutineAlreadyRegistered { .. } => "routine_registered_twice",
            FrameError::RemoteRoutineRequired { .. } => "frame_remote_routine_required",
            FrameError::Spawn { .. } => "frame_spawn",
            FrameError::SubframeInWorker { .. } => "frame_subframe_in_worker",
            FrameError::MarkConflict { .. } => "frame_mark_conflict",
            FrameError::Channel(e) => e.as_label(),
        }
    }
}

/// Stage of the lifecycle circuit at which a failure originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    /// `on_open` hook.
    Open,
    /// `on_start` hook.
    Start,
    /// The routine itself.
    Routine,
    /// `on_end` hook.
    End,
    /// `on_redo` hook.
    Redo,
    /// `on_exception` hook (its own error replaces the pending one).
    Exception,
    /// `on_close` hook (only terminal when nothing else was pending).
    Close,
}

impl FailureStage {
    /// Stable lowercase name for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureStage::Open => "on_open",
            FailureStage::Start => "on_start",
            FailureStage::Routine => "routine",
            FailureStage::End => "on_end",
            FailureStage::Redo => "on_redo",
            FailureStage::Exception => "on_exception",
            FailureStage::Close => "on_close",
        }
    }
}

/// Underlying cause of a [`FrameFailure`].
#[derive(Debug)]
pub enum FailureSource {
    /// An error value returned by the routine or a hook. The concrete type is
    /// preserved; use [`FrameFailure::source_as`] to downcast.
    Raised(BoxError),
    /// A panic caught inside the routine or a hook.
    Panic(String),
    /// A failure reported by a worker process. Only the rendered message
    /// survives the process boundary.
    Remote(String),
}

impl fmt::Display for FailureSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureSource::Raised(e) => write!(f, "{e}"),
            FailureSource::Panic(msg) => write!(f, "panic: {msg}"),
            FailureSource::Remote(msg) => write!(f, "worker: {msg}"),
        }
    }
}

/// # Terminal error record of a frame.
///
/// Created by the circuit when a frame stops carrying an error; stored in the
/// frame's result and shared by reference from there on.
#[derive(Debug)]
pub struct FrameFailure {
    /// Dotted path of the failed frame.
    pub qualname: String,
    /// Circuit stage that produced the error.
    pub stage: FailureStage,
    /// The underlying cause.
    pub source: FailureSource,
    /// A close-hook failure that occurred while this error was already
    /// pending. The pending error wins; the close failure is kept as context.
    /// Set at most once, after the shielded close finishes.
    close_failure: std::sync::OnceLock<String>,
}

impl FrameFailure {
    /// Builds a failure record for `stage` of the frame at `qualname`.
    pub fn new(qualname: impl Into<String>, stage: FailureStage, source: FailureSource) -> Self {
        Self {
            qualname: qualname.into(),
            stage,
            source,
            close_failure: std::sync::OnceLock::new(),
        }
    }

    /// The close-hook failure recorded alongside this error, if any.
    pub fn close_failure(&self) -> Option<&str> {
        self.close_failure.get().map(String::as_str)
    }

    /// Records a close failure that happened while this error was pending.
    pub(crate) fn set_close_failure(&self, detail: String) {
        let _ = self.close_failure.set(detail);
    }
    /// Attempts to view the underlying raised error as `E`.
    ///
    /// Returns `None` for panics and remote failures, whose concrete type did
    /// not survive.
    pub fn source_as<E: StdError + 'static>(&self) -> Option<&E> {
        match &self.source {
            FailureSource::Raised(e) => e.downcast_ref::<E>(),
            _ => None,
        }
    }

    /// True when the cause was a caught panic.
    pub fn is_panic(&self) -> bool {
        matches!(self.source, FailureSource::Panic(_))
    }

    /// True when the cause crossed a process boundary.
    pub fn is_remote(&self) -> bool {
        matches!(self.source, FailureSource::Remote(_))
    }
}

impl fmt::Display for FrameFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed in {}: {}", self.qualname, self.stage.as_str(), self.source)?;
        if let Some(close) = self.close_failure() {
            write!(f, " (on_close also failed: {close})")?;
        }
        Ok(())
    }
}

impl StdError for FrameFailure {}

/// # Wrapper for a single unresolved frame failure.
///
/// Yielded by `Session::take_fault()` at most once per underlying failure.
/// Calling [`UncheckedError::check`] resolves the failure in the owning
/// session; dropping the wrapper without checking leaves it unresolved (and
/// subject to the scope-exit warning).
#[derive(Debug)]
pub struct UncheckedError {
    frame_name: String,
    failure: Arc<FrameFailure>,
    handle: ResolveHandle,
}

impl UncheckedError {
    pub(crate) fn new(
        frame_name: String,
        failure: Arc<FrameFailure>,
        handle: ResolveHandle,
    ) -> Self {
        Self { frame_name, failure, handle }
    }

    /// Name of the frame that failed.
    pub fn frame_name(&self) -> &str {
        &self.frame_name
    }

    /// The underlying failure record.
    pub fn failure(&self) -> &Arc<FrameFailure> {
        &self.failure
    }

    /// Resolves the failure: it no longer counts toward `faulted()` and no
    /// longer triggers the scope-exit warning.
    pub fn check(self) {
        self.handle.resolve();
    }
}

impl fmt::Display for UncheckedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unresolved failure from frame '{}': {}", self.frame_name, self.failure)
    }
}

impl StdError for UncheckedError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.failure.as_ref())
    }
}

/// # Aggregate of every failure unresolved at collection time.
///
/// Constructing this error resolves the failures it carries: once collected,
/// they are handled.
#[derive(Debug)]
pub struct CollectedError {
    session_name: String,
    failures: Vec<(String, Arc<FrameFailure>)>,
}

impl CollectedError {
    pub(crate) fn new(session_name: String, failures: Vec<(String, Arc<FrameFailure>)>) -> Self {
        Self { session_name, failures }
    }

    /// Name of the collecting session.
    pub fn session_name(&self) -> &str {
        &self.session_name
    }

    /// The collected `(frame name, failure)` pairs, in publication order.
    pub fn failures(&self) -> &[(String, Arc<FrameFailure>)] {
        &self.failures
    }
}

impl fmt::Display for CollectedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "session '{}' collected {} frame failure(s):",
            self.session_name,
            self.failures.len()
        )?;
        for (name, failure) in &self.failures {
            write!(f, "\n  {name}: {failure}")?;
        }
        Ok(())
    }
}

impl StdError for CollectedError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("boom")]
    struct Boom;

    #[test]
    fn failure_downcasts_raised_source() {
        let failure = FrameFailure::new(
            "root.worker",
            FailureStage::Routine,
            FailureSource::Raised(Box::new(Boom)),
        );
        assert!(failure.source_as::<Boom>().is_some());
        assert!(!failure.is_panic());
    }

    #[test]
    fn failure_display_mentions_close_failure() {
        let failure =
            FrameFailure::new("root", FailureStage::Routine, FailureSource::Panic("oops".into()));
        failure.set_close_failure("fd leak".into());
        let text = failure.to_string();
        assert!(text.contains("routine"));
        assert!(text.contains("fd leak"));
    }

    #[test]
    fn channel_error_labels_are_stable() {
        let err = ChannelError::Transport { reason: "pipe".into() };
        assert_eq!(err.as_label(), "channel_transport");
    }
}
