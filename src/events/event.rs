//! # Runtime events emitted by agents, circuits, and sessions.
//!
//! [`EventKind`] classifies events across three categories:
//! - **Lifecycle events**: circuit progress of one frame (starting, phase
//!   entries, redo decisions, stop, failure).
//! - **Coordination events**: session-level actions (subframe launches,
//!   cancel offers, result publication, unresolved-failure warnings).
//! - **Fan-out faults**: a subscriber panicking during delivery.
//!
//! ## Ordering guarantees
//! Each event carries a globally unique sequence number (`seq`) that grows
//! monotonically. Use `seq` to restore order when events from different frame
//! threads interleave.

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Frame lifecycle ===
    /// A frame's agent started its circuit.
    ///
    /// Sets: `frame`, `at`, `seq`.
    FrameStarting,

    /// The circuit entered a phase of the current cycle.
    ///
    /// Sets: `frame`, `reason` (phase name), `cycle`, `at`, `seq`.
    CyclePhase,

    /// `on_redo` asked for another cycle.
    ///
    /// Sets: `frame`, `cycle` (the finished cycle), `at`, `seq`.
    CycleRedo,

    /// The frame stopped without a terminal error (including cooperative
    /// cancellation).
    ///
    /// Sets: `frame`, `cycle`, `at`, `seq`.
    FrameStopped,

    /// The frame stopped carrying a terminal error.
    ///
    /// Sets: `frame`, `reason` (failure rendering), `cycle`, `at`, `seq`.
    FrameFailed,

    /// `on_close` failed while another error was already pending.
    ///
    /// Sets: `frame`, `reason` (close failure rendering), `at`, `seq`.
    CloseFailed,

    // === Coordination ===
    /// A context launched subframes.
    ///
    /// Sets: `frame` (parent), `reason` (child names), `at`, `seq`.
    SubframesStarted,

    /// A session offered a cooperative stop to its frames.
    ///
    /// Sets: `frame` (session name), `reason` (`"force"` when forced),
    /// `at`, `seq`.
    CancelOffered,

    /// An agent published its frame's result.
    ///
    /// Sets: `frame`, `reason` (`"ok"`/failure label), `at`, `seq`.
    ResultPublished,

    /// A session scope closed with unresolved failures.
    ///
    /// Sets: `frame` (session name), `reason` (summary), `at`, `seq`.
    UnresolvedWarning,

    // === Fan-out faults ===
    /// A subscriber panicked during event processing.
    ///
    /// Sets: `frame` (subscriber name), `reason` (panic info), `at`, `seq`.
    SubscriberPanicked,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Debug, Clone)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,
    /// Frame (or session/subscriber) name, if applicable.
    pub frame: Option<Arc<str>>,
    /// Human-readable detail (phase names, failure renderings, panic info).
    pub reason: Option<Arc<str>>,
    /// Circuit cycle number (1-based), if applicable.
    pub cycle: Option<u32>,
    /// Delay attached to the event (reserved for timed coordination), ms.
    pub delay_ms: Option<u32>,
}

impl Event {
    /// Creates a new event of the given kind with the current timestamp and
    /// the next sequence number.
    pub fn now(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            frame: None,
            reason: None,
            cycle: None,
            delay_ms: None,
        }
    }

    /// Attaches a frame/session/subscriber name.
    #[inline]
    pub fn with_frame(mut self, frame: impl Into<Arc<str>>) -> Self {
        self.frame = Some(frame.into());
        self
    }

    /// Attaches a human-readable detail.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a cycle number.
    #[inline]
    pub fn with_cycle(mut self, cycle: u32) -> Self {
        self.cycle = Some(cycle);
        self
    }

    /// Attaches a delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.delay_ms = Some(ms);
        self
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::now(EventKind::SubscriberPanicked)
            .with_frame(subscriber)
            .with_reason(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_is_monotonic() {
        let a = Event::now(EventKind::FrameStarting);
        let b = Event::now(EventKind::FrameStopped);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn builders_attach_metadata() {
        let ev = Event::now(EventKind::CyclePhase)
            .with_frame("root.worker")
            .with_reason("on_start")
            .with_cycle(2);
        assert_eq!(ev.frame.as_deref(), Some("root.worker"));
        assert_eq!(ev.reason.as_deref(), Some("on_start"));
        assert_eq!(ev.cycle, Some(2));
    }
}
