//! # framevisor
//!
//! **Framevisor** is a structured-concurrency frame runtime for Rust.
//!
//! A caller wraps a unit of work ("routine") in a **Frame**, optionally
//! grows a tree of child frames that run concurrently (one thread and one
//! private cooperative loop per frame) or in parallel (one worker process
//! per frame), and coordinates the whole subtree through a **Session** with
//! precise, non-lossy failure accounting.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!     ┌─────────────┐      ┌───────────────────────────────────────────┐
//!     │   caller    │      │ RootFrame (builder)                       │
//!     │             ├─────►│  - initial environment / request values   │
//!     └──────┬──────┘      │  - hooks (on_open .. on_close)            │
//!            │             └──────┬────────────────────────────────────┘
//!            │ start()            ▼
//!            │             ┌───────────────────────────────────────────┐
//!            └────────────►│ Session (control handle)                  │
//!                          │  - wait_done / polling accessors          │
//!                          │  - fault consumption (take_fault, drain)  │
//!                          │  - request channel writes                 │
//!                          └──────┬────────────────────────────────────┘
//!                                 ▼
//!     ┌───────────────────────────────────────────────────────────────┐
//!     │ Agent (per frame): OS thread → private current-thread loop    │
//!     │   └─ Circuit: on_open → [on_start → routine → on_end →        │
//!     │               on_redo?]* → on_close (shielded)                │
//!     │        └─ routine may instead run in a worker process         │
//!     └──────┬──────────────────────┬─────────────────────────────────┘
//!            │ publish(FrameResult) │ events
//!            ▼                      ▼
//!     ┌─────────────────┐   ┌──────────────┐   ┌──────────────────────┐
//!     │  ResultStore    │   │     Bus      ├──►│ SubscriberSet        │
//!     │ (per scope)     │   │ (broadcast)  │   │ (dispatcher thread)  │
//!     └─────────────────┘   └──────────────┘   └──────────────────────┘
//! ```
//!
//! ### Channels
//! Frames and sessions share state through four typed message channels with
//! defined-once keys and consume/restore semantics:
//!
//! | Channel | Writer | Reader | Crosses processes |
//! |---|---|---|---|
//! | `environment` | session, pre-start | session + frames | yes |
//! | `request` | owning root session | frames | yes |
//! | `common` | session defines, frames update | everyone | yes |
//! | `local` | owning frame | owning frame | never |
//!
//! ### Failure accounting
//! Every frame produces exactly one [`FrameResult`]. A failure starts
//! unresolved; it resolves when drained, checked through a
//! [`take_fault`](Session::take_fault) wrapper, collected into a
//! [`CollectedError`], or marked (`mark_as_ignored` /
//! `mark_as_unexpected`). Closing a session scope with unresolved failures
//! produces a warning unless explicitly abandoned. Nothing is ever silently
//! dropped.
//!
//! ## Example
//! ```no_run
//! use framevisor::{create_concurrent_frame, Context, Routine};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     if let Some(code) = framevisor::worker_main() {
//!         std::process::exit(code);
//!     }
//!
//!     fn greet(ctx: Context) -> Result<(), framevisor::BoxError> {
//!         eprintln!("hello from {}", ctx.frame_name());
//!         Ok(())
//!     }
//!
//!     let root = create_concurrent_frame(Routine::sync(greet))?;
//!     let session = root.start()?;
//!     session.wait_done_and_collect(None)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Optional features
//! - `logging`: exports a simple built-in [`LogWriter`] _(demo/reference
//!   only)_.

mod agent;
mod circuit;
mod config;
mod error;
mod events;
mod frame;
mod messages;
mod session;
mod subscribers;

// ---- Public re-exports ----

pub use agent::{register_routine, register_routine_sync, routine_registered, worker_main};
pub use circuit::{EventHook, ExceptionHook, HookResult, RedoHook, Routine};
pub use config::Config;
pub use error::{
    BoxError, ChannelError, CollectedError, FailureSource, FailureStage, FrameError,
    FrameFailure, UncheckedError,
};
pub use events::{Bus, Event, EventKind};
pub use frame::{
    create_concurrent_frame, create_frame, create_parallel_frame, Context, FrameId, FrameOptions,
    Realm, RootFrame, SubFrame,
};
pub use messages::{
    ChannelBatch, MessageDefiner, MessageManager, MessageReader, MessageUpdater, MessageValue,
    OpaqueValue, Value, ValueKind,
};
pub use session::{FrameResult, Mark, Session, SessionResult, SubSession};
pub use subscribers::{Subscribe, SubscriberSet};

// Optional: expose the simple built-in logger subscriber (demo/reference).
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
