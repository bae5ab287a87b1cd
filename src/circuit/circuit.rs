//! # The lifecycle circuit: one cooperative state machine per frame.
//!
//! Sequences hooks and the routine, decides redo vs. close, and shields
//! teardown from cancellation and errors.
//!
//! ## Normal flow
//! ```text
//! on_open
//!   ↓
//! on_start *
//!   ↓
//! routine
//!   ↓
//! on_end
//!   ↓
//! on_redo
//!   ├─ true  → * (repeat from on_start)
//!   └─ false → on_close
//!   ↓
//! on_close (shielded: runs even under cancellation or a pending error)
//! ```
//!
//! ## Failure flow
//! An uncaught error (or panic) from `on_open`/`on_start`/routine/`on_end`/
//! `on_redo` routes through `on_exception(ctx, failure)`:
//! - `true` suppresses the failure; the circuit proceeds to `on_close` as if
//!   the cycle ended normally.
//! - `false`, absence, or a failing handler carries the failure to
//!   `on_close` and into the frame's result.
//!
//! ## Rules
//! - Phases of one circuit never overlap; suspension points inside a body are
//!   the only interleaving opportunities, and only for that frame's own loop.
//! - Cancellation is observed between and inside cancellable phases; a cancel
//!   that lands mid-cycle is a graceful stop, not a failure.
//! - `on_close` runs exactly once, unraced. Its own error becomes terminal
//!   only when nothing else is pending; otherwise the pending error wins and
//!   the close failure is recorded as context.

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::agent::process::{run_remote, RemoteError};
use crate::circuit::hooks::{EventHook, Hooks, Routine, RoutineKind};
use crate::error::{BoxError, FailureSource, FailureStage, FrameFailure};
use crate::events::{Bus, Event, EventKind};
use crate::frame::Context;

/// What the circuit left behind.
pub(crate) struct CircuitOutcome {
    /// Terminal failure, if the frame did not stop cleanly.
    pub failure: Option<Arc<FrameFailure>>,
    /// True when a cooperative cancel ended the cycle early.
    pub cancelled: bool,
    /// Number of `on_start → routine → on_end` cycles entered.
    pub cycles: u32,
}

/// Exit of one cancellable phase.
enum PhaseExit<T> {
    Done(T),
    Cancelled,
    Panicked(String),
}

/// How the whole cancellable span ended.
enum SpanExit {
    Clean,
    Failed(Arc<FrameFailure>),
    Cancelled,
}

/// Shared mutable pieces of one circuit run.
struct Driver<'a> {
    qualname: &'a str,
    ctx: Context,
    hooks: &'a Hooks,
    cancel: &'a CancellationToken,
    bus: &'a Bus,
}

impl Driver<'_> {
    fn phase(&self, name: &'static str, cycle: Option<u32>) {
        let mut ev =
            Event::now(EventKind::CyclePhase).with_frame(self.qualname).with_reason(name);
        if let Some(c) = cycle {
            ev = ev.with_cycle(c);
        }
        self.bus.publish(ev);
    }

    /// Drives one phase future, racing cooperative cancellation and catching
    /// panics so a crashing body cannot tear down the loop thread.
    async fn drive<T>(
        &self,
        fut: BoxFuture<'static, Result<T, BoxError>>,
    ) -> PhaseExit<Result<T, BoxError>> {
        let guarded = std::panic::AssertUnwindSafe(fut).catch_unwind();
        tokio::select! {
            res = guarded => match res {
                Ok(r) => PhaseExit::Done(r),
                Err(panic) => PhaseExit::Panicked(panic_message(panic)),
            },
            _ = self.cancel.cancelled() => PhaseExit::Cancelled,
        }
    }

    /// Routes a failure through `on_exception`, if registered, and converts
    /// the decision into a span exit.
    async fn settle(&self, stage: FailureStage, source: FailureSource) -> SpanExit {
        let failure = Arc::new(FrameFailure::new(self.qualname, stage, source));
        let Some(handler) = &self.hooks.on_exception else {
            return SpanExit::Failed(failure);
        };

        self.phase("on_exception", None);
        match self.drive(handler.invoke(self.ctx.clone(), Arc::clone(&failure))).await {
            PhaseExit::Done(Ok(true)) => SpanExit::Clean,
            PhaseExit::Done(Ok(false)) => SpanExit::Failed(failure),
            PhaseExit::Done(Err(e)) => SpanExit::Failed(Arc::new(FrameFailure::new(
                self.qualname,
                FailureStage::Exception,
                FailureSource::Raised(e),
            ))),
            PhaseExit::Panicked(msg) => SpanExit::Failed(Arc::new(FrameFailure::new(
                self.qualname,
                FailureStage::Exception,
                FailureSource::Panic(msg),
            ))),
            PhaseExit::Cancelled => SpanExit::Cancelled,
        }
    }

    /// Runs one event hook. `Ok(())` means the circuit continues; an `Err`
    /// carries the span exit that ends it.
    async fn event_step(
        &self,
        hook: &EventHook,
        name: &'static str,
        stage: FailureStage,
        cycle: Option<u32>,
    ) -> Result<(), SpanExit> {
        self.phase(name, cycle);
        match self.drive(hook.invoke(self.ctx.clone())).await {
            PhaseExit::Done(Ok(())) => Ok(()),
            PhaseExit::Done(Err(e)) => Err(self.settle(stage, FailureSource::Raised(e)).await),
            PhaseExit::Panicked(msg) => Err(self.settle(stage, FailureSource::Panic(msg)).await),
            PhaseExit::Cancelled => Err(SpanExit::Cancelled),
        }
    }

    /// Runs the routine once. Remote routines observe the token themselves —
    /// they forward a cooperative stop to the worker and reap the child — so
    /// that phase is not raced from outside.
    async fn routine_step(&self, routine: &Routine, cycle: u32) -> Result<(), SpanExit> {
        self.phase("routine", Some(cycle));
        let source = match &routine.kind {
            RoutineKind::Local(f) => match self.drive(f(self.ctx.clone())).await {
                PhaseExit::Done(Ok(())) => return Ok(()),
                PhaseExit::Done(Err(e)) => FailureSource::Raised(e),
                PhaseExit::Panicked(msg) => FailureSource::Panic(msg),
                PhaseExit::Cancelled => return Err(SpanExit::Cancelled),
            },
            RoutineKind::Remote(name) => match run_remote(&self.ctx, name, self.cancel).await {
                Ok(()) => return Ok(()),
                Err(RemoteError::Cancelled) => return Err(SpanExit::Cancelled),
                Err(RemoteError::Failed(msg)) => FailureSource::Remote(msg),
                Err(RemoteError::Transport(e)) => FailureSource::Raised(Box::new(e)),
            },
        };
        Err(self.settle(FailureStage::Routine, source).await)
    }

    /// The cancellable span: everything before the shielded close.
    async fn span(&self, routine: &Routine, cycles: &mut u32) -> SpanExit {
        if let Some(hook) = &self.hooks.on_open {
            if let Err(exit) = self.event_step(hook, "on_open", FailureStage::Open, None).await {
                return exit;
            }
        }

        loop {
            if self.cancel.is_cancelled() {
                return SpanExit::Cancelled;
            }
            *cycles += 1;
            let cycle = *cycles;

            if let Some(hook) = &self.hooks.on_start {
                if let Err(exit) =
                    self.event_step(hook, "on_start", FailureStage::Start, Some(cycle)).await
                {
                    return exit;
                }
            }

            if let Err(exit) = self.routine_step(routine, cycle).await {
                return exit;
            }

            if let Some(hook) = &self.hooks.on_end {
                if let Err(exit) =
                    self.event_step(hook, "on_end", FailureStage::End, Some(cycle)).await
                {
                    return exit;
                }
            }

            // on_redo: unset means "do not redo".
            let Some(hook) = &self.hooks.on_redo else { return SpanExit::Clean };
            self.phase("on_redo", Some(cycle));
            match self.drive(hook.invoke(self.ctx.clone())).await {
                PhaseExit::Done(Ok(true)) => {
                    self.bus.publish(
                        Event::now(EventKind::CycleRedo)
                            .with_frame(self.qualname)
                            .with_cycle(cycle),
                    );
                }
                PhaseExit::Done(Ok(false)) => return SpanExit::Clean,
                PhaseExit::Done(Err(e)) => {
                    return self.settle(FailureStage::Redo, FailureSource::Raised(e)).await
                }
                PhaseExit::Panicked(msg) => {
                    return self.settle(FailureStage::Redo, FailureSource::Panic(msg)).await
                }
                PhaseExit::Cancelled => return SpanExit::Cancelled,
            }
        }
    }
}

/// Runs one frame's circuit to completion.
pub(crate) async fn run_circuit(
    qualname: &str,
    ctx: Context,
    hooks: Hooks,
    routine: Routine,
    cancel: CancellationToken,
    bus: Bus,
) -> CircuitOutcome {
    let driver = Driver { qualname, ctx: ctx.clone(), hooks: &hooks, cancel: &cancel, bus: &bus };

    let mut cycles: u32 = 0;
    let exit = driver.span(&routine, &mut cycles).await;

    let (mut pending, cancelled) = match exit {
        SpanExit::Clean => (None, false),
        SpanExit::Failed(f) => (Some(f), false),
        SpanExit::Cancelled => (None, true),
    };

    // Shielded teardown: runs once, never raced against cancellation.
    if let Some(hook) = &hooks.on_close {
        driver.phase("on_close", None);
        let guarded = std::panic::AssertUnwindSafe(hook.invoke(ctx.clone())).catch_unwind();
        let close_error: Option<(String, FailureSource)> = match guarded.await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some((e.to_string(), FailureSource::Raised(e))),
            Err(panic) => {
                let msg = panic_message(panic);
                Some((msg.clone(), FailureSource::Panic(msg)))
            }
        };
        if let Some((detail, source)) = close_error {
            match &pending {
                // The pending error wins; keep the close failure as context.
                Some(failure) => {
                    failure.set_close_failure(detail.clone());
                    bus.publish(
                        Event::now(EventKind::CloseFailed)
                            .with_frame(qualname)
                            .with_reason(detail),
                    );
                }
                None => {
                    pending =
                        Some(Arc::new(FrameFailure::new(qualname, FailureStage::Close, source)));
                }
            }
        }
    }

    CircuitOutcome { failure: pending, cancelled, cycles }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
