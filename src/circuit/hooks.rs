//! # Routine and hook storage.
//!
//! Routines and hooks may be synchronous or suspending. Both shapes are
//! resolved once at registration time into a boxed
//! `Fn(Context) -> BoxFuture` — the circuit driver invokes every body the
//! same way and never inspects its shape at call time.
//!
//! A routine built from a named function item also yields the frame-name
//! fallback: `std::any::type_name` of the closure type ends in `{{closure}}`
//! for anonymous closures and in the function path for function items, so
//! only the latter produce a usable identifier.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::error::{BoxError, FrameFailure};
use crate::frame::Context;

/// Result type accepted from routines and event hooks.
pub type HookResult = Result<(), BoxError>;

type EventFn = Box<dyn Fn(Context) -> BoxFuture<'static, HookResult> + Send + Sync>;
type RedoFn = Box<dyn Fn(Context) -> BoxFuture<'static, Result<bool, BoxError>> + Send + Sync>;
type ExceptionFn = Box<
    dyn Fn(Context, Arc<FrameFailure>) -> BoxFuture<'static, Result<bool, BoxError>>
        + Send
        + Sync,
>;

/// A lifecycle hook without a decision value (`on_open`, `on_start`,
/// `on_end`, `on_close`).
pub struct EventHook {
    call: EventFn,
}

impl EventHook {
    /// Wraps a suspending hook body.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult> + Send + 'static,
    {
        Self { call: Box::new(move |ctx| f(ctx).boxed()) }
    }

    /// Wraps a synchronous hook body.
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(Context) -> HookResult + Send + Sync + 'static,
    {
        Self { call: Box::new(move |ctx| std::future::ready(f(ctx)).boxed()) }
    }

    pub(crate) fn invoke(&self, ctx: Context) -> BoxFuture<'static, HookResult> {
        (self.call)(ctx)
    }
}

/// The `on_redo` hook: `true` repeats the cycle from `on_start`.
pub struct RedoHook {
    call: RedoFn,
}

impl RedoHook {
    /// Wraps a suspending redo decision.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool, BoxError>> + Send + 'static,
    {
        Self { call: Box::new(move |ctx| f(ctx).boxed()) }
    }

    /// Wraps a synchronous redo decision.
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(Context) -> Result<bool, BoxError> + Send + Sync + 'static,
    {
        Self { call: Box::new(move |ctx| std::future::ready(f(ctx)).boxed()) }
    }

    pub(crate) fn invoke(&self, ctx: Context) -> BoxFuture<'static, Result<bool, BoxError>> {
        (self.call)(ctx)
    }
}

/// The `on_exception` hook: `true` suppresses the pending failure.
pub struct ExceptionHook {
    call: ExceptionFn,
}

impl ExceptionHook {
    /// Wraps a suspending exception handler.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Context, Arc<FrameFailure>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool, BoxError>> + Send + 'static,
    {
        Self { call: Box::new(move |ctx, err| f(ctx, err).boxed()) }
    }

    /// Wraps a synchronous exception handler.
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(Context, Arc<FrameFailure>) -> Result<bool, BoxError> + Send + Sync + 'static,
    {
        Self { call: Box::new(move |ctx, err| std::future::ready(f(ctx, err)).boxed()) }
    }

    pub(crate) fn invoke(
        &self,
        ctx: Context,
        failure: Arc<FrameFailure>,
    ) -> BoxFuture<'static, Result<bool, BoxError>> {
        (self.call)(ctx, failure)
    }
}

/// The registered hook set of one frame. Every slot is optional; an unset
/// hook behaves as a no-op that keeps the normal path (`on_redo` unset means
/// "do not redo").
#[derive(Default)]
pub struct Hooks {
    pub(crate) on_open: Option<EventHook>,
    pub(crate) on_start: Option<EventHook>,
    pub(crate) on_end: Option<EventHook>,
    pub(crate) on_close: Option<EventHook>,
    pub(crate) on_redo: Option<RedoHook>,
    pub(crate) on_exception: Option<ExceptionHook>,
}

/// How a routine executes.
pub(crate) enum RoutineKind {
    /// In-process body, driven by the frame's own loop.
    Local(EventFn),
    /// Registered routine executed in a worker process.
    Remote(String),
}

/// The user-supplied main body of a frame.
pub struct Routine {
    pub(crate) kind: RoutineKind,
    /// Identifier derived at registration, used for frame-name fallback.
    pub(crate) ident: Option<String>,
}

impl Routine {
    /// Wraps a suspending routine body.
    ///
    /// A function item contributes its name as the frame-name fallback;
    /// anonymous closures contribute nothing.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult> + Send + 'static,
    {
        let ident = ident_of::<F>();
        Self { kind: RoutineKind::Local(Box::new(move |ctx| f(ctx).boxed())), ident }
    }

    /// Wraps a synchronous routine body.
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(Context) -> HookResult + Send + Sync + 'static,
    {
        let ident = ident_of::<F>();
        Self {
            kind: RoutineKind::Local(Box::new(move |ctx| std::future::ready(f(ctx)).boxed())),
            ident,
        }
    }

    /// References a routine registered for worker-process execution.
    ///
    /// The registered name doubles as the frame-name fallback.
    pub fn remote(name: impl Into<String>) -> Self {
        let name = name.into();
        Self { ident: Some(name.clone()), kind: RoutineKind::Remote(name) }
    }

    /// True when the routine crosses a process boundary.
    pub(crate) fn is_remote(&self) -> bool {
        matches!(self.kind, RoutineKind::Remote(_))
    }
}

/// Last path segment of `F`'s type name, unless `F` is an anonymous closure.
fn ident_of<F>() -> Option<String> {
    let full = std::any::type_name::<F>();
    if full.ends_with("{{closure}}") {
        return None;
    }
    let tail = full.rsplit("::").next().unwrap_or(full);
    if tail.is_empty() || !tail.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
    {
        return None;
    }
    Some(tail.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn my_routine(_ctx: Context) -> HookResult {
        Ok(())
    }

    #[test]
    fn function_items_yield_an_identifier() {
        let r = Routine::sync(my_routine);
        assert_eq!(r.ident.as_deref(), Some("my_routine"));
    }

    #[test]
    fn closures_yield_no_identifier() {
        let r = Routine::sync(|_ctx| Ok(()));
        assert!(r.ident.is_none());
    }

    #[test]
    fn remote_routines_use_the_registered_name() {
        let r = Routine::remote("crunch");
        assert_eq!(r.ident.as_deref(), Some("crunch"));
        assert!(r.is_remote());
    }
}
