//! # Worker-process execution: the child side of the boundary.
//!
//! A worker is this same executable re-spawned with the marker environment
//! variable set. The host binary opts in at the top of `main`:
//!
//! ```no_run
//! fn main() {
//!     if let Some(code) = framevisor::worker_main() {
//!         std::process::exit(code);
//!     }
//!     // normal program ...
//! }
//! ```
//!
//! Closures cannot cross a process boundary, so routines that may run
//! remotely are registered by name — in both parent and child, which is
//! automatic since they are the same binary:
//!
//! ```no_run
//! framevisor::register_routine("crunch", |ctx: framevisor::Context| async move {
//!     let limit: i64 = ctx.environment().get("limit")?;
//!     ctx.common().set("crunched", limit * 2)?;
//!     Ok(())
//! }).unwrap();
//! ```
//!
//! ## Rules
//! - The worker's stdout carries the protocol; routine output belongs on
//!   stderr.
//! - The routine gets a [`Context`] whose `common` writes mirror upstream;
//!   `create_subframe` is rejected there (the routine is a leaf of the
//!   boundary), but building a brand-new root frame inside the worker is
//!   fine.
//! - The worker sends exactly one `Done { error }` and exits 0 on success,
//!   1 on failure.

use std::collections::HashMap;
use std::future::Future;
use std::io::{BufRead, Write};
use std::sync::{Arc, OnceLock};

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::agent::process::WORKER_ENV;
use crate::circuit::HookResult;
use crate::error::FrameError;
use crate::frame::Context;
use crate::messages::codec::{
    from_line, merge_entries, to_line, HostMessage, WireChannel, WireUpdate, WorkerMessage,
};
use crate::messages::{Backend, MessageReader, MessageUpdater, Store};

type WorkerRoutine = Arc<dyn Fn(Context) -> BoxFuture<'static, HookResult> + Send + Sync>;

fn registry() -> &'static Mutex<HashMap<String, WorkerRoutine>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, WorkerRoutine>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Registers a suspending routine for worker-process execution.
///
/// Registration must happen before the first frame using the name starts —
/// in practice, near the top of `main`, before `worker_main()` decides.
pub fn register_routine<F, Fut>(name: impl Into<String>, f: F) -> Result<(), FrameError>
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HookResult> + Send + 'static,
{
    let name = name.into();
    let mut map = registry().lock();
    if map.contains_key(&name) {
        return Err(FrameError::RoutineAlreadyRegistered { name });
    }
    map.insert(name, Arc::new(move |ctx| f(ctx).boxed()));
    Ok(())
}

/// Registers a synchronous routine for worker-process execution.
pub fn register_routine_sync<F>(name: impl Into<String>, f: F) -> Result<(), FrameError>
where
    F: Fn(Context) -> HookResult + Send + Sync + 'static,
{
    let name = name.into();
    let mut map = registry().lock();
    if map.contains_key(&name) {
        return Err(FrameError::RoutineAlreadyRegistered { name });
    }
    map.insert(name, Arc::new(move |ctx| std::future::ready(f(ctx)).boxed()));
    Ok(())
}

/// True when the given name has a registered routine.
pub fn routine_registered(name: &str) -> bool {
    registry().lock().contains_key(name)
}

fn lookup(name: &str) -> Option<WorkerRoutine> {
    registry().lock().get(name).cloned()
}

/// Runs the worker protocol when this process was spawned as a worker.
///
/// Returns `None` in a normal process — call it first thing in `main` and
/// continue when it declines. In a worker process it drives the routine to
/// completion and returns the exit code to use.
pub fn worker_main() -> Option<i32> {
    if std::env::var_os(WORKER_ENV).is_none() {
        return None;
    }
    Some(run_worker())
}

fn run_worker() -> i32 {
    let stdin = std::io::stdin();
    let mut first_line = String::new();
    if stdin.lock().read_line(&mut first_line).is_err() {
        return 1;
    }

    let init = match from_line::<HostMessage>(&first_line) {
        Ok(HostMessage::Init { routine, qualname, parallel, environment, request, common }) => {
            (routine, qualname, parallel, environment, request, common)
        }
        _ => {
            report(WorkerMessage::Done { error: Some("missing init message".to_string()) });
            return 1;
        }
    };
    let (routine_name, qualname, parallel, env_entries, request_entries, common_entries) = init;

    let Some(routine) = lookup(&routine_name) else {
        report(WorkerMessage::Done {
            error: Some(format!("no routine registered under '{routine_name}'")),
        });
        return 1;
    };

    let environment = Arc::new(Store::new("environment"));
    let request = Arc::new(Store::new("request"));
    let common = Arc::new(Store::new("common"));
    merge_entries(&environment, env_entries);
    merge_entries(&request, request_entries);
    merge_entries(&common, common_entries);

    let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            report(WorkerMessage::Done { error: Some(format!("worker runtime: {e}")) });
            return 1;
        }
    };

    let error = rt.block_on(worker_body(
        routine,
        qualname,
        parallel,
        environment,
        Arc::clone(&request),
        Arc::clone(&common),
    ));

    let code = i32::from(error.is_some());
    report(WorkerMessage::Done { error });
    code
}

async fn worker_body(
    routine: WorkerRoutine,
    qualname: String,
    parallel: bool,
    environment: Arc<Store>,
    request: Arc<Store>,
    common: Arc<Store>,
) -> Option<String> {
    let (update_tx, mut update_rx) = tokio::sync::mpsc::unbounded_channel::<WireUpdate>();
    let cancel = CancellationToken::new();

    let realm = if parallel { crate::frame::Realm::Parallel } else { crate::frame::Realm::Concurrent };
    let ctx = Context::new_worker(
        qualname,
        realm,
        MessageReader::new(Backend::Mem(Arc::clone(&environment))),
        MessageReader::new(Backend::Mem(Arc::clone(&request))),
        MessageUpdater::new(Backend::Ipc {
            local: Arc::clone(&common),
            tx: update_tx,
            slot: WireChannel::Common,
        }),
        cancel.clone(),
    );

    // Writer: mirrors common mutations upstream as they happen. The channel
    // closes when the routine (and with it the context) drops its sender.
    let writer = tokio::spawn(async move {
        while let Some(update) = update_rx.recv().await {
            report(WorkerMessage::Update(update));
        }
    });

    // Reader: applies parent syncs and cooperative stops. Plain blocking
    // stdin on its own thread; the process exits with the routine anyway.
    let sync_request = Arc::clone(&request);
    let sync_common = Arc::clone(&common);
    let sync_cancel = cancel.clone();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            match from_line::<HostMessage>(&line) {
                Ok(HostMessage::Sync { request, common }) => {
                    merge_entries(&sync_request, request);
                    merge_entries(&sync_common, common);
                }
                Ok(HostMessage::Cancel) => sync_cancel.cancel(),
                _ => {}
            }
        }
    });

    let guarded = std::panic::AssertUnwindSafe((*routine)(ctx)).catch_unwind();
    let error = match guarded.await {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e.to_string()),
        Err(panic) => Some(format!("panic: {panic:?}")),
    };

    let _ = writer.await;
    error
}

/// Writes one protocol line to stdout.
fn report(msg: WorkerMessage) {
    if let Ok(line) = to_line(&msg) {
        let mut out = std::io::stdout().lock();
        let _ = out.write_all(line.as_bytes());
        let _ = out.flush();
    }
}
