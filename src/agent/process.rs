//! # Worker-process execution: the parent side of the boundary.
//!
//! Runs one routine in a child OS process. The child is this same executable
//! re-spawned with a marker environment variable; the host binary opts in by
//! calling [`crate::agent::worker::worker_main`] at the top of `main`.
//!
//! ## Protocol (newline-delimited JSON over the child's stdio)
//! ```text
//! parent → child   Init { routine, qualname, environment, request, common }
//! parent → child   Sync { request, common }         every sync_interval, on change
//! parent → child   Cancel                           cooperative stop
//! child  → parent  Update { channel, key, entry }   per common mutation
//! child  → parent  Done { error }                   terminal, exactly once
//! ```
//!
//! ## Rules
//! - The parent store is canonical for `request`/`common`; child updates are
//!   applied as they arrive and parent-side changes sync on the pump
//!   interval. Last writer wins — delivery is single-write correct only.
//! - A child that exits without `Done` is a transport failure.
//! - On cooperative stop the child gets `Cancel`, then `stop_grace` to report
//!   back, then a kill. A forced stop kills immediately (session side).
//! - The child's stdout carries the protocol; worker routines must write
//!   their own output to stderr.

use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio_util::sync::CancellationToken;

use crate::error::ChannelError;
use crate::frame::Context;
use crate::messages::codec::{
    encode_store, from_line, merge_entries, to_line, HostMessage, WireChannel, WorkerMessage,
};

/// Marker variable that turns a spawned copy of this executable into a
/// worker.
pub(crate) const WORKER_ENV: &str = "FRAMEVISOR_WORKER";

/// How one remote routine run ended, when not cleanly.
pub(crate) enum RemoteError {
    /// The worker reported a routine failure; only the rendering survives.
    Failed(String),
    /// The boundary itself failed (spawn, pipe, codec, missing `Done`).
    Transport(ChannelError),
    /// A cooperative stop ended the run.
    Cancelled,
}

fn transport(reason: impl Into<String>) -> RemoteError {
    RemoteError::Transport(ChannelError::Transport { reason: reason.into() })
}

/// Executes the registered routine `name` in a worker process, pumping
/// channel state both ways until the worker reports back.
pub(crate) async fn run_remote(
    ctx: &Context,
    name: &str,
    cancel: &CancellationToken,
) -> Result<(), RemoteError> {
    let shared = ctx.shared();
    let tree = &shared.tree;

    // Snapshot versions first so mutations during spawn trigger a sync.
    let mut seen_request = tree.request.version();
    let mut seen_common = tree.common.version();

    let init = HostMessage::Init {
        routine: name.to_string(),
        qualname: ctx.frame_qualname().to_string(),
        parallel: ctx.realm() == crate::frame::Realm::Parallel,
        environment: encode_store(&tree.environment).map_err(RemoteError::Transport)?,
        request: encode_store(&tree.request).map_err(RemoteError::Transport)?,
        common: encode_store(&tree.common).map_err(RemoteError::Transport)?,
    };

    let exe = std::env::current_exe().map_err(|e| transport(format!("current_exe: {e}")))?;
    let mut child = Command::new(exe)
        .env(WORKER_ENV, "1")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| transport(format!("spawn worker: {e}")))?;

    let mut stdin = child.stdin.take().ok_or_else(|| transport("worker stdin unavailable"))?;
    let stdout = child.stdout.take().ok_or_else(|| transport("worker stdout unavailable"))?;
    let mut lines = BufReader::new(stdout).lines();

    write_line(&mut stdin, &init).await?;

    // The child handle parks in the context so a forced stop can kill it
    // from the session thread.
    *ctx.child_slot().lock() = Some(child);

    let mut interval = tokio::time::interval(shared.config.sync_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let outcome = loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => match from_line::<WorkerMessage>(&line) {
                    Ok(WorkerMessage::Update(update)) => {
                        if update.channel == WireChannel::Common {
                            merge_entries(&tree.common, vec![update.entry]);
                            seen_common = tree.common.version();
                        }
                    }
                    Ok(WorkerMessage::Done { error }) => {
                        break match error {
                            None => Ok(()),
                            Some(msg) => Err(RemoteError::Failed(msg)),
                        };
                    }
                    Err(e) => break Err(RemoteError::Transport(e)),
                },
                Ok(None) => break Err(transport("worker exited without a terminal report")),
                Err(e) => break Err(transport(format!("worker pipe: {e}"))),
            },
            _ = interval.tick() => {
                let request_now = tree.request.version();
                let common_now = tree.common.version();
                if request_now != seen_request || common_now != seen_common {
                    seen_request = request_now;
                    seen_common = common_now;
                    let sync = match sync_message(tree) {
                        Ok(sync) => sync,
                        Err(e) => break Err(RemoteError::Transport(e)),
                    };
                    if let Err(e) = write_line(&mut stdin, &sync).await {
                        break Err(e);
                    }
                }
            }
            _ = cancel.cancelled() => {
                break cooperative_stop(ctx, &mut stdin, &mut lines).await;
            }
        }
    };

    // A worker that reported Done exits on its own; after a transport fault
    // or a stop it may not, and the reap must not hang on it.
    let ensure_kill =
        matches!(outcome, Err(RemoteError::Transport(_)) | Err(RemoteError::Cancelled));
    reap(ctx, ensure_kill).await;
    outcome
}

fn sync_message(tree: &crate::frame::TreeChannels) -> Result<HostMessage, ChannelError> {
    Ok(HostMessage::Sync {
        request: encode_store(&tree.request)?,
        common: encode_store(&tree.common)?,
    })
}

/// Forwards a cooperative stop and waits up to `stop_grace` for the worker
/// to report back before killing it.
async fn cooperative_stop(
    ctx: &Context,
    stdin: &mut ChildStdin,
    lines: &mut tokio::io::Lines<BufReader<tokio::process::ChildStdout>>,
) -> Result<(), RemoteError> {
    let grace = ctx.shared().config.stop_grace;
    let _ = write_line(stdin, &HostMessage::Cancel).await;

    let wait_done = async {
        while let Ok(Some(line)) = lines.next_line().await {
            if let Ok(WorkerMessage::Done { .. }) = from_line::<WorkerMessage>(&line) {
                return;
            }
        }
    };
    if tokio::time::timeout(grace, wait_done).await.is_err() {
        if let Some(child) = ctx.child_slot().lock().as_mut() {
            let _ = child.start_kill();
        }
    }
    Err(RemoteError::Cancelled)
}

/// Waits for the child to exit and releases the slot.
async fn reap(ctx: &Context, ensure_kill: bool) {
    let child: Option<Child> = ctx.child_slot().lock().take();
    if let Some(mut child) = child {
        if ensure_kill {
            let _ = child.start_kill();
        }
        let _ = child.wait().await;
    }
}

async fn write_line<T: serde::Serialize>(
    stdin: &mut ChildStdin,
    msg: &T,
) -> Result<(), RemoteError> {
    let line = to_line(msg).map_err(RemoteError::Transport)?;
    stdin
        .write_all(line.as_bytes())
        .await
        .map_err(|e| transport(format!("worker stdin: {e}")))?;
    stdin.flush().await.map_err(|e| transport(format!("worker stdin: {e}")))
}
