//! # Demo: parallel
//!
//! A parallel-realm frame: the routine runs in a worker process spawned from
//! this same binary. The worker guard at the top of `main` is what makes
//! that re-entry work; the routine is registered by name because closures do
//! not cross process boundaries.
//!
//! ## Flow
//! ```text
//! main
//!   ├─► worker_main()      (child re-entry point; parent falls through)
//!   ├─► register_routine("crunch", ...)
//!   ├─► create_parallel_frame(Routine::remote("crunch"))
//!   └─► start() → Session → wait_done_and_collect
//! worker process
//!   └─► crunch(ctx): reads environment, reports through common
//! ```
//!
//! ## Run
//! ```bash
//! cargo run --example parallel
//! ```

use framevisor::{create_parallel_frame, register_routine, BoxError, Context, Routine, Value};

fn main() -> Result<(), BoxError> {
    // Must come before anything else: a worker re-entry runs the routine and
    // exits here.
    register_routine("crunch", |ctx: Context| async move {
        let limit: i64 = ctx.environment().get("limit")?;
        for step in 1..=limit {
            ctx.common().set("progress", step)?;
            eprintln!("[crunch] step {step}/{limit}");
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
        Ok(())
    })?;
    if let Some(code) = framevisor::worker_main() {
        std::process::exit(code);
    }

    let root = create_parallel_frame(Routine::remote("crunch"))?;
    root.set_environments([("limit", Value::Int(5))])?;
    root.set_commons([("progress", Value::Int(0))])?;

    let session = root.start()?;
    while session.running() {
        let progress: i64 = session.common().get("progress")?;
        eprintln!("[host] progress {progress}");
        std::thread::sleep(std::time::Duration::from_millis(150));
    }
    session.wait_done_and_collect(None)?;
    eprintln!("[host] final progress {}", session.common().get::<i64>("progress")?);
    Ok(())
}
