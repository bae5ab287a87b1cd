//! # Demo: subframes
//!
//! A producer/consumer pair supervised from the root routine, coordinated
//! through the `request` and `common` channels, with one deliberately broken
//! subframe handled through the fault-consumption protocol.
//!
//! ## Flow
//! ```text
//! root routine
//!   ├─► create_subframe(producer), create_subframe(consumer), create_subframe(flaky)
//!   ├─► start_subframes(...) → SubSession
//!   ├─► poll: take_fault() → expected? check() : leave unresolved
//!   └─► wait_done
//! caller
//!   └─► session.request().set("continue", false) ends the workers
//! ```
//!
//! ## Run
//! ```bash
//! cargo run --example subframes --features logging
//! ```

use std::sync::Arc;
use std::time::Duration;

use framevisor::{
    create_frame, BoxError, Context, FrameOptions, LogWriter, Routine, Subscribe, Value,
};

#[derive(Debug, thiserror::Error)]
#[error("flaky subframe gave up")]
struct FlakyError;

fn producer(ctx: Context) -> Result<(), BoxError> {
    while ctx.request().get_or("continue", true)? {
        ctx.common().apply("produced", |n: i64| n + 1)?;
        std::thread::sleep(Duration::from_millis(50));
    }
    Ok(())
}

fn consumer(ctx: Context) -> Result<(), BoxError> {
    while ctx.request().get_or("continue", true)? {
        let produced: i64 = ctx.common().get("produced")?;
        let consumed: i64 = ctx.common().get("consumed")?;
        if produced > consumed {
            ctx.common().apply("consumed", |n: i64| n + 1)?;
        }
        std::thread::sleep(Duration::from_millis(80));
    }
    Ok(())
}

fn flaky(_ctx: Context) -> Result<(), BoxError> {
    std::thread::sleep(Duration::from_millis(120));
    Err(Box::new(FlakyError))
}

fn supervise(ctx: Context) -> Result<(), BoxError> {
    let subs = vec![
        ctx.create_subframe(Routine::sync(producer)).map_err(Box::new)?,
        ctx.create_subframe(Routine::sync(consumer)).map_err(Box::new)?,
        ctx.create_subframe(Routine::sync(flaky)).map_err(Box::new)?,
    ];
    let session = ctx.start_subframes(subs).map_err(Box::new)?;

    while session.running() {
        if let Some(fault) = session.take_fault() {
            if fault.failure().source_as::<FlakyError>().is_some() {
                eprintln!("[supervise] expected failure from '{}'", fault.frame_name());
                fault.check();
            }
            // Anything else stays unresolved and rolls up to the caller.
        }
        std::thread::sleep(Duration::from_millis(100));
    }

    session.wait_done(Some(Duration::from_secs(2)));
    Ok(())
}

fn main() -> Result<(), BoxError> {
    if let Some(code) = framevisor::worker_main() {
        std::process::exit(code);
    }

    let root = create_frame(Routine::sync(supervise), FrameOptions::named("root"))?;
    root.set_requests([("continue", Value::Bool(true))])?;
    root.set_commons([("produced", Value::Int(0)), ("consumed", Value::Int(0))])?;

    let subscribers: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter)];
    let root = root.with_subscribers(subscribers);

    let session = root.start()?;

    std::thread::sleep(Duration::from_millis(600));
    session.request().set("continue", false)?;

    session.wait_done_and_collect(Some(Duration::from_secs(5)))?;
    eprintln!(
        "produced={} consumed={}",
        session.common().get::<i64>("produced")?,
        session.common().get::<i64>("consumed")?,
    );
    Ok(())
}
