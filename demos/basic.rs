//! # Demo: basic
//!
//! One root frame with the full hook surface and a redo loop.
//!
//! ## Flow
//! ```text
//! start()
//!   ├─► on_open            (acquire "resources")
//!   ├─► on_start → routine → on_end
//!   ├─► on_redo            (repeat until 3 cycles done)
//!   └─► on_close           (release, shielded)
//! session.wait_done_and_collect()
//! ```
//!
//! ## Run
//! ```bash
//! cargo run --example basic
//! ```

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use framevisor::{
    create_frame, BoxError, Context, EventHook, FrameOptions, RedoHook, Routine,
};

fn main() -> Result<(), BoxError> {
    // Worker guard first: harmless here, mandatory once remote routines
    // exist.
    if let Some(code) = framevisor::worker_main() {
        std::process::exit(code);
    }

    let cycles = Arc::new(AtomicU32::new(0));

    let root = create_frame(
        Routine::sync(|ctx: Context| {
            let done: i64 = ctx.local().get_or("done", 0)?;
            eprintln!("[{}] working, {} cycles so far", ctx.frame_name(), done);
            if done == 0 {
                ctx.local().define("done", 1i64)?;
            } else {
                ctx.local().set("done", done + 1)?;
            }
            Ok(())
        }),
        FrameOptions::named("worker"),
    )?;

    root.set_on_open(EventHook::sync(|ctx| {
        eprintln!("[{}] open", ctx.frame_name());
        Ok(())
    }))?;
    root.set_on_close(EventHook::sync(|ctx| {
        eprintln!("[{}] close", ctx.frame_name());
        Ok(())
    }))?;

    let counter = Arc::clone(&cycles);
    root.set_on_redo(RedoHook::sync(move |_ctx| {
        Ok(counter.fetch_add(1, Ordering::SeqCst) < 2)
    }))?;

    let session = root.start()?;
    session.wait_done_and_collect(None)?;

    let result = session.get_finished_frame().expect("root finished");
    eprintln!("done after {} cycles, successful = {}", result.cycles(), result.successful());
    Ok(())
}
