//! # SubscriberSet: event fan-out on a dedicated dispatcher thread.
//!
//! Frames each own a private loop and the session lives on the caller's
//! thread, so no ambient runtime exists to host subscriber work. The set
//! therefore spawns one dispatcher thread with its own current-thread
//! runtime; it drains the bus and hands each event to every subscriber in
//! turn.
//!
//! ## What it guarantees
//! - Publishing never blocks on subscriber work.
//! - Per-set FIFO: subscribers see events in bus order.
//! - Panics inside subscribers are caught, reported on the bus, and do not
//!   kill the dispatcher.
//!
//! ## What it does **not** guarantee
//! - Delivery to a subscriber that lags more than the bus capacity behind.
//! - Any delivery after [`SubscriberSet::shutdown`].

use std::sync::Arc;
use std::thread::JoinHandle;

use futures::FutureExt;
use tokio::sync::broadcast::error::RecvError;

use crate::events::{Bus, Event};

use super::Subscribe;

/// Fan-out of bus events to a fixed set of subscribers.
pub struct SubscriberSet {
    dispatcher: Option<JoinHandle<()>>,
    stop: Arc<std::sync::atomic::AtomicBool>,
}

impl SubscriberSet {
    /// Spawns the dispatcher thread for `subscribers`.
    ///
    /// An empty set spawns nothing and fans out nothing.
    pub fn spawn(bus: &Bus, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
        if subscribers.is_empty() {
            return Self { dispatcher: None, stop };
        }

        let mut rx = bus.subscribe();
        let bus = bus.clone();
        let stop_flag = Arc::clone(&stop);

        let dispatcher = std::thread::Builder::new()
            .name("framevisor-events".to_string())
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                    Ok(rt) => rt,
                    Err(e) => {
                        eprintln!("[framevisor] event dispatcher failed to start: {e}");
                        return;
                    }
                };
                rt.block_on(async move {
                    loop {
                        if stop_flag.load(std::sync::atomic::Ordering::Relaxed) {
                            break;
                        }
                        let ev = match rx.recv().await {
                            Ok(ev) => ev,
                            Err(RecvError::Lagged(_)) => continue,
                            Err(RecvError::Closed) => break,
                        };
                        for sub in &subscribers {
                            let fut = sub.on_event(&ev);
                            if let Err(panic) =
                                std::panic::AssertUnwindSafe(fut).catch_unwind().await
                            {
                                bus.publish(Event::subscriber_panicked(
                                    sub.name(),
                                    format!("{panic:?}"),
                                ));
                                eprintln!(
                                    "[framevisor] subscriber '{}' panicked: {panic:?}",
                                    sub.name()
                                );
                            }
                        }
                    }
                });
            })
            .ok();

        Self { dispatcher, stop }
    }

    /// Stops the dispatcher. Returns immediately; the dispatcher exits at its
    /// next wakeup, so events already in flight may still be delivered.
    pub fn shutdown(mut self) {
        self.stop.store(true, std::sync::atomic::Ordering::Relaxed);
        self.dispatcher.take();
    }
}

impl Drop for SubscriberSet {
    fn drop(&mut self) {
        self.stop.store(true, std::sync::atomic::Ordering::Relaxed);
        // The dispatcher parks in recv(); it exits on the next event or when
        // the bus closes with the last session. Detach rather than block.
        if let Some(handle) = self.dispatcher.take() {
            drop(handle);
        }
    }
}
