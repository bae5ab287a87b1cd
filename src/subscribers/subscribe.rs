//! # Core subscriber trait.
//!
//! `Subscribe` is the extension point for plugging custom event handlers into
//! the runtime: logging, metrics, progress displays. Subscribers run on the
//! dedicated dispatcher thread owned by
//! [`SubscriberSet`](crate::subscribers::SubscriberSet), never on a frame's
//! own loop.

use async_trait::async_trait;

use crate::events::Event;

/// Contract for event subscribers.
///
/// Called sequentially from the dispatcher thread. Implementations should
/// avoid long blocking work; a stalled subscriber delays delivery to every
/// subscriber behind it, though never the frames themselves.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Handles a single event.
    async fn on_event(&self, event: &Event);

    /// Human-readable name (for logs).
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}
