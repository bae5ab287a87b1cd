//! # Simple logging subscriber for debugging and demos.
//!
//! [`LogWriter`] prints events to stdout in a human-readable format.
//!
//! ## Output format
//! ```text
//! [starting] frame=root
//! [phase] frame=root stage=on_start cycle=1
//! [redo] frame=root cycle=1
//! [failed] frame=root.sub err="routine: boom" cycle=1
//! [stopped] frame=root
//! [warn-unresolved] session=root detail="1 unresolved failure(s)"
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};

use super::Subscribe;

/// Simple stdout logging subscriber.
///
/// Enabled via the `logging` feature. Intended for development and demos;
/// implement a custom [`Subscribe`] for structured logging or metrics.
pub struct LogWriter;

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        match e.kind {
            EventKind::FrameStarting => {
                println!("[starting] frame={:?}", e.frame);
            }
            EventKind::CyclePhase => {
                println!(
                    "[phase] frame={:?} stage={:?} cycle={:?}",
                    e.frame, e.reason, e.cycle
                );
            }
            EventKind::CycleRedo => {
                println!("[redo] frame={:?} cycle={:?}", e.frame, e.cycle);
            }
            EventKind::FrameStopped => {
                println!("[stopped] frame={:?}", e.frame);
            }
            EventKind::FrameFailed => {
                println!("[failed] frame={:?} err={:?} cycle={:?}", e.frame, e.reason, e.cycle);
            }
            EventKind::CloseFailed => {
                println!("[close-failed] frame={:?} err={:?}", e.frame, e.reason);
            }
            EventKind::SubframesStarted => {
                println!("[subframes] parent={:?} children={:?}", e.frame, e.reason);
            }
            EventKind::CancelOffered => {
                println!("[cancel-offered] session={:?} mode={:?}", e.frame, e.reason);
            }
            EventKind::ResultPublished => {
                println!("[result] frame={:?} outcome={:?}", e.frame, e.reason);
            }
            EventKind::UnresolvedWarning => {
                println!("[warn-unresolved] session={:?} detail={:?}", e.frame, e.reason);
            }
            EventKind::SubscriberPanicked => {
                println!("[subscriber-panic] subscriber={:?} info={:?}", e.frame, e.reason);
            }
        }
    }

    fn name(&self) -> &'static str {
        "log_writer"
    }
}
