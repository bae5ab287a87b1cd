//! # Frames: identity, the tree arena, factories, and contexts.

mod arena;
mod builder;
mod context;
#[allow(clippy::module_inception)]
mod frame;

pub use arena::FrameId;
pub use builder::{
    create_concurrent_frame, create_frame, create_parallel_frame, FrameOptions, RootFrame,
    SubFrame,
};
pub use context::Context;
pub use frame::Realm;

pub(crate) use context::ContextShared;
pub(crate) use frame::{FrameNode, TreeChannels};
