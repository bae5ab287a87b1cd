//! # Result aggregation and the session control surface.

mod result;
#[allow(clippy::module_inception)]
mod session;
mod store;

pub use result::{FrameResult, Mark, SessionResult};
pub use session::{Session, SubSession};
pub use store::ResolveHandle;

pub(crate) use store::ResultStore;
