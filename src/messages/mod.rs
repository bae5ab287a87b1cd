//! # Typed message channels.
//!
//! Thread- and process-safe key/value state sharing between sessions and
//! frames. Four channels exist per frame tree:
//!
//! | Channel | Writer | Reader | Crosses processes |
//! |---|---|---|---|
//! | `environment` | session, pre-start only | session + frames | yes |
//! | `request` | owning root session | frames | yes |
//! | `common` | session defines, frames update | everyone | yes |
//! | `local` | owning frame | owning frame | never |
//!
//! Keys are defined exactly once with a declared [`ValueKind`] and keep that
//! kind even after their value is consumed. Capability handles
//! ([`MessageReader`], [`MessageUpdater`], [`MessageDefiner`],
//! [`MessageManager`]) expose per-role slices of the contract.

mod batch;
mod capability;
pub(crate) mod codec;
mod store;
mod value;

pub use batch::BatchGuard;
pub use capability::{ChannelBatch, MessageDefiner, MessageManager, MessageReader, MessageUpdater};
pub use store::Store;
pub use value::{MessageValue, OpaqueValue, Value, ValueKind};

pub(crate) use capability::Backend;
