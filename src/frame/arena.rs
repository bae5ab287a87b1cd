//! # Frame arena: id-keyed ownership of the frame tree.
//!
//! Contexts, sessions, and frames reference each other in cycles; storing the
//! nodes in one arena keyed by an opaque [`FrameId`] — with parent/child
//! links as ids, never owning pointers — keeps every handle cycle-free.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::frame::frame::FrameNode;

/// Opaque identity of a frame within its arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(u64);

/// Shared owner of every node in one frame tree.
pub(crate) struct FrameArena {
    nodes: Mutex<HashMap<FrameId, Arc<FrameNode>>>,
    next: AtomicU64,
}

impl FrameArena {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self { nodes: Mutex::new(HashMap::new()), next: AtomicU64::new(1) })
    }

    pub(crate) fn alloc_id(&self) -> FrameId {
        FrameId(self.next.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn insert(&self, node: Arc<FrameNode>) {
        self.nodes.lock().insert(node.id, node);
    }

    pub(crate) fn get(&self, id: FrameId) -> Option<Arc<FrameNode>> {
        self.nodes.lock().get(&id).cloned()
    }
}
