//! Change-event hooks.
//!
//! One explicit interface the system-of-record layer calls after a
//! committed write, replacing per-mapper lifecycle callbacks. Hooks only
//! enqueue ids into the revalidation manager; they never perform cache I/O
//! inline with the triggering transaction.

use std::sync::Arc;

use tracing::debug;

use crate::revalidation::RevalidationManager;
use crate::snapshot::{EdgeKind, EntityKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityOp {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeOp {
    Insert,
    Delete,
}

/// Commit-time notification interface. Implementations must not block.
pub trait ChangeEvents: Send + Sync {
    fn on_entity_changed(&self, kind: EntityKind, id: i32, op: EntityOp);

    fn on_edge_changed(&self, kind: EdgeKind, target_id: i32, follower_id: i32, op: EdgeOp);
}

/// Production hook: marks affected ids dirty, nothing else.
#[derive(Clone)]
pub struct CacheHooks {
    revalidation: Arc<RevalidationManager>,
}

impl CacheHooks {
    pub fn new(revalidation: Arc<RevalidationManager>) -> Self {
        Self { revalidation }
    }
}

impl ChangeEvents for CacheHooks {
    fn on_entity_changed(&self, kind: EntityKind, id: i32, op: EntityOp) {
        debug!(kind = %kind, id = id, op = ?op, "Entity change event");
        self.revalidation.mark_dirty(kind, id);
    }

    fn on_edge_changed(&self, kind: EdgeKind, target_id: i32, follower_id: i32, op: EdgeOp) {
        debug!(
            kind = %kind,
            target = target_id,
            follower = follower_id,
            op = ?op,
            "Edge change event"
        );
        self.revalidation
            .mark_edge(kind, target_id, follower_id, op == EdgeOp::Insert);

        // Both sides of the mirror index must be revalidated, and both
        // endpoints' follower counters changed. Followers are authors.
        if let Some(target_kind) = kind.entity_kind() {
            self.revalidation.mark_dirty(target_kind, target_id);
        }
        self.revalidation.mark_dirty(EntityKind::Author, follower_id);
    }
}
