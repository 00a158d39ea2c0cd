//! # Offline Module
//!
//! Offline-first mutation handling: the durable operation queue, retry
//! classification, optimistic overlays and the composed view.
//!
//! ## Components
//!
//! - **Queue**: Durable FIFO of pending operations
//! - **Retry**: Backoff and dead-letter decisions
//! - **Optimistic**: Overlays for unconfirmed writes
//! - **Reconciliation**: Authoritative records merged with overlays
//!
//! UI code mutates data through a [`Collection`], never through the queue.

pub mod optimistic;
pub mod queue;
pub mod reconciliation;
pub mod retry;

pub use optimistic::{OptimisticManager, OverlayEntry, OverlayKind};
pub use queue::{OperationQueue, PendingOperation, PersistenceStatus};
pub use reconciliation::{ItemStatus, ViewItem};
pub use retry::{BackoffStrategy, Disposition, RetryController};

use crate::client::sync::EngineInner;
use crate::shared::{EntityId, EntityTable, FieldMap, Record, SyncError};
use std::sync::Arc;

/// Mutation and read surface for one table
#[derive(Debug, Clone)]
pub struct Collection {
    table: EntityTable,
    engine: Arc<EngineInner>,
}

impl Collection {
    pub(crate) fn new(table: EntityTable, engine: Arc<EngineInner>) -> Self {
        Self { table, engine }
    }

    pub fn table(&self) -> EntityTable {
        self.table
    }

    /// Create an item; the returned id is local until the server acknowledges it
    pub async fn create_item(&self, fields: FieldMap) -> EntityId {
        self.engine.create_item(self.table, fields).await
    }

    /// Patch an item
    pub async fn update_item(&self, id: &EntityId, patch: FieldMap) -> Result<(), SyncError> {
        self.engine.update_item(self.table, id, patch).await
    }

    /// Delete an item
    pub async fn delete_item(&self, id: &EntityId) -> Result<(), SyncError> {
        self.engine.delete_item(self.table, id).await
    }

    /// Whether the item is shown with unconfirmed changes
    pub async fn is_optimistic(&self, id: &EntityId) -> bool {
        self.engine.is_optimistic(self.table, id).await
    }

    /// Whether a write for the item has not been resolved yet
    pub async fn is_pending(&self, id: &EntityId) -> bool {
        self.engine.is_pending(self.table, id).await
    }

    /// Discard every pending change of the item
    pub async fn rollback(&self, id: &EntityId) -> bool {
        self.engine.rollback(self.table, id).await
    }

    /// Composed view of the table
    pub async fn view(&self) -> Vec<ViewItem> {
        self.engine.view(self.table).await
    }

    /// Replace the authoritative records, e.g. after a fetch
    pub async fn set_authoritative(&self, records: Vec<Record>) {
        self.engine.set_authoritative(self.table, records).await;
    }
}
