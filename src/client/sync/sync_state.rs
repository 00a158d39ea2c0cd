//! # Sync State Management
//!
//! Observable sync status and the events surfaced to the UI.
//!
//! ## Features
//!
//! - **State Tracking**: Network, visibility, drain and persistence status
//! - **Queue Mirror**: `pending_operations` always reflects the queue
//! - **Status Updates**: Listeners and `watch` receivers see every change
//! - **Error Reporting**: User-facing failures are broadcast as `SyncEvent`s

use crate::client::offline::queue::{PendingOperation, PersistenceStatus};
use crate::shared::{EntityId, EntityTable, Record, SyncError};
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Snapshot of the sync engine
#[derive(Debug, Clone, PartialEq)]
pub struct SyncState {
    pub is_online: bool,
    pub is_visible: bool,
    /// True only while a drain pass runs
    pub is_syncing: bool,
    /// Queued operations in FIFO order
    pub pending_operations: Vec<PendingOperation>,
    /// End of the last drain pass that ran to completion
    pub last_sync_time: Option<DateTime<Utc>>,
    pub persistence: PersistenceStatus,
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            is_online: false,
            is_visible: true,
            is_syncing: false,
            pending_operations: Vec::new(),
            last_sync_time: None,
            persistence: PersistenceStatus::Durable,
        }
    }
}

/// Notification for the UI
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// An operation was acknowledged by the server
    Acknowledged {
        table: EntityTable,
        /// Id the item is now known by
        id: EntityId,
    },
    /// An operation was removed without reaching the server
    OperationFailed {
        operation_id: Uuid,
        correlation_id: Option<Uuid>,
        error: SyncError,
    },
    /// An optimistic entry was discarded
    RolledBack {
        table: EntityTable,
        id: EntityId,
        error: SyncError,
    },
    /// The queue fell back to memory-only storage
    PersistenceDegraded { error: SyncError },
    /// The server applied a write whose optimistic entry was already rolled back
    OrphanedWrite {
        table: EntityTable,
        id: EntityId,
        /// Server copy, when the write returned one
        record: Option<Record>,
    },
}

/// Shared handle over the observable state
#[derive(Debug)]
pub struct SyncStateHandle {
    state: watch::Sender<SyncState>,
    events: broadcast::Sender<SyncEvent>,
}

impl SyncStateHandle {
    pub fn new(initial: SyncState) -> Self {
        Self {
            state: watch::channel(initial).0,
            events: broadcast::channel(64).0,
        }
    }

    /// Current state
    pub fn snapshot(&self) -> SyncState {
        self.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Broadcast an event; dropped if nobody listens
    pub fn emit(&self, event: SyncEvent) {
        let _ = self.events.send(event);
    }

    /// Apply `change` and notify listeners if anything differs
    pub fn update(&self, change: impl FnOnce(&mut SyncState)) {
        self.state.send_if_modified(|state| {
            let before = state.clone();
            change(state);
            *state != before
        });
    }

    pub fn set_online(&self, online: bool) {
        self.update(|s| s.is_online = online);
    }

    pub fn set_visible(&self, visible: bool) {
        self.update(|s| s.is_visible = visible);
    }

    pub fn set_syncing(&self, syncing: bool) {
        self.update(|s| s.is_syncing = syncing);
    }

    pub fn set_pending(&self, pending: Vec<PendingOperation>) {
        self.update(|s| s.pending_operations = pending);
    }

    pub fn set_persistence(&self, persistence: PersistenceStatus) {
        self.update(|s| s.persistence = persistence);
    }

    pub fn set_last_sync_time(&self, at: DateTime<Utc>) {
        self.update(|s| s.last_sync_time = Some(at));
    }

    /// Call `listener` with every new state until the subscription is dropped
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SyncState) + Send + Sync + 'static,
    {
        let mut rx = self.state.subscribe();
        let task = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let state = rx.borrow_and_update().clone();
                listener(&state);
            }
        });
        Subscription { task: Some(task) }
    }
}

/// Listener registration; dropping it unsubscribes
#[derive(Debug)]
pub struct Subscription {
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Remove the listener
    pub fn unsubscribe(mut self) {
        self.cancel();
    }

    fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}
