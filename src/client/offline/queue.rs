//! # Operation Queue
//!
//! Durable FIFO of mutations waiting to reach the remote backend.
//!
//! ## Features
//!
//! - **Single Source of Truth**: One in-memory list, written through to a `DurableStore`
//! - **Dirty Tracking**: Every mutation bumps a version; `flush` persists what changed
//! - **Single-Flight Flush**: Concurrent callers wait for the active flush instead of racing it
//! - **Degradation**: A failing store never loses an operation; it stays dirty until the next flush
//! - **Status Tracking**: Operations being executed are marked in flight
//!
//! ## Usage
//!
//! ```rust,no_run
//! use docsync::client::local_db::MemoryStore;
//! use docsync::client::offline::queue::{OperationQueue, PendingOperation};
//! use docsync::shared::{EntityTable, FieldMap, OperationKind};
//! use std::sync::Arc;
//!
//! # async fn example() {
//! let queue = OperationQueue::open(Arc::new(MemoryStore::new())).await;
//!
//! let op = PendingOperation::new(OperationKind::Create, EntityTable::Threads, FieldMap::new());
//! let id = queue.enqueue(op).await;
//!
//! for op in queue.list_all().await {
//!     // Execute operation...
//!     queue.remove(op.id).await;
//! }
//! # }
//! ```

use crate::client::local_db::DurableStore;
use crate::shared::{EntityTable, FieldMap, OperationKind, SyncError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Notify, RwLock};
use uuid::Uuid;

/// A mutation waiting to be sent to the remote backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOperation {
    /// Operation ID
    pub id: Uuid,
    /// Create, update or delete
    pub kind: OperationKind,
    /// Target table
    pub table: EntityTable,
    /// Server id of the target record (update and delete only)
    pub target: Option<String>,
    /// Field values, already schema-filtered
    pub payload: FieldMap,
    /// When the operation was queued
    pub enqueued_at: DateTime<Utc>,
    /// Failed attempts so far
    pub retry_count: u32,
    /// Optimistic entry this operation belongs to
    pub correlation_id: Option<Uuid>,
}

impl PendingOperation {
    pub fn new(kind: OperationKind, table: EntityTable, payload: FieldMap) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            table,
            target: None,
            payload,
            enqueued_at: Utc::now(),
            retry_count: 0,
            correlation_id: None,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_correlation(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }
}

/// Whether the queue currently survives a restart
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PersistenceStatus {
    /// Every queued operation is written to disk
    Durable,
    /// Durability was turned off in configuration
    SessionOnly,
    /// The durable store failed; pending writes only live in memory
    Degraded { reason: String },
}

/// Result of folding a patch into a queued operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Amendment {
    /// The payload was updated
    Applied,
    /// The operation is being executed and cannot change
    InFlight,
    /// No such operation
    Missing,
}

/// Queue statistics
#[derive(Debug, Clone, Default)]
pub struct QueueStats {
    pub total: usize,
    pub in_flight: usize,
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
    /// Mutations applied since the queue was opened
    pub version: u64,
    /// Highest version known to be on disk
    pub durable_version: u64,
    /// Mutations not yet written to the store
    pub dirty: usize,
}

#[derive(Debug, Clone)]
struct QueueEntry {
    op: PendingOperation,
    in_flight: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DirtyKind {
    Put,
    Delete,
}

#[derive(Debug, Default)]
struct QueueState {
    entries: Vec<QueueEntry>,
    version: u64,
    durable_version: u64,
    dirty: HashMap<Uuid, (u64, DirtyKind)>,
}

impl QueueState {
    fn position(&self, id: Uuid) -> Option<usize> {
        self.entries.iter().position(|e| e.op.id == id)
    }

    fn touch(&mut self, id: Uuid, kind: DirtyKind) {
        self.version += 1;
        self.dirty.insert(id, (self.version, kind));
    }

    fn snapshot(&self) -> Vec<PendingOperation> {
        self.entries.iter().map(|e| e.op.clone()).collect()
    }

    fn settle_durable_version(&mut self) {
        self.durable_version = match self.dirty.values().map(|(v, _)| *v).min() {
            Some(oldest) => oldest - 1,
            None => self.version,
        };
    }
}

/// Durable operation queue
#[derive(Debug)]
pub struct OperationQueue {
    state: RwLock<QueueState>,
    store: Arc<dyn DurableStore>,
    flushing: AtomicBool,
    flushed: Notify,
    contents: watch::Sender<Vec<PendingOperation>>,
    persistence: watch::Sender<PersistenceStatus>,
    /// Reason the queue is memory-only for the whole session, if it is
    session_only: Option<String>,
}

impl OperationQueue {
    /// Open the queue and load whatever the store holds
    pub async fn open(store: Arc<dyn DurableStore>) -> Self {
        let baseline = if store.is_durable() {
            PersistenceStatus::Durable
        } else {
            PersistenceStatus::SessionOnly
        };
        Self::open_with_status(store, baseline, None).await
    }

    /// Open a memory-only queue because the durable store could not be used
    pub async fn open_degraded(store: Arc<dyn DurableStore>, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        let status = PersistenceStatus::Degraded {
            reason: reason.clone(),
        };
        Self::open_with_status(store, status, Some(reason)).await
    }

    async fn open_with_status(
        store: Arc<dyn DurableStore>,
        status: PersistenceStatus,
        session_only: Option<String>,
    ) -> Self {
        let (status, entries) = match store.get_all().await {
            Ok(ops) => (status, ops),
            Err(e) => {
                tracing::error!(error = %e, "Failed to load queued operations");
                let reason = format!("failed to load queue: {e}");
                (PersistenceStatus::Degraded { reason }, Vec::new())
            }
        };

        if !entries.is_empty() {
            tracing::info!(count = entries.len(), "Restored queued operations");
        }

        let snapshot = entries.clone();
        let state = QueueState {
            entries: entries
                .into_iter()
                .map(|op| QueueEntry { op, in_flight: false })
                .collect(),
            ..Default::default()
        };

        Self {
            state: RwLock::new(state),
            store,
            flushing: AtomicBool::new(false),
            flushed: Notify::new(),
            contents: watch::channel(snapshot).0,
            persistence: watch::channel(status).0,
            session_only,
        }
    }

    /// Append an operation and persist it
    pub async fn enqueue(&self, op: PendingOperation) -> Uuid {
        let id = op.id;
        {
            let mut state = self.state.write().await;
            tracing::debug!(
                operation_id = %id,
                kind = op.kind.as_str(),
                table = %op.table,
                "Enqueued operation"
            );
            state.entries.push(QueueEntry {
                op,
                in_flight: false,
            });
            state.touch(id, DirtyKind::Put);
            self.publish(&state);
        }
        self.persist().await;
        id
    }

    /// Remove an operation; returns whether it was queued
    pub async fn remove(&self, id: Uuid) -> bool {
        let removed = {
            let mut state = self.state.write().await;
            match state.position(id) {
                Some(index) => {
                    state.entries.remove(index);
                    state.touch(id, DirtyKind::Delete);
                    self.publish(&state);
                    true
                }
                None => false,
            }
        };
        if removed {
            self.persist().await;
        }
        removed
    }

    /// Remove every operation of a correlation that is not in flight
    pub async fn remove_correlation(&self, correlation_id: Uuid) -> Vec<PendingOperation> {
        let removed: Vec<PendingOperation> = {
            let mut state = self.state.write().await;
            let (dropped, kept): (Vec<QueueEntry>, Vec<QueueEntry>) =
                std::mem::take(&mut state.entries).into_iter().partition(|e| {
                    e.op.correlation_id == Some(correlation_id) && !e.in_flight
                });
            state.entries = kept;
            for entry in &dropped {
                state.touch(entry.op.id, DirtyKind::Delete);
            }
            if !dropped.is_empty() {
                self.publish(&state);
            }
            dropped.into_iter().map(|e| e.op).collect()
        };
        if !removed.is_empty() {
            self.persist().await;
        }
        removed
    }

    /// All queued operations in FIFO order
    pub async fn list_all(&self) -> Vec<PendingOperation> {
        self.state.read().await.snapshot()
    }

    /// Current contents of one operation
    pub async fn get(&self, id: Uuid) -> Option<PendingOperation> {
        let state = self.state.read().await;
        state.position(id).map(|i| state.entries[i].op.clone())
    }

    /// Queued operation carrying `correlation_id`, and whether it is in flight
    pub async fn find_by_correlation(&self, correlation_id: Uuid) -> Option<(PendingOperation, bool)> {
        let state = self.state.read().await;
        state
            .entries
            .iter()
            .find(|e| e.op.correlation_id == Some(correlation_id))
            .map(|e| (e.op.clone(), e.in_flight))
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Mark an operation in flight and return its current contents
    ///
    /// Returns `None` if the operation was removed since the caller looked.
    pub async fn begin(&self, id: Uuid) -> Option<PendingOperation> {
        let mut state = self.state.write().await;
        let index = state.position(id)?;
        let entry = &mut state.entries[index];
        entry.in_flight = true;
        Some(entry.op.clone())
    }

    /// Clear the in-flight mark of an operation that stays queued
    pub async fn finish(&self, id: Uuid) {
        let mut state = self.state.write().await;
        if let Some(index) = state.position(id) {
            state.entries[index].in_flight = false;
        }
    }

    pub async fn is_in_flight(&self, id: Uuid) -> bool {
        let state = self.state.read().await;
        state
            .position(id)
            .is_some_and(|i| state.entries[i].in_flight)
    }

    /// Merge `patch` into the payload of a queued operation
    pub async fn amend(&self, id: Uuid, patch: FieldMap) -> Amendment {
        {
            let mut state = self.state.write().await;
            let Some(index) = state.position(id) else {
                return Amendment::Missing;
            };
            let entry = &mut state.entries[index];
            if entry.in_flight {
                return Amendment::InFlight;
            }
            entry.op.payload.extend(patch);
            state.touch(id, DirtyKind::Put);
            self.publish(&state);
        }
        self.persist().await;
        Amendment::Applied
    }

    /// Count one failed attempt; returns the new retry count
    pub async fn record_failure(&self, id: Uuid) -> Option<u32> {
        let count = {
            let mut state = self.state.write().await;
            let index = state.position(id)?;
            let entry = &mut state.entries[index];
            entry.in_flight = false;
            entry.op.retry_count += 1;
            let count = entry.op.retry_count;
            state.touch(id, DirtyKind::Put);
            self.publish(&state);
            count
        };
        self.persist().await;
        Some(count)
    }

    /// Write every dirty entry to the store
    ///
    /// Only one flush runs at a time. A caller arriving during a flush waits
    /// for it and then flushes whatever is still dirty.
    pub async fn flush(&self) -> Result<(), SyncError> {
        loop {
            let notified = self.flushed.notified();
            if self
                .flushing
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                notified.await;
                continue;
            }

            let _guard = FlushGuard { queue: self };
            return self.flush_dirty().await;
        }
    }

    async fn flush_dirty(&self) -> Result<(), SyncError> {
        loop {
            let batch: Vec<(Uuid, u64, Option<PendingOperation>)> = {
                let state = self.state.read().await;
                state
                    .dirty
                    .iter()
                    .map(|(id, (version, kind))| {
                        let op = match kind {
                            DirtyKind::Put => state.position(*id).map(|i| state.entries[i].op.clone()),
                            DirtyKind::Delete => None,
                        };
                        (*id, *version, op)
                    })
                    .collect()
            };

            if batch.is_empty() {
                return Ok(());
            }

            for (id, version, op) in batch {
                let result = match &op {
                    Some(op) => self.store.put(op).await,
                    None => self.store.delete(id).await,
                };

                let mut state = self.state.write().await;
                match result {
                    Ok(()) => {
                        if state.dirty.get(&id).is_some_and(|(v, _)| *v == version) {
                            state.dirty.remove(&id);
                        }
                        state.settle_durable_version();
                    }
                    Err(e) => {
                        state.settle_durable_version();
                        return Err(SyncError::degraded(e.to_string()));
                    }
                }
            }
        }
    }

    async fn persist(&self) {
        let status = match self.flush().await {
            Ok(()) => match &self.session_only {
                Some(reason) => PersistenceStatus::Degraded {
                    reason: reason.clone(),
                },
                None if self.store.is_durable() => PersistenceStatus::Durable,
                None => PersistenceStatus::SessionOnly,
            },
            Err(e) => {
                tracing::warn!(error = %e, "Queue write failed, keeping operation in memory");
                let reason = match e {
                    SyncError::QueuePersistenceDegraded { reason } => reason,
                    other => other.to_string(),
                };
                PersistenceStatus::Degraded { reason }
            }
        };

        self.persistence.send_if_modified(|current| {
            if *current != status {
                *current = status;
                true
            } else {
                false
            }
        });
    }

    fn publish(&self, state: &QueueState) {
        self.contents.send_replace(state.snapshot());
    }

    /// Current persistence status
    pub fn persistence(&self) -> PersistenceStatus {
        self.persistence.borrow().clone()
    }

    /// Receiver notified whenever the persistence status changes
    pub fn watch_persistence(&self) -> watch::Receiver<PersistenceStatus> {
        self.persistence.subscribe()
    }

    /// Latest published snapshot, without taking the queue lock
    pub fn contents(&self) -> Vec<PendingOperation> {
        self.contents.borrow().clone()
    }

    /// Receiver notified with a fresh snapshot after every mutation
    pub fn watch_contents(&self) -> watch::Receiver<Vec<PendingOperation>> {
        self.contents.subscribe()
    }

    /// Get queue statistics
    pub async fn stats(&self) -> QueueStats {
        let state = self.state.read().await;
        let mut stats = QueueStats {
            total: state.entries.len(),
            version: state.version,
            durable_version: state.durable_version,
            dirty: state.dirty.len(),
            ..Default::default()
        };
        for entry in &state.entries {
            if entry.in_flight {
                stats.in_flight += 1;
            }
            match entry.op.kind {
                OperationKind::Create => stats.creates += 1,
                OperationKind::Update => stats.updates += 1,
                OperationKind::Delete => stats.deletes += 1,
            }
        }
        stats
    }
}

struct FlushGuard<'a> {
    queue: &'a OperationQueue,
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.queue.flushing.store(false, Ordering::Release);
        self.queue.flushed.notify_waiters();
    }
}
