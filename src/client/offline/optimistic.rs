//! # Optimistic UI Updates
//!
//! Holds the overlays that let the UI show a mutation before the server has
//! confirmed it.
//!
//! ## Features
//!
//! - **Immediate UI Updates**: Every mutation gets an overlay the instant it is requested
//! - **Promotion**: On acknowledgment a local id is replaced by the server id
//! - **Rollback Support**: Revert an overlay on failure or timeout
//! - **Abandonment**: A rolled-back correlation never writes back into the view
//! - **Deferred Follow-ups**: Edits to an item whose create is in flight wait for its ack
//!
//! The manager is pure bookkeeping. Queue writes and timers are driven by the
//! sync service, which calls in here at each step.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use docsync::client::offline::optimistic::{Acknowledgment, OptimisticManager};
//! use docsync::shared::{EntityTable, FieldMap, Record};
//!
//! # async fn example() {
//! let manager = OptimisticManager::new();
//!
//! // Apply optimistic create
//! let (id, correlation) = manager.apply_create(EntityTable::Threads, FieldMap::new()).await;
//!
//! // Server accepted it
//! let record = Record::new("thr_1", FieldMap::new());
//! manager.acknowledge(correlation, Acknowledgment::Created(record)).await;
//! # }
//! ```

use super::reconciliation::{compose_view, ViewItem};
use crate::shared::{EntityId, EntityTable, FieldMap, OperationKind, Record};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Kind of unconfirmed change an overlay represents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayKind {
    PendingCreate,
    PendingUpdate,
    PendingDelete,
}

/// Locally held, unconfirmed version of an entity
#[derive(Debug, Clone)]
pub struct OverlayEntry {
    /// Table the entity lives in
    pub table: EntityTable,
    /// Entity the overlay covers
    pub id: EntityId,
    /// What kind of change is pending
    pub kind: OverlayKind,
    /// Locally merged field values
    pub fields: FieldMap,
    /// Outstanding correlation ids, oldest first
    pub correlations: Vec<Uuid>,
    /// When the first pending change was applied
    pub applied_at: DateTime<Utc>,
    pub(crate) seq: u64,
}

/// Follow-up mutation parked behind an in-flight create
#[derive(Debug, Clone, PartialEq)]
pub enum Deferred {
    Update(FieldMap),
    Delete,
}

/// Server response for an acknowledged operation
#[derive(Debug, Clone)]
pub enum Acknowledgment {
    Created(Record),
    Updated(Record),
    Deleted,
}

/// Result of reconciling an acknowledgment
#[derive(Debug, Clone, PartialEq)]
pub enum AckResult {
    /// The overlay was promoted or cleared
    Reconciled {
        table: EntityTable,
        /// Id the item is now known by
        id: EntityId,
        /// Follow-ups to issue against the server id
        deferred: Vec<Deferred>,
    },
    /// The correlation was rolled back before the server answered
    Orphaned { table: EntityTable, id: EntityId },
    /// No overlay tracks this correlation
    Untracked,
}

/// How an id resolves against the overlay state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    /// Still only known locally; carries the create correlation
    Local(Uuid),
    /// Known to the server
    Persisted(String),
    /// Local id with no overlay and no promotion
    Unknown,
}

#[derive(Debug, Clone)]
struct Contribution {
    table: EntityTable,
    id: EntityId,
    kind: OperationKind,
    patch: FieldMap,
}

#[derive(Debug, Default)]
struct OverlayState {
    authoritative: HashMap<EntityTable, Vec<Record>>,
    overlays: HashMap<(EntityTable, EntityId), OverlayEntry>,
    contributions: HashMap<Uuid, Contribution>,
    deferred: HashMap<Uuid, Vec<Deferred>>,
    aliases: HashMap<Uuid, String>,
    abandoned: HashMap<Uuid, (EntityTable, EntityId)>,
    next_seq: u64,
}

impl OverlayState {
    fn resolve(&self, table: EntityTable, id: &EntityId) -> Resolved {
        match id {
            EntityId::Persisted(sid) => Resolved::Persisted(sid.clone()),
            EntityId::LocalOnly(token) => {
                if let Some(sid) = self.aliases.get(token) {
                    Resolved::Persisted(sid.clone())
                } else if self.contributions.contains_key(token)
                    && self.overlays.contains_key(&(table, id.clone()))
                {
                    Resolved::Local(*token)
                } else {
                    Resolved::Unknown
                }
            }
        }
    }

    fn canonical(&self, id: &EntityId) -> EntityId {
        match id {
            EntityId::LocalOnly(token) => match self.aliases.get(token) {
                Some(sid) => EntityId::Persisted(sid.clone()),
                None => id.clone(),
            },
            EntityId::Persisted(_) => id.clone(),
        }
    }

    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    /// Rebuild an overlay from its outstanding contributions
    fn recompute(&mut self, key: &(EntityTable, EntityId)) {
        let Some(entry) = self.overlays.get(key) else {
            return;
        };
        let correlations = entry.correlations.clone();

        if correlations.is_empty() {
            self.overlays.remove(key);
            return;
        }

        let mut fields = FieldMap::new();
        let mut kind = match key.1 {
            EntityId::LocalOnly(_) => OverlayKind::PendingCreate,
            EntityId::Persisted(_) => OverlayKind::PendingUpdate,
        };

        for correlation in &correlations {
            if let Some(contribution) = self.contributions.get(correlation) {
                fields.extend(contribution.patch.clone());
                if contribution.kind == OperationKind::Delete {
                    kind = OverlayKind::PendingDelete;
                }
            }
            for deferred in self.deferred.get(correlation).into_iter().flatten() {
                match deferred {
                    Deferred::Update(patch) => fields.extend(patch.clone()),
                    Deferred::Delete => kind = OverlayKind::PendingDelete,
                }
            }
        }

        if let Some(entry) = self.overlays.get_mut(key) {
            entry.fields = fields;
            entry.kind = kind;
        }
    }

    fn add_contribution(&mut self, correlation: Uuid, contribution: Contribution) {
        let key = (contribution.table, contribution.id.clone());
        let seq = self.next_seq();
        self.overlays
            .entry(key.clone())
            .or_insert_with(|| OverlayEntry {
                table: key.0,
                id: key.1.clone(),
                kind: OverlayKind::PendingUpdate,
                fields: FieldMap::new(),
                correlations: Vec::new(),
                applied_at: Utc::now(),
                seq,
            })
            .correlations
            .push(correlation);
        self.contributions.insert(correlation, contribution);
        self.recompute(&key);
    }

    /// Drop one correlation from its overlay; returns the entity it covered
    fn detach(&mut self, correlation: Uuid) -> Option<(EntityTable, EntityId)> {
        let contribution = self.contributions.remove(&correlation)?;
        self.deferred.remove(&correlation);
        let key = (contribution.table, contribution.id.clone());
        if let Some(entry) = self.overlays.get_mut(&key) {
            entry.correlations.retain(|c| *c != correlation);
        }
        self.recompute(&key);
        Some(key)
    }

    fn upsert_authoritative(&mut self, table: EntityTable, record: Record) {
        let records = self.authoritative.entry(table).or_default();
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
    }
}

/// Optimistic overlay manager
#[derive(Debug, Default)]
pub struct OptimisticManager {
    state: RwLock<OverlayState>,
}

impl OptimisticManager {
    /// Create a new optimistic manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pending-create overlay under a freshly minted local id
    ///
    /// Returns the id shown to the UI and the correlation id of the create.
    pub async fn apply_create(&self, table: EntityTable, fields: FieldMap) -> (EntityId, Uuid) {
        let token = Uuid::new_v4();
        let id = EntityId::LocalOnly(token);
        let mut state = self.state.write().await;
        state.add_contribution(
            token,
            Contribution {
                table,
                id: id.clone(),
                kind: OperationKind::Create,
                patch: fields,
            },
        );
        (id, token)
    }

    /// Add a pending-update overlay on a server id
    pub async fn apply_update(
        &self,
        table: EntityTable,
        server_id: &str,
        patch: FieldMap,
        correlation: Uuid,
    ) {
        let mut state = self.state.write().await;
        state.add_contribution(
            correlation,
            Contribution {
                table,
                id: EntityId::Persisted(server_id.to_string()),
                kind: OperationKind::Update,
                patch,
            },
        );
    }

    /// Add a pending-delete overlay on a server id
    pub async fn apply_delete(&self, table: EntityTable, server_id: &str, correlation: Uuid) {
        let mut state = self.state.write().await;
        state.add_contribution(
            correlation,
            Contribution {
                table,
                id: EntityId::Persisted(server_id.to_string()),
                kind: OperationKind::Delete,
                patch: FieldMap::new(),
            },
        );
    }

    /// Fold a patch into a create that has not been sent yet
    pub async fn fold_into_create(&self, token: Uuid, patch: FieldMap) {
        let mut state = self.state.write().await;
        let Some(contribution) = state.contributions.get_mut(&token) else {
            return;
        };
        contribution.patch.extend(patch);
        let key = (contribution.table, contribution.id.clone());
        state.recompute(&key);
    }

    /// Park a follow-up until the in-flight create of `token` is acknowledged
    ///
    /// Returns `false` when the create is no longer tracked, for instance
    /// because it was acknowledged since the caller resolved the id. The
    /// caller then owns the follow-up.
    pub async fn defer(&self, token: Uuid, follow_up: Deferred) -> bool {
        let mut state = self.state.write().await;
        let Some(contribution) = state.contributions.get(&token) else {
            return false;
        };
        let key = (contribution.table, contribution.id.clone());
        let parked = state.deferred.entry(token).or_default();
        if parked.contains(&Deferred::Delete) {
            return true;
        }
        parked.push(follow_up);
        state.recompute(&key);
        true
    }

    /// Discard a create that never left the client
    pub async fn cancel_create(&self, token: Uuid) -> bool {
        let mut state = self.state.write().await;
        state.detach(token).is_some()
    }

    /// Reconcile a server acknowledgment for `correlation`
    pub async fn acknowledge(&self, correlation: Uuid, ack: Acknowledgment) -> AckResult {
        let mut state = self.state.write().await;

        if let Some((table, id)) = state.abandoned.remove(&correlation) {
            return AckResult::Orphaned { table, id };
        }

        let Some(contribution) = state.contributions.get(&correlation).cloned() else {
            return AckResult::Untracked;
        };
        let table = contribution.table;
        let deferred = state.deferred.remove(&correlation).unwrap_or_default();
        state.detach(correlation);

        let id = match ack {
            Acknowledgment::Created(record) => {
                if let EntityId::LocalOnly(token) = contribution.id {
                    state.aliases.insert(token, record.id.clone());
                }
                let id = EntityId::Persisted(record.id.clone());
                state.upsert_authoritative(table, record);
                id
            }
            Acknowledgment::Updated(record) => {
                let id = EntityId::Persisted(record.id.clone());
                state.upsert_authoritative(table, record);
                id
            }
            Acknowledgment::Deleted => {
                if let EntityId::Persisted(sid) = &contribution.id {
                    if let Some(records) = state.authoritative.get_mut(&table) {
                        records.retain(|r| &r.id != sid);
                    }
                }
                contribution.id.clone()
            }
        };

        AckResult::Reconciled { table, id, deferred }
    }

    /// Discard the overlay contribution of `correlation`
    ///
    /// With `abandon`, a late acknowledgment for the correlation is reported
    /// as orphaned instead of being reconciled.
    pub async fn rollback_correlation(
        &self,
        correlation: Uuid,
        abandon: bool,
    ) -> Option<(EntityTable, EntityId)> {
        let mut state = self.state.write().await;
        let (table, id) = state.detach(correlation)?;
        if abandon {
            state.abandoned.insert(correlation, (table, id.clone()));
        }
        Some((table, id))
    }

    /// Correlations currently backing the overlay of `id`
    pub async fn correlations_of(&self, table: EntityTable, id: &EntityId) -> Vec<Uuid> {
        let state = self.state.read().await;
        let key = (table, state.canonical(id));
        state
            .overlays
            .get(&key)
            .map(|entry| entry.correlations.clone())
            .unwrap_or_default()
    }

    /// Stop tracking an abandoned correlation whose operation is gone
    pub async fn forget(&self, correlation: Uuid) {
        self.state.write().await.abandoned.remove(&correlation);
    }

    pub async fn is_abandoned(&self, correlation: Uuid) -> bool {
        self.state.read().await.abandoned.contains_key(&correlation)
    }

    /// Resolve a UI id, following promotions
    pub async fn resolve(&self, table: EntityTable, id: &EntityId) -> Resolved {
        self.state.read().await.resolve(table, id)
    }

    /// Whether the item is shown with unconfirmed state
    pub async fn is_optimistic(&self, table: EntityTable, id: &EntityId) -> bool {
        let state = self.state.read().await;
        state.overlays.contains_key(&(table, state.canonical(id)))
    }

    /// Whether any write for the item is still outstanding, including
    /// writes whose overlay was already rolled back
    pub async fn is_pending(&self, table: EntityTable, id: &EntityId) -> bool {
        let state = self.state.read().await;
        let id = state.canonical(id);
        state.overlays.contains_key(&(table, id.clone()))
            || state
                .abandoned
                .values()
                .any(|(t, abandoned)| *t == table && state.canonical(abandoned) == id)
    }

    /// Overlay covering an item, if any
    pub async fn get_overlay(&self, table: EntityTable, id: &EntityId) -> Option<OverlayEntry> {
        let state = self.state.read().await;
        state.overlays.get(&(table, state.canonical(id))).cloned()
    }

    /// Replace the authoritative records of a table
    pub async fn set_authoritative(&self, table: EntityTable, records: Vec<Record>) {
        self.state.write().await.authoritative.insert(table, records);
    }

    /// Composed view of a table
    pub async fn view(&self, table: EntityTable) -> Vec<ViewItem> {
        let state = self.state.read().await;
        let records = state
            .authoritative
            .get(&table)
            .map(Vec::as_slice)
            .unwrap_or_default();
        compose_view(
            records,
            state.overlays.values().filter(|entry| entry.table == table),
        )
    }

    /// Count overlays awaiting confirmation
    pub async fn count_pending(&self) -> usize {
        self.state.read().await.overlays.len()
    }
}
