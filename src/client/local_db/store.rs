//! Durable Store Backends
//!
//! The operation queue persists through the `DurableStore` trait. SQLite is the
//! production backend; `MemoryStore` backs session-only queues and tests.

use super::{LocalDatabase, Result};
use crate::client::offline::queue::PendingOperation;
use crate::shared::{EntityTable, FieldMap, OperationKind, SyncError};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::Row;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

/// Storage seam for the durable operation queue
#[async_trait]
pub trait DurableStore: Send + Sync + Debug {
    /// Insert or replace an operation
    async fn put(&self, op: &PendingOperation) -> Result<()>;

    /// All stored operations in enqueue order
    async fn get_all(&self) -> Result<Vec<PendingOperation>>;

    /// Remove an operation; missing ids are not an error
    async fn delete(&self, id: Uuid) -> Result<()>;

    /// Read a metadata value
    async fn get_metadata(&self, _key: &str) -> Result<Option<String>> {
        Ok(None)
    }

    /// Write a metadata value
    async fn set_metadata(&self, _key: &str, _value: &str) -> Result<()> {
        Ok(())
    }

    /// Whether writes survive a restart
    fn is_durable(&self) -> bool;
}

/// SQLite-backed queue storage
#[derive(Debug, Clone)]
pub struct SqliteStore {
    db: LocalDatabase,
}

impl SqliteStore {
    pub fn new(db: LocalDatabase) -> Self {
        Self { db }
    }

    /// Underlying database handle
    pub fn database(&self) -> &LocalDatabase {
        &self.db
    }

    fn row_to_operation(row: &sqlx::sqlite::SqliteRow) -> Result<PendingOperation> {
        let id: String = row.try_get("id")?;
        let kind: String = row.try_get("kind")?;
        let table: String = row.try_get("entity_table")?;
        let payload: String = row.try_get("payload")?;
        let enqueued_at: String = row.try_get("enqueued_at")?;
        let retry_count: i64 = row.try_get("retry_count")?;
        let correlation_id: Option<String> = row.try_get("correlation_id")?;

        let malformed = |what: &str, value: &str| SyncError::storage(format!("bad {what}: {value}"));

        Ok(PendingOperation {
            id: Uuid::parse_str(&id).map_err(|_| malformed("id", &id))?,
            kind: OperationKind::parse(&kind).ok_or_else(|| malformed("kind", &kind))?,
            table: EntityTable::parse(&table).ok_or_else(|| malformed("table", &table))?,
            target: row.try_get("target_id")?,
            payload: serde_json::from_str::<FieldMap>(&payload)?,
            enqueued_at: DateTime::parse_from_rfc3339(&enqueued_at)
                .map_err(|_| malformed("enqueued_at", &enqueued_at))?
                .with_timezone(&Utc),
            retry_count: retry_count.max(0) as u32,
            correlation_id: correlation_id
                .as_deref()
                .map(Uuid::parse_str)
                .transpose()
                .map_err(|_| malformed("correlation_id", correlation_id.as_deref().unwrap_or("")))?,
        })
    }
}

#[async_trait]
impl DurableStore for SqliteStore {
    async fn put(&self, op: &PendingOperation) -> Result<()> {
        let payload = serde_json::to_string(&op.payload)?;

        sqlx::query(
            "INSERT INTO pending_operations
                (id, kind, entity_table, target_id, payload, enqueued_at, retry_count, correlation_id)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                target_id = excluded.target_id,
                payload = excluded.payload,
                retry_count = excluded.retry_count",
        )
        .bind(op.id.to_string())
        .bind(op.kind.as_str())
        .bind(op.table.as_str())
        .bind(op.target.as_deref())
        .bind(payload)
        .bind(op.enqueued_at.to_rfc3339_opts(SecondsFormat::Nanos, true))
        .bind(op.retry_count as i64)
        .bind(op.correlation_id.map(|c| c.to_string()))
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<PendingOperation>> {
        let rows = sqlx::query(
            "SELECT id, kind, entity_table, target_id, payload, enqueued_at, retry_count, correlation_id
             FROM pending_operations
             ORDER BY enqueued_at ASC, rowid ASC",
        )
        .fetch_all(self.db.pool())
        .await?;

        let mut operations = Vec::with_capacity(rows.len());
        for row in &rows {
            match Self::row_to_operation(row) {
                Ok(op) => operations.push(op),
                Err(e) => {
                    // A corrupt row must not wedge the whole queue
                    tracing::warn!(error = %e, "Skipping malformed queued operation");
                }
            }
        }

        Ok(operations)
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM pending_operations WHERE id = ?")
            .bind(id.to_string())
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    async fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM sync_metadata WHERE key = ?")
            .bind(key)
            .fetch_optional(self.db.pool())
            .await?;

        Ok(match row {
            Some(row) => Some(row.try_get("value")?),
            None => None,
        })
    }

    async fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO sync_metadata (key, value, updated_at) VALUES (?, ?, ?)")
            .bind(key)
            .bind(value)
            .bind(Utc::now().to_rfc3339())
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    fn is_durable(&self) -> bool {
        true
    }
}

/// In-memory queue storage
///
/// Used when durability is disabled or the SQLite file cannot be opened.
/// `set_failing` makes every call error, which simulates a store that
/// disappears mid-session.
#[derive(Debug, Default)]
pub struct MemoryStore {
    operations: Mutex<Vec<PendingOperation>>,
    metadata: Mutex<HashMap<String, String>>,
    failing: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent calls fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of stored operations
    pub fn len(&self) -> usize {
        self.operations.lock().map(|ops| ops.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SyncError::storage("store unavailable"));
        }
        Ok(())
    }

    fn poisoned() -> SyncError {
        SyncError::storage("memory store lock poisoned")
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn put(&self, op: &PendingOperation) -> Result<()> {
        self.check()?;
        let mut ops = self.operations.lock().map_err(|_| Self::poisoned())?;
        match ops.iter_mut().find(|existing| existing.id == op.id) {
            Some(existing) => *existing = op.clone(),
            None => ops.push(op.clone()),
        }
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<PendingOperation>> {
        self.check()?;
        let mut ops = self.operations.lock().map_err(|_| Self::poisoned())?.clone();
        ops.sort_by_key(|op| op.enqueued_at);
        Ok(ops)
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        self.check()?;
        self.operations
            .lock()
            .map_err(|_| Self::poisoned())?
            .retain(|op| op.id != id);
        Ok(())
    }

    async fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        Ok(self
            .metadata
            .lock()
            .map_err(|_| Self::poisoned())?
            .get(key)
            .cloned())
    }

    async fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        self.check()?;
        self.metadata
            .lock()
            .map_err(|_| Self::poisoned())?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn is_durable(&self) -> bool {
        false
    }
}
