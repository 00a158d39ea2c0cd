//! # Operation Executor
//!
//! Maps one queued operation onto one call against the remote backend.

use crate::client::offline::optimistic::Acknowledgment;
use crate::client::offline::queue::PendingOperation;
use crate::shared::{EntityTable, FieldMap, OperationKind, Record, SchemaFilter};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Failure of a remote call
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },
    #[error("rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("malformed response: {0}")]
    Decode(String),
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

impl RemoteError {
    /// Whether a later attempt may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Timeout | Self::Server { .. }
        )
    }
}

/// Remote backend exposing insert, update and delete per table
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Insert a record; `idempotency_key` lets the server drop duplicates
    async fn insert(
        &self,
        table: EntityTable,
        payload: FieldMap,
        idempotency_key: Uuid,
    ) -> Result<Record, RemoteError>;

    async fn update(
        &self,
        table: EntityTable,
        id: &str,
        payload: FieldMap,
    ) -> Result<Record, RemoteError>;

    async fn delete(&self, table: EntityTable, id: &str) -> Result<(), RemoteError>;
}

/// Executes queued operations
#[derive(Clone)]
pub struct OperationExecutor {
    remote: Arc<dyn RemoteBackend>,
    filter: SchemaFilter,
}

impl std::fmt::Debug for OperationExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationExecutor")
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}

impl OperationExecutor {
    pub fn new(remote: Arc<dyn RemoteBackend>, filter: SchemaFilter) -> Self {
        Self { remote, filter }
    }

    pub fn filter(&self) -> &SchemaFilter {
        &self.filter
    }

    /// Send `op` to the remote
    ///
    /// The payload is filtered again right before it leaves the client.
    pub async fn execute(&self, op: &PendingOperation) -> Result<Acknowledgment, RemoteError> {
        let payload = self.filter.filter(op.table, &op.payload);

        tracing::debug!(
            operation_id = %op.id,
            kind = op.kind.as_str(),
            table = %op.table,
            "Executing operation"
        );

        match op.kind {
            OperationKind::Create => {
                let key = op.correlation_id.unwrap_or(op.id);
                let record = self.remote.insert(op.table, payload, key).await?;
                Ok(Acknowledgment::Created(record))
            }
            OperationKind::Update => {
                let target = Self::target(op)?;
                let record = self.remote.update(op.table, target, payload).await?;
                Ok(Acknowledgment::Updated(record))
            }
            OperationKind::Delete => {
                let target = Self::target(op)?;
                self.remote.delete(op.table, target).await?;
                Ok(Acknowledgment::Deleted)
            }
        }
    }

    fn target(op: &PendingOperation) -> Result<&str, RemoteError> {
        op.target.as_deref().ok_or_else(|| {
            RemoteError::InvalidOperation(format!("{} {} has no target id", op.kind.as_str(), op.id))
        })
    }
}
