//! Sync Error Types
//!
//! This module defines the error taxonomy of the sync engine. Only some of
//! these ever reach the user: transient network failures are retried quietly,
//! while permanent failures, schema violations, rollback timeouts and
//! persistence degradation are surfaced through `SyncEvent`s.
//!
//! # Error Categories
//!
//! - `TransientNetwork` - Retryable transport failure, bounded by the retry ceiling
//! - `SchemaViolation` - The remote rejected the payload; never retried
//! - `PermanentFailure` - Retry ceiling exhausted; the operation was dead-lettered
//! - `QueuePersistenceDegraded` - The durable store is unavailable; the queue is session-only
//! - `RollbackTimeout` - No acknowledgment arrived before the rollback timer fired
//!
//! # Usage
//!
//! ```rust
//! use docsync::shared::error::SyncError;
//!
//! let error = SyncError::degraded("disk quota exceeded");
//! assert!(error.is_user_facing());
//! ```
use crate::shared::config::ConfigError;
use crate::shared::entity::{EntityId, EntityTable};
use thiserror::Error;
use uuid::Uuid;

/// Errors produced or surfaced by the sync engine
#[derive(Debug, Error, Clone)]
pub enum SyncError {
    /// Retryable network failure
    #[error("Transient network error: {message}")]
    TransientNetwork {
        /// Human-readable error message
        message: String,
    },

    /// Payload rejected by the remote schema
    #[error("Schema violation on '{table}': {message}")]
    SchemaViolation {
        /// Table the operation targeted
        table: EntityTable,
        /// Rejection reason returned by the remote
        message: String,
    },

    /// Retry ceiling exhausted, operation dead-lettered
    #[error("Operation {operation_id} failed permanently after {attempts} attempts: {message}")]
    PermanentFailure {
        /// Dead-lettered operation
        operation_id: Uuid,
        /// Number of failed attempts
        attempts: u32,
        /// Last failure reason
        message: String,
    },

    /// Durable backing store unavailable, queue is memory-only
    #[error("Queue persistence degraded: {reason}")]
    QueuePersistenceDegraded {
        /// Why the durable store could not be used
        reason: String,
    },

    /// Optimistic entry not acknowledged in time
    #[error("No acknowledgment for {id} before the rollback timeout")]
    RollbackTimeout {
        /// Item whose overlay was discarded
        id: EntityId,
    },

    /// Sync requested while the network is offline
    #[error("Cannot sync while offline")]
    Offline,

    /// Mutation requested for an item the reconciler does not know
    #[error("Unknown item {id} in '{table}'")]
    UnknownItem {
        table: EntityTable,
        id: EntityId,
    },

    /// No queued operation with this id
    #[error("No queued operation {operation_id}")]
    UnknownOperation { operation_id: Uuid },

    /// Local storage failure
    #[error("Storage error: {message}")]
    Storage {
        /// Human-readable error message
        message: String,
    },

    /// JSON serialization or deserialization error
    #[error("Serialization error: {message}")]
    Serialization {
        /// Human-readable error message
        message: String,
    },

    /// Invalid configuration
    #[error("Configuration error: {message}")]
    Config {
        /// Human-readable error message
        message: String,
    },
}

impl SyncError {
    /// Create a new transient network error
    pub fn transient(message: impl Into<String>) -> Self {
        Self::TransientNetwork {
            message: message.into(),
        }
    }

    /// Create a new schema violation
    pub fn schema_violation(table: EntityTable, message: impl Into<String>) -> Self {
        Self::SchemaViolation {
            table,
            message: message.into(),
        }
    }

    /// Create a new persistence degradation warning
    pub fn degraded(reason: impl Into<String>) -> Self {
        Self::QueuePersistenceDegraded {
            reason: reason.into(),
        }
    }

    /// Create a new storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Whether this error should be shown to the user
    ///
    /// Transient failures are retried silently and never surface.
    pub fn is_user_facing(&self) -> bool {
        !matches!(self, Self::TransientNetwork { .. })
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        Self::storage(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: format!("JSON error: {}", err),
        }
    }
}

impl From<ConfigError> for SyncError {
    fn from(err: ConfigError) -> Self {
        Self::Config {
            message: err.to_string(),
        }
    }
}
