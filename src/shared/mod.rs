//! Shared Module
//!
//! Types used across the sync engine and by its callers: entity records and
//! identifiers, the error taxonomy, the schema filter and configuration.

/// Records, tables and identifiers
pub mod entity;

/// Sync error types
pub mod error;

/// Per-table field allow-lists
pub mod schema;

/// Engine configuration
pub mod config;

/// Re-export commonly used types for convenience
pub use config::{ConfigError, SyncConfig, SyncConfigBuilder};
pub use entity::{EntityId, EntityTable, FieldMap, OperationKind, Record};
pub use error::SyncError;
pub use schema::SchemaFilter;
