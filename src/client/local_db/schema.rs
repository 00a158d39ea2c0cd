//! Database Schema Definitions
//!
//! Contains the durable queue schema and its migrations.

/// Current database schema version
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Bookkeeping table for applied migrations
pub const MIGRATIONS_TABLE: &str = "CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
)";

/// Migration 1: pending operation queue
const MIGRATION_1: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS pending_operations (
        id TEXT PRIMARY KEY,
        kind TEXT NOT NULL,
        entity_table TEXT NOT NULL,
        target_id TEXT,
        payload TEXT NOT NULL,
        enqueued_at TEXT NOT NULL,
        retry_count INTEGER NOT NULL DEFAULT 0,
        correlation_id TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_pending_operations_enqueued
        ON pending_operations (enqueued_at)",
];

/// Migration 2: sync metadata (last sync time and friends)
const MIGRATION_2: &[&str] = &["CREATE TABLE IF NOT EXISTS sync_metadata (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )"];

/// Schema migrations, in order
pub const MIGRATIONS: &[(i32, &[&str])] = &[(1, MIGRATION_1), (2, MIGRATION_2)];

/// Check if database needs migration
pub fn needs_migration(current_version: i32) -> bool {
    current_version < CURRENT_SCHEMA_VERSION
}

/// Get pending migrations
pub fn get_pending_migrations(current_version: i32) -> Vec<(i32, &'static [&'static str])> {
    MIGRATIONS
        .iter()
        .filter(|(v, _)| *v > current_version)
        .copied()
        .collect()
}
