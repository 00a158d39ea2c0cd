//! # Local Database Module
//!
//! SQLite storage for the durable operation queue. Pending mutations are
//! written here so they survive a restart and are drained once the client is
//! back online.
//!
//! ## Key Components
//!
//! - `LocalDatabase`: Connection pool and schema management
//! - `schema.rs`: Schema definitions and migrations
//! - `store.rs`: The `DurableStore` seam with SQLite and in-memory backends
//!
//! ## Usage
//!
//! ```rust,no_run
//! use docsync::client::local_db::{LocalDatabase, SqliteStore};
//!
//! # async fn example() -> Result<(), docsync::shared::SyncError> {
//! let db = LocalDatabase::open("/tmp/docsync/queue.db").await?;
//! let store = SqliteStore::new(db);
//! # Ok(())
//! # }
//! ```

pub mod schema;
pub mod store;

pub use store::{DurableStore, MemoryStore, SqliteStore};

use crate::shared::SyncError;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;

/// Result type for local database operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Local database connection manager
#[derive(Debug, Clone)]
pub struct LocalDatabase {
    pool: SqlitePool,
}

impl LocalDatabase {
    /// Open or create the queue database at `path`
    ///
    /// Creates the file and its parent directory if needed and runs pending
    /// migrations. Uses WAL mode so readers never block the drain loop.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SyncError::storage(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .pragma("cache_size", "1000")
            .pragma("temp_store", "MEMORY");

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.run_migrations().await?;

        tracing::debug!(path = %path.display(), "Opened local queue database");
        Ok(db)
    }

    /// Run database migrations
    ///
    /// Checks the current schema version and applies any pending migrations.
    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(schema::MIGRATIONS_TABLE)
            .execute(&self.pool)
            .await?;

        let current_version: (i32,) =
            sqlx::query_as("SELECT COALESCE(MAX(version), 0) FROM schema_migrations")
                .fetch_one(&self.pool)
                .await?;

        if !schema::needs_migration(current_version.0) {
            return Ok(());
        }

        for (version, statements) in schema::get_pending_migrations(current_version.0) {
            let mut tx = self.pool.begin().await?;
            for statement in statements {
                sqlx::query(statement).execute(&mut *tx).await?;
            }
            sqlx::query("INSERT INTO schema_migrations (version, applied_at) VALUES (?, ?)")
                .bind(version)
                .bind(chrono::Utc::now().to_rfc3339())
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            tracing::info!(version, "Applied queue schema migration");
        }

        Ok(())
    }

    /// Get connection pool reference
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Get database statistics
    pub async fn get_stats(&self) -> Result<DatabaseStats> {
        let (pending, max_retry, oldest): (i64, Option<i64>, Option<String>) = sqlx::query_as(
            "SELECT COUNT(*), MAX(retry_count), MIN(enqueued_at) FROM pending_operations",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(DatabaseStats {
            pending_operations: pending as u64,
            max_retry_count: max_retry.unwrap_or(0) as u32,
            oldest_enqueued_at: oldest,
        })
    }

    /// Close the pool, flushing the WAL
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Database statistics
#[derive(Debug, Clone)]
pub struct DatabaseStats {
    /// Number of pending operations
    pub pending_operations: u64,
    /// Highest retry count among pending operations
    pub max_retry_count: u32,
    /// Enqueue time of the oldest pending operation (RFC 3339)
    pub oldest_enqueued_at: Option<String>,
}
