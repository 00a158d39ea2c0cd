//! docsync - Offline-First Sync Engine
//!
//! docsync lets an application keep working while the network is down. Every
//! create, update and delete is applied to the local view immediately, queued
//! durably, and replayed against a REST backend once connectivity returns.
//!
//! # Module Structure
//!
//! - **`shared`** - Types shared by the engine and its callers
//!   - Records, tables and identifiers
//!   - Error taxonomy
//!   - Schema filter and configuration
//!
//! - **`client`** - The engine itself
//!   - SQLite-backed durable queue
//!   - Optimistic overlays and the composed view
//!   - Drain coordinator, retry policy and HTTP remote
//!
//! # Usage
//!
//! ```rust,no_run
//! use docsync::client::{HttpRemote, SyncService};
//! use docsync::shared::{EntityTable, SyncConfig};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), docsync::shared::SyncError> {
//! let config = SyncConfig::load("docsync.toml")?;
//! let remote = Arc::new(HttpRemote::from_config(&config)?);
//! let service = SyncService::init(config, remote).await?;
//!
//! let documents = service.collection(EntityTable::Documents);
//! for item in documents.view().await {
//!     println!("{:?} {:?}", item.id, item.status);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Thread Safety
//!
//! `SyncService` and `Collection` are `Send + Sync`. Engine state lives behind
//! `Arc` and tokio locks; no lock is held across a storage or network call.

/// Shared types and data structures
pub mod shared;

/// Sync engine
pub mod client;
