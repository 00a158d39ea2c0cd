//! Client Module
//!
//! The offline-first sync engine: local durable storage, the offline queue
//! and overlays, the sync coordinator and the HTTP remote.

/// SQLite storage for the durable queue
pub mod local_db;

/// Queue, retry, overlays and the composed view
pub mod offline;

/// HTTP implementation of the remote backend
pub mod remote;

/// Drain scheduling and execution
pub mod sync;

pub use offline::{Collection, ItemStatus, ViewItem};
pub use remote::HttpRemote;
pub use sync::{DrainReport, RemoteBackend, RemoteError, SyncEvent, SyncService, SyncState};
