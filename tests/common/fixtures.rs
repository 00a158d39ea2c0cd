//! Service and configuration fixtures

use super::mock_remote::MockRemote;
use docsync::client::local_db::MemoryStore;
use docsync::client::{SyncEvent, SyncService};
use docsync::shared::{FieldMap, SyncConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Memory-only config with short timers and no periodic tick in practice
pub fn test_config() -> SyncConfig {
    SyncConfig::builder()
        .in_memory()
        .sync_interval(Duration::from_secs(3600))
        .debounce(Duration::from_millis(50))
        .rollback_timeout(Duration::from_secs(30))
        .retry(3, Duration::from_millis(10), Duration::from_millis(100))
        .build()
        .expect("test config is valid")
}

/// Field map from a JSON object literal
pub fn fields(value: serde_json::Value) -> FieldMap {
    value
        .as_object()
        .cloned()
        .expect("fields must be a JSON object")
}

pub struct Harness {
    pub service: SyncService,
    pub remote: Arc<MockRemote>,
    pub store: Arc<MemoryStore>,
}

/// Start a service over a fresh mock remote and memory store
pub async fn start(config: SyncConfig) -> Harness {
    let remote = Arc::new(MockRemote::new());
    let store = Arc::new(MemoryStore::new());
    start_with(config, remote, store).await
}

pub async fn start_with(
    config: SyncConfig,
    remote: Arc<MockRemote>,
    store: Arc<MemoryStore>,
) -> Harness {
    let service = SyncService::init_with_store(config, remote.clone(), store.clone())
        .await
        .expect("service starts");
    Harness {
        service,
        remote,
        store,
    }
}

/// Let background tasks and timers run for `ms` of (possibly paused) time
pub async fn settle(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

/// Every event received so far
pub fn drain_events(rx: &mut broadcast::Receiver<SyncEvent>) -> Vec<SyncEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
