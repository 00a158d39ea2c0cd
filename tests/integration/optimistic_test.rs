//! Optimistic overlays, id promotion, same-id ordering and rollback timers

use crate::common::*;
use crate::{assert_err, assert_in_view, assert_not_in_view, assert_ok};
use docsync::client::{ItemStatus, SyncEvent};
use docsync::shared::{EntityId, EntityTable, OperationKind, Record, SyncError};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::time::Duration;

fn seeded_records() -> Vec<Record> {
    vec![
        Record::new("doc_1", fields(json!({"title": "AML policy", "status": "draft"}))),
        Record::new("doc_2", fields(json!({"title": "KYC checklist", "status": "final"}))),
    ]
}

#[tokio::test(start_paused = true)]
async fn test_create_scenario_promotes_local_id() {
    let h = start(test_config()).await;
    let mut events = h.service.events();
    let threads = h.service.collection(EntityTable::Threads);

    let id = threads.create_item(fields(json!({"title": "Thread A"}))).await;
    assert!(matches!(id, EntityId::LocalOnly(_)));
    assert!(threads.is_optimistic(&id).await);
    assert!(threads.is_pending(&id).await);

    let item = assert_in_view!(threads.view().await, &id, ItemStatus::PendingCreate);
    assert_eq!(item.fields.get("title"), Some(&json!("Thread A")));

    assert_ok!(h.service.force_sync().await);

    let server_id = EntityId::from("srv_1");
    assert_in_view!(threads.view().await, &server_id, ItemStatus::Confirmed);
    assert!(!threads.is_pending(&id).await);

    let events = drain_events(&mut events);
    assert!(events.iter().any(|e| matches!(
        e,
        SyncEvent::Acknowledged { table: EntityTable::Threads, id } if *id == server_id
    )));
}

#[tokio::test(start_paused = true)]
async fn test_pending_delete_hides_record() {
    let mut config = test_config();
    config.start_online = false;
    let h = start(config).await;
    let docs = h.service.collection(EntityTable::Documents);
    docs.set_authoritative(seeded_records()).await;

    let target = EntityId::from("doc_1");
    assert_ok!(docs.delete_item(&target).await);

    let view = docs.view().await;
    assert_not_in_view!(view, &target);
    assert_eq!(view.len(), 1);
    assert!(docs.is_optimistic(&target).await);

    h.service.set_online(true);
    settle(100).await;

    let calls = h.remote.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].kind, OperationKind::Delete);
    assert_eq!(calls[0].target.as_deref(), Some("doc_1"));
    assert_not_in_view!(docs.view().await, &target);
    assert!(!docs.is_optimistic(&target).await);
}

#[tokio::test(start_paused = true)]
async fn test_pending_update_merges_over_record() {
    let mut config = test_config();
    config.start_online = false;
    let h = start(config).await;
    let docs = h.service.collection(EntityTable::Documents);
    docs.set_authoritative(seeded_records()).await;

    let target = EntityId::from("doc_2");
    assert_ok!(docs.update_item(&target, fields(json!({"status": "archived"}))).await);

    let view = docs.view().await;
    let item = assert_in_view!(view, &target, ItemStatus::PendingUpdate);
    assert_eq!(item.fields.get("status"), Some(&json!("archived")));
    assert_eq!(item.fields.get("title"), Some(&json!("KYC checklist")));
    // Authoritative order is kept
    assert_eq!(view[0].id, EntityId::from("doc_1"));
    assert_eq!(view[1].id, target);

    h.service.set_online(true);
    settle(100).await;

    let item = assert_in_view!(docs.view().await, &target, ItemStatus::Confirmed);
    assert_eq!(item.fields.get("status"), Some(&json!("archived")));
}

#[tokio::test(start_paused = true)]
async fn test_manual_rollback_restores_server_copy() {
    let mut config = test_config();
    config.start_online = false;
    let h = start(config).await;
    let docs = h.service.collection(EntityTable::Documents);
    docs.set_authoritative(seeded_records()).await;

    let target = EntityId::from("doc_1");
    assert_ok!(docs.update_item(&target, fields(json!({"title": "Renamed"}))).await);
    assert!(docs.rollback(&target).await);
    assert!(!docs.rollback(&target).await);

    let item = assert_in_view!(docs.view().await, &target, ItemStatus::Confirmed);
    assert_eq!(item.fields.get("title"), Some(&json!("AML policy")));
    assert!(h.service.pending_operations().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_update_before_sync_folds_into_create() {
    let mut config = test_config();
    config.start_online = false;
    let h = start(config).await;
    let threads = h.service.collection(EntityTable::Threads);

    let id = threads.create_item(fields(json!({"title": "Draft"}))).await;
    assert_ok!(threads.update_item(&id, fields(json!({"status": "open"}))).await);

    let pending = h.service.pending_operations().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].payload.get("status"), Some(&json!("open")));

    let item = assert_in_view!(threads.view().await, &id, ItemStatus::PendingCreate);
    assert_eq!(item.fields.get("status"), Some(&json!("open")));

    h.service.set_online(true);
    settle(100).await;

    let calls = h.remote.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].payload, fields(json!({"title": "Draft", "status": "open"})));
}

#[tokio::test(start_paused = true)]
async fn test_delete_before_sync_cancels_create() {
    let mut config = test_config();
    config.start_online = false;
    let h = start(config).await;
    let threads = h.service.collection(EntityTable::Threads);

    let id = threads.create_item(fields(json!({"title": "Never sent"}))).await;
    assert_ok!(threads.delete_item(&id).await);

    assert_not_in_view!(threads.view().await, &id);
    assert!(h.service.pending_operations().await.is_empty());

    h.service.set_online(true);
    settle(100).await;
    assert_eq!(h.remote.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_update_during_inflight_create_targets_server_id() {
    let h = start(test_config()).await;
    h.remote.set_delay(Some(Duration::from_millis(100)));
    let threads = h.service.collection(EntityTable::Threads);
    let id = threads.create_item(fields(json!({"title": "A"}))).await;

    let (report, update) = tokio::join!(h.service.force_sync(), async {
        settle(50).await;
        threads.update_item(&id, fields(json!({"title": "B"}))).await
    });
    assert_ok!(report);
    assert_ok!(update);

    let pending = h.service.pending_operations().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].kind, OperationKind::Update);
    assert_eq!(pending[0].target.as_deref(), Some("srv_1"));

    let item = assert_in_view!(
        threads.view().await,
        &EntityId::from("srv_1"),
        ItemStatus::PendingUpdate
    );
    assert_eq!(item.fields.get("title"), Some(&json!("B")));

    settle(500).await;
    let calls = h.remote.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].target.as_deref(), Some("srv_1"));
    assert_eq!(calls[1].payload, fields(json!({"title": "B"})));
}

#[tokio::test(start_paused = true)]
async fn test_delete_during_inflight_create_deletes_server_copy() {
    let h = start(test_config()).await;
    h.remote.set_delay(Some(Duration::from_millis(100)));
    let threads = h.service.collection(EntityTable::Threads);
    let id = threads.create_item(fields(json!({"title": "A"}))).await;

    let (report, delete) = tokio::join!(h.service.force_sync(), async {
        settle(50).await;
        threads.delete_item(&id).await
    });
    assert_ok!(report);
    assert_ok!(delete);

    settle(500).await;
    let calls = h.remote.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].kind, OperationKind::Delete);
    assert_eq!(calls[1].target.as_deref(), Some("srv_1"));
    assert!(threads.view().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_extraneous_fields_are_not_sent() {
    let h = start(test_config()).await;
    let threads = h.service.collection(EntityTable::Threads);

    let id = threads
        .create_item(fields(json!({"title": "Thread A", "ui_color": "red"})))
        .await;

    let item = assert_in_view!(threads.view().await, &id, ItemStatus::PendingCreate);
    assert_eq!(item.fields.get("ui_color"), Some(&json!("red")));
    assert!(!h.service.pending_operations().await[0]
        .payload
        .contains_key("ui_color"));

    assert_ok!(h.service.force_sync().await);
    assert_eq!(h.remote.calls()[0].payload, fields(json!({"title": "Thread A"})));
}

#[tokio::test(start_paused = true)]
async fn test_unknown_item_is_rejected() {
    let h = start(test_config()).await;
    let threads = h.service.collection(EntityTable::Threads);

    let ghost = EntityId::LocalOnly(uuid::Uuid::new_v4());
    assert_err!(
        threads.update_item(&ghost, fields(json!({"title": "x"}))).await,
        SyncError::UnknownItem { .. }
    );
    assert_err!(threads.delete_item(&ghost).await, SyncError::UnknownItem { .. });
}

#[tokio::test(start_paused = true)]
async fn test_rollback_timeout_while_offline() {
    let mut config = test_config();
    config.start_online = false;
    config.rollback_timeout = Duration::from_secs(1);
    let h = start(config).await;
    let mut events = h.service.events();
    let threads = h.service.collection(EntityTable::Threads);

    let id = threads.create_item(fields(json!({"title": "Stale"}))).await;
    settle(2_000).await;

    assert_not_in_view!(threads.view().await, &id);
    assert!(h.service.pending_operations().await.is_empty());
    let events = drain_events(&mut events);
    assert!(events.iter().any(|e| matches!(
        e,
        SyncEvent::RolledBack { error: SyncError::RollbackTimeout { .. }, .. }
    )));

    h.service.set_online(true);
    settle(200).await;
    assert_eq!(h.remote.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_late_acknowledgment_is_reported_as_orphan() {
    let mut config = test_config();
    config.rollback_timeout = Duration::from_secs(1);
    let h = start(config).await;
    h.remote.set_delay(Some(Duration::from_secs(5)));
    let mut events = h.service.events();
    let threads = h.service.collection(EntityTable::Threads);

    let id = threads.create_item(fields(json!({"title": "Slow"}))).await;

    let (report, _) = tokio::join!(h.service.force_sync(), async {
        settle(2_000).await;
        assert_not_in_view!(threads.view().await, &id);
        assert!(!threads.is_optimistic(&id).await);
        assert!(threads.is_pending(&id).await);
    });
    assert_eq!(assert_ok!(report).succeeded, 1);

    let events = drain_events(&mut events);
    assert!(events.iter().any(|e| matches!(
        e,
        SyncEvent::RolledBack { error: SyncError::RollbackTimeout { .. }, .. }
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        SyncEvent::OrphanedWrite { record: Some(record), .. } if record.id == "srv_1"
    )));
    assert!(!threads.is_pending(&id).await);
    assert_eq!(h.service.metrics().await.orphaned_writes, 1);
}
