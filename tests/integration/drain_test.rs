//! Drain coordinator tests: triggers, single-flight, retry and dead-lettering

use crate::common::*;
use crate::{assert_err, assert_in_view, assert_not_in_view, assert_ok};
use assert_matches::assert_matches;
use docsync::client::local_db::DurableStore;
use docsync::client::sync::SyncTrigger;
use docsync::client::{ItemStatus, RemoteError, SyncEvent};
use docsync::shared::{EntityId, EntityTable, OperationKind, SyncError};
use futures_util::future::join_all;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::time::Duration;

fn offline_config() -> docsync::shared::SyncConfig {
    let mut config = test_config();
    config.start_online = false;
    config
}

#[tokio::test(start_paused = true)]
async fn test_empty_queue_drain_is_clean() {
    let h = start(test_config()).await;

    let report = assert_ok!(h.service.force_sync().await);

    assert_eq!(report.trigger, Some(SyncTrigger::Force));
    assert_eq!(report.attempted, 0);
    assert!(report.is_clean());
    assert_eq!(h.remote.call_count(), 0);

    let state = h.service.get_state();
    assert!(!state.is_syncing);
    assert!(state.last_sync_time.is_some());
    assert!(assert_ok!(h.store.get_metadata("last_sync_time").await).is_some());
}

#[tokio::test(start_paused = true)]
async fn test_force_sync_offline_fails() {
    let h = start(offline_config()).await;
    assert_err!(h.service.force_sync().await, SyncError::Offline);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_drains_offline_writes() {
    let h = start(offline_config()).await;
    let threads = h.service.collection(EntityTable::Threads);

    let id = threads.create_item(fields(json!({"title": "Thread A"}))).await;
    assert!(id.is_local());

    settle(500).await;
    assert_eq!(h.remote.call_count(), 0);
    assert_in_view!(threads.view().await, &id, ItemStatus::PendingCreate);
    assert_eq!(h.service.get_state().pending_operations.len(), 1);

    h.service.set_online(true);
    settle(100).await;

    assert_eq!(h.remote.call_count(), 1);
    let view = threads.view().await;
    let item = assert_in_view!(view, &EntityId::from("srv_1"), ItemStatus::Confirmed);
    assert_eq!(item.fields.get("title"), Some(&json!("Thread A")));
    assert_not_in_view!(view, &id);
    assert!(!threads.is_optimistic(&id).await);
    assert!(h.service.get_state().pending_operations.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_operations_replay_in_enqueue_order() {
    let h = start(offline_config()).await;
    let docs = h.service.collection(EntityTable::Documents);
    docs.set_authoritative(vec![docsync::shared::Record::new(
        "doc_7",
        fields(json!({"title": "Old"})),
    )])
    .await;

    docs.create_item(fields(json!({"title": "First"}))).await;
    assert_ok!(
        docs.update_item(&EntityId::from("doc_7"), fields(json!({"title": "Second"})))
            .await
    );
    assert_ok!(docs.delete_item(&EntityId::from("doc_7")).await);

    h.service.set_online(true);
    settle(100).await;

    let kinds: Vec<OperationKind> = h.remote.calls().iter().map(|c| c.kind).collect();
    assert_eq!(
        kinds,
        vec![OperationKind::Create, OperationKind::Update, OperationKind::Delete]
    );
    assert_eq!(h.remote.calls()[1].target.as_deref(), Some("doc_7"));
}

#[tokio::test(start_paused = true)]
async fn test_three_transient_failures_dead_letter_and_roll_back() {
    let h = start(test_config()).await;
    h.remote
        .fail_always(Some(RemoteError::Network("connection reset".to_string())));
    let mut events = h.service.events();
    let threads = h.service.collection(EntityTable::Threads);

    let id = threads.create_item(fields(json!({"title": "Doomed"}))).await;
    let report = assert_ok!(h.service.force_sync().await);
    assert_eq!(report.retried, 1);
    assert!(!report.is_clean());

    settle(1_000).await;

    assert_eq!(h.remote.call_count(), 3);
    assert!(h.service.pending_operations().await.is_empty());
    assert_not_in_view!(threads.view().await, &id);
    assert!(!threads.is_optimistic(&id).await);

    let events = drain_events(&mut events);
    assert!(events.iter().any(|e| matches!(
        e,
        SyncEvent::OperationFailed {
            error: SyncError::PermanentFailure { attempts: 3, .. },
            correlation_id: Some(_),
            ..
        }
    )));
    assert!(events
        .iter()
        .any(|e| matches!(e, SyncEvent::RolledBack { id: rolled, .. } if *rolled == id)));

    let metrics = h.service.metrics().await;
    assert_eq!(metrics.operations_dead_lettered, 1);
    assert_eq!(metrics.operations_retried, 2);
    assert_eq!(metrics.rollbacks, 1);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failure_retries_with_same_idempotency_key() {
    let h = start(test_config()).await;
    h.remote.fail_next([RemoteError::Timeout]);
    let threads = h.service.collection(EntityTable::Threads);

    threads.create_item(fields(json!({"title": "Flaky"}))).await;
    let report = assert_ok!(h.service.force_sync().await);
    assert_eq!(report.retried, 1);

    settle(200).await;

    let calls = h.remote.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[0].idempotency_key.is_some());
    assert_eq!(calls[0].idempotency_key, calls[1].idempotency_key);
    assert_eq!(h.remote.created_count(), 1);
    assert_in_view!(
        threads.view().await,
        &EntityId::from("srv_1"),
        ItemStatus::Confirmed
    );
}

#[tokio::test(start_paused = true)]
async fn test_rejected_payload_is_not_retried() {
    let h = start(test_config()).await;
    h.remote.fail_next([RemoteError::Rejected {
        status: 422,
        message: "unknown column".to_string(),
    }]);
    let mut events = h.service.events();
    let threads = h.service.collection(EntityTable::Threads);

    let id = threads.create_item(fields(json!({"title": "Bad"}))).await;
    let report = assert_ok!(h.service.force_sync().await);
    assert_eq!(report.rejected, 1);

    settle(500).await;
    assert_eq!(h.remote.call_count(), 1);
    assert_not_in_view!(threads.view().await, &id);

    let events = drain_events(&mut events);
    assert!(events.iter().any(|e| matches!(
        e,
        SyncEvent::OperationFailed {
            error: SyncError::SchemaViolation {
                table: EntityTable::Threads,
                ..
            },
            ..
        }
    )));
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_triggers_run_one_pass_at_a_time() {
    let h = start(test_config()).await;
    h.remote.set_delay(Some(Duration::from_millis(100)));
    let threads = h.service.collection(EntityTable::Threads);
    for n in 0..3 {
        threads.create_item(fields(json!({"title": format!("T{n}")}))).await;
    }

    let (first, second) = tokio::join!(h.service.force_sync(), async {
        settle(10).await;
        h.service.set_visible(false);
        h.service.set_visible(true);
        h.service.request_sync();
        h.service.force_sync().await
    });

    let first = assert_ok!(first);
    let second = assert_ok!(second);
    assert_eq!(first.attempted, 3);
    assert_eq!(second.attempted, 0);
    assert_eq!(h.remote.call_count(), 3);
    assert_eq!(h.remote.max_concurrency(), 1);
    assert_eq!(h.service.metrics().await.total_passes, 2);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_force_syncs_never_overlap() {
    let h = start(test_config()).await;
    h.remote.set_delay(Some(Duration::from_millis(20)));
    let threads = h.service.collection(EntityTable::Threads);
    for n in 0..4 {
        threads.create_item(fields(json!({"title": format!("T{n}")}))).await;
    }

    let reports = join_all((0..5).map(|_| h.service.force_sync())).await;

    let attempted: usize = reports
        .into_iter()
        .map(|report| assert_ok!(report).attempted)
        .sum();
    assert_eq!(attempted, 4);
    assert_eq!(h.remote.call_count(), 4);
    assert_eq!(h.remote.max_concurrency(), 1);
    assert!(!h.service.get_state().is_syncing);
}

#[tokio::test(start_paused = true)]
async fn test_enqueue_burst_is_debounced_into_one_pass() {
    let h = start(test_config()).await;
    let messages = h.service.collection(EntityTable::Messages);

    for n in 0..5 {
        messages
            .create_item(fields(json!({"thread_id": "thr_1", "content": format!("m{n}")})))
            .await;
    }
    assert_eq!(h.remote.call_count(), 0);

    settle(500).await;

    assert_eq!(h.remote.call_count(), 5);
    assert_eq!(h.service.metrics().await.total_passes, 1);
}

#[tokio::test(start_paused = true)]
async fn test_enqueue_during_pass_schedules_follow_up() {
    let h = start(test_config()).await;
    h.remote.set_delay(Some(Duration::from_millis(100)));
    let threads = h.service.collection(EntityTable::Threads);
    threads.create_item(fields(json!({"title": "A"}))).await;

    let (report, _) = tokio::join!(h.service.force_sync(), async {
        settle(30).await;
        threads.create_item(fields(json!({"title": "B"}))).await
    });
    assert_eq!(assert_ok!(report).attempted, 1);

    settle(500).await;
    assert_eq!(h.remote.call_count(), 2);
    assert!(h.service.pending_operations().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_going_offline_interrupts_pass() {
    let h = start(test_config()).await;
    h.remote.set_delay(Some(Duration::from_millis(100)));
    let threads = h.service.collection(EntityTable::Threads);
    threads.create_item(fields(json!({"title": "A"}))).await;
    threads.create_item(fields(json!({"title": "B"}))).await;

    let (report, _) = tokio::join!(h.service.force_sync(), async {
        settle(50).await;
        h.service.set_online(false);
    });
    let report = assert_ok!(report);
    assert!(report.interrupted);
    assert_eq!(report.attempted, 1);
    assert_eq!(h.service.pending_operations().await.len(), 1);
    assert!(h.service.get_state().last_sync_time.is_none());

    h.service.set_online(true);
    settle(500).await;
    assert_eq!(h.remote.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_periodic_tick_drains_while_online() {
    let mut config = test_config();
    config.sync_interval = Duration::from_secs(5);
    config.debounce = Duration::from_secs(60);
    let h = start(config).await;
    let threads = h.service.collection(EntityTable::Threads);
    threads.create_item(fields(json!({"title": "A"}))).await;

    settle(4_000).await;
    assert_eq!(h.remote.call_count(), 0);

    settle(2_000).await;
    assert_eq!(h.remote.call_count(), 1);
    assert_eq!(h.service.metrics().await.total_passes, 1);
}

#[tokio::test(start_paused = true)]
async fn test_discard_dead_letters_by_hand() {
    let h = start(offline_config()).await;
    let mut events = h.service.events();
    let threads = h.service.collection(EntityTable::Threads);
    let id = threads.create_item(fields(json!({"title": "A"}))).await;

    let op = h.service.pending_operations().await.remove(0);
    assert_ok!(h.service.discard(op.id).await);

    assert!(h.service.pending_operations().await.is_empty());
    assert_not_in_view!(threads.view().await, &id);
    let events = drain_events(&mut events);
    assert_matches!(
        events.first(),
        Some(SyncEvent::OperationFailed { operation_id, .. }) if *operation_id == op.id
    );

    assert_matches!(
        h.service.discard(op.id).await,
        Err(SyncError::UnknownOperation { operation_id }) if operation_id == op.id
    );
}

#[tokio::test(start_paused = true)]
async fn test_state_listener_sees_queue_changes() {
    let h = start(offline_config()).await;
    let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = seen.clone();
    let subscription = h.service.subscribe(move |state| {
        sink.lock().unwrap().push(state.pending_operations.len());
    });

    let threads = h.service.collection(EntityTable::Threads);
    threads.create_item(fields(json!({"title": "A"}))).await;
    threads.create_item(fields(json!({"title": "B"}))).await;
    settle(20).await;

    assert_eq!(seen.lock().unwrap().last(), Some(&2));
    assert_eq!(h.service.watch_state().borrow().pending_operations.len(), 2);

    subscription.unsubscribe();
    h.service.set_online(true);
    settle(200).await;
    assert_eq!(seen.lock().unwrap().last(), Some(&2));
    assert!(h.service.get_state().pending_operations.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_watch_state_mirrors_first_enqueue() {
    let h = start(offline_config()).await;
    let state_rx = h.service.watch_state();

    h.service
        .collection(EntityTable::Threads)
        .create_item(fields(json!({"title": "A"})))
        .await;
    settle(20).await;

    assert_eq!(state_rx.borrow().pending_operations.len(), 1);
    assert_eq!(h.service.get_state().pending_operations.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_call_after_rollback_is_not_retried() {
    let mut config = test_config();
    config.rollback_timeout = Duration::from_secs(1);
    let h = start(config).await;
    h.remote.set_delay(Some(Duration::from_secs(5)));
    h.remote.fail_next([RemoteError::Network("connection reset".into())]);
    let mut events = h.service.events();
    let threads = h.service.collection(EntityTable::Threads);

    let id = threads.create_item(fields(json!({"title": "Slow"}))).await;

    let (report, _) = tokio::join!(h.service.force_sync(), async {
        settle(2_000).await;
        assert_not_in_view!(threads.view().await, &id);
        assert!(threads.is_pending(&id).await);
    });
    let report = assert_ok!(report);
    assert_eq!(report.abandoned, 1);
    assert_eq!(report.retried, 0);

    settle(10_000).await;
    assert_eq!(h.remote.call_count(), 1);
    assert_eq!(h.remote.created_count(), 0);
    assert!(h.service.pending_operations().await.is_empty());
    assert!(!threads.is_pending(&id).await);

    let events = drain_events(&mut events);
    assert!(events.iter().any(|e| matches!(
        e,
        SyncEvent::RolledBack { error: SyncError::RollbackTimeout { .. }, .. }
    )));
    assert!(!events.iter().any(|e| matches!(e, SyncEvent::OrphanedWrite { .. })));
}
