//! # Background Sync Service
//!
//! Drains the durable operation queue against the remote backend and keeps the
//! optimistic overlays in step with what the server acknowledged.
//!
//! ## Architecture
//!
//! The sync service coordinates multiple components:
//! - **Background Task**: One `select!` loop per service reacting to platform signals and timers
//! - **Scheduler**: Named cancellable timers for debounce, retry backoff and rollback deadlines
//! - **Drain Gate**: Single-flight guard so passes never overlap
//! - **Executor**: One remote call per queued operation
//! - **Network Monitor**: Connectivity and visibility signals
//! - **Sync State**: Observable status and the event sink for the UI
//! - **Metrics**: Pass and outcome counters
//!
//! ## Triggers
//!
//! A drain runs when the client comes online, becomes visible, on every
//! `sync_interval` tick while online, after an enqueue burst settles, when a
//! retry backoff elapses, and on `force_sync`. Automatic triggers that arrive
//! during a pass are dropped; `force_sync` waits for the pass and then runs.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use docsync::client::remote::HttpRemote;
//! use docsync::client::sync::SyncService;
//! use docsync::shared::{EntityTable, SyncConfig};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), docsync::shared::SyncError> {
//! let config = SyncConfig::builder()
//!     .server_url("https://api.example.test")
//!     .build()?;
//! let remote = Arc::new(HttpRemote::from_config(&config)?);
//! let service = SyncService::init(config, remote).await?;
//!
//! let threads = service.collection(EntityTable::Threads);
//! let mut fields = serde_json::Map::new();
//! fields.insert("title".into(), "Thread A".into());
//! let id = threads.create_item(fields).await;
//!
//! // Force immediate sync
//! let report = service.force_sync().await?;
//! println!("synced {} operations", report.succeeded);
//! # Ok(())
//! # }
//! ```

pub mod executor;
pub mod metrics;
pub mod network_monitor;
pub mod scheduler;
pub mod sync_state;

pub use executor::{OperationExecutor, RemoteBackend, RemoteError};
pub use metrics::SyncMetrics;
pub use network_monitor::{NetworkMonitor, NetworkStatus};
pub use scheduler::{DrainGate, DrainPermit, Scheduler, TimerName};
pub use sync_state::{Subscription, SyncEvent, SyncState, SyncStateHandle};

use crate::client::local_db::{DurableStore, LocalDatabase, MemoryStore, SqliteStore};
use crate::client::offline::optimistic::{
    AckResult, Acknowledgment, Deferred, OptimisticManager, Resolved,
};
use crate::client::offline::queue::{Amendment, OperationQueue, PendingOperation, PersistenceStatus};
use crate::client::offline::reconciliation::ViewItem;
use crate::client::offline::retry::{Disposition, RetryController};
use crate::client::offline::Collection;
use crate::shared::{
    EntityId, EntityTable, FieldMap, OperationKind, Record, SchemaFilter, SyncConfig, SyncError,
};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch, RwLock};
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

/// Metadata key under which the last sync time is persisted
const LAST_SYNC_KEY: &str = "last_sync_time";

/// What started a drain pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// Service start with operations left from a previous session
    Startup,
    /// Network came back
    Online,
    /// Document became visible
    Visible,
    /// Periodic tick
    Timer,
    /// Enqueue burst settled
    Enqueue,
    /// Retry backoff elapsed
    Retry,
    /// Explicit request
    Force,
}

/// Outcome of one drain pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub trigger: Option<SyncTrigger>,
    /// Remote calls issued
    pub attempted: usize,
    pub succeeded: usize,
    /// Transient failures left queued for another attempt
    pub retried: usize,
    pub dead_lettered: usize,
    pub rejected: usize,
    /// Operations removed between the snapshot and their turn
    pub skipped: usize,
    /// Failed calls of rolled-back correlations, dropped instead of retried
    pub abandoned: usize,
    /// The network went away mid-pass
    pub interrupted: bool,
    /// The pass ended without reporting
    pub aborted: bool,
}

impl DrainReport {
    fn new(trigger: SyncTrigger) -> Self {
        Self {
            trigger: Some(trigger),
            ..Default::default()
        }
    }

    pub fn aborted() -> Self {
        Self {
            aborted: true,
            ..Default::default()
        }
    }

    /// Whether every attempted operation succeeded
    pub fn is_clean(&self) -> bool {
        !self.aborted
            && !self.interrupted
            && self.retried == 0
            && self.dead_lettered == 0
            && self.rejected == 0
            && self.abandoned == 0
    }
}

/// Shared engine state behind `SyncService` and its `Collection`s
pub(crate) struct EngineInner {
    config: SyncConfig,
    queue: OperationQueue,
    store: Arc<dyn DurableStore>,
    executor: OperationExecutor,
    retry: RetryController,
    optimistic: OptimisticManager,
    scheduler: Scheduler,
    gate: Arc<DrainGate>,
    network: NetworkMonitor,
    state: Arc<SyncStateHandle>,
    metrics: RwLock<SyncMetrics>,
    enqueued_during_pass: AtomicBool,
    triggers: mpsc::UnboundedSender<SyncTrigger>,
}

impl std::fmt::Debug for EngineInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineInner")
            .field("queue", &self.queue)
            .field("network", &self.network)
            .finish_non_exhaustive()
    }
}

/// Main sync service coordinator
#[derive(Debug)]
pub struct SyncService {
    inner: Arc<EngineInner>,
    /// Background sync task handle
    background_task: Option<tokio::task::JoinHandle<()>>,
}

impl SyncService {
    /// Create a sync service backed by the configured SQLite file
    ///
    /// If the file cannot be opened the queue runs memory-only for this
    /// session and the state reports `PersistenceStatus::Degraded`.
    pub async fn init(config: SyncConfig, remote: Arc<dyn RemoteBackend>) -> Result<Self, SyncError> {
        config.validate()?;

        if !config.durable {
            return Self::start(config, remote, Arc::new(MemoryStore::new()), None, SchemaFilter::default())
                .await;
        }

        let path = config.resolved_database_path();
        let (store, degraded): (Arc<dyn DurableStore>, Option<String>) =
            match LocalDatabase::open(&path).await {
                Ok(db) => (Arc::new(SqliteStore::new(db)), None),
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Durable queue unavailable, continuing memory-only"
                    );
                    (Arc::new(MemoryStore::new()), Some(e.to_string()))
                }
            };

        Self::start(config, remote, store, degraded, SchemaFilter::default()).await
    }

    /// Create a sync service over an explicit store
    pub async fn init_with_store(
        config: SyncConfig,
        remote: Arc<dyn RemoteBackend>,
        store: Arc<dyn DurableStore>,
    ) -> Result<Self, SyncError> {
        Self::init_with(config, remote, store, SchemaFilter::default()).await
    }

    /// Create a sync service over an explicit store and schema filter
    pub async fn init_with(
        config: SyncConfig,
        remote: Arc<dyn RemoteBackend>,
        store: Arc<dyn DurableStore>,
        filter: SchemaFilter,
    ) -> Result<Self, SyncError> {
        config.validate()?;
        Self::start(config, remote, store, None, filter).await
    }

    async fn start(
        config: SyncConfig,
        remote: Arc<dyn RemoteBackend>,
        store: Arc<dyn DurableStore>,
        degraded: Option<String>,
        filter: SchemaFilter,
    ) -> Result<Self, SyncError> {
        let queue = match degraded {
            Some(reason) => OperationQueue::open_degraded(Arc::clone(&store), reason).await,
            None => OperationQueue::open(Arc::clone(&store)).await,
        };

        let last_sync_time = match store.get_metadata(LAST_SYNC_KEY).await {
            Ok(value) => value
                .and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
                .map(|t| t.with_timezone(&Utc)),
            Err(e) => {
                tracing::warn!(error = %e, "Could not read last sync time");
                None
            }
        };

        let state = Arc::new(SyncStateHandle::new(SyncState {
            is_online: config.start_online,
            is_visible: true,
            is_syncing: false,
            pending_operations: queue.contents(),
            last_sync_time,
            persistence: queue.persistence(),
        }));

        let (scheduler, fired) = Scheduler::new();
        let (triggers, trigger_rx) = mpsc::unbounded_channel();
        let has_backlog = !queue.is_empty().await;

        let inner = Arc::new(EngineInner {
            retry: RetryController::from_config(&config),
            executor: OperationExecutor::new(remote, filter),
            network: NetworkMonitor::new(config.start_online),
            gate: DrainGate::new(Arc::clone(&state)),
            optimistic: OptimisticManager::new(),
            metrics: RwLock::new(SyncMetrics::new()),
            enqueued_during_pass: AtomicBool::new(false),
            config,
            queue,
            store,
            scheduler,
            state,
            triggers,
        });

        // Subscribed before spawning so changes made ahead of the first poll are seen
        let signals = LoopSignals {
            status: inner.network.watch_status(),
            visible: inner.network.watch_visibility(),
            queue: inner.queue.watch_contents(),
            persistence: inner.queue.watch_persistence(),
            fired,
            triggers: trigger_rx,
        };
        let task = tokio::spawn(run_loop(Arc::clone(&inner), signals));

        if has_backlog {
            inner.request(SyncTrigger::Startup);
        }

        tracing::info!(
            online = inner.network.is_online(),
            pending = inner.queue.len().await,
            "Sync service started"
        );

        Ok(Self {
            inner,
            background_task: Some(task),
        })
    }

    /// Mutation surface for one table
    pub fn collection(&self, table: EntityTable) -> Collection {
        Collection::new(table, Arc::clone(&self.inner))
    }

    /// Report a connectivity change
    pub fn set_online(&self, online: bool) {
        if self.inner.network.set_online(online) {
            tracing::info!(online, "Network status changed");
            self.inner.state.set_online(online);
        }
    }

    /// Report a visibility change
    pub fn set_visible(&self, visible: bool) {
        if self.inner.network.set_visible(visible) {
            self.inner.state.set_visible(visible);
        }
    }

    /// Run a drain pass now
    ///
    /// If a pass is already running this waits for it and then runs one more,
    /// unless a pass that started after this call already covered it.
    pub async fn force_sync(&self) -> Result<DrainReport, SyncError> {
        self.inner.force_sync().await
    }

    /// Ask for a drain without waiting for it
    pub fn request_sync(&self) {
        self.inner.request(SyncTrigger::Force);
    }

    /// Current state
    pub fn get_state(&self) -> SyncState {
        let mut state = self.inner.state.snapshot();
        state.pending_operations = self.inner.queue.contents();
        state.persistence = self.inner.queue.persistence();
        state
    }

    /// Call `listener` on every state change
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SyncState) + Send + Sync + 'static,
    {
        self.inner.state.subscribe(listener)
    }

    pub fn watch_state(&self) -> watch::Receiver<SyncState> {
        self.inner.state.watch()
    }

    /// Failures and acknowledgments for the UI
    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.state.events()
    }

    /// Get sync metrics
    pub async fn metrics(&self) -> SyncMetrics {
        self.inner.metrics.read().await.clone()
    }

    /// Queued operations in FIFO order
    pub async fn pending_operations(&self) -> Vec<PendingOperation> {
        self.inner.queue.list_all().await
    }

    /// Dead-letter a queued operation by hand
    pub async fn discard(&self, operation_id: Uuid) -> Result<(), SyncError> {
        let unknown = SyncError::UnknownOperation { operation_id };
        let Some(op) = self.inner.queue.get(operation_id).await else {
            return Err(unknown);
        };
        if !self.inner.queue.remove(operation_id).await {
            return Err(unknown);
        }
        let error = SyncError::PermanentFailure {
            operation_id,
            attempts: op.retry_count,
            message: "discarded".to_string(),
        };
        self.inner.fail_correlation(&op, error).await;
        Ok(())
    }

    /// Stop the background loop and timers and flush the queue
    pub async fn dispose(mut self) {
        self.shutdown();
        if let Err(e) = self.inner.queue.flush().await {
            tracing::warn!(error = %e, "Final queue flush failed");
        }
        tracing::info!("Sync service disposed");
    }

    fn shutdown(&mut self) {
        if let Some(handle) = self.background_task.take() {
            handle.abort();
        }
        self.inner.scheduler.cancel_all();
    }
}

impl Drop for SyncService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Receivers the background loop selects over
struct LoopSignals {
    status: watch::Receiver<NetworkStatus>,
    visible: watch::Receiver<bool>,
    queue: watch::Receiver<Vec<PendingOperation>>,
    persistence: watch::Receiver<PersistenceStatus>,
    fired: mpsc::UnboundedReceiver<TimerName>,
    triggers: mpsc::UnboundedReceiver<SyncTrigger>,
}

async fn run_loop(inner: Arc<EngineInner>, signals: LoopSignals) {
    let LoopSignals {
        status: mut status_rx,
        visible: mut visible_rx,
        queue: mut queue_rx,
        persistence: mut persistence_rx,
        mut fired,
        mut triggers,
    } = signals;

    let period = inner.config.sync_interval;
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if inner.network.is_online() {
                    inner.spawn_drain(SyncTrigger::Timer);
                }
            }
            changed = status_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let online = *status_rx.borrow_and_update() == NetworkStatus::Online;
                inner.state.set_online(online);
                if online {
                    inner.spawn_drain(SyncTrigger::Online);
                }
            }
            changed = visible_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let visible = *visible_rx.borrow_and_update();
                inner.state.set_visible(visible);
                if visible && inner.network.is_online() {
                    inner.spawn_drain(SyncTrigger::Visible);
                }
            }
            changed = queue_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let pending = queue_rx.borrow_and_update().clone();
                inner.state.set_pending(pending);
            }
            changed = persistence_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = persistence_rx.borrow_and_update().clone();
                inner.state.set_persistence(status.clone());
                if let PersistenceStatus::Degraded { reason } = status {
                    inner.state.emit(SyncEvent::PersistenceDegraded {
                        error: SyncError::degraded(reason),
                    });
                }
            }
            Some(name) = fired.recv() => {
                inner.on_timer(name);
            }
            Some(trigger) = triggers.recv() => {
                inner.spawn_drain(trigger);
            }
        }
    }

    tracing::debug!("Sync loop stopped");
}

impl EngineInner {
    fn request(&self, trigger: SyncTrigger) {
        let _ = self.triggers.send(trigger);
    }

    fn on_timer(self: &Arc<Self>, name: TimerName) {
        match name {
            TimerName::Debounce => self.spawn_drain(SyncTrigger::Enqueue),
            TimerName::RetryBackoff => self.spawn_drain(SyncTrigger::Retry),
            TimerName::Rollback(correlation) => {
                let inner = Arc::clone(self);
                tokio::spawn(async move { inner.expire_rollback(correlation).await });
            }
        }
    }

    /// Start a pass in the background unless offline or one is running
    fn spawn_drain(self: &Arc<Self>, trigger: SyncTrigger) {
        if !self.network.is_online() {
            tracing::debug!(?trigger, "Offline, drain deferred");
            return;
        }
        match self.gate.try_begin() {
            Some(permit) => {
                tokio::spawn(Arc::clone(self).run_pass(permit, trigger));
            }
            None => tracing::debug!(?trigger, "Drain in progress, trigger coalesced"),
        }
    }

    async fn force_sync(self: &Arc<Self>) -> Result<DrainReport, SyncError> {
        let requested_after = self.gate.passes_started();

        loop {
            if !self.network.is_online() {
                return Err(SyncError::Offline);
            }

            if let Some(permit) = self.gate.try_begin() {
                let pass = tokio::spawn(Arc::clone(self).run_pass(permit, SyncTrigger::Force));
                return Ok(pass.await.unwrap_or_else(|e| {
                    tracing::error!(error = %e, "Drain pass panicked");
                    DrainReport::aborted()
                }));
            }

            let in_flight = self.gate.passes_started();
            let pass = self.gate.wait_for(in_flight).await;
            if pass.seq > requested_after {
                return Ok(pass.report);
            }
            tokio::task::yield_now().await;
        }
    }

    /// One drain pass over a snapshot of the queue
    async fn run_pass(self: Arc<Self>, permit: DrainPermit, trigger: SyncTrigger) -> DrainReport {
        let started = Instant::now();
        let snapshot = self.queue.list_all().await;
        let mut report = DrainReport::new(trigger);
        let mut next_retry: Option<Duration> = None;

        tracing::debug!(?trigger, pass = permit.seq(), queued = snapshot.len(), "Drain pass started");

        for queued in snapshot {
            if !self.network.is_online() {
                report.interrupted = true;
                break;
            }

            // Re-read: the payload may have been amended since the snapshot
            let Some(op) = self.queue.begin(queued.id).await else {
                report.skipped += 1;
                continue;
            };

            report.attempted += 1;
            match self.executor.execute(&op).await {
                Ok(ack) => {
                    self.queue.remove(op.id).await;
                    report.succeeded += 1;
                    self.handle_ack(&op, ack).await;
                }
                Err(error) => {
                    if let Some(delay) = self.handle_failure(&op, error, &mut report).await {
                        next_retry = Some(next_retry.map_or(delay, |d| d.min(delay)));
                    }
                }
            }
        }

        if let Some(delay) = next_retry {
            self.scheduler.schedule_if_earlier(TimerName::RetryBackoff, delay);
        }

        if !report.interrupted {
            let now = Utc::now();
            self.state.set_last_sync_time(now);
            if let Err(e) = self.store.set_metadata(LAST_SYNC_KEY, &now.to_rfc3339()).await {
                tracing::warn!(error = %e, "Could not persist last sync time");
            }
        }

        self.metrics
            .write()
            .await
            .record_pass(&report, started.elapsed());

        tracing::info!(
            ?trigger,
            attempted = report.attempted,
            succeeded = report.succeeded,
            retried = report.retried,
            dead_lettered = report.dead_lettered,
            rejected = report.rejected,
            abandoned = report.abandoned,
            interrupted = report.interrupted,
            "Drain pass finished"
        );

        permit.complete(report.clone());

        if self.enqueued_during_pass.swap(false, Ordering::AcqRel) && !self.queue.is_empty().await {
            self.scheduler.schedule(TimerName::Debounce, self.config.debounce);
        }

        report
    }

    /// Classify a failed call; returns the backoff delay if the op stays queued
    async fn handle_failure(
        &self,
        op: &PendingOperation,
        error: RemoteError,
        report: &mut DrainReport,
    ) -> Option<Duration> {
        if let Some(correlation) = op.correlation_id {
            if self.optimistic.is_abandoned(correlation).await {
                tracing::warn!(
                    operation_id = %op.id,
                    error = %error,
                    "Operation was rolled back while in flight, dropping it"
                );
                self.queue.remove(op.id).await;
                self.optimistic.forget(correlation).await;
                report.abandoned += 1;
                return None;
            }
        }

        let transient = error.is_transient();
        let retry_count = if transient {
            self.queue
                .record_failure(op.id)
                .await
                .unwrap_or(op.retry_count + 1)
        } else {
            self.queue.finish(op.id).await;
            op.retry_count
        };

        match self.retry.classify(retry_count, transient) {
            Disposition::Retry { attempt, delay } => {
                tracing::warn!(
                    operation_id = %op.id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Transient failure, will retry"
                );
                report.retried += 1;
                Some(delay)
            }
            Disposition::DeadLetter { attempts } => {
                tracing::error!(
                    operation_id = %op.id,
                    attempts,
                    error = %error,
                    "Retry ceiling reached, dead-lettering operation"
                );
                self.queue.remove(op.id).await;
                report.dead_lettered += 1;
                let failure = SyncError::PermanentFailure {
                    operation_id: op.id,
                    attempts,
                    message: error.to_string(),
                };
                self.fail_correlation(op, failure).await;
                None
            }
            Disposition::Reject => {
                tracing::error!(
                    operation_id = %op.id,
                    table = %op.table,
                    error = %error,
                    "Remote rejected operation"
                );
                self.queue.remove(op.id).await;
                report.rejected += 1;
                let failure = match &error {
                    RemoteError::Rejected { .. } => {
                        SyncError::schema_violation(op.table, error.to_string())
                    }
                    _ => SyncError::PermanentFailure {
                        operation_id: op.id,
                        attempts: retry_count + 1,
                        message: error.to_string(),
                    },
                };
                self.fail_correlation(op, failure).await;
                None
            }
        }
    }

    /// Surface a terminal failure and roll back its optimistic entry
    async fn fail_correlation(&self, op: &PendingOperation, error: SyncError) {
        self.state.emit(SyncEvent::OperationFailed {
            operation_id: op.id,
            correlation_id: op.correlation_id,
            error: error.clone(),
        });

        let Some(correlation) = op.correlation_id else {
            return;
        };
        self.scheduler.cancel(TimerName::Rollback(correlation));
        self.optimistic.forget(correlation).await;

        if let Some((table, id)) = self.optimistic.rollback_correlation(correlation, false).await {
            tracing::warn!(table = %table, id = %id, "Rolled back optimistic entry");
            self.metrics.write().await.record_rollback();
            self.state.emit(SyncEvent::RolledBack { table, id, error });
        }
    }

    /// Reconcile a successful call into the overlays
    async fn handle_ack(&self, op: &PendingOperation, ack: Acknowledgment) {
        let Some(correlation) = op.correlation_id else {
            self.emit_untracked_ack(op, &ack);
            return;
        };
        self.scheduler.cancel(TimerName::Rollback(correlation));

        let record = match &ack {
            Acknowledgment::Created(r) | Acknowledgment::Updated(r) => Some(r.clone()),
            Acknowledgment::Deleted => None,
        };

        match self.optimistic.acknowledge(correlation, ack.clone()).await {
            AckResult::Reconciled { table, id, deferred } => {
                tracing::debug!(table = %table, id = %id, "Operation acknowledged");
                self.state.emit(SyncEvent::Acknowledged {
                    table,
                    id: id.clone(),
                });
                if let EntityId::Persisted(server_id) = &id {
                    for follow_up in deferred {
                        match follow_up {
                            Deferred::Update(patch) => {
                                self.update_persisted(table, server_id, patch).await
                            }
                            Deferred::Delete => self.delete_persisted(table, server_id).await,
                        }
                    }
                }
            }
            AckResult::Orphaned { table, id } => {
                tracing::warn!(
                    table = %table,
                    id = %id,
                    "Server applied a write that was already rolled back"
                );
                self.metrics.write().await.record_orphan();
                self.state.emit(SyncEvent::OrphanedWrite { table, id, record });
            }
            AckResult::Untracked => self.emit_untracked_ack(op, &ack),
        }
    }

    fn emit_untracked_ack(&self, op: &PendingOperation, ack: &Acknowledgment) {
        let id = match ack {
            Acknowledgment::Created(r) | Acknowledgment::Updated(r) => EntityId::Persisted(r.id.clone()),
            Acknowledgment::Deleted => match &op.target {
                Some(target) => EntityId::Persisted(target.clone()),
                None => return,
            },
        };
        self.state.emit(SyncEvent::Acknowledged { table: op.table, id });
    }

    /// Rollback deadline of `correlation` elapsed
    async fn expire_rollback(&self, correlation: Uuid) {
        let cancelled = self.queue.remove_correlation(correlation).await;
        let issued = self.queue.find_by_correlation(correlation).await.is_some();

        if let Some((table, id)) = self.optimistic.rollback_correlation(correlation, issued).await {
            tracing::warn!(
                table = %table,
                id = %id,
                cancelled = cancelled.len(),
                in_flight = issued,
                "No acknowledgment before rollback timeout"
            );
            self.metrics.write().await.record_rollback();
            self.state.emit(SyncEvent::RolledBack {
                table,
                id: id.clone(),
                error: SyncError::RollbackTimeout { id },
            });
        }
    }

    async fn enqueue(&self, op: PendingOperation) {
        self.queue.enqueue(op).await;
        if self.gate.is_busy() {
            self.enqueued_during_pass.store(true, Ordering::Release);
        }
        self.scheduler.schedule(TimerName::Debounce, self.config.debounce);
    }

    fn arm_rollback(&self, correlation: Uuid) {
        self.scheduler
            .schedule(TimerName::Rollback(correlation), self.config.rollback_timeout);
    }

    fn filter(&self) -> &SchemaFilter {
        self.executor.filter()
    }

    pub(crate) async fn create_item(&self, table: EntityTable, fields: FieldMap) -> EntityId {
        let payload = self.filter().filter(table, &fields);
        let (id, token) = self.optimistic.apply_create(table, fields).await;

        let op = PendingOperation::new(OperationKind::Create, table, payload).with_correlation(token);
        self.enqueue(op).await;
        self.arm_rollback(token);

        tracing::debug!(table = %table, id = %id, "Optimistic create");
        id
    }

    pub(crate) async fn update_item(
        &self,
        table: EntityTable,
        id: &EntityId,
        patch: FieldMap,
    ) -> Result<(), SyncError> {
        loop {
            match self.optimistic.resolve(table, id).await {
                Resolved::Unknown => {
                    return Err(SyncError::UnknownItem {
                        table,
                        id: id.clone(),
                    })
                }
                Resolved::Local(token) => {
                    let filtered = self.filter().filter(table, &patch);
                    let folded = match self.queue.find_by_correlation(token).await {
                        Some((op, false)) => {
                            self.queue.amend(op.id, filtered).await == Amendment::Applied
                        }
                        _ => false,
                    };
                    if folded {
                        self.optimistic.fold_into_create(token, patch).await;
                        return Ok(());
                    }
                    if self.optimistic.defer(token, Deferred::Update(patch.clone())).await {
                        tracing::debug!(table = %table, id = %id, "Create in flight, update parked");
                        return Ok(());
                    }
                    // Acknowledged or rolled back since `resolve`
                }
                Resolved::Persisted(server_id) => {
                    self.update_persisted(table, &server_id, patch).await;
                    return Ok(());
                }
            }
        }
    }

    pub(crate) async fn delete_item(&self, table: EntityTable, id: &EntityId) -> Result<(), SyncError> {
        loop {
            match self.optimistic.resolve(table, id).await {
                Resolved::Unknown => {
                    return Err(SyncError::UnknownItem {
                        table,
                        id: id.clone(),
                    })
                }
                Resolved::Local(token) => {
                    let cancelled = self.queue.remove_correlation(token).await;
                    if !cancelled.is_empty() {
                        self.optimistic.cancel_create(token).await;
                        self.scheduler.cancel(TimerName::Rollback(token));
                        return Ok(());
                    }
                    if self.optimistic.defer(token, Deferred::Delete).await {
                        tracing::debug!(table = %table, id = %id, "Create in flight, delete parked");
                        return Ok(());
                    }
                    // Acknowledged or rolled back since `resolve`
                }
                Resolved::Persisted(server_id) => {
                    self.delete_persisted(table, &server_id).await;
                    return Ok(());
                }
            }
        }
    }

    async fn update_persisted(&self, table: EntityTable, server_id: &str, patch: FieldMap) {
        let correlation = Uuid::new_v4();
        let payload = self.filter().filter(table, &patch);
        self.optimistic
            .apply_update(table, server_id, patch, correlation)
            .await;

        let op = PendingOperation::new(OperationKind::Update, table, payload)
            .with_target(server_id)
            .with_correlation(correlation);
        self.enqueue(op).await;
        self.arm_rollback(correlation);
    }

    async fn delete_persisted(&self, table: EntityTable, server_id: &str) {
        let correlation = Uuid::new_v4();
        self.optimistic.apply_delete(table, server_id, correlation).await;

        let op = PendingOperation::new(OperationKind::Delete, table, FieldMap::new())
            .with_target(server_id)
            .with_correlation(correlation);
        self.enqueue(op).await;
        self.arm_rollback(correlation);
    }

    /// Discard every pending change of an item; returns whether any existed
    pub(crate) async fn rollback(&self, table: EntityTable, id: &EntityId) -> bool {
        let correlations = self.optimistic.correlations_of(table, id).await;
        for correlation in &correlations {
            self.scheduler.cancel(TimerName::Rollback(*correlation));
            self.queue.remove_correlation(*correlation).await;
            let issued = self.queue.find_by_correlation(*correlation).await.is_some();
            self.optimistic.rollback_correlation(*correlation, issued).await;
        }
        if !correlations.is_empty() {
            self.metrics.write().await.record_rollback();
        }
        !correlations.is_empty()
    }

    pub(crate) async fn is_optimistic(&self, table: EntityTable, id: &EntityId) -> bool {
        self.optimistic.is_optimistic(table, id).await
    }

    pub(crate) async fn is_pending(&self, table: EntityTable, id: &EntityId) -> bool {
        self.optimistic.is_pending(table, id).await
    }

    pub(crate) async fn view(&self, table: EntityTable) -> Vec<ViewItem> {
        self.optimistic.view(table).await
    }

    pub(crate) async fn set_authoritative(&self, table: EntityTable, records: Vec<Record>) {
        self.optimistic.set_authoritative(table, records).await;
    }
}
