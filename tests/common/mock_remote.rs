//! Scriptable remote backend for integration tests
//!
//! Records every call, answers creates with sequential server ids and can be
//! told to fail, stall, or fail a fixed number of times.

use async_trait::async_trait;
use docsync::client::{RemoteBackend, RemoteError};
use docsync::shared::{EntityTable, FieldMap, OperationKind, Record};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

/// One call received by the mock
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteCall {
    pub kind: OperationKind,
    pub table: EntityTable,
    pub target: Option<String>,
    pub payload: FieldMap,
    pub idempotency_key: Option<Uuid>,
}

#[derive(Debug, Default)]
pub struct MockRemote {
    calls: Mutex<Vec<RemoteCall>>,
    scripted: Mutex<VecDeque<RemoteError>>,
    always: Mutex<Option<RemoteError>>,
    delay: Mutex<Option<Duration>>,
    created: Mutex<HashMap<Uuid, Record>>,
    next_id: AtomicU32,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next calls with `errors`, in order
    pub fn fail_next(&self, errors: impl IntoIterator<Item = RemoteError>) {
        self.scripted.lock().unwrap().extend(errors);
    }

    /// Fail every call until cleared
    pub fn fail_always(&self, error: Option<RemoteError>) {
        *self.always.lock().unwrap() = error;
    }

    /// Stall every call for `delay`
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Highest number of calls that were running at once
    pub fn max_concurrency(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    /// Number of distinct records created
    pub fn created_count(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    async fn enter(&self, call: RemoteCall) -> Result<(), RemoteError> {
        self.calls.lock().unwrap().push(call);
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.active.fetch_sub(1, Ordering::SeqCst);

        if let Some(error) = self.scripted.lock().unwrap().pop_front() {
            return Err(error);
        }
        if let Some(error) = self.always.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteBackend for MockRemote {
    async fn insert(
        &self,
        table: EntityTable,
        payload: FieldMap,
        idempotency_key: Uuid,
    ) -> Result<Record, RemoteError> {
        self.enter(RemoteCall {
            kind: OperationKind::Create,
            table,
            target: None,
            payload: payload.clone(),
            idempotency_key: Some(idempotency_key),
        })
        .await?;

        let mut created = self.created.lock().unwrap();
        let record = created.entry(idempotency_key).or_insert_with(|| {
            let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            Record::new(format!("srv_{n}"), payload)
        });
        Ok(record.clone())
    }

    async fn update(
        &self,
        table: EntityTable,
        id: &str,
        payload: FieldMap,
    ) -> Result<Record, RemoteError> {
        self.enter(RemoteCall {
            kind: OperationKind::Update,
            table,
            target: Some(id.to_string()),
            payload: payload.clone(),
            idempotency_key: None,
        })
        .await?;
        Ok(Record::new(id, payload))
    }

    async fn delete(&self, table: EntityTable, id: &str) -> Result<(), RemoteError> {
        self.enter(RemoteCall {
            kind: OperationKind::Delete,
            table,
            target: Some(id.to_string()),
            payload: FieldMap::new(),
            idempotency_key: None,
        })
        .await
    }
}
