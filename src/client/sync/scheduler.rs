//! # Sync Scheduler
//!
//! Named, cancellable timers and the single-flight guard for drain passes.
//!
//! ## Features
//!
//! - **Named Timers**: Scheduling under an existing name replaces that timer
//! - **Earliest Wins**: `schedule_if_earlier` keeps whichever deadline comes first
//! - **Independent Timers**: Cancelling one timer never touches another
//! - **Single Flight**: At most one drain pass holds the `DrainGate`

use super::sync_state::SyncStateHandle;
use super::DrainReport;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

/// Timer identities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerName {
    /// Collapses enqueue bursts into one drain
    Debounce,
    /// Next attempt of operations that failed transiently
    RetryBackoff,
    /// Rollback deadline of one optimistic correlation
    Rollback(Uuid),
}

#[derive(Debug)]
struct Timer {
    deadline: Instant,
    generation: u64,
    task: JoinHandle<()>,
}

type TimerMap = Arc<Mutex<HashMap<TimerName, Timer>>>;

fn lock(timers: &TimerMap) -> MutexGuard<'_, HashMap<TimerName, Timer>> {
    timers.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Named timer scheduler
///
/// Fired timers are delivered, by name, on the receiver returned from `new`.
#[derive(Debug)]
pub struct Scheduler {
    timers: TimerMap,
    generation: AtomicU64,
    fired: mpsc::UnboundedSender<TimerName>,
}

impl Scheduler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TimerName>) {
        let (fired, rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            timers: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
            fired,
        };
        (scheduler, rx)
    }

    /// Arm `name` to fire after `delay`, replacing any timer of that name
    pub fn schedule(&self, name: TimerName, delay: Duration) {
        let mut timers = lock(&self.timers);
        if let Some(previous) = timers.remove(&name) {
            previous.task.abort();
        }
        let timer = self.spawn_timer(name, delay);
        timers.insert(name, timer);
    }

    /// Arm `name` unless it is already due sooner; returns whether it was armed
    pub fn schedule_if_earlier(&self, name: TimerName, delay: Duration) -> bool {
        let mut timers = lock(&self.timers);
        let deadline = Instant::now() + delay;
        if timers.get(&name).is_some_and(|t| t.deadline <= deadline) {
            return false;
        }
        if let Some(previous) = timers.remove(&name) {
            previous.task.abort();
        }
        let timer = self.spawn_timer(name, delay);
        timers.insert(name, timer);
        true
    }

    /// Cancel a timer; returns whether it was armed
    pub fn cancel(&self, name: TimerName) -> bool {
        match lock(&self.timers).remove(&name) {
            Some(timer) => {
                timer.task.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_scheduled(&self, name: TimerName) -> bool {
        lock(&self.timers).contains_key(&name)
    }

    /// Time left until `name` fires
    pub fn remaining(&self, name: TimerName) -> Option<Duration> {
        lock(&self.timers)
            .get(&name)
            .map(|t| t.deadline.saturating_duration_since(Instant::now()))
    }

    /// Number of armed timers
    pub fn len(&self) -> usize {
        lock(&self.timers).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel every timer
    pub fn cancel_all(&self) {
        for (_, timer) in lock(&self.timers).drain() {
            timer.task.abort();
        }
    }

    fn spawn_timer(&self, name: TimerName, delay: Duration) -> Timer {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let deadline = Instant::now() + delay;
        let timers = Arc::clone(&self.timers);
        let fired = self.fired.clone();

        let task = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let current = {
                let mut timers = lock(&timers);
                if timers.get(&name).is_some_and(|t| t.generation == generation) {
                    timers.remove(&name);
                    true
                } else {
                    false
                }
            };
            if current {
                let _ = fired.send(name);
            }
        });

        Timer {
            deadline,
            generation,
            task,
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

/// Last completed drain pass
#[derive(Debug, Clone, Default)]
pub struct CompletedPass {
    /// Sequence number of the pass, starting at 1
    pub seq: u64,
    pub report: DrainReport,
}

/// Single-flight guard for drain passes
#[derive(Debug)]
pub struct DrainGate {
    busy: AtomicBool,
    started: AtomicU64,
    completed: watch::Sender<CompletedPass>,
    state: Arc<SyncStateHandle>,
}

impl DrainGate {
    pub fn new(state: Arc<SyncStateHandle>) -> Arc<Self> {
        Arc::new(Self {
            busy: AtomicBool::new(false),
            started: AtomicU64::new(0),
            completed: watch::channel(CompletedPass::default()).0,
            state,
        })
    }

    /// Claim the gate; `None` while another pass holds it
    pub fn try_begin(self: &Arc<Self>) -> Option<DrainPermit> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        let seq = self.started.fetch_add(1, Ordering::AcqRel) + 1;
        self.state.set_syncing(true);
        Some(DrainPermit {
            gate: Arc::clone(self),
            seq,
            report: None,
        })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Number of passes started so far
    pub fn passes_started(&self) -> u64 {
        self.started.load(Ordering::Acquire)
    }

    /// Wait until pass `seq` (or a later one) has completed
    pub async fn wait_for(&self, seq: u64) -> CompletedPass {
        let mut rx = self.completed.subscribe();
        let pass = match rx.wait_for(|pass| pass.seq >= seq).await {
            Ok(pass) => pass.clone(),
            Err(_) => self.completed.borrow().clone(),
        };
        pass
    }
}

/// Proof of holding the drain gate
///
/// Dropping the permit releases the gate and clears `is_syncing`, also when
/// the pass bails out early or panics.
#[derive(Debug)]
pub struct DrainPermit {
    gate: Arc<DrainGate>,
    seq: u64,
    report: Option<DrainReport>,
}

impl DrainPermit {
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Record the outcome handed to waiters on release
    pub fn complete(mut self, report: DrainReport) {
        self.report = Some(report);
    }
}

impl Drop for DrainPermit {
    fn drop(&mut self) {
        let report = self.report.take().unwrap_or_else(DrainReport::aborted);
        self.gate.busy.store(false, Ordering::Release);
        self.gate.state.set_syncing(false);
        self.gate.completed.send_replace(CompletedPass {
            seq: self.seq,
            report,
        });
    }
}
