//! # Sync Metrics and Analytics
//!
//! Counters over drain passes and per-operation outcomes.

use super::DrainReport;
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct SyncMetrics {
    pub total_passes: u64,
    /// Passes cut short by a connectivity loss
    pub interrupted_passes: u64,
    pub operations_succeeded: u64,
    pub operations_retried: u64,
    pub operations_dead_lettered: u64,
    pub operations_rejected: u64,
    pub rollbacks: u64,
    pub orphaned_writes: u64,
    pub average_pass_duration: Duration,
    pub last_pass_duration: Option<Duration>,
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_pass(&mut self, report: &DrainReport, duration: Duration) {
        self.total_passes += 1;
        if report.interrupted {
            self.interrupted_passes += 1;
        }
        self.operations_succeeded += report.succeeded as u64;
        self.operations_retried += report.retried as u64;
        self.operations_dead_lettered += report.dead_lettered as u64;
        self.operations_rejected += report.rejected as u64;
        self.last_pass_duration = Some(duration);

        // Update rolling average
        let passes = self.total_passes.min(u32::MAX as u64) as u32;
        let total = self.average_pass_duration * (passes - 1) + duration;
        self.average_pass_duration = total / passes;
    }

    pub fn record_rollback(&mut self) {
        self.rollbacks += 1;
    }

    pub fn record_orphan(&mut self) {
        self.orphaned_writes += 1;
    }

    /// Share of attempted operations that succeeded
    pub fn success_rate(&self) -> f64 {
        let attempted = self.operations_succeeded
            + self.operations_retried
            + self.operations_dead_lettered
            + self.operations_rejected;
        if attempted == 0 {
            0.0
        } else {
            self.operations_succeeded as f64 / attempted as f64
        }
    }
}
