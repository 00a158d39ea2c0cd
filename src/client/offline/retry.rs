//! # Retry Logic and Backoff Strategies
//!
//! Classifies the outcome of a failed remote call and computes when the next
//! attempt may run.
//!
//! ## Features
//!
//! - **Exponential Backoff**: `min(base * 2^retry_count, cap)`
//! - **Max Retries**: The attempt that reaches the ceiling dead-letters the operation
//! - **No Retry on Rejection**: A payload the remote refuses is never sent again
//!
//! ## Usage
//!
//! ```rust
//! use docsync::client::offline::retry::{Disposition, RetryController};
//! use std::time::Duration;
//!
//! let retry = RetryController::new(3, Duration::from_secs(1), Duration::from_secs(30));
//!
//! // First transient failure: retry_count goes 0 -> 1, wait 2s
//! assert_eq!(
//!     retry.classify(1, true),
//!     Disposition::Retry { attempt: 1, delay: Duration::from_secs(2) }
//! );
//! assert_eq!(retry.classify(3, true), Disposition::DeadLetter { attempts: 3 });
//! ```

use crate::shared::SyncConfig;
use std::time::Duration;

/// Backoff strategy configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackoffStrategy {
    /// Fixed interval between retries
    Fixed {
        /// Interval between attempts
        interval: Duration,
    },
    /// Doubling interval, clamped to `cap`
    Exponential {
        /// First step
        base: Duration,
        /// Maximum interval
        cap: Duration,
    },
}

impl BackoffStrategy {
    /// Delay before the next attempt of an operation that has failed
    /// `retry_count` times
    pub fn delay(&self, retry_count: u32) -> Duration {
        match self {
            Self::Fixed { interval } => *interval,
            Self::Exponential { base, cap } => {
                let factor = 2u32.checked_pow(retry_count).unwrap_or(u32::MAX);
                base.checked_mul(factor).unwrap_or(*cap).min(*cap)
            }
        }
    }
}

/// What to do with an operation after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Keep it queued and try again after `delay`
    Retry {
        /// Failed attempts so far
        attempt: u32,
        /// Backoff before the next attempt
        delay: Duration,
    },
    /// Retry ceiling reached; remove and report
    DeadLetter {
        /// Failed attempts
        attempts: u32,
    },
    /// Remote refused the payload; remove, report and roll back
    Reject,
}

/// Retry/backoff controller
#[derive(Debug, Clone)]
pub struct RetryController {
    max_retries: u32,
    strategy: BackoffStrategy,
}

impl Default for RetryController {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

impl RetryController {
    /// Create a controller with exponential backoff
    pub fn new(max_retries: u32, base: Duration, cap: Duration) -> Self {
        Self {
            max_retries,
            strategy: BackoffStrategy::Exponential { base, cap },
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.max_retries, config.base_delay, config.cap_delay)
    }

    /// Set backoff strategy
    pub fn set_backoff_strategy(&mut self, strategy: BackoffStrategy) {
        self.strategy = strategy;
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Classify a failure
    ///
    /// `retry_count` is the count *after* this failure was recorded.
    pub fn classify(&self, retry_count: u32, transient: bool) -> Disposition {
        if !transient {
            return Disposition::Reject;
        }
        if retry_count >= self.max_retries {
            return Disposition::DeadLetter {
                attempts: retry_count,
            };
        }
        Disposition::Retry {
            attempt: retry_count,
            delay: self.strategy.delay(retry_count),
        }
    }
}
