//! Retry policy for page fetches.
//!
//! Each attempt's [`PageResult`] is folded into a [`Decision`] so that the
//! backoff timing and the failure ceilings can be exercised without any I/O.

use std::time::Duration;

use crate::core::fetcher::{FatalKind, PageResult, RetryReason};
use crate::core::filter::Visit;
use crate::models::RequestConfig;

/// Retry limits and backoff timing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per page
    pub max_retries: u32,
    /// Consecutive failed pages before the collection aborts
    pub max_consecutive_failures: u32,
    /// Backoff unit; the wait before retry `n` is `base * 2^n` plus up to `base` of jitter
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_consecutive_failures: 3,
            backoff_base: Duration::from_secs(1),
        }
    }
}

impl From<&RequestConfig> for RetryPolicy {
    fn from(config: &RequestConfig) -> Self {
        Self {
            max_retries: config.max_retries.max(1),
            max_consecutive_failures: config.max_consecutive_failures.max(1),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
        }
    }
}

/// What to do after an attempt
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Page fetched; the records go into the accumulator
    Accept(Vec<Visit>),
    /// Wait, then try the same page again
    Retry { delay: Duration, reason: RetryReason },
    /// All attempts used; the page counts as failed
    GiveUp(RetryReason),
    /// Stop the whole collection
    Abort { kind: FatalKind, message: String },
}

impl RetryPolicy {
    /// Backoff before the retry that follows zero-based `attempt`
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        let base = self.backoff_base.saturating_mul(factor);
        base + self.backoff_base.mul_f64(fastrand::f64())
    }

    /// Classify the result of zero-based `attempt`
    pub fn decide(&self, attempt: u32, result: PageResult) -> Decision {
        match result {
            PageResult::Success { records } => Decision::Accept(records),
            PageResult::FatalFailure { kind, message } => Decision::Abort { kind, message },
            PageResult::RetryableFailure { reason } => {
                if attempt + 1 >= self.max_retries {
                    Decision::GiveUp(reason)
                } else {
                    Decision::Retry {
                        delay: self.backoff_delay(attempt),
                        reason,
                    }
                }
            }
        }
    }

    /// Whether `consecutive_failures` failed pages end the collection
    pub fn ceiling_reached(&self, consecutive_failures: u32) -> bool {
        consecutive_failures >= self.max_consecutive_failures
    }
}
