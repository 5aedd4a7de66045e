//! Retry with backoff for durable-store operations
//!
//! Journal appends, bookkeeping writes and archive commits run through a
//! [`RetryPolicy`]. Transient errors are retried with exponential backoff
//! (backon, blocking); once the budget is spent the error is converted to
//! [`PackError::Fatal`] so the process stops instead of skipping files.

use std::time::Duration;

use backon::{BlockingRetryable as _, ExponentialBuilder};

use crate::error::{PackError, Result};

/// Ceiling for a single backoff step, as a multiple of `backoff`
const MAX_DELAY_FACTOR: u32 = 8;

/// Bounded retry policy with exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,

    /// Delay before the second attempt; doubles per attempt
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            backoff: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// A policy that never sleeps (tests)
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: Duration::ZERO,
        }
    }

    fn builder(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.backoff)
            .with_max_delay(self.backoff * MAX_DELAY_FACTOR)
            .with_max_times(self.max_attempts.max(1) as usize - 1)
    }

    /// Run `op` until it succeeds, fails permanently, or the budget runs out.
    ///
    /// Non-transient errors are returned as-is on first occurrence.
    pub fn run<T, F>(&self, what: &str, op: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        let result = op
            .retry(self.builder())
            .sleep(std::thread::sleep)
            .when(PackError::is_transient)
            .notify(|e: &PackError, delay: Duration| {
                tracing::warn!(
                    "{} failed (attempt {}/{}), retrying in {:?}: {}",
                    what,
                    attempt,
                    attempts,
                    delay,
                    e
                );
                attempt += 1;
            })
            .call();

        match result {
            Err(e) if e.is_transient() => {
                tracing::error!("{} failed after {} attempts: {}", what, attempts, e);
                Err(PackError::Fatal(format!(
                    "{} failed after {} attempts: {}",
                    what, attempts, e
                )))
            }
            other => other,
        }
    }
}
