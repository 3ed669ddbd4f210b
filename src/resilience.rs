// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry controller for phase runs and the purge pass.
//!
//! - [`RetryConfig`]: bounded attempts with exponential backoff
//! - [`with_retry`]: runs an operation, clearing the batch queue after
//!   every failed attempt so stale items never leak into the next one
//!
//! Non-retryable failures (notably [`EngineError::AlreadyDone`]) are
//! returned on first occurrence without consuming further attempts.

use crate::error::{EngineError, Result};
use crate::metrics;
use crate::queue::BatchQueue;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: usize,

    /// Delay before the second attempt.
    pub initial_delay: Duration,

    /// Maximum delay between attempts (ceiling for exponential backoff).
    pub max_delay: Duration,

    /// Backoff multiplier (e.g., 2.0 = double delay each retry).
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::ZERO,
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
        }
    }
}

impl RetryConfig {
    /// Fast retry for tests: three attempts, no waiting.
    pub fn testing() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_factor: 2.0,
        }
    }

    /// Set the attempt bound.
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Calculate the delay after a failed attempt (1-indexed).
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return self.initial_delay;
        }

        let multiplier = self.backoff_factor.powi((attempt - 1) as i32);
        let delay_secs = self.initial_delay.as_secs_f64() * multiplier;
        Duration::try_from_secs_f64(delay_secs)
            .map_or(self.max_delay, |delay| std::cmp::min(delay, self.max_delay))
    }
}

/// Run `op` with bounded retry.
///
/// `op` receives the 1-indexed attempt number. After every failure the
/// queue is cleared. Non-retryable errors are returned immediately; other
/// errors are retried until `max_attempts` is reached, and then the last
/// error is returned.
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    queue: &BatchQueue,
    operation: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match op(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation, attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => {
                let discarded = queue.clear();
                if discarded > 0 {
                    debug!(operation, discarded, "Cleared stale queue items");
                }

                if !err.is_retryable() {
                    if !matches!(err, EngineError::AlreadyDone { .. }) {
                        error!(operation, error = %err, "Non-retryable failure");
                    }
                    return Err(err);
                }

                if attempt >= max_attempts {
                    error!(
                        operation,
                        attempts = attempt,
                        error = %err,
                        "Max attempts exhausted"
                    );
                    return Err(err);
                }

                let delay = config.delay_for_attempt(attempt);
                warn!(
                    operation,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "{} failed ({}/{})",
                    operation,
                    attempt,
                    max_attempts
                );
                metrics::record_retry(operation);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
