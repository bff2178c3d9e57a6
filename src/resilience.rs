// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry with exponential backoff for transient failures.
//!
//! Engine operations are all-or-nothing, so a `Transient` or `Timeout`
//! failure can be retried by re-running the whole operation. The engine never
//! retries on its own; callers opt in with [`with_retry`].
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example(engine: sharing_engine::ClusterEngine) -> sharing_engine::Result<()> {
//! use sharing_engine::resilience::{with_retry, RetryConfig};
//!
//! let config = RetryConfig::default();
//! let _report = with_retry(&config, "remove_member", || engine.remove_member(1, 2)).await?;
//! # Ok(())
//! # }
//! ```

use crate::error::{Result, SharingError};
use crate::metrics;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Backoff schedule for retrying whole operations.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: usize,

    /// Delay before the first retry.
    pub initial_delay: Duration,

    /// Ceiling for exponential backoff.
    pub max_delay: Duration,

    /// Backoff multiplier (e.g., 2.0 = double delay each retry).
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
        }
    }
}

impl RetryConfig {
    /// Fast-fail retry for tests.
    pub fn testing() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(50),
            backoff_factor: 2.0,
        }
    }

    /// Never retry.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Calculate delay for a given attempt number (1-indexed).
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return self.initial_delay;
        }

        let multiplier = self.backoff_factor.powi((attempt - 1) as i32);
        let delay_secs = self.initial_delay.as_secs_f64() * multiplier;
        let delay = Duration::from_secs_f64(delay_secs);

        std::cmp::min(delay, self.max_delay)
    }
}

/// Whether re-running the same call could succeed.
///
/// Only store-level failures qualify: a stale `expected_version` or a
/// vanished row fails the same way on every attempt.
fn should_retry(e: &SharingError) -> bool {
    matches!(e, SharingError::Transient { .. } | SharingError::Timeout { .. })
}

/// Run `f` until it succeeds, fails permanently, or attempts run out.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, operation: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempts = 0;

    loop {
        attempts += 1;
        match f().await {
            Ok(result) => {
                if attempts > 1 {
                    debug!(operation, attempts, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if should_retry(&e) && attempts < config.max_attempts => {
                let delay = config.delay_for_attempt(attempts);
                warn!(
                    operation,
                    attempts,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient failure, retrying"
                );
                metrics::record_retry(operation);
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if should_retry(&e) {
                    warn!(operation, attempts, "Transient failure, max retries exceeded");
                }
                return Err(e);
            }
        }
    }
}
