//! Retry with exponential backoff
//!
//! Shared by the blockchain fetch path and the LLM dispatcher. Only errors
//! for which [`Error::is_retryable`] holds are retried.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Upper bound on configured retries
pub const MAX_RETRIES_CAP: u32 = 10;

/// Backoff parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry (milliseconds)
    pub base_delay_ms: u64,
    /// Ceiling for a single backoff delay (milliseconds)
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
        }
    }
}

/// Result of a retried operation together with the attempt count
#[derive(Debug)]
pub struct Attempted<T> {
    pub outcome: Result<T>,
    pub attempts: u32,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries: max_retries.min(MAX_RETRIES_CAP),
            base_delay_ms: base_delay.as_millis() as u64,
            ..Self::default()
        }
    }

    /// No retries at all
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    fn retries(&self) -> u32 {
        self.max_retries.min(MAX_RETRIES_CAP)
    }

    /// Delay before retry number `retry` (1-based): base * 2^(retry-1), capped.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(16);
        let millis = self
            .base_delay_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_delay_ms.max(self.base_delay_ms));
        Duration::from_millis(millis)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// retry budget is spent.
    pub async fn run<T, F, Fut>(&self, label: &str, op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run_counted(label, op).await.outcome
    }

    /// Same as [`RetryPolicy::run`], also reporting how many attempts were made.
    ///
    /// `op` receives the zero-based attempt number.
    pub async fn run_counted<T, F, Fut>(&self, label: &str, mut op: F) -> Attempted<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let retries = self.retries();
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => {
                    return Attempted {
                        outcome: Ok(value),
                        attempts: attempt + 1,
                    }
                }
                Err(e) if e.is_retryable() && attempt < retries => {
                    attempt += 1;
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        operation = label,
                        attempt = attempt,
                        max_retries = retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    if e.is_retryable() {
                        tracing::debug!(operation = label, attempts = attempt + 1, "Retry budget spent");
                    }
                    return Attempted {
                        outcome: Err(e),
                        attempts: attempt + 1,
                    };
                }
            }
        }
    }
}

/// Wrap a future in a timeout, mapping expiry to [`Error::Transport`].
pub async fn with_timeout<T, Fut>(timeout: Duration, what: &str, fut: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Transport(format!(
            "{} timed out after {} ms",
            what,
            timeout.as_millis()
        ))),
    }
}
