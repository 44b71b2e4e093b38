//! Exponential backoff for decision-provider calls.
//!
//! Only errors classified as transient are retried; everything else is
//! returned on the first failure.

use std::future::Future;
use std::time::Duration;

use crate::errors::{FlowshotError, FlowshotResult};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    /// Total attempts including the first one.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_factor: 2.0,
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    /// `retries` extra attempts after the first call.
    pub fn with_retries(retries: u32) -> Self {
        Self {
            max_attempts: retries.saturating_add(1),
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let initial_ms = self.initial_delay.as_millis().min(u64::MAX as u128) as u64;
        let max_ms = self.max_delay.as_millis().min(u64::MAX as u128) as u64;
        let exp = attempt.min(31) as i32;
        let base_ms = (initial_ms as f64) * self.backoff_factor.max(1.0).powi(exp);
        Duration::from_millis(base_ms.min(max_ms as f64) as u64)
    }
}

pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> FlowshotResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = FlowshotResult<T>>,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::debug!(attempt = attempt + 1, "provider call succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => {
                attempt += 1;
                if !e.is_transient() || attempt >= policy.max_attempts.max(1) {
                    if e.is_transient() {
                        tracing::warn!(attempt, error = %e, "provider call failed after all retries");
                    }
                    return Err(e);
                }
                let delay = policy.delay_for_attempt(attempt - 1);
                tracing::debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retrying provider call"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Wraps `call` in a deadline, mapping expiry to [`FlowshotError::ProviderTimeout`].
pub async fn with_deadline<T, Fut>(limit: Duration, call: Fut) -> FlowshotResult<T>
where
    Fut: Future<Output = FlowshotResult<T>>,
{
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or_else(|_| Err(FlowshotError::ProviderTimeout(limit.as_millis() as u64)))
}
