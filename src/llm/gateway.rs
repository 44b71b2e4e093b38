use std::sync::Arc;
use std::time::Duration;

use crate::config::DecisionConfig;
use crate::llm::provider::DecisionProvider;
use crate::llm::rate_limit::RateLimiter;
use crate::llm::retry::{with_deadline, with_retry, RetryPolicy};
use crate::llm::types::DecisionRequest;
use crate::orchestrator::state::DecisionOutcome;

/// Every provider call a run makes goes through here: shared rate limit,
/// per-call timeout, transient-only retry.
#[derive(Clone)]
pub struct DecisionGateway {
    provider: Arc<dyn DecisionProvider>,
    limiter: Arc<RateLimiter>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl DecisionGateway {
    pub fn new(
        provider: Arc<dyn DecisionProvider>,
        limiter: Arc<RateLimiter>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            limiter,
            timeout,
            retry,
        }
    }

    pub fn from_config(
        provider: Arc<dyn DecisionProvider>,
        limiter: Arc<RateLimiter>,
        config: &DecisionConfig,
    ) -> Self {
        Self::new(
            provider,
            limiter,
            Duration::from_secs(config.timeout_secs),
            RetryPolicy::with_retries(config.retries),
        )
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Never fails: errors that survive the retry budget come back as a parse
    /// failure so the loop can synthesize a wait and carry on.
    pub async fn decide(&self, request: &DecisionRequest) -> DecisionOutcome {
        let provider = self.provider.as_ref();
        let limiter = self.limiter.as_ref();
        let timeout = self.timeout;

        let result = with_retry(&self.retry, || async move {
            limiter.acquire().await;
            with_deadline(timeout, provider.decide(request)).await
        })
        .await;

        match result {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(provider = %provider.name(), error = %e, "decision provider unavailable");
                DecisionOutcome::ParseFailure(format!("decision provider unavailable: {e}"))
            }
        }
    }
}
