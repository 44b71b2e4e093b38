use std::future::Future;
use std::time::Duration;

use crate::errors::{FlowshotError, FlowshotResult};
use crate::executor::driver::{BrowserDriver, DispatchOutcome};
use crate::orchestrator::state::{Action, ActionOutcome};

/// Runs a driver call under `limit`, mapping expiry to [`FlowshotError::DriverTimeout`].
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> FlowshotResult<T>
where
    F: Future<Output = FlowshotResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(FlowshotError::DriverTimeout(limit.as_millis() as u64)),
    }
}

#[derive(Debug, Clone)]
pub struct Dispatcher {
    call_timeout: Duration,
    max_wait: Duration,
}

impl Dispatcher {
    pub fn new(call_timeout: Duration, max_wait: Duration) -> Self {
        Self {
            call_timeout,
            max_wait,
        }
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Executes `action`. Recoverable failures come back as
    /// [`ActionOutcome::Failed`]; only fatal driver errors are returned as `Err`.
    pub async fn execute(
        &self,
        driver: &dyn BrowserDriver,
        action: &Action,
    ) -> FlowshotResult<ActionOutcome> {
        let result = match action {
            Action::Done => return Ok(ActionOutcome::NotDispatched),
            Action::Wait { millis } => {
                let wait = Duration::from_millis(*millis).min(self.max_wait);
                tokio::time::sleep(wait).await;
                return Ok(ActionOutcome::Performed);
            }
            Action::Navigate { url } => with_timeout(self.call_timeout, driver.navigate(url))
                .await
                .map(|_| DispatchOutcome::Performed),
            Action::Click { .. }
            | Action::Type { .. }
            | Action::PressKey { .. }
            | Action::Hover { .. }
            | Action::Scroll { .. } => with_timeout(self.call_timeout, driver.dispatch(action)).await,
        };

        match result {
            Ok(DispatchOutcome::Performed) => Ok(ActionOutcome::Performed),
            Ok(DispatchOutcome::Failed { reason }) => {
                tracing::warn!(action = %action.describe(), %reason, "action did not land");
                Ok(ActionOutcome::Failed { reason })
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                tracing::warn!(action = %action.describe(), error = %e, "dispatch failed");
                Ok(ActionOutcome::Failed {
                    reason: e.to_string(),
                })
            }
        }
    }
}
