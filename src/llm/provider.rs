use async_trait::async_trait;

use crate::errors::FlowshotResult;
use crate::llm::types::DecisionRequest;
use crate::orchestrator::state::DecisionOutcome;

/// Source of the next action. Implementations must not panic on odd model
/// output: anything that does not map onto an action is a
/// [`DecisionOutcome::ParseFailure`], while transport problems are errors.
#[async_trait]
pub trait DecisionProvider: Send + Sync {
    /// Returns the provider's identifier (matches the config key).
    fn name(&self) -> &str;

    async fn decide(&self, request: &DecisionRequest) -> FlowshotResult<DecisionOutcome>;
}
