use async_trait::async_trait;

use crate::errors::{FlowshotError, FlowshotResult};
use crate::llm::parser::parse_decision;
use crate::llm::prompt::{build_messages, sanitize_for_log};
use crate::llm::provider::DecisionProvider;
use crate::llm::types::{CallConfig, DecisionRequest};
use crate::orchestrator::state::DecisionOutcome;

/// Vision chat-completions endpoint (OpenAI, Azure-compatible gateways,
/// local servers speaking the same protocol).
pub struct OpenAiCompatibleProvider {
    id: String,
    api_base: String,
    api_key: String,
    call: CallConfig,
    client: reqwest::Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(id: String, api_base: String, api_key: String, call: CallConfig) -> Self {
        Self {
            id,
            api_base,
            api_key,
            call,
            client: reqwest::Client::new(),
        }
    }

    fn body(&self, request: &DecisionRequest) -> serde_json::Value {
        serde_json::json!({
            "model": self.call.model,
            "messages": build_messages(request),
            "temperature": self.call.temperature,
            "max_tokens": self.call.max_tokens,
            "stream": false,
        })
    }
}

#[async_trait]
impl DecisionProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.id
    }

    async fn decide(&self, request: &DecisionRequest) -> FlowshotResult<DecisionOutcome> {
        let body = self.body(request);

        tracing::debug!(
            provider = %self.id,
            model = %self.call.model,
            step = request.step,
            "sending decision request"
        );
        tracing::trace!(
            body = %serde_json::to_string(&sanitize_for_log(&body)).unwrap_or_default(),
            "request body (sanitized, base64 omitted)"
        );

        let response = self
            .client
            .post(&self.api_base)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let err_body = response.text().await.unwrap_or_default();
            let message = format!("{status}: {err_body}");
            return Err(if status.as_u16() == 429 || status.is_server_error() {
                FlowshotError::ProviderTransport(message)
            } else {
                FlowshotError::LlmProvider(message)
            });
        }

        let json: serde_json::Value = response.json().await?;
        let Some(content) = json["choices"][0]["message"]["content"].as_str() else {
            return Ok(DecisionOutcome::ParseFailure(
                "response carried no message content".into(),
            ));
        };

        tracing::info!(
            provider = %self.id,
            content_len = content.len(),
            "decision response received"
        );
        Ok(parse_decision(content))
    }
}
