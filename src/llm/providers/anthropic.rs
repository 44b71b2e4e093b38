use async_trait::async_trait;

use crate::errors::{FlowshotError, FlowshotResult};
use crate::llm::parser::parse_decision;
use crate::llm::prompt::{
    encode_png, sanitize_for_log, system_prompt, user_context, MISSING_SCREENSHOT,
};
use crate::llm::provider::DecisionProvider;
use crate::llm::types::{CallConfig, DecisionRequest};
use crate::orchestrator::state::DecisionOutcome;

const API_VERSION: &str = "2023-06-01";

/// Anthropic Messages API with a base64 screenshot block.
pub struct AnthropicProvider {
    id: String,
    api_base: String,
    api_key: String,
    call: CallConfig,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(id: String, api_base: String, api_key: String, call: CallConfig) -> Self {
        Self {
            id,
            api_base,
            api_key,
            call,
            client: reqwest::Client::new(),
        }
    }

    /// Accepts either the full `/messages` URL or the API root.
    fn endpoint(&self) -> String {
        let base = self.api_base.trim_end_matches('/');
        if base.ends_with("/messages") {
            base.to_string()
        } else {
            format!("{base}/messages")
        }
    }

    fn body(&self, request: &DecisionRequest) -> serde_json::Value {
        let mut content = Vec::new();
        match &request.observation {
            Some(snapshot) => content.push(serde_json::json!({
                "type": "image",
                "source": {
                    "type": "base64",
                    "media_type": "image/png",
                    "data": encode_png(snapshot.png()),
                },
            })),
            None => content.push(serde_json::json!({
                "type": "text",
                "text": MISSING_SCREENSHOT,
            })),
        }
        content.push(serde_json::json!({ "type": "text", "text": user_context(request) }));

        serde_json::json!({
            "model": self.call.model,
            "system": system_prompt(),
            "messages": [{ "role": "user", "content": content }],
            "temperature": self.call.temperature,
            "max_tokens": self.call.max_tokens,
        })
    }
}

/// Joins the text blocks of a Messages API response.
fn response_text(json: &serde_json::Value) -> Option<String> {
    let text = json["content"]
        .as_array()?
        .iter()
        .filter(|block| block["type"] == "text")
        .filter_map(|block| block["text"].as_str())
        .collect::<Vec<_>>()
        .join("\n");
    (!text.is_empty()).then_some(text)
}

#[async_trait]
impl DecisionProvider for AnthropicProvider {
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
            .post(self.endpoint())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let err_body = response.text().await.unwrap_or_default();
            let message = format!("{status}: {err_body}");
            // Covers 529 "overloaded".
            return Err(if status.as_u16() == 429 || status.is_server_error() {
                FlowshotError::ProviderTransport(message)
            } else {
                FlowshotError::LlmProvider(message)
            });
        }

        let json: serde_json::Value = response.json().await?;
        let Some(content) = response_text(&json) else {
            return Ok(DecisionOutcome::ParseFailure(
                "response carried no text content".into(),
            ));
        };

        tracing::info!(
            provider = %self.id,
            content_len = content.len(),
            "decision response received"
        );
        Ok(parse_decision(&content))
    }
}
