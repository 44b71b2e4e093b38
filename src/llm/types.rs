use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::perception::types::{PageContext, Snapshot};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user_parts(parts: Vec<ContentPart>) -> Self {
        Self {
            role: "user".into(),
            content: MessageContent::Parts(parts),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Per-call model parameters resolved from `[decision.providers.<id>]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallConfig {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

/// A prior cycle as shown to the decision provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorAction {
    pub index: u32,
    pub action: String,
    pub outcome: String,
    pub rationale: String,
}

/// Everything the provider sees for one cycle.
#[derive(Debug, Clone)]
pub struct DecisionRequest {
    pub task: String,
    pub app: String,
    pub step: u32,
    pub steps_remaining: u32,
    pub page: PageContext,
    /// Latest observation; `None` when the driver could not take one.
    pub observation: Option<Arc<Snapshot>>,
    pub history: Vec<PriorAction>,
    pub locator_hints: Vec<String>,
    pub goal_hint: Option<String>,
    /// Set on the cycle after a loop-breaker veto.
    pub notice: Option<String>,
}
