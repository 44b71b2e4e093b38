use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{DecisionConfig, ProviderKind};
use crate::errors::{FlowshotError, FlowshotResult};
use crate::llm::provider::DecisionProvider;
use crate::llm::providers::anthropic::AnthropicProvider;
use crate::llm::providers::openai_compatible::OpenAiCompatibleProvider;
use crate::llm::types::CallConfig;

/// Decision providers keyed by their config identifier.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn DecisionProvider>>,
    active: String,
}

impl ProviderRegistry {
    pub fn new(active: String) -> Self {
        Self {
            providers: HashMap::new(),
            active,
        }
    }

    pub fn register(&mut self, provider: Arc<dyn DecisionProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn get_active(&self) -> FlowshotResult<Arc<dyn DecisionProvider>> {
        self.providers.get(&self.active).cloned().ok_or_else(|| {
            FlowshotError::Config(format!(
                "Active provider '{}' not found in registry",
                self.active
            ))
        })
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn DecisionProvider>> {
        self.providers.get(name).cloned()
    }

    pub fn set_active(&mut self, name: String) -> FlowshotResult<()> {
        if self.providers.contains_key(&name) {
            self.active = name;
            Ok(())
        } else {
            Err(FlowshotError::Config(format!("Provider '{name}' not registered")))
        }
    }

    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    /// API keys come from `FLOWSHOT_<ID>_API_KEY`, falling back to the file.
    pub fn from_config(config: &DecisionConfig) -> Self {
        let mut registry = Self::new(config.active_provider.clone());
        for (id, entry) in &config.providers {
            let api_key = std::env::var(format!("FLOWSHOT_{}_API_KEY", id.to_uppercase()))
                .unwrap_or_else(|_| entry.api_key.clone().unwrap_or_default());
            if api_key.is_empty() {
                tracing::warn!(provider = %id, "no API key configured");
            }
            let call = CallConfig {
                model: entry.model.clone(),
                temperature: entry.temperature,
                max_tokens: entry.max_tokens,
            };
            let provider: Arc<dyn DecisionProvider> = match entry.kind {
                ProviderKind::Openai => Arc::new(OpenAiCompatibleProvider::new(
                    id.clone(),
                    entry.api_base.clone(),
                    api_key,
                    call,
                )),
                ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(
                    id.clone(),
                    entry.api_base.clone(),
                    api_key,
                    call,
                )),
            };
            tracing::debug!(provider = %id, kind = ?entry.kind, display_name = %entry.display_name, model = %entry.model, "provider registered");
            registry.register(provider);
        }
        registry
    }
}
