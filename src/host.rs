use std::sync::Arc;

use crate::adapters::AdapterRegistry;
use crate::capture::StateCapture;
use crate::config::{self, AppConfig, RunSettings, TaskSpec};
use crate::errors::{FlowshotError, FlowshotResult};
use crate::executor::driver::{BrowserDriver, SessionLock};
use crate::llm::gateway::DecisionGateway;
use crate::llm::rate_limit::RateLimiter;
use crate::llm::registry::ProviderRegistry;
use crate::orchestrator::{EventBus, Orchestrator, RunReport};

/// Process-wide wiring built once from the configuration: provider and
/// adapter registries, the shared rate limiter and the event bus. Runs on
/// independent browser sessions share nothing else.
pub struct CaptureHost {
    config: AppConfig,
    providers: ProviderRegistry,
    adapters: AdapterRegistry,
    limiter: Arc<RateLimiter>,
    events: EventBus,
}

impl CaptureHost {
    pub fn new(config: AppConfig) -> FlowshotResult<Self> {
        config.validate()?;
        let providers = ProviderRegistry::from_config(&config.decision);
        let adapters = AdapterRegistry::from_config(&config);
        let limiter = Arc::new(RateLimiter::new(
            config.decision.requests_per_minute,
            config.decision.burst,
        ));
        tracing::info!(
            providers = ?providers.list_names(),
            apps = config.apps.len(),
            rpm = config.decision.requests_per_minute,
            "capture host ready"
        );
        Ok(Self {
            config,
            providers,
            adapters,
            limiter,
            events: EventBus::default(),
        })
    }

    /// Loads `.env`, then the config file, then builds the host.
    pub fn from_env() -> FlowshotResult<Self> {
        crate::load_env();
        Self::new(config::load_config()?)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn providers_mut(&mut self) -> &mut ProviderRegistry {
        &mut self.providers
    }

    pub fn adapters_mut(&mut self) -> &mut AdapterRegistry {
        &mut self.adapters
    }

    pub fn rate_limiter(&self) -> Arc<RateLimiter> {
        self.limiter.clone()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Builds an orchestrator for `task` on one browser session.
    pub fn orchestrator(
        &self,
        task: &TaskSpec,
        driver: Arc<dyn BrowserDriver>,
        session: SessionLock,
        capture: Arc<dyn StateCapture>,
    ) -> FlowshotResult<Orchestrator> {
        let adapter = self.adapters.resolve(&task.app)?;
        let provider = self.providers.get_active()?;
        let gateway =
            DecisionGateway::from_config(provider, self.limiter.clone(), &self.config.decision);
        let settings = RunSettings::resolve(&self.config, task);

        Ok(
            Orchestrator::new(settings, driver, session, gateway, capture, adapter)
                .with_credentials(self.adapters.credentials(&task.app).cloned())
                .with_events(self.events.clone()),
        )
    }

    /// Runs a task from the `[[tasks]]` catalogue.
    pub async fn run_task(
        &self,
        task_id: &str,
        driver: Arc<dyn BrowserDriver>,
        session: SessionLock,
        capture: Arc<dyn StateCapture>,
    ) -> FlowshotResult<RunReport> {
        let task = self
            .config
            .task(task_id)
            .cloned()
            .ok_or_else(|| FlowshotError::Config(format!("unknown task '{task_id}'")))?;
        self.orchestrator(&task, driver, session, capture)?
            .run()
            .await
    }
}
