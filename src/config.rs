use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{FlowshotError, FlowshotResult};

const CONFIG_FILE: &str = "flowshot.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub loop_breaker: LoopBreakerConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub decision: DecisionConfig,
    /// Per-application profiles keyed by application identity.
    #[serde(default)]
    pub apps: HashMap<String, AppProfile>,
    #[serde(default)]
    pub tasks: Vec<TaskSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub step_budget: u32,
    pub time_budget_secs: u64,
    /// Fixed wait after each dispatched action before re-observing.
    pub settle_delay_ms: u64,
    /// Poll for visual stability after the fixed delay.
    pub adaptive_settle: bool,
    /// Upper bound for adaptive settling.
    pub settle_max_ms: u64,
    /// Clamp for `wait` actions proposed by the provider.
    pub max_wait_ms: u64,
    pub driver_timeout_secs: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            step_budget: 15,
            time_budget_secs: 600,
            settle_delay_ms: 1000,
            adaptive_settle: false,
            settle_max_ms: 5000,
            max_wait_ms: 5000,
            driver_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopBreakerConfig {
    /// Number of recent (action, locator) pairs remembered.
    pub window: usize,
    /// Consecutive identical proposals that trigger a veto.
    pub repeat_ceiling: usize,
    /// Stuck counter value beyond which the run fails with no progress.
    pub stuck_ceiling: u32,
}

impl Default for LoopBreakerConfig {
    fn default() -> Self {
        Self {
            window: 5,
            repeat_ceiling: 3,
            stuck_ceiling: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Difference score (0 = identical, 1 = unrelated) at which a state counts as changed.
    pub change_threshold: f64,
    /// Fingerprint distances within this band of the threshold go to the structural fallback.
    pub ambiguity_band: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            change_threshold: 0.15,
            ambiguity_band: 0.05,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionConfig {
    #[serde(default)]
    pub active_provider: String,
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
    /// Extra attempts on transient transport failures.
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Shared across every concurrent run. 0 disables limiting.
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    #[serde(default = "default_burst")]
    pub burst: u32,
    #[serde(default)]
    pub providers: HashMap<String, ProviderEntry>,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            active_provider: String::new(),
            timeout_secs: default_provider_timeout(),
            retries: default_retries(),
            requests_per_minute: default_requests_per_minute(),
            burst: default_burst(),
            providers: HashMap::new(),
        }
    }
}

fn default_provider_timeout() -> u64 {
    60
}

fn default_retries() -> u32 {
    2
}

fn default_requests_per_minute() -> u32 {
    30
}

fn default_burst() -> u32 {
    3
}

/// Wire protocol spoken by a provider endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Chat-completions with `image_url` parts.
    #[default]
    Openai,
    /// Messages API with base64 image blocks.
    Anthropic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    #[serde(default)]
    pub kind: ProviderKind,
    pub display_name: String,
    pub api_base: String,
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Optional API key stored in the file (falls back to env var FLOWSHOT_<ID>_API_KEY).
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_temperature() -> f64 {
    0.1
}

fn default_max_tokens() -> u32 {
    1000
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppProfile {
    pub base_url: String,
    #[serde(default)]
    pub login_url: Option<String>,
    #[serde(default)]
    pub workspace: String,
    #[serde(default)]
    pub team: String,
    /// Overrides `[detector].change_threshold` for this application.
    #[serde(default)]
    pub change_threshold: Option<f64>,
    #[serde(default)]
    pub ambiguity_band: Option<f64>,
    /// Named locator hints handed to the decision provider.
    #[serde(default)]
    pub selectors: HashMap<String, String>,
    /// Adapter implementation; defaults to the profile key.
    #[serde(default)]
    pub adapter: Option<String>,
}

/// One task to explore, either from `[[tasks]]` or built by the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: String,
    pub app: String,
    pub query: String,
    #[serde(default)]
    pub start_url: Option<String>,
    #[serde(default)]
    pub step_budget: Option<u32>,
    /// Replaces the keywords the goal monitor would derive from `query`.
    #[serde(default)]
    pub success_keywords: Vec<String>,
}

impl TaskSpec {
    pub fn new(id: impl Into<String>, app: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            app: app.into(),
            query: query.into(),
            start_url: None,
            step_budget: None,
            success_keywords: Vec::new(),
        }
    }

    pub fn with_start_url(mut self, url: impl Into<String>) -> Self {
        self.start_url = Some(url.into());
        self
    }

    pub fn with_step_budget(mut self, budget: u32) -> Self {
        self.step_budget = Some(budget);
        self
    }

    pub fn with_success_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.success_keywords = keywords.into_iter().map(Into::into).collect();
        self
    }
}

impl AppConfig {
    pub fn from_toml_str(content: &str) -> FlowshotResult<Self> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> FlowshotResult<()> {
        validate_detector("detector", &self.detector)?;
        for (name, profile) in &self.apps {
            let merged = DetectorConfig {
                change_threshold: profile
                    .change_threshold
                    .unwrap_or(self.detector.change_threshold),
                ambiguity_band: profile.ambiguity_band.unwrap_or(self.detector.ambiguity_band),
            };
            validate_detector(&format!("apps.{name}"), &merged)?;
        }

        let lb = &self.loop_breaker;
        if lb.repeat_ceiling < 2 {
            return Err(FlowshotError::Config(
                "loop_breaker.repeat_ceiling must be at least 2".into(),
            ));
        }
        if lb.window < lb.repeat_ceiling {
            return Err(FlowshotError::Config(format!(
                "loop_breaker.window ({}) must be >= repeat_ceiling ({})",
                lb.window, lb.repeat_ceiling
            )));
        }
        if self.run.step_budget == 0 {
            return Err(FlowshotError::Config("run.step_budget must be at least 1".into()));
        }
        if self.run.time_budget_secs == 0 {
            return Err(FlowshotError::Config("run.time_budget_secs must be positive".into()));
        }
        for task in &self.tasks {
            if task.step_budget == Some(0) {
                return Err(FlowshotError::Config(format!(
                    "task '{}' has a zero step budget",
                    task.id
                )));
            }
        }
        Ok(())
    }

    /// Profile lookup ignores case on both sides; `[apps.SauceDemo]` and
    /// `app = "saucedemo"` name the same application.
    pub fn app(&self, name: &str) -> Option<&AppProfile> {
        let wanted = name.to_lowercase();
        self.apps.get(&wanted).or_else(|| {
            self.apps
                .iter()
                .find(|(key, _)| key.to_lowercase() == wanted)
                .map(|(_, profile)| profile)
        })
    }

    pub fn task(&self, id: &str) -> Option<&TaskSpec> {
        self.tasks.iter().find(|t| t.id == id)
    }
}

fn validate_detector(section: &str, detector: &DetectorConfig) -> FlowshotResult<()> {
    if !(detector.change_threshold > 0.0 && detector.change_threshold <= 1.0) {
        return Err(FlowshotError::Config(format!(
            "{section}: change_threshold must be in (0, 1], got {}",
            detector.change_threshold
        )));
    }
    if !(0.0..0.5).contains(&detector.ambiguity_band) {
        return Err(FlowshotError::Config(format!(
            "{section}: ambiguity_band must be in [0, 0.5), got {}",
            detector.ambiguity_band
        )));
    }
    Ok(())
}

/// Everything one run needs, resolved once from the config, the app profile and the task.
/// The task travels with its settings so a run cannot pair one task with
/// another task's budgets or app profile.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub task: TaskSpec,
    pub app: String,
    pub step_budget: u32,
    pub time_budget: Duration,
    pub settle_delay: Duration,
    pub adaptive_settle: bool,
    pub settle_max: Duration,
    pub max_wait: Duration,
    pub driver_timeout: Duration,
    pub detector: DetectorConfig,
    pub loop_breaker: LoopBreakerConfig,
}

impl RunSettings {
    pub fn resolve(config: &AppConfig, task: &TaskSpec) -> Self {
        let profile = config.app(&task.app);
        let detector = DetectorConfig {
            change_threshold: profile
                .and_then(|p| p.change_threshold)
                .unwrap_or(config.detector.change_threshold),
            ambiguity_band: profile
                .and_then(|p| p.ambiguity_band)
                .unwrap_or(config.detector.ambiguity_band),
        };
        let run = &config.run;
        Self {
            task: task.clone(),
            app: task.app.to_lowercase(),
            step_budget: task.step_budget.unwrap_or(run.step_budget),
            time_budget: Duration::from_secs(run.time_budget_secs),
            settle_delay: Duration::from_millis(run.settle_delay_ms),
            adaptive_settle: run.adaptive_settle,
            settle_max: Duration::from_millis(run.settle_max_ms),
            max_wait: Duration::from_millis(run.max_wait_ms),
            driver_timeout: Duration::from_secs(run.driver_timeout_secs),
            detector,
            loop_breaker: config.loop_breaker.clone(),
        }
    }
}

fn resolve_config_path() -> FlowshotResult<PathBuf> {
    if let Ok(explicit) = std::env::var("FLOWSHOT_CONFIG") {
        let candidate = PathBuf::from(explicit);
        if candidate.exists() {
            tracing::debug!(path = %candidate.display(), "config taken from FLOWSHOT_CONFIG");
            return Ok(candidate);
        }
        return Err(FlowshotError::Config(format!(
            "FLOWSHOT_CONFIG points to missing file {}",
            candidate.display()
        )));
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join(CONFIG_FILE);
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Ok(candidate);
            }
        }
    }

    let cwd = std::env::current_dir()?;
    let candidate = cwd.join(CONFIG_FILE);
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Ok(candidate);
    }

    Err(FlowshotError::Config(format!(
        "{CONFIG_FILE} not found next to executable or in working directory"
    )))
}

pub fn load_config() -> FlowshotResult<AppConfig> {
    let path = resolve_config_path()?;
    load_config_from(&path)
}

pub fn load_config_from(path: &Path) -> FlowshotResult<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config = AppConfig::from_toml_str(&content)?;
    tracing::info!(
        path = %path.display(),
        apps = config.apps.len(),
        tasks = config.tasks.len(),
        provider = %config.decision.active_provider,
        "config loaded"
    );
    Ok(config)
}
