#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use image::{DynamicImage, Rgb, RgbImage};

use flowshot::adapters::{AppAdapter, AuthOutcome, Credentials, GenericAdapter};
use flowshot::capture::{MemoryCapture, StateCapture};
use flowshot::config::{AppProfile, DetectorConfig, LoopBreakerConfig, RunSettings, TaskSpec};
use flowshot::executor::driver::{BrowserDriver, DispatchOutcome, SessionLock};
use flowshot::llm::gateway::DecisionGateway;
use flowshot::llm::parser::parse_decision;
use flowshot::llm::provider::DecisionProvider;
use flowshot::llm::rate_limit::RateLimiter;
use flowshot::llm::retry::RetryPolicy;
use flowshot::llm::types::DecisionRequest;
use flowshot::orchestrator::state::{Action, DecisionOutcome};
use flowshot::orchestrator::{CancelFlag, Orchestrator};
use flowshot::perception::types::{PageContext, Snapshot};
use flowshot::{FlowshotError, FlowshotResult};

pub const START_URL: &str = "https://demo.test/home";

/// Synthetic screen: 17x16 cells of pseudo-random brightness, so two
/// different screens disagree on roughly half of their fingerprint bits.
pub fn screen_image(seed: u32) -> DynamicImage {
    let (cell_w, cell_h) = (20, 10);
    let img = RgbImage::from_fn(17 * cell_w, 16 * cell_h, |x, y| {
        let (col, row) = (u64::from(x / cell_w), u64::from(y / cell_h));
        let mut v = (u64::from(seed) + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ (col * 31 + row * 977);
        v ^= v >> 33;
        v = v.wrapping_mul(0xff51_afd7_ed55_8ccd);
        v ^= v >> 33;
        let level = (v & 0xff) as u8;
        Rgb([level, level, level])
    });
    DynamicImage::ImageRgb8(img)
}

#[derive(Debug, Clone)]
pub struct Screen {
    pub seed: u32,
    pub url: String,
    pub title: String,
    pub text: String,
}

impl Screen {
    pub fn new(seed: u32, url: &str, text: &str) -> Self {
        Self {
            seed,
            url: url.to_string(),
            title: format!("Screen {seed}"),
            text: text.to_string(),
        }
    }
}

/// In-process browser whose screens change only through scripted transitions.
pub struct ScriptedDriver {
    current: Mutex<Screen>,
    transitions: HashMap<String, Screen>,
    missing: HashSet<String>,
    fatal: HashSet<String>,
    pub dispatched: Mutex<Vec<Action>>,
}

impl ScriptedDriver {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(Screen::new(0, "about:blank", "")),
            transitions: HashMap::new(),
            missing: HashSet::new(),
            fatal: HashSet::new(),
            dispatched: Mutex::new(Vec::new()),
        }
    }

    /// Navigating to `url` or acting on a locator equal to `key` shows `screen`.
    pub fn on(mut self, key: &str, screen: Screen) -> Self {
        self.transitions.insert(key.to_string(), screen);
        self
    }

    pub fn missing(mut self, locator: &str) -> Self {
        self.missing.insert(locator.to_string());
        self
    }

    pub fn fatal_on(mut self, locator: &str) -> Self {
        self.fatal.insert(locator.to_string());
        self
    }

    pub fn dispatched(&self) -> Vec<Action> {
        self.dispatched.lock().unwrap().clone()
    }
}

#[async_trait]
impl BrowserDriver for ScriptedDriver {
    async fn navigate(&self, url: &str) -> FlowshotResult<()> {
        let screen = self
            .transitions
            .get(url)
            .cloned()
            .unwrap_or_else(|| Screen::new(0, url, "Welcome"));
        *self.current.lock().unwrap() = screen;
        Ok(())
    }

    async fn dispatch(&self, action: &Action) -> FlowshotResult<DispatchOutcome> {
        self.dispatched.lock().unwrap().push(action.clone());
        let locator = action.locator().unwrap_or_default().to_string();
        if self.fatal.contains(&locator) {
            return Err(FlowshotError::DriverFatal("browser session lost".into()));
        }
        if self.missing.contains(&locator) {
            return Ok(DispatchOutcome::Failed {
                reason: format!("{locator} not found"),
            });
        }
        if let Some(screen) = self.transitions.get(&locator) {
            *self.current.lock().unwrap() = screen.clone();
        }
        Ok(DispatchOutcome::Performed)
    }

    async fn observe(&self) -> FlowshotResult<Snapshot> {
        let seed = self.current.lock().unwrap().seed;
        Snapshot::from_image(screen_image(seed))
    }

    async fn page_context(&self) -> FlowshotResult<PageContext> {
        let screen = self.current.lock().unwrap();
        Ok(PageContext {
            url: screen.url.clone(),
            title: screen.title.clone(),
        })
    }

    async fn visible_text(&self) -> FlowshotResult<String> {
        Ok(self.current.lock().unwrap().text.clone())
    }
}

/// Replays raw model replies through the real response parser. The last
/// reply repeats once the script runs out.
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<String>>,
    last: Mutex<String>,
    cancel_on_call: Option<(usize, CancelFlag)>,
    pub requests: Mutex<Vec<DecisionRequest>>,
}

impl ScriptedProvider {
    pub fn new(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            last: Mutex::new(r#"{"action_type":"done"}"#.to_string()),
            cancel_on_call: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Raises `flag` while answering call number `call` (1-based).
    pub fn cancel_on(mut self, call: usize, flag: CancelFlag) -> Self {
        self.cancel_on_call = Some((call, flag));
        self
    }

    pub fn requests(&self) -> Vec<DecisionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl DecisionProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn decide(&self, request: &DecisionRequest) -> FlowshotResult<DecisionOutcome> {
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            requests.len()
        };
        if let Some((at, flag)) = &self.cancel_on_call {
            if *at == call {
                flag.cancel();
            }
        }
        let reply = match self.replies.lock().unwrap().pop_front() {
            Some(reply) => {
                *self.last.lock().unwrap() = reply.clone();
                reply
            }
            None => self.last.lock().unwrap().clone(),
        };
        Ok(parse_decision(&reply))
    }
}

pub fn click(locator: &str) -> String {
    format!(r#"{{"action_type":"click","selector":"{locator}","reasoning":"try {locator}"}}"#)
}

pub const DONE: &str = r#"{"action_type":"done","reasoning":"task complete"}"#;

/// Demo task whose goal is the given keywords; none means "derive from the query".
pub fn task(query: &str, keywords: &[&str]) -> TaskSpec {
    TaskSpec::new("t1", "demo", query)
        .with_success_keywords(keywords.iter().copied())
}

pub fn settings(task: TaskSpec) -> RunSettings {
    RunSettings {
        app: task.app.to_lowercase(),
        step_budget: task.step_budget.unwrap_or(10),
        task,
        time_budget: Duration::from_secs(30),
        settle_delay: Duration::ZERO,
        adaptive_settle: false,
        settle_max: Duration::from_millis(50),
        max_wait: Duration::from_millis(5),
        driver_timeout: Duration::from_secs(5),
        detector: DetectorConfig::default(),
        loop_breaker: LoopBreakerConfig::default(),
    }
}

pub fn gateway(provider: Arc<ScriptedProvider>) -> DecisionGateway {
    DecisionGateway::new(
        provider,
        Arc::new(RateLimiter::unlimited()),
        Duration::from_secs(5),
        RetryPolicy::default(),
    )
}

pub fn adapter() -> Arc<dyn AppAdapter> {
    let profile = AppProfile {
        base_url: START_URL.into(),
        ..AppProfile::default()
    };
    Arc::new(GenericAdapter::new("demo", &profile))
}

pub struct Harness {
    pub driver: Arc<ScriptedDriver>,
    pub provider: Arc<ScriptedProvider>,
    pub capture: Arc<MemoryCapture>,
    pub session: SessionLock,
    pub orchestrator: Orchestrator,
}

pub fn harness(
    settings: RunSettings,
    driver: ScriptedDriver,
    provider: ScriptedProvider,
) -> Harness {
    let driver = Arc::new(driver);
    let provider = Arc::new(provider);
    let capture = Arc::new(MemoryCapture::new());
    let session = SessionLock::new();
    let orchestrator = Orchestrator::new(
        settings,
        driver.clone(),
        session.clone(),
        gateway(provider.clone()),
        capture.clone() as Arc<dyn StateCapture>,
        adapter(),
    );
    Harness {
        driver,
        provider,
        capture,
        session,
        orchestrator,
    }
}

/// Adapter whose login always fails, for the authentication branch.
pub struct LockedOutAdapter;

#[async_trait]
impl AppAdapter for LockedOutAdapter {
    fn name(&self) -> &str {
        "locked"
    }

    fn base_url(&self) -> String {
        START_URL.to_string()
    }

    async fn authenticate(
        &self,
        _driver: &dyn BrowserDriver,
        _credentials: Option<&Credentials>,
    ) -> FlowshotResult<AuthOutcome> {
        Err(FlowshotError::Authentication("bad password".into()))
    }

    fn locator_hints(&self, _task: &str) -> Vec<String> {
        Vec::new()
    }
}

/// Browser that accepts the connection and then never answers a navigation.
pub struct HangingDriver;

#[async_trait]
impl BrowserDriver for HangingDriver {
    async fn navigate(&self, _url: &str) -> FlowshotResult<()> {
        std::future::pending().await
    }

    async fn dispatch(&self, _action: &Action) -> FlowshotResult<DispatchOutcome> {
        Ok(DispatchOutcome::Performed)
    }

    async fn observe(&self) -> FlowshotResult<Snapshot> {
        Snapshot::from_image(screen_image(0))
    }

    async fn page_context(&self) -> FlowshotResult<PageContext> {
        Ok(PageContext::default())
    }
}
