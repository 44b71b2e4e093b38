//! Per-application knowledge: where the app lives, how to log in, and which
//! selectors are worth pointing the decision provider at. The loop reads
//! adapters once at INIT and never branches on the application itself.

pub mod generic;
pub mod linear;
pub mod notion;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::AppConfig;
use crate::errors::{FlowshotError, FlowshotResult};
use crate::executor::driver::{BrowserDriver, DispatchOutcome};
use crate::orchestrator::state::Action;

pub use generic::GenericAdapter;
pub use linear::LinearAdapter;
pub use notion::NotionAdapter;

#[derive(Clone)]
pub struct Credentials {
    pub email: String,
    pub password: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Credentials {
    /// Reads `FLOWSHOT_<APP>_EMAIL` and `FLOWSHOT_<APP>_PASSWORD`.
    pub fn from_env(app: &str) -> Option<Self> {
        let prefix = format!("FLOWSHOT_{}", app.to_uppercase().replace('-', "_"));
        let email = std::env::var(format!("{prefix}_EMAIL")).ok()?;
        if email.trim().is_empty() {
            return None;
        }
        Some(Self {
            email,
            password: std::env::var(format!("{prefix}_PASSWORD")).ok(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    /// The app needs no login, or no credentials were supplied.
    Skipped,
    AlreadyAuthenticated,
    LoggedIn,
}

#[async_trait]
pub trait AppAdapter: Send + Sync {
    fn name(&self) -> &str;

    fn base_url(&self) -> String;

    /// Leaves the browser logged in, or explains why it could not.
    async fn authenticate(
        &self,
        driver: &dyn BrowserDriver,
        credentials: Option<&Credentials>,
    ) -> FlowshotResult<AuthOutcome>;

    /// `name: selector` lines passed through to the decision provider.
    fn locator_hints(&self, task: &str) -> Vec<String>;
}

/// Selectors for an email-first login form.
pub(crate) struct LoginForm<'a> {
    pub login_url: &'a str,
    pub email_input: &'a str,
    pub continue_button: Option<&'a str>,
    pub password_input: &'a str,
    pub submit_button: &'a str,
}

pub(crate) async fn form_login(
    app: &str,
    driver: &dyn BrowserDriver,
    form: &LoginForm<'_>,
    credentials: Option<&Credentials>,
) -> FlowshotResult<AuthOutcome> {
    driver.navigate(form.login_url).await?;
    let page = driver.page_context().await?;
    if !page.url.contains("/login") {
        tracing::info!(app, url = %page.url, "already authenticated");
        return Ok(AuthOutcome::AlreadyAuthenticated);
    }

    let Some(credentials) = credentials else {
        tracing::warn!(app, "no credentials provided, manual login may be required");
        return Ok(AuthOutcome::Skipped);
    };

    let mut actions = vec![Action::Type {
        locator: form.email_input.to_string(),
        text: credentials.email.clone(),
    }];
    if let Some(button) = form.continue_button {
        actions.push(Action::Click {
            locator: button.to_string(),
        });
    }
    if let Some(password) = &credentials.password {
        actions.push(Action::Type {
            locator: form.password_input.to_string(),
            text: password.clone(),
        });
        actions.push(Action::Click {
            locator: form.submit_button.to_string(),
        });
    }

    for action in &actions {
        // Describe by kind only: the payload may be a password.
        if let DispatchOutcome::Failed { reason } = driver.dispatch(action).await? {
            return Err(FlowshotError::Authentication(format!(
                "{app}: {} {} failed: {reason}",
                action.kind(),
                action.locator().unwrap_or("-")
            )));
        }
    }

    let page = driver.page_context().await?;
    if page.url.contains("/login") {
        return Err(FlowshotError::Authentication(format!(
            "{app}: still on the login page after submitting credentials"
        )));
    }
    tracing::info!(app, "authentication successful");
    Ok(AuthOutcome::LoggedIn)
}

/// Static adapter implementations keyed by application identity.
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn AppAdapter>>,
    credentials: HashMap<String, Credentials>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
            credentials: HashMap::new(),
        }
    }

    /// One adapter per `[apps.<name>]`; credentials are read from the
    /// environment here and nowhere else.
    pub fn from_config(config: &AppConfig) -> Self {
        let mut registry = Self::new();
        for (name, profile) in &config.apps {
            let kind = profile.adapter.as_deref().unwrap_or(name).to_lowercase();
            let adapter: Arc<dyn AppAdapter> = match kind.as_str() {
                "linear" => Arc::new(LinearAdapter::new(name, profile)),
                "notion" => Arc::new(NotionAdapter::new(name, profile)),
                _ => Arc::new(GenericAdapter::new(name, profile)),
            };
            tracing::debug!(app = %name, adapter = %kind, "adapter registered");
            registry.register(name, adapter);
            if let Some(creds) = Credentials::from_env(name) {
                registry.credentials.insert(name.to_lowercase(), creds);
            }
        }
        registry
    }

    pub fn register(&mut self, app: &str, adapter: Arc<dyn AppAdapter>) {
        self.adapters.insert(app.to_lowercase(), adapter);
    }

    pub fn set_credentials(&mut self, app: &str, credentials: Credentials) {
        self.credentials.insert(app.to_lowercase(), credentials);
    }

    pub fn resolve(&self, app: &str) -> FlowshotResult<Arc<dyn AppAdapter>> {
        self.adapters
            .get(&app.to_lowercase())
            .cloned()
            .ok_or_else(|| FlowshotError::Config(format!("no adapter configured for app '{app}'")))
    }

    pub fn credentials(&self, app: &str) -> Option<&Credentials> {
        self.credentials.get(&app.to_lowercase())
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Profile selectors as sorted `name: selector` lines.
pub(crate) fn selector_lines(selectors: &HashMap<String, String>) -> Vec<String> {
    let mut lines: Vec<String> = selectors
        .iter()
        .map(|(name, selector)| format!("{name}: {selector}"))
        .collect();
    lines.sort();
    lines
}
