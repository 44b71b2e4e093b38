use std::collections::HashMap;

use async_trait::async_trait;

use crate::adapters::{form_login, selector_lines, AppAdapter, AuthOutcome, Credentials, LoginForm};
use crate::config::AppProfile;
use crate::errors::FlowshotResult;
use crate::executor::driver::BrowserDriver;

const DEFAULT_LOGIN: &str = "https://linear.app/login";

const COMMON: &[(&str, &str)] = &[
    ("create_project_button", "button:has-text('New project')"),
    ("create_issue_button", "button:has-text('New issue')"),
    ("filter_button", "button:has-text('Filter')"),
    ("search_input", "input[placeholder*='Search']"),
    ("modal", "[role='dialog']"),
    ("dropdown", "[role='menu']"),
];

pub struct LinearAdapter {
    name: String,
    workspace: String,
    team: String,
    login_url: String,
    selectors: HashMap<String, String>,
}

impl LinearAdapter {
    pub fn new(name: &str, profile: &AppProfile) -> Self {
        let mut selectors: HashMap<String, String> = COMMON
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        selectors.extend(profile.selectors.clone());
        Self {
            name: name.to_string(),
            workspace: profile.workspace.clone(),
            team: profile.team.clone(),
            login_url: profile
                .login_url
                .clone()
                .unwrap_or_else(|| DEFAULT_LOGIN.to_string()),
            selectors,
        }
    }

    fn task_hints(task: &str) -> &'static [&'static str] {
        let q = task.to_lowercase();
        if q.contains("create") && q.contains("project") {
            &[
                "button:has-text('New project')",
                "[aria-label='Create project']",
                "[role='dialog']",
            ]
        } else if q.contains("create") && q.contains("issue") {
            &[
                "button:has-text('New issue')",
                "[aria-label='Create issue']",
                "input[placeholder*='Issue title']",
                "textarea[placeholder*='Add description']",
            ]
        } else if q.contains("filter") {
            &[
                "button:has-text('Filter')",
                "[aria-label='Filter']",
                "[role='menu']",
                "[role='listbox']",
            ]
        } else if q.contains("status") {
            &[
                "[data-status]",
                "button:has-text('Todo')",
                "button:has-text('In Progress')",
                "button:has-text('Done')",
            ]
        } else {
            &[]
        }
    }
}

#[async_trait]
impl AppAdapter for LinearAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn base_url(&self) -> String {
        if !self.workspace.is_empty() && !self.team.is_empty() {
            format!("https://linear.app/{}/team/{}/active", self.workspace, self.team)
        } else {
            "https://linear.app".to_string()
        }
    }

    async fn authenticate(
        &self,
        driver: &dyn BrowserDriver,
        credentials: Option<&Credentials>,
    ) -> FlowshotResult<AuthOutcome> {
        let form = LoginForm {
            login_url: &self.login_url,
            email_input: "input[type='email']",
            continue_button: Some("button:has-text('Continue')"),
            password_input: "input[type='password']",
            submit_button: "button[type='submit']",
        };
        form_login(&self.name, driver, &form, credentials).await
    }

    fn locator_hints(&self, task: &str) -> Vec<String> {
        let mut hints: Vec<String> = Self::task_hints(task)
            .iter()
            .map(|s| format!("likely: {s}"))
            .collect();
        hints.extend(selector_lines(&self.selectors));
        hints
    }
}
