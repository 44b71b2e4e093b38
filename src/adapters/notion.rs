use std::collections::HashMap;

use async_trait::async_trait;

use crate::adapters::{form_login, selector_lines, AppAdapter, AuthOutcome, Credentials, LoginForm};
use crate::config::AppProfile;
use crate::errors::FlowshotResult;
use crate::executor::driver::BrowserDriver;

const DEFAULT_LOGIN: &str = "https://www.notion.so/login";

pub struct NotionAdapter {
    name: String,
    workspace: String,
    login_url: String,
    selectors: HashMap<String, String>,
}

impl NotionAdapter {
    pub fn new(name: &str, profile: &AppProfile) -> Self {
        Self {
            name: name.to_string(),
            workspace: profile.workspace.clone(),
            login_url: profile
                .login_url
                .clone()
                .unwrap_or_else(|| DEFAULT_LOGIN.to_string()),
            selectors: profile.selectors.clone(),
        }
    }

    fn task_hints(task: &str) -> &'static [&'static str] {
        let q = task.to_lowercase();
        if q.contains("create") && q.contains("database") {
            &[
                "button:has-text('Database')",
                "[aria-label*='database']",
                ".notion-focusable:has-text('Table')",
            ]
        } else if q.contains("filter") && q.contains("database") {
            &[
                "button:has-text('Filter')",
                ".notion-database-view-filter-button",
                "[role='menu']",
            ]
        } else if q.contains("property") {
            &[
                "[aria-label='Add property']",
                ".notion-property-add-button",
                "button:has-text('+')",
            ]
        } else if q.contains("create") && q.contains("page") {
            &[
                "button:has-text('New page')",
                "[aria-label='New page']",
                ".notion-focusable:has-text('Add a page')",
            ]
        } else {
            &[]
        }
    }
}

#[async_trait]
impl AppAdapter for NotionAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn base_url(&self) -> String {
        if self.workspace.is_empty() {
            "https://www.notion.so".to_string()
        } else {
            format!("https://www.notion.so/{}", self.workspace)
        }
    }

    /// Notion sends a login code when no password is set; with only an email
    /// the form is submitted and the page is expected to move on by itself.
    async fn authenticate(
        &self,
        driver: &dyn BrowserDriver,
        credentials: Option<&Credentials>,
    ) -> FlowshotResult<AuthOutcome> {
        let form = LoginForm {
            login_url: &self.login_url,
            email_input: "input[type='email']",
            continue_button: Some("button:has-text('Continue with email')"),
            password_input: "input[type='password']",
            submit_button: "button:has-text('Continue')",
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
