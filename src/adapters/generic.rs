use std::collections::HashMap;

use async_trait::async_trait;

use crate::adapters::{selector_lines, AppAdapter, AuthOutcome, Credentials};
use crate::config::AppProfile;
use crate::errors::FlowshotResult;
use crate::executor::driver::BrowserDriver;

/// Config-driven adapter for public apps with no login.
pub struct GenericAdapter {
    name: String,
    base_url: String,
    selectors: HashMap<String, String>,
}

impl GenericAdapter {
    pub fn new(name: &str, profile: &AppProfile) -> Self {
        Self {
            name: name.to_string(),
            base_url: profile.base_url.clone(),
            selectors: profile.selectors.clone(),
        }
    }
}

#[async_trait]
impl AppAdapter for GenericAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn base_url(&self) -> String {
        self.base_url.clone()
    }

    async fn authenticate(
        &self,
        _driver: &dyn BrowserDriver,
        _credentials: Option<&Credentials>,
    ) -> FlowshotResult<AuthOutcome> {
        Ok(AuthOutcome::Skipped)
    }

    fn locator_hints(&self, _task: &str) -> Vec<String> {
        selector_lines(&self.selectors)
    }
}
