use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::{FlowshotError, FlowshotResult};
use crate::orchestrator::state::Action;
use crate::perception::types::{PageContext, Snapshot};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Performed,
    /// The page is still usable but the action did not land.
    Failed { reason: String },
}

/// Browser capabilities the loop consumes. Implementations wrap a single
/// browser session; every call reports success or failure explicitly.
///
/// Return [`FlowshotError::DriverFatal`] for a lost session or a crashed
/// navigation, [`FlowshotError::Driver`] for anything the run can survive.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn navigate(&self, url: &str) -> FlowshotResult<()>;

    /// Performs an interaction. `navigate`, `wait` and `done` never reach this.
    async fn dispatch(&self, action: &Action) -> FlowshotResult<DispatchOutcome>;

    async fn observe(&self) -> FlowshotResult<Snapshot>;

    async fn page_context(&self) -> FlowshotResult<PageContext>;

    /// Visible text content of the page, used for goal checks.
    async fn visible_text(&self) -> FlowshotResult<String> {
        Ok(String::new())
    }
}

/// Ensures one browser session serves at most one run at a time.
#[derive(Debug, Clone, Default)]
pub struct SessionLock {
    busy: Arc<AtomicBool>,
}

impl SessionLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self) -> FlowshotResult<SessionLease> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(FlowshotError::SessionBusy);
        }
        Ok(SessionLease {
            busy: self.busy.clone(),
        })
    }

    pub fn is_held(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Released on drop.
#[derive(Debug)]
pub struct SessionLease {
    busy: Arc<AtomicBool>,
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}
