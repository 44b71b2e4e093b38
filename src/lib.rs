pub mod adapters;
pub mod capture;
pub mod config;
pub mod errors;
pub mod executor;
pub mod goal;
pub mod host;
pub mod llm;
pub mod orchestrator;
pub mod perception;

pub use capture::{DatasetDescriptor, FsCaptureStore, MemoryCapture, StateCapture};
pub use config::{AppConfig, RunSettings, TaskSpec};
pub use errors::{FlowshotError, FlowshotResult};
pub use executor::driver::{BrowserDriver, DispatchOutcome, SessionLock};
pub use host::CaptureHost;
pub use orchestrator::state::{Action, RunStatus, TerminationReason, WorkflowRun};
pub use orchestrator::{CancelFlag, EventBus, Orchestrator, RunEvent, RunReport};
pub use perception::types::{PageContext, Snapshot};

/// Installs the fmt subscriber. `RUST_LOG` wins; otherwise `info`.
/// Safe to call more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}

/// Loads a `.env` file if present.
pub fn load_env() {
    if let Ok(path) = dotenvy::dotenv() {
        tracing::debug!(path = %path.display(), ".env loaded");
    }
}
