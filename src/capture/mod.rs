//! State-capture collaborator: where captured states end up.
//!
//! The orchestrator calls `start_run` once at INIT, `persist` for every
//! captured state, and `finalize` exactly once when the run is terminal.

pub mod fs_store;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::FlowshotResult;
use crate::orchestrator::state::{Action, RunStatus, WorkflowRun};
use crate::perception::types::Snapshot;

pub use fs_store::FsCaptureStore;
pub use memory::MemoryCapture;

/// Identifies a run inside a capture store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunHandle {
    pub run_id: String,
    pub app: String,
    pub task_id: String,
    /// Store-specific location (directory, bucket prefix, ...).
    pub location: Option<String>,
}

/// Run-level facts written alongside the captures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: String,
    pub task: String,
    pub start_url: String,
    pub started_at: DateTime<Utc>,
}

impl RunMetadata {
    pub fn of(run: &WorkflowRun) -> Self {
        Self {
            run_id: run.id.clone(),
            task: run.task.clone(),
            start_url: run.start_url.clone(),
            started_at: run.started_at,
        }
    }
}

/// One state handed to `persist`: the baseline (step 0) or a captured step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedStep {
    pub step: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
    pub rationale: String,
    pub url: String,
    pub title: String,
    pub score: f64,
    pub forced: bool,
    pub timestamp: DateTime<Utc>,
}

impl CapturedStep {
    /// `baseline` for step 0, otherwise the action type.
    pub fn label(&self) -> &'static str {
        match &self.action {
            Some(action) => action.kind().as_str(),
            None => "baseline",
        }
    }
}

/// What a finalized run left behind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetDescriptor {
    pub run_id: String,
    pub status: RunStatus,
    pub reason: Option<String>,
    pub location: Option<String>,
    pub captures: usize,
    pub steps: usize,
    pub duration_secs: f64,
}

impl DatasetDescriptor {
    pub fn for_run(run: &WorkflowRun, location: Option<String>) -> Self {
        let end = run.finished_at.unwrap_or_else(Utc::now);
        Self {
            run_id: run.id.clone(),
            status: run.status,
            reason: run.termination.as_ref().map(|r| r.code().to_string()),
            location,
            captures: run.captures.len(),
            steps: run.steps.len(),
            duration_secs: (end - run.started_at).num_milliseconds() as f64 / 1000.0,
        }
    }
}

#[async_trait]
pub trait StateCapture: Send + Sync {
    async fn start_run(
        &self,
        app: &str,
        task_id: &str,
        metadata: &RunMetadata,
    ) -> FlowshotResult<RunHandle>;

    /// Stores one state. `snapshot` is `None` when the driver could not
    /// observe the page; the record is still kept. Returns where it went.
    async fn persist(
        &self,
        handle: &RunHandle,
        step: &CapturedStep,
        snapshot: Option<&Snapshot>,
    ) -> FlowshotResult<Option<String>>;

    async fn finalize(
        &self,
        handle: &RunHandle,
        run: &WorkflowRun,
    ) -> FlowshotResult<DatasetDescriptor>;
}
