use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::capture::DatasetDescriptor;
use crate::orchestrator::state::{RunStatus, Step};

/// Live capture stream for hosts following a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        run_id: String,
        app: String,
        task: String,
        start_url: String,
    },
    StateCaptured {
        run_id: String,
        step: u32,
        score: f64,
        forced: bool,
        location: Option<String>,
    },
    StepRecorded {
        run_id: String,
        step: Step,
    },
    RunFinished {
        run_id: String,
        status: RunStatus,
        reason: String,
        dataset: Option<DatasetDescriptor>,
    },
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RunEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.tx.subscribe()
    }

    /// Fire and forget: a run never waits on, or fails because of, listeners.
    pub fn emit(&self, event: RunEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
