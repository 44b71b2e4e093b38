use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::capture::{CapturedStep, DatasetDescriptor, RunHandle, RunMetadata, StateCapture};
use crate::errors::{FlowshotError, FlowshotResult};
use crate::orchestrator::state::WorkflowRun;
use crate::perception::types::Snapshot;

#[derive(Debug, Clone)]
pub struct StoredCapture {
    pub step: CapturedStep,
    pub png: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct MemoryDataset {
    pub handle: RunHandle,
    pub metadata: RunMetadata,
    pub captures: Vec<StoredCapture>,
    pub finalized: Option<DatasetDescriptor>,
    pub finalize_calls: u32,
}

/// Keeps every capture in process memory, keyed by run id.
#[derive(Debug, Default)]
pub struct MemoryCapture {
    runs: Mutex<HashMap<String, MemoryDataset>>,
}

impl MemoryCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dataset(&self, run_id: &str) -> Option<MemoryDataset> {
        self.runs.lock().ok()?.get(run_id).cloned()
    }

    pub fn run_ids(&self) -> Vec<String> {
        self.runs
            .lock()
            .map(|runs| runs.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn with_run<T>(
        &self,
        run_id: &str,
        f: impl FnOnce(&mut MemoryDataset) -> T,
    ) -> FlowshotResult<T> {
        let mut runs = self
            .runs
            .lock()
            .map_err(|_| FlowshotError::Capture("memory store poisoned".into()))?;
        let dataset = runs
            .get_mut(run_id)
            .ok_or_else(|| FlowshotError::Capture(format!("unknown run {run_id}")))?;
        Ok(f(dataset))
    }
}

#[async_trait]
impl StateCapture for MemoryCapture {
    async fn start_run(
        &self,
        app: &str,
        task_id: &str,
        metadata: &RunMetadata,
    ) -> FlowshotResult<RunHandle> {
        let handle = RunHandle {
            run_id: metadata.run_id.clone(),
            app: app.to_string(),
            task_id: task_id.to_string(),
            location: None,
        };
        let mut runs = self
            .runs
            .lock()
            .map_err(|_| FlowshotError::Capture("memory store poisoned".into()))?;
        runs.insert(
            metadata.run_id.clone(),
            MemoryDataset {
                handle: handle.clone(),
                metadata: metadata.clone(),
                captures: Vec::new(),
                finalized: None,
                finalize_calls: 0,
            },
        );
        Ok(handle)
    }

    async fn persist(
        &self,
        handle: &RunHandle,
        step: &CapturedStep,
        snapshot: Option<&Snapshot>,
    ) -> FlowshotResult<Option<String>> {
        self.with_run(&handle.run_id, |dataset| {
            dataset.captures.push(StoredCapture {
                step: step.clone(),
                png: snapshot.map(|s| s.png().to_vec()),
            });
        })?;
        Ok(None)
    }

    async fn finalize(
        &self,
        handle: &RunHandle,
        run: &WorkflowRun,
    ) -> FlowshotResult<DatasetDescriptor> {
        let descriptor = DatasetDescriptor::for_run(run, None);
        self.with_run(&handle.run_id, |dataset| {
            dataset.finalize_calls += 1;
            dataset.finalized = Some(descriptor.clone());
        })?;
        Ok(descriptor)
    }
}
