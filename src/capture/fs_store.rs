use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;

use crate::capture::{CapturedStep, DatasetDescriptor, RunHandle, RunMetadata, StateCapture};
use crate::errors::{FlowshotError, FlowshotResult};
use crate::orchestrator::state::WorkflowRun;
use crate::perception::types::Snapshot;

/// Writes one directory per run:
///
/// ```text
/// <root>/<app>/<task_id>_<YYYYmmdd_HHMMSS>/
///     step_00_baseline.png
///     step_03_click.png
///     metadata.json
///     steps.jsonl
///     README.md
/// ```
pub struct FsCaptureStore {
    root: PathBuf,
    runs: Mutex<HashMap<String, FsRun>>,
}

struct FsRun {
    dir: PathBuf,
    app: String,
    task_id: String,
    metadata: RunMetadata,
    captures: Vec<CaptureEntry>,
}

#[derive(Debug, Clone, Serialize)]
struct CaptureEntry {
    #[serde(flatten)]
    step: CapturedStep,
    label: &'static str,
    file: Option<String>,
}

#[derive(Serialize)]
struct MetadataFile<'a> {
    run_id: &'a str,
    task_id: &'a str,
    task_query: &'a str,
    app_name: &'a str,
    start_url: &'a str,
    start_time: String,
    status: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    end_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    total_steps: Option<usize>,
    total_captures: usize,
    duration_seconds: f64,
    last_update: String,
    captures: &'a [CaptureEntry],
}

impl FsCaptureStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            runs: Mutex::new(HashMap::new()),
        }
    }

    /// `FLOWSHOT_DATASET_DIR`, else `<data dir>/flowshot/datasets`, else `./dataset`.
    pub fn default_root() -> PathBuf {
        if let Ok(dir) = std::env::var("FLOWSHOT_DATASET_DIR") {
            return PathBuf::from(dir);
        }
        dirs::data_dir()
            .map(|d| d.join("flowshot").join("datasets"))
            .unwrap_or_else(|| PathBuf::from("dataset"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn lock(&self) -> FlowshotResult<std::sync::MutexGuard<'_, HashMap<String, FsRun>>> {
        self.runs
            .lock()
            .map_err(|_| FlowshotError::Capture("capture store poisoned".into()))
    }
}

fn path_safe(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "unnamed".to_string()
    } else {
        cleaned
    }
}

fn write_metadata(
    run: &FsRun,
    status: &str,
    finished: Option<&WorkflowRun>,
) -> FlowshotResult<()> {
    let now = Utc::now();
    let end = finished.and_then(|r| r.finished_at).unwrap_or(now);
    let file = MetadataFile {
        run_id: &run.metadata.run_id,
        task_id: &run.task_id,
        task_query: &run.metadata.task,
        app_name: &run.app,
        start_url: &run.metadata.start_url,
        start_time: run.metadata.started_at.to_rfc3339(),
        status,
        reason: finished.and_then(|r| r.termination.as_ref().map(|t| t.to_string())),
        end_time: finished.map(|_| end.to_rfc3339()),
        total_steps: finished.map(|r| r.steps.len()),
        total_captures: run.captures.len(),
        duration_seconds: (end - run.metadata.started_at).num_milliseconds() as f64 / 1000.0,
        last_update: now.to_rfc3339(),
        captures: &run.captures,
    };
    let json = serde_json::to_string_pretty(&file)?;
    std::fs::write(run.dir.join("metadata.json"), json)?;
    Ok(())
}

/// Human-readable run summary, written once at finalize.
fn render_readme(run: &FsRun, workflow: &WorkflowRun) -> String {
    let end = workflow.finished_at.unwrap_or_else(Utc::now);
    let duration = (end - workflow.started_at).num_milliseconds() as f64 / 1000.0;
    let mut out = format!("# {}\n\n## Run\n\n", workflow.task);
    out.push_str(&format!("- **Task ID**: {}\n", workflow.task_id));
    out.push_str(&format!("- **App**: {}\n", workflow.app));
    out.push_str(&format!("- **Started**: {}\n", workflow.started_at.to_rfc3339()));
    out.push_str(&format!("- **Duration**: {duration:.2} seconds\n"));
    out.push_str(&format!("- **Total Steps**: {}\n", workflow.steps.len()));
    out.push_str(&format!("- **Status**: {}\n", workflow.status.as_str()));
    if let Some(reason) = &workflow.termination {
        out.push_str(&format!("- **Reason**: {reason}\n"));
    }
    out.push_str("\n## Steps\n");

    for step in &workflow.steps {
        let screenshot = run
            .captures
            .iter()
            .find(|c| c.step.step == step.index)
            .and_then(|c| c.file.as_deref())
            .map(|f| format!("`{f}`"))
            .unwrap_or_else(|| "not captured".to_string());
        out.push_str(&format!(
            "\n### Step {}: {}\n\n",
            step.index,
            step.action.kind()
        ));
        out.push_str(&format!("- **Action**: {}\n", step.action.kind()));
        out.push_str(&format!(
            "- **Target**: {}\n",
            step.action.locator().unwrap_or("-")
        ));
        out.push_str(&format!("- **URL**: {}\n", step.url));
        out.push_str(&format!("- **Screenshot**: {screenshot}\n"));
        out.push_str(&format!("- **Reasoning**: {}\n", step.rationale));
    }
    out
}

#[async_trait]
impl StateCapture for FsCaptureStore {
    async fn start_run(
        &self,
        app: &str,
        task_id: &str,
        metadata: &RunMetadata,
    ) -> FlowshotResult<RunHandle> {
        let stamp = metadata.started_at.format("%Y%m%d_%H%M%S");
        let app_dir = self.root.join(path_safe(app));
        let mut dir = app_dir.join(format!("{}_{stamp}", path_safe(task_id)));
        if dir.exists() {
            let suffix: String = metadata.run_id.chars().take(8).collect();
            dir = app_dir.join(format!("{}_{stamp}_{suffix}", path_safe(task_id)));
        }
        std::fs::create_dir_all(&dir)?;

        let run = FsRun {
            dir: dir.clone(),
            app: app.to_string(),
            task_id: task_id.to_string(),
            metadata: metadata.clone(),
            captures: Vec::new(),
        };
        write_metadata(&run, "in_progress", None)?;
        tracing::info!(path = %dir.display(), run_id = %metadata.run_id, "capture directory created");

        self.lock()?.insert(metadata.run_id.clone(), run);
        Ok(RunHandle {
            run_id: metadata.run_id.clone(),
            app: app.to_string(),
            task_id: task_id.to_string(),
            location: Some(dir.display().to_string()),
        })
    }

    async fn persist(
        &self,
        handle: &RunHandle,
        step: &CapturedStep,
        snapshot: Option<&Snapshot>,
    ) -> FlowshotResult<Option<String>> {
        let mut runs = self.lock()?;
        let run = runs
            .get_mut(&handle.run_id)
            .ok_or_else(|| FlowshotError::Capture(format!("unknown run {}", handle.run_id)))?;

        let label = step.label();
        let file = match snapshot {
            Some(snapshot) => {
                let name = format!("step_{:02}_{label}.png", step.step);
                std::fs::write(run.dir.join(&name), snapshot.png())?;
                Some(name)
            }
            None => None,
        };

        run.captures.push(CaptureEntry {
            step: step.clone(),
            label,
            file: file.clone(),
        });
        write_metadata(run, "in_progress", None)?;
        tracing::debug!(step = step.step, file = ?file, "state persisted");
        Ok(file.map(|f| run.dir.join(f).display().to_string()))
    }

    async fn finalize(
        &self,
        handle: &RunHandle,
        workflow: &WorkflowRun,
    ) -> FlowshotResult<DatasetDescriptor> {
        let mut runs = self.lock()?;
        let run = runs
            .remove(&handle.run_id)
            .ok_or_else(|| FlowshotError::Capture(format!("unknown run {}", handle.run_id)))?;

        let mut log = std::fs::File::create(run.dir.join("steps.jsonl"))?;
        for step in &workflow.steps {
            writeln!(log, "{}", serde_json::to_string(step)?)?;
        }
        write_metadata(&run, workflow.status.as_str(), Some(workflow))?;
        std::fs::write(run.dir.join("README.md"), render_readme(&run, workflow))?;

        tracing::info!(
            path = %run.dir.display(),
            status = workflow.status.as_str(),
            captures = run.captures.len(),
            "dataset finalized"
        );
        Ok(DatasetDescriptor::for_run(
            workflow,
            Some(run.dir.display().to_string()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TaskSpec;
    use crate::orchestrator::state::{
        Action, ActionOutcome, CaptureDecision, RunBudgets, Step, TerminationReason,
    };
    use crate::perception::change_detector::ComparisonMethod;
    use image::{DynamicImage, ImageBuffer, Rgb};
    use std::time::Duration;

    fn snapshot() -> Snapshot {
        let img = ImageBuffer::from_pixel(32, 16, Rgb([10u8, 200, 30]));
        Snapshot::from_image(DynamicImage::ImageRgb8(img)).unwrap()
    }

    fn captured(step: u32, action: Option<Action>) -> CapturedStep {
        CapturedStep {
            step,
            action,
            rationale: "because".into(),
            url: "https://app.test".into(),
            title: "App".into(),
            score: 1.0,
            forced: step == 0,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn writes_pngs_and_metadata_lifecycle() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsCaptureStore::new(tmp.path());
        let mut run = WorkflowRun::new(
            &TaskSpec::new("add-item", "Sauce Demo", "Add backpack to cart"),
            "saucedemo",
            "https://www.saucedemo.com",
            RunBudgets {
                steps: 5,
                time: Duration::from_secs(60),
            },
        );
        let handle = store
            .start_run("saucedemo", "add-item", &RunMetadata::of(&run))
            .await
            .unwrap();
        let dir = PathBuf::from(handle.location.clone().unwrap());
        let meta: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.join("metadata.json")).unwrap())
                .unwrap();
        assert_eq!(meta["status"], "in_progress");

        store
            .persist(&handle, &captured(0, None), Some(&snapshot()))
            .await
            .unwrap();
        let click = Action::Click {
            locator: "#add-to-cart".into(),
        };
        store
            .persist(&handle, &captured(1, Some(click)), Some(&snapshot()))
            .await
            .unwrap();
        store
            .persist(&handle, &captured(2, Some(Action::Done)), None)
            .await
            .unwrap();
        assert!(dir.join("step_00_baseline.png").exists());
        assert!(dir.join("step_01_click.png").exists());
        assert!(!dir.join("step_02_done.png").exists());

        run.finish(TerminationReason::GoalSatisfied).unwrap();
        let descriptor = store.finalize(&handle, &run).await.unwrap();
        assert_eq!(descriptor.reason.as_deref(), Some("goal_satisfied"));

        let meta: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.join("metadata.json")).unwrap())
                .unwrap();
        assert_eq!(meta["status"], "succeeded");
        assert_eq!(meta["total_captures"], 3);
        assert_eq!(meta["captures"][1]["file"], "step_01_click.png");
        assert!(dir.join("steps.jsonl").exists());
        assert!(store.finalize(&handle, &run).await.is_err());
    }

    #[tokio::test]
    async fn readme_summarizes_each_step() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsCaptureStore::new(tmp.path());
        let mut run = WorkflowRun::new(
            &TaskSpec::new("add-item", "saucedemo", "Add backpack to cart"),
            "saucedemo",
            "https://www.saucedemo.com",
            RunBudgets {
                steps: 5,
                time: Duration::from_secs(60),
            },
        );
        let handle = store
            .start_run("saucedemo", "add-item", &RunMetadata::of(&run))
            .await
            .unwrap();
        let dir = PathBuf::from(handle.location.clone().unwrap());
        store
            .persist(&handle, &captured(0, None), Some(&snapshot()))
            .await
            .unwrap();

        let click = Action::Click {
            locator: "#add-to-cart".into(),
        };
        run.steps.push(Step {
            index: 1,
            action: click.clone(),
            proposed: None,
            outcome: ActionOutcome::Performed,
            score: 0.4,
            method: ComparisonMethod::Hash,
            capture: CaptureDecision::Captured,
            rationale: "the button is visible".into(),
            url: "https://www.saucedemo.com/inventory.html".into(),
            timestamp: Utc::now(),
        });
        store
            .persist(&handle, &captured(1, Some(click)), Some(&snapshot()))
            .await
            .unwrap();
        run.finish(TerminationReason::GoalSatisfied).unwrap();
        store.finalize(&handle, &run).await.unwrap();

        let readme = std::fs::read_to_string(dir.join("README.md")).unwrap();
        assert!(readme.starts_with("# Add backpack to cart"));
        assert!(readme.contains("- **App**: saucedemo"));
        assert!(readme.contains("- **Status**: succeeded"));
        assert!(readme.contains("- **Duration**: "));
        assert!(readme.contains("### Step 1: click"));
        assert!(readme.contains("- **Target**: #add-to-cart"));
        assert!(readme.contains("- **URL**: https://www.saucedemo.com/inventory.html"));
        assert!(readme.contains("- **Screenshot**: `step_01_click.png`"));
        assert!(readme.contains("- **Reasoning**: the button is visible"));
    }

    #[test]
    fn path_segments_are_sanitized() {
        assert_eq!(path_safe("Sauce Demo/../x"), "Sauce_Demo____x");
        assert_eq!(path_safe(""), "unnamed");
    }
}
