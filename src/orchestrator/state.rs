use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::TaskSpec;
use crate::errors::{FlowshotError, FlowshotResult};
use crate::perception::change_detector::ComparisonMethod;

/// Phases of the capture loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum RunPhase {
    Init,
    Observe,
    Decide,
    Act { decision: PlannedAction },
    Verify { pending: PendingStep },
    Record { pending: PendingStep },
    Finished,
}

/// One interaction the decision provider may propose.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action_type", rename_all = "snake_case")]
pub enum Action {
    Navigate { url: String },
    Click { locator: String },
    Type { locator: String, text: String },
    PressKey {
        key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        locator: Option<String>,
    },
    Hover { locator: String },
    Scroll {
        direction: ScrollDirection,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        locator: Option<String>,
    },
    Wait { millis: u64 },
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Navigate,
    Click,
    Type,
    PressKey,
    Hover,
    Scroll,
    Wait,
    Done,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Navigate => "navigate",
            ActionKind::Click => "click",
            ActionKind::Type => "type",
            ActionKind::PressKey => "press_key",
            ActionKind::Hover => "hover",
            ActionKind::Scroll => "scroll",
            ActionKind::Wait => "wait",
            ActionKind::Done => "done",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollDirection {
    Up,
    Down,
    Left,
    Right,
}

impl ScrollDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::Left => "left",
            Self::Right => "right",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "up" => Some(Self::Up),
            "down" => Some(Self::Down),
            "left" => Some(Self::Left),
            "right" => Some(Self::Right),
            _ => None,
        }
    }
}

/// What the loop breaker compares: the action type and its target.
pub type ActionSignature = (ActionKind, Option<String>);

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Navigate { .. } => ActionKind::Navigate,
            Action::Click { .. } => ActionKind::Click,
            Action::Type { .. } => ActionKind::Type,
            Action::PressKey { .. } => ActionKind::PressKey,
            Action::Hover { .. } => ActionKind::Hover,
            Action::Scroll { .. } => ActionKind::Scroll,
            Action::Wait { .. } => ActionKind::Wait,
            Action::Done => ActionKind::Done,
        }
    }

    pub fn locator(&self) -> Option<&str> {
        match self {
            Action::Click { locator } | Action::Type { locator, .. } | Action::Hover { locator } => {
                Some(locator.as_str())
            }
            Action::PressKey { locator, .. } | Action::Scroll { locator, .. } => locator.as_deref(),
            Action::Navigate { url } => Some(url.as_str()),
            Action::Wait { .. } | Action::Done => None,
        }
    }

    pub fn signature(&self) -> ActionSignature {
        (self.kind(), self.locator().map(str::to_string))
    }

    /// Short human-readable form used in prompts and logs.
    pub fn describe(&self) -> String {
        match self {
            Action::Navigate { url } => format!("navigate to {url}"),
            Action::Click { locator } => format!("click {locator}"),
            Action::Type { locator, text } => format!("type \"{text}\" into {locator}"),
            Action::PressKey { key, locator: Some(l) } => format!("press {key} on {l}"),
            Action::PressKey { key, locator: None } => format!("press {key}"),
            Action::Hover { locator } => format!("hover {locator}"),
            Action::Scroll { direction, locator } => match locator {
                Some(l) => format!("scroll {} in {l}", direction.as_str()),
                None => format!("scroll {}", direction.as_str()),
            },
            Action::Wait { millis } => format!("wait {millis} ms"),
            Action::Done => "done".to_string(),
        }
    }
}

/// A provider proposal with its reasoning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    #[serde(flatten)]
    pub action: Action,
    #[serde(default)]
    pub rationale: String,
}

/// Result of asking the provider for the next action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecisionOutcome {
    Action(Decision),
    /// The response could not be mapped onto [`Action`]; carries why.
    ParseFailure(String),
}

/// The action chosen for this cycle, after parse-failure handling and the loop breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedAction {
    pub action: Action,
    /// What the provider asked for when it differs from `action`.
    pub proposed: Option<Action>,
    pub rationale: String,
    pub vetoed: bool,
    pub parse_failed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ActionOutcome {
    Performed,
    /// Recoverable dispatch failure such as a missing locator.
    Failed { reason: String },
    /// `done` is recorded without touching the page.
    NotDispatched,
}

impl ActionOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, ActionOutcome::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingStep {
    pub planned: PlannedAction,
    pub outcome: ActionOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureDecision {
    Captured,
    Skipped,
}

/// One control-loop cycle. Never modified after it is appended to a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub index: u32,
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposed: Option<Action>,
    pub outcome: ActionOutcome,
    /// Difference against the last captured state (1.0 when an observation was missing).
    pub score: f64,
    pub method: ComparisonMethod,
    pub capture: CaptureDecision,
    pub rationale: String,
    pub url: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
    Aborted,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Aborted => "aborted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    GoalSatisfied,
    ProviderDone,
    StepBudgetExhausted,
    TimeBudgetExhausted,
    NoProgressDetected,
    DriverFatal { detail: String },
    AuthenticationFailed { detail: String },
    Cancelled,
}

impl TerminationReason {
    pub fn status(&self) -> RunStatus {
        match self {
            TerminationReason::GoalSatisfied | TerminationReason::ProviderDone => {
                RunStatus::Succeeded
            }
            TerminationReason::Cancelled => RunStatus::Aborted,
            _ => RunStatus::Failed,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            TerminationReason::GoalSatisfied => "goal_satisfied",
            TerminationReason::ProviderDone => "provider_done",
            TerminationReason::StepBudgetExhausted => "step_budget_exhausted",
            TerminationReason::TimeBudgetExhausted => "time_budget_exhausted",
            TerminationReason::NoProgressDetected => "no_progress_detected",
            TerminationReason::DriverFatal { .. } => "driver_fatal",
            TerminationReason::AuthenticationFailed { .. } => "authentication_failed",
            TerminationReason::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminationReason::GoalSatisfied => f.write_str("goal criteria satisfied"),
            TerminationReason::ProviderDone => f.write_str("decision provider reported done"),
            TerminationReason::StepBudgetExhausted => f.write_str("step budget exhausted"),
            TerminationReason::TimeBudgetExhausted => f.write_str("time budget exhausted"),
            TerminationReason::NoProgressDetected => f.write_str("no progress detected"),
            TerminationReason::DriverFatal { detail } => write!(f, "driver fatal: {detail}"),
            TerminationReason::AuthenticationFailed { detail } => {
                write!(f, "authentication failed: {detail}")
            }
            TerminationReason::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// A persisted state: the baseline (step 0) or a captured step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureRecord {
    pub step: u32,
    pub label: String,
    pub score: f64,
    pub forced: bool,
    pub location: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RunBudgets {
    pub steps: u32,
    pub time: Duration,
}

/// One exploration session. Only the orchestrator mutates it, and only while
/// the status is `running`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: String,
    pub task_id: String,
    pub task: String,
    pub app: String,
    pub start_url: String,
    pub budgets: RunBudgets,
    pub status: RunStatus,
    pub termination: Option<TerminationReason>,
    pub steps: Vec<Step>,
    pub captures: Vec<CaptureRecord>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl WorkflowRun {
    pub fn new(task: &TaskSpec, app: &str, start_url: &str, budgets: RunBudgets) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            task_id: task.id.clone(),
            task: task.query.clone(),
            app: app.to_string(),
            start_url: start_url.to_string(),
            budgets,
            status: RunStatus::Running,
            termination: None,
            steps: Vec::new(),
            captures: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    fn ensure_running(&self) -> FlowshotResult<()> {
        if self.status.is_terminal() {
            return Err(FlowshotError::RunFinalized);
        }
        Ok(())
    }

    pub fn push_step(&mut self, step: Step) -> FlowshotResult<()> {
        self.ensure_running()?;
        self.steps.push(step);
        Ok(())
    }

    pub fn push_capture(&mut self, record: CaptureRecord) -> FlowshotResult<()> {
        self.ensure_running()?;
        self.captures.push(record);
        Ok(())
    }

    pub fn finish(&mut self, reason: TerminationReason) -> FlowshotResult<()> {
        self.ensure_running()?;
        self.status = reason.status();
        self.termination = Some(reason);
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    pub fn next_index(&self) -> u32 {
        self.steps.len() as u32 + 1
    }

    /// Prior actions with outcomes, oldest first, for the decision request.
    pub fn recent_steps(&self, limit: usize) -> &[Step] {
        let start = self.steps.len().saturating_sub(limit);
        &self.steps[start..]
    }
}
