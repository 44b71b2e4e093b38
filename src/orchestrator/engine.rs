use std::sync::Arc;

use chrono::Utc;

use crate::adapters::{AppAdapter, Credentials};
use crate::capture::{CapturedStep, DatasetDescriptor, RunHandle, RunMetadata, StateCapture};
use crate::config::RunSettings;
use crate::errors::{FlowshotError, FlowshotResult};
use crate::executor::dispatcher::{with_timeout, Dispatcher};
use crate::executor::driver::{BrowserDriver, SessionLease, SessionLock};
use crate::executor::loop_breaker::{LoopBreaker, Verdict};
use crate::goal::{GoalCriteria, GoalMonitor};
use crate::llm::gateway::DecisionGateway;
use crate::llm::types::{DecisionRequest, PriorAction};
use crate::orchestrator::event_bus::{EventBus, RunEvent};
use crate::orchestrator::loop_control::{BoundarySignals, CancelFlag, LoopController};
use crate::orchestrator::state::{
    Action, ActionOutcome, CaptureDecision, CaptureRecord, DecisionOutcome, PendingStep,
    PlannedAction, RunBudgets, RunPhase, RunStatus, Step, TerminationReason, WorkflowRun,
};
use crate::perception::change_detector::{ChangeDetector, ChangeVerdict, VerdictReason};
use crate::perception::stability::{wait_for_visual_stability, StabilityConfig};
use crate::perception::types::{PageContext, PageSignals, Snapshot};

/// Prior steps shown to the decision provider.
const HISTORY_LIMIT: usize = 10;
/// Driver calls a form login may make; the whole login gets this many
/// per-call timeouts, capped by the run's time budget.
const LOGIN_DRIVER_CALLS: u32 = 8;
/// Wait synthesized after a parse failure or a veto, before clamping to `max_wait`.
const CORRECTIVE_WAIT_MS: u64 = 1000;

/// What a finished run hands back to the host.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run: WorkflowRun,
    /// `None` only when the capture store failed to finalize.
    pub dataset: Option<DatasetDescriptor>,
}

/// Drives one browser session through capture runs, one at a time.
pub struct Orchestrator {
    settings: RunSettings,
    driver: Arc<dyn BrowserDriver>,
    session: SessionLock,
    gateway: DecisionGateway,
    capture: Arc<dyn StateCapture>,
    adapter: Arc<dyn AppAdapter>,
    credentials: Option<Credentials>,
    events: EventBus,
    cancel: CancelFlag,
}

impl Orchestrator {
    pub fn new(
        settings: RunSettings,
        driver: Arc<dyn BrowserDriver>,
        session: SessionLock,
        gateway: DecisionGateway,
        capture: Arc<dyn StateCapture>,
        adapter: Arc<dyn AppAdapter>,
    ) -> Self {
        Self {
            settings,
            driver,
            session,
            gateway,
            capture,
            adapter,
            credentials: None,
            events: EventBus::default(),
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// Runs the task the settings were resolved for to a terminal status.
    /// Every run that gets past `start_run` is finalized, whatever its
    /// outcome; `Err` means the run never started (session busy, capture
    /// store unavailable).
    pub async fn run(&self) -> FlowshotResult<RunReport> {
        let lease = self.session.acquire()?;
        let task = &self.settings.task;

        let start_url = task
            .start_url
            .clone()
            .unwrap_or_else(|| self.adapter.base_url());
        let budgets = RunBudgets {
            steps: self.settings.step_budget,
            time: self.settings.time_budget,
        };
        let run = WorkflowRun::new(task, &self.settings.app, &start_url, budgets);
        let handle = self
            .capture
            .start_run(&run.app, &run.task_id, &RunMetadata::of(&run))
            .await?;

        let criteria = if task.success_keywords.is_empty() {
            GoalCriteria::from_task(&task.query)
        } else {
            GoalCriteria::from_keywords(&task.success_keywords)
        };

        let mut cycle = RunLoop {
            orch: self,
            phase: RunPhase::Init,
            run,
            handle,
            _lease: lease,
            control: LoopController::new(
                self.settings.step_budget,
                self.settings.time_budget,
                self.cancel.clone(),
            ),
            breaker: LoopBreaker::new(&self.settings.loop_breaker),
            detector: ChangeDetector::new(&self.settings.detector),
            goal: GoalMonitor::new(criteria),
            dispatcher: Dispatcher::new(self.settings.driver_timeout, self.settings.max_wait),
            hints: self.adapter.locator_hints(&task.query),
            baseline: None,
            current: None,
            page: PageContext::default(),
            goal_satisfied: false,
            done_requested: false,
            termination: None,
        };
        Ok(cycle.drive().await)
    }
}

/// Mutable state of a single run. Nothing here outlives the run.
struct RunLoop<'a> {
    orch: &'a Orchestrator,
    phase: RunPhase,
    run: WorkflowRun,
    handle: RunHandle,
    _lease: SessionLease,
    control: LoopController,
    breaker: LoopBreaker,
    detector: ChangeDetector,
    goal: GoalMonitor,
    dispatcher: Dispatcher,
    hints: Vec<String>,
    /// Last captured observation; skipped observations never replace it.
    baseline: Option<Arc<Snapshot>>,
    current: Option<Arc<Snapshot>>,
    page: PageContext,
    goal_satisfied: bool,
    done_requested: bool,
    termination: Option<TerminationReason>,
}

impl RunLoop<'_> {
    async fn drive(&mut self) -> RunReport {
        self.orch.events.emit(RunEvent::RunStarted {
            run_id: self.run.id.clone(),
            app: self.run.app.clone(),
            task: self.run.task.clone(),
            start_url: self.run.start_url.clone(),
        });

        loop {
            match self.phase.clone() {
                RunPhase::Init => {
                    tracing::info!(run_id = %self.run.id, url = %self.run.start_url, "INIT");
                    self.phase = match self.init().await {
                        Ok(()) => match self.control.check(0, BoundarySignals::default()) {
                            Some(reason) => self.terminate(reason),
                            None => RunPhase::Observe,
                        },
                        Err(reason) => self.terminate(reason),
                    };
                }

                RunPhase::Observe => {
                    self.phase = match self.observe().await {
                        Ok(()) => RunPhase::Decide,
                        Err(reason) => self.terminate(reason),
                    };
                }

                RunPhase::Decide => {
                    let planned = self.decide().await;
                    tracing::info!(
                        run_id = %self.run.id,
                        step = self.run.next_index(),
                        action = %planned.action.describe(),
                        vetoed = planned.vetoed,
                        parse_failed = planned.parse_failed,
                        "DECIDE → ACT"
                    );
                    self.phase = RunPhase::Act { decision: planned };
                }

                RunPhase::Act { decision } => {
                    let orch = self.orch;
                    let executed = self
                        .dispatcher
                        .execute(orch.driver.as_ref(), &decision.action)
                        .await;
                    self.phase = match executed {
                        Ok(outcome) => {
                            if let ActionOutcome::Failed { reason } = &outcome {
                                tracing::warn!(
                                    run_id = %self.run.id,
                                    action = %decision.action.describe(),
                                    reason = %reason,
                                    "action did not land"
                                );
                            }
                            let pending = PendingStep {
                                planned: decision,
                                outcome,
                            };
                            if pending.planned.action == Action::Done {
                                self.done_requested = true;
                                RunPhase::Record { pending }
                            } else {
                                RunPhase::Verify { pending }
                            }
                        }
                        Err(e) => self.terminate(fatal(&e)),
                    };
                }

                RunPhase::Verify { pending } => {
                    self.phase = match self.verify(&pending).await {
                        Ok(()) => RunPhase::Record { pending },
                        Err(reason) => self.terminate(reason),
                    };
                }

                RunPhase::Record { pending } => {
                    self.phase = match self.record(pending).await {
                        Some(reason) => self.terminate(reason),
                        None => RunPhase::Observe,
                    };
                }

                RunPhase::Finished => break,
            }
        }

        self.finalize().await
    }

    /// Login, start page, forced baseline capture.
    async fn init(&mut self) -> Result<(), TerminationReason> {
        let orch = self.orch;
        let login_limit = orch
            .settings
            .driver_timeout
            .saturating_mul(LOGIN_DRIVER_CALLS)
            .min(orch.settings.time_budget);
        let login = orch
            .adapter
            .authenticate(orch.driver.as_ref(), orch.credentials.as_ref());
        match with_timeout(login_limit, login).await {
            Ok(outcome) => {
                tracing::info!(run_id = %self.run.id, adapter = orch.adapter.name(), ?outcome, "authentication")
            }
            Err(e) if e.is_fatal() => return Err(fatal(&e)),
            Err(e) => {
                tracing::error!(run_id = %self.run.id, error = %e, "authentication failed");
                return Err(TerminationReason::AuthenticationFailed {
                    detail: e.to_string(),
                });
            }
        }

        let timeout = orch.settings.driver_timeout;
        if let Err(e) = with_timeout(timeout, orch.driver.navigate(&self.run.start_url)).await {
            // The run has nowhere to start from; any navigation error ends it.
            tracing::error!(run_id = %self.run.id, error = %e, "start navigation failed");
            return Err(TerminationReason::DriverFatal {
                detail: e.to_string(),
            });
        }

        self.observe().await?;
        let verdict = self.detector.should_capture(self.current.as_deref(), None, true);
        self.capture_state(0, None, "baseline", verdict).await;
        self.baseline = self.current.clone();
        Ok(())
    }

    async fn observe(&mut self) -> Result<(), TerminationReason> {
        let orch = self.orch;
        let timeout = orch.settings.driver_timeout;
        let driver = orch.driver.as_ref();
        self.current = self
            .absorb("observe", with_timeout(timeout, driver.observe()).await)?
            .map(Arc::new);
        if let Some(page) = self.absorb(
            "page context",
            with_timeout(timeout, driver.page_context()).await,
        )? {
            self.page = page;
        }
        Ok(())
    }

    /// Asks the provider, then applies parse-failure and loop-breaker policy.
    async fn decide(&mut self) -> PlannedAction {
        let step = self.run.next_index();
        let hint = self.goal.prompt_hint();
        let request = DecisionRequest {
            task: self.run.task.clone(),
            app: self.run.app.clone(),
            step,
            steps_remaining: self.control.steps_remaining(step - 1),
            page: self.page.clone(),
            observation: self.current.clone(),
            history: self
                .run
                .recent_steps(HISTORY_LIMIT)
                .iter()
                .map(prior_action)
                .collect(),
            locator_hints: self.hints.clone(),
            goal_hint: (!hint.is_empty()).then_some(hint),
            notice: self.breaker.take_notice(),
        };

        let decision = match self.orch.gateway.decide(&request).await {
            DecisionOutcome::Action(decision) => decision,
            DecisionOutcome::ParseFailure(reason) => {
                tracing::warn!(run_id = %self.run.id, step, reason = %reason, "unusable decision, waiting instead");
                self.breaker.note_stuck();
                return PlannedAction {
                    action: Action::Wait {
                        millis: CORRECTIVE_WAIT_MS,
                    },
                    proposed: None,
                    rationale: format!("Parse error: {reason}"),
                    vetoed: false,
                    parse_failed: true,
                };
            }
        };

        match self.breaker.evaluate(decision.action.signature()) {
            Verdict::Allow => PlannedAction {
                action: decision.action,
                proposed: None,
                rationale: decision.rationale,
                vetoed: false,
                parse_failed: false,
            },
            Verdict::Veto { repeats } => PlannedAction {
                rationale: format!(
                    "Loop breaker: {} proposed {repeats} times in a row; waiting instead",
                    decision.action.describe()
                ),
                action: Action::Wait {
                    millis: CORRECTIVE_WAIT_MS,
                },
                proposed: Some(decision.action),
                vetoed: true,
                parse_failed: false,
            },
        }
    }

    /// Settles, re-observes and checks the goal.
    async fn verify(&mut self, pending: &PendingStep) -> Result<(), TerminationReason> {
        let orch = self.orch;
        let settings = &orch.settings;
        let timeout = settings.driver_timeout;
        let driver = orch.driver.clone();

        if pending.outcome.is_failure() {
            // Nothing landed, so nothing to wait for.
            self.observe().await?;
        } else if settings.adaptive_settle {
            tokio::time::sleep(settings.settle_delay).await;
            let config = StabilityConfig {
                max_wait: settings.settle_max,
                ..StabilityConfig::default()
            };
            let settled = wait_for_visual_stability(
                || {
                    let driver = driver.clone();
                    async move { with_timeout(timeout, driver.observe()).await }
                },
                &config,
            )
            .await;
            match self.absorb("settle", settled)? {
                Some(settled) => {
                    if !settled.stable {
                        tracing::debug!(run_id = %self.run.id, frames = settled.frames, "page still moving at settle deadline");
                    }
                    self.current = Some(Arc::new(settled.snapshot));
                }
                None => self.current = None,
            }
            if let Some(page) =
                self.absorb("page context", with_timeout(timeout, driver.page_context()).await)?
            {
                self.page = page;
            }
        } else {
            tokio::time::sleep(settings.settle_delay).await;
            self.observe().await?;
        }

        let visible_text = self
            .absorb("visible text", with_timeout(timeout, driver.visible_text()).await)?
            .unwrap_or_default();
        let signals = PageSignals {
            url: self.page.url.clone(),
            title: self.page.title.clone(),
            visible_text,
        };
        self.goal_satisfied = self.goal.evaluate(&signals).satisfied;
        Ok(())
    }

    /// Termination check, capture decision, step append. Returns the reason
    /// when this cycle is the last one.
    async fn record(&mut self, pending: PendingStep) -> Option<TerminationReason> {
        let index = self.run.next_index();
        let signals = BoundarySignals {
            goal_satisfied: self.goal_satisfied,
            provider_done: self.done_requested,
            stuck_exhausted: self.breaker.is_exhausted(),
        };
        let termination = self.control.check(index, signals);

        let verdict = self.detector.should_capture(
            self.current.as_deref(),
            self.baseline.as_deref(),
            termination.is_some(),
        );
        let capture = if verdict.capture {
            self.capture_state(
                index,
                Some(&pending.planned.action),
                &pending.planned.rationale,
                verdict,
            )
            .await
        } else {
            tracing::debug!(run_id = %self.run.id, step = index, score = verdict.score, method = ?verdict.method, "unchanged, skipped");
            CaptureDecision::Skipped
        };

        if capture == CaptureDecision::Captured {
            if self.current.is_some() {
                self.baseline = self.current.clone();
            }
            if verdict.reason == VerdictReason::Changed {
                self.breaker.reset_stuck();
            }
        }

        let PendingStep { planned, outcome } = pending;
        let step = Step {
            index,
            action: planned.action,
            proposed: planned.proposed,
            outcome,
            score: verdict.score,
            method: verdict.method,
            capture,
            rationale: planned.rationale,
            url: self.page.url.clone(),
            timestamp: Utc::now(),
        };
        self.orch.events.emit(RunEvent::StepRecorded {
            run_id: self.run.id.clone(),
            step: step.clone(),
        });
        if let Err(e) = self.run.push_step(step) {
            tracing::error!(run_id = %self.run.id, error = %e, "step dropped");
        }
        termination
    }

    /// Persists the current observation. A store failure costs the capture,
    /// never the run.
    async fn capture_state(
        &mut self,
        index: u32,
        action: Option<&Action>,
        rationale: &str,
        verdict: ChangeVerdict,
    ) -> CaptureDecision {
        let forced = verdict.reason == VerdictReason::Forced;
        let record = CapturedStep {
            step: index,
            action: action.cloned(),
            rationale: rationale.to_string(),
            url: self.page.url.clone(),
            title: self.page.title.clone(),
            score: verdict.score,
            forced,
            timestamp: Utc::now(),
        };
        let location = match self
            .orch
            .capture
            .persist(&self.handle, &record, self.current.as_deref())
            .await
        {
            Ok(location) => location,
            Err(e) => {
                tracing::warn!(run_id = %self.run.id, step = index, error = %e, "capture not persisted");
                return CaptureDecision::Skipped;
            }
        };

        tracing::info!(
            run_id = %self.run.id,
            step = index,
            label = record.label(),
            score = verdict.score,
            method = ?verdict.method,
            forced,
            "state captured"
        );
        self.orch.events.emit(RunEvent::StateCaptured {
            run_id: self.run.id.clone(),
            step: index,
            score: verdict.score,
            forced,
            location: location.clone(),
        });
        let capture = CaptureRecord {
            step: index,
            label: record.label().to_string(),
            score: verdict.score,
            forced,
            location,
            timestamp: record.timestamp,
        };
        if let Err(e) = self.run.push_capture(capture) {
            tracing::error!(run_id = %self.run.id, error = %e, "capture record dropped");
        }
        CaptureDecision::Captured
    }

    /// Sorts a driver result into usable, recoverable (logged, `None`) or run-ending.
    fn absorb<T>(
        &self,
        what: &str,
        result: FlowshotResult<T>,
    ) -> Result<Option<T>, TerminationReason> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_fatal() => Err(fatal(&e)),
            Err(e) => {
                tracing::warn!(run_id = %self.run.id, error = %e, "{what} unavailable");
                Ok(None)
            }
        }
    }

    fn terminate(&mut self, reason: TerminationReason) -> RunPhase {
        match reason.status() {
            RunStatus::Failed => {
                tracing::error!(run_id = %self.run.id, reason = %reason, "run failed")
            }
            status => {
                tracing::info!(run_id = %self.run.id, status = status.as_str(), reason = %reason, "run finished")
            }
        }
        self.termination = Some(reason);
        RunPhase::Finished
    }

    /// Last thing a run does: close the record and hand it to the store.
    async fn finalize(&mut self) -> RunReport {
        let reason = self
            .termination
            .take()
            .unwrap_or(TerminationReason::Cancelled);
        if let Err(e) = self.run.finish(reason) {
            tracing::error!(run_id = %self.run.id, error = %e, "run already finalized");
        }

        let dataset = match self.orch.capture.finalize(&self.handle, &self.run).await {
            Ok(descriptor) => Some(descriptor),
            Err(e) => {
                tracing::error!(run_id = %self.run.id, error = %e, "dataset finalize failed");
                None
            }
        };

        self.orch.events.emit(RunEvent::RunFinished {
            run_id: self.run.id.clone(),
            status: self.run.status,
            reason: self
                .run
                .termination
                .as_ref()
                .map(|r| r.code().to_string())
                .unwrap_or_default(),
            dataset: dataset.clone(),
        });
        tracing::info!(
            run_id = %self.run.id,
            steps = self.run.steps.len(),
            captures = self.run.captures.len(),
            elapsed = ?self.control.elapsed(),
            "run finalized"
        );

        RunReport {
            run: self.run.clone(),
            dataset,
        }
    }
}

fn fatal(error: &FlowshotError) -> TerminationReason {
    TerminationReason::DriverFatal {
        detail: error.to_string(),
    }
}

fn prior_action(step: &Step) -> PriorAction {
    let outcome = match &step.outcome {
        ActionOutcome::Performed => "performed".to_string(),
        ActionOutcome::Failed { reason } => format!("failed: {reason}"),
        ActionOutcome::NotDispatched => "not dispatched".to_string(),
    };
    PriorAction {
        index: step.index,
        action: step.action.describe(),
        outcome,
        rationale: step.rationale.clone(),
    }
}
