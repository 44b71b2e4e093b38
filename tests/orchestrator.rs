mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use flowshot::adapters::{Credentials, LinearAdapter};
use flowshot::capture::{FsCaptureStore, StateCapture};
use flowshot::config::{AppConfig, AppProfile, RunSettings, TaskSpec};
use flowshot::executor::driver::SessionLock;
use flowshot::orchestrator::state::{
    Action, ActionKind, ActionOutcome, CaptureDecision, RunStatus, TerminationReason,
};
use flowshot::orchestrator::{CancelFlag, Orchestrator, RunEvent};
use flowshot::FlowshotError;

use common::*;

#[tokio::test]
async fn baseline_and_final_step_are_always_captured() {
    let driver = ScriptedDriver::new().on(
        "#open",
        Screen::new(1, "https://demo.test/billing", "Invoices"),
    );
    let provider = ScriptedProvider::new(&[&click("#open"), DONE]);
    let task = task("Look around billing", &["payment methods"]);
    let h = harness(settings(task), driver, provider);

    let report = h.orchestrator.run().await.unwrap();
    let run = &report.run;

    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(run.termination, Some(TerminationReason::ProviderDone));
    assert_eq!(run.steps.len(), 2);

    let captured: Vec<(u32, bool)> = run.captures.iter().map(|c| (c.step, c.forced)).collect();
    assert_eq!(captured, vec![(0, true), (1, false), (2, true)]);
    assert_eq!(run.captures[0].label, "baseline");
    assert_eq!(run.steps[1].action, Action::Done);
    assert_eq!(run.steps[1].outcome, ActionOutcome::NotDispatched);

    let dataset = h.capture.dataset(&run.id).unwrap();
    assert_eq!(dataset.finalize_calls, 1);
    assert_eq!(dataset.captures.len(), 3);
    assert!(dataset.captures.iter().all(|c| c.png.is_some()));
    let descriptor = report.dataset.unwrap();
    assert_eq!(descriptor.status, RunStatus::Succeeded);
    assert_eq!(descriptor.steps, 2);
    assert!(!h.session.is_held());
}

#[tokio::test]
async fn identical_clicks_are_vetoed_then_run_fails_with_no_progress() {
    let provider = ScriptedProvider::new(&[&click("#same-button")]);
    let h = harness(
        settings(task("Press the same button", &["never shown"]).with_step_budget(15)),
        ScriptedDriver::new(),
        provider,
    );

    let report = h.orchestrator.run().await.unwrap();
    let run = &report.run;

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.termination, Some(TerminationReason::NoProgressDetected));
    assert_eq!(
        run.termination.as_ref().unwrap().to_string(),
        "no progress detected"
    );
    // Two allowed clicks, then a veto on every cycle until the stuck counter
    // passes its ceiling of 3.
    assert_eq!(run.steps.len(), 6);
    assert!(run.steps[..2]
        .iter()
        .all(|s| s.action.kind() == ActionKind::Click && s.proposed.is_none()));
    for step in &run.steps[2..] {
        assert_eq!(step.action, Action::Wait { millis: 1000 });
        assert_eq!(
            step.proposed,
            Some(Action::Click {
                locator: "#same-button".into()
            })
        );
    }
    assert_eq!(h.driver.dispatched().len(), 2);
    assert_eq!(run.steps.last().unwrap().capture, CaptureDecision::Captured);

    let requests = h.provider.requests();
    assert!(requests[2].notice.is_none());
    let notice = requests[3].notice.clone().unwrap();
    assert!(notice.contains("#same-button"));
}

#[tokio::test]
async fn goal_keywords_end_the_run_before_provider_says_done() {
    let driver = ScriptedDriver::new().on(
        "#billing",
        Screen::new(
            2,
            "https://demo.test/settings/billing",
            "Billing settings\nPayment methods",
        ),
    );
    let provider = ScriptedProvider::new(&[&click("#billing"), &click("#somewhere-else")]);
    let task = task(
        "Find the billing page",
        &["Billing Settings", "payment methods"],
    );
    let h = harness(settings(task), driver, provider);

    let report = h.orchestrator.run().await.unwrap();
    let run = &report.run;

    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(run.termination, Some(TerminationReason::GoalSatisfied));
    assert_eq!(run.steps.len(), 1);
    assert_eq!(h.provider.requests().len(), 1);
    assert_eq!(run.captures.last().map(|c| c.step), Some(1));
}

#[tokio::test]
async fn step_budget_of_three_yields_exactly_three_steps() {
    let provider = ScriptedProvider::new(&[&click("#a"), &click("#b"), &click("#c")]);
    let h = harness(
        settings(task("Wander around", &["never shown"]).with_step_budget(3)),
        ScriptedDriver::new(),
        provider,
    );

    let report = h.orchestrator.run().await.unwrap();
    let run = &report.run;

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.termination, Some(TerminationReason::StepBudgetExhausted));
    let indices: Vec<u32> = run.steps.iter().map(|s| s.index).collect();
    assert_eq!(indices, vec![1, 2, 3]);

    // Nothing changed on screen, so only the forced baseline and final step are kept.
    assert_eq!(run.steps[0].capture, CaptureDecision::Skipped);
    assert_eq!(run.steps[1].capture, CaptureDecision::Skipped);
    assert_eq!(run.steps[2].capture, CaptureDecision::Captured);
    let captured: Vec<u32> = run.captures.iter().map(|c| c.step).collect();
    assert_eq!(captured, vec![0, 3]);

    let descriptor = report.dataset.unwrap();
    assert_eq!(descriptor.steps, 3);
    assert_eq!(descriptor.reason.as_deref(), Some("step_budget_exhausted"));
}

#[tokio::test]
async fn malformed_replies_become_waits_and_the_run_still_succeeds() {
    let provider = ScriptedProvider::new(&[
        "Sorry, I am not sure what to do here.",
        r##"{"action_type": "teleport", "selector": "#x"}"##,
        DONE,
    ]);
    let h = harness(
        settings(task("Open the reports", &["never shown"])),
        ScriptedDriver::new(),
        provider,
    );

    let report = h.orchestrator.run().await.unwrap();
    let run = &report.run;

    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(run.steps.len(), 3);
    assert_eq!(run.steps[0].action, Action::Wait { millis: 1000 });
    assert!(run.steps[0]
        .rationale
        .starts_with("Parse error: no JSON object"));
    assert!(run.steps[1].rationale.contains("unknown action_type"));
    assert_eq!(run.steps[2].action, Action::Done);
    assert_eq!(run.steps[2].rationale, "task complete");
}

#[tokio::test]
async fn cancellation_is_honored_at_the_next_boundary() {
    let cancel = CancelFlag::new();
    let provider = ScriptedProvider::new(&[&click("#a"), &click("#b"), &click("#c")])
        .cancel_on(2, cancel.clone());
    let mut h = harness(
        settings(task("Wander around", &["never shown"])),
        ScriptedDriver::new(),
        provider,
    );
    h.orchestrator = h.orchestrator.with_cancel_flag(cancel);

    let report = h.orchestrator.run().await.unwrap();
    let run = &report.run;

    assert_eq!(run.status, RunStatus::Aborted);
    assert_eq!(run.termination, Some(TerminationReason::Cancelled));
    // The in-flight cycle completes and is recorded before stopping.
    assert_eq!(run.steps.len(), 2);
    assert_eq!(h.driver.dispatched().len(), 2);
    assert_eq!(run.captures.last().map(|c| (c.step, c.forced)), Some((2, true)));
    assert_eq!(h.capture.dataset(&run.id).unwrap().finalize_calls, 1);
}

#[tokio::test]
async fn driver_fatal_fails_immediately_but_keeps_the_partial_dataset() {
    let driver = ScriptedDriver::new()
        .on("#open", Screen::new(1, "https://demo.test/open", "Opened"))
        .fatal_on("#crash");
    let provider = ScriptedProvider::new(&[&click("#open"), &click("#crash"), DONE]);
    let h = harness(settings(task("Break things", &["never shown"])), driver, provider);

    let report = h.orchestrator.run().await.unwrap();
    let run = &report.run;

    assert_eq!(run.status, RunStatus::Failed);
    assert!(matches!(
        run.termination,
        Some(TerminationReason::DriverFatal { .. })
    ));
    assert_eq!(run.steps.len(), 1);
    assert_eq!(h.provider.requests().len(), 2);

    let dataset = h.capture.dataset(&run.id).unwrap();
    assert_eq!(dataset.finalize_calls, 1);
    assert_eq!(dataset.captures.len(), 2);
    assert_eq!(
        report.dataset.unwrap().reason.as_deref(),
        Some("driver_fatal")
    );
    assert!(!h.session.is_held());
}

#[tokio::test]
async fn failed_dispatch_is_recorded_and_reported_to_the_provider() {
    let driver = ScriptedDriver::new().missing("#ghost");
    let provider = ScriptedProvider::new(&[&click("#ghost"), DONE]);
    let h = harness(settings(task("Click the ghost", &["never shown"])), driver, provider);

    let report = h.orchestrator.run().await.unwrap();
    let run = &report.run;

    assert_eq!(run.status, RunStatus::Succeeded);
    assert!(matches!(
        &run.steps[0].outcome,
        ActionOutcome::Failed { reason } if reason.contains("not found")
    ));
    let second = &h.provider.requests()[1];
    assert_eq!(second.history.len(), 1);
    assert!(second.history[0].outcome.starts_with("failed"));
}

#[tokio::test]
async fn busy_session_rejects_a_second_run() {
    let h = harness(
        settings(task("Anything", &[]).with_step_budget(5)),
        ScriptedDriver::new(),
        ScriptedProvider::new(&[DONE]),
    );
    let _held = h.session.acquire().unwrap();

    let err = h.orchestrator.run().await.err().unwrap();

    assert!(matches!(err, FlowshotError::SessionBusy));
    assert!(h.capture.run_ids().is_empty());
    assert!(h.provider.requests().is_empty());
}

#[tokio::test]
async fn failed_login_finalizes_an_empty_run() {
    let driver = Arc::new(ScriptedDriver::new());
    let provider = Arc::new(ScriptedProvider::new(&[DONE]));
    let capture = Arc::new(flowshot::MemoryCapture::new());
    let orchestrator = Orchestrator::new(
        settings(task("Log in", &[]).with_step_budget(5)),
        driver.clone(),
        SessionLock::new(),
        gateway(provider.clone()),
        capture.clone(),
        Arc::new(LockedOutAdapter),
    );

    let report = orchestrator.run().await.unwrap();

    assert_eq!(report.run.status, RunStatus::Failed);
    assert!(matches!(
        report.run.termination,
        Some(TerminationReason::AuthenticationFailed { .. })
    ));
    assert!(report.run.steps.is_empty());
    assert!(provider.requests().is_empty());
    assert_eq!(capture.dataset(&report.run.id).unwrap().finalize_calls, 1);
}

#[tokio::test]
async fn event_stream_follows_the_run() {
    let driver = ScriptedDriver::new().on(
        "#open",
        Screen::new(1, "https://demo.test/open", "Opened"),
    );
    let provider = ScriptedProvider::new(&[&click("#open"), DONE]);
    let h = harness(settings(task("Open it", &["never shown"])), driver, provider);
    let mut rx = h.orchestrator.events().subscribe();

    let report = h.orchestrator.run().await.unwrap();

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert!(matches!(events.first(), Some(RunEvent::RunStarted { .. })));
    assert!(matches!(
        events.last(),
        Some(RunEvent::RunFinished {
            status: RunStatus::Succeeded,
            ..
        })
    ));
    let captured = events
        .iter()
        .filter(|e| matches!(e, RunEvent::StateCaptured { .. }))
        .count();
    let recorded = events
        .iter()
        .filter(|e| matches!(e, RunEvent::StepRecorded { .. }))
        .count();
    assert_eq!(captured, report.run.captures.len());
    assert_eq!(recorded, report.run.steps.len());
}

#[tokio::test]
async fn filesystem_store_receives_the_whole_run() {
    let dir = tempfile::tempdir().unwrap();
    let driver = Arc::new(ScriptedDriver::new().on(
        "#open",
        Screen::new(1, "https://demo.test/open", "Opened"),
    ));
    let provider = Arc::new(ScriptedProvider::new(&[&click("#open"), DONE]));
    let store: Arc<dyn StateCapture> = Arc::new(FsCaptureStore::new(dir.path()));
    let orchestrator = Orchestrator::new(
        settings(task("Open it", &["never shown"])),
        driver,
        SessionLock::new(),
        gateway(provider),
        store,
        adapter(),
    );

    let report = orchestrator.run().await.unwrap();

    let location = report.dataset.unwrap().location.unwrap();
    let run_dir = std::path::Path::new(&location);
    assert!(run_dir.starts_with(dir.path().join("demo")));
    assert!(run_dir.join("step_00_baseline.png").exists());
    assert!(run_dir.join("step_01_click.png").exists());
    assert!(run_dir.join("step_02_done.png").exists());

    let metadata: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(run_dir.join("metadata.json")).unwrap())
            .unwrap();
    assert_eq!(metadata["status"], "succeeded");
    assert_eq!(metadata["total_steps"], 2);

    let log = std::fs::read_to_string(run_dir.join("steps.jsonl")).unwrap();
    assert_eq!(log.lines().count(), 2);

    let readme = std::fs::read_to_string(run_dir.join("README.md")).unwrap();
    assert!(readme.contains("### Step 1: click"));
    assert!(readme.contains("- **Screenshot**: `step_01_click.png`"));
    assert!(readme.contains("### Step 2: done"));
}

#[tokio::test]
async fn login_that_never_answers_ends_as_authentication_failure() {
    let profile = AppProfile {
        base_url: "https://linear.test".into(),
        ..AppProfile::default()
    };
    let provider = Arc::new(ScriptedProvider::new(&[DONE]));
    let capture = Arc::new(flowshot::MemoryCapture::new());
    let mut settings = settings(TaskSpec::new("t1", "linear", "Open the inbox"));
    settings.driver_timeout = Duration::from_millis(200);
    settings.time_budget = Duration::from_secs(1);
    let orchestrator = Orchestrator::new(
        settings,
        Arc::new(HangingDriver),
        SessionLock::new(),
        gateway(provider.clone()),
        capture.clone(),
        Arc::new(LinearAdapter::new("linear", &profile)),
    )
    .with_credentials(Some(Credentials {
        email: "qa@linear.test".into(),
        password: Some("secret".into()),
    }));

    let started = Instant::now();
    let report = tokio::time::timeout(Duration::from_secs(5), orchestrator.run())
        .await
        .expect("login hung past the time budget")
        .unwrap();

    assert!(started.elapsed() <= Duration::from_millis(1500));
    assert_eq!(report.run.status, RunStatus::Failed);
    assert!(matches!(
        &report.run.termination,
        Some(TerminationReason::AuthenticationFailed { detail }) if detail.contains("timed out")
    ));
    assert!(provider.requests().is_empty());
    assert_eq!(capture.dataset(&report.run.id).unwrap().finalize_calls, 1);
}

#[tokio::test]
async fn task_step_budget_travels_with_the_task() {
    let provider = ScriptedProvider::new(&[&click("#a"), &click("#b"), &click("#c")]);
    let mut config = AppConfig::default();
    config.run.settle_delay_ms = 0;
    config.run.max_wait_ms = 5;
    let narrow = TaskSpec::new("narrow", "demo", "Wander around")
        .with_success_keywords(["never shown"])
        .with_step_budget(2);
    let h = harness(
        RunSettings::resolve(&config, &narrow),
        ScriptedDriver::new(),
        provider,
    );

    assert_eq!(h.orchestrator.settings().task.id, "narrow");
    let report = h.orchestrator.run().await.unwrap();

    assert_eq!(report.run.task_id, "narrow");
    assert_eq!(report.run.app, "demo");
    assert_eq!(report.run.steps.len(), 2);
    assert_eq!(
        report.run.termination,
        Some(TerminationReason::StepBudgetExhausted)
    );
}
