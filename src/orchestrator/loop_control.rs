use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::orchestrator::state::TerminationReason;

/// Host-side stop request, honored at the next cycle boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// What the loop knows at a cycle boundary.
#[derive(Debug, Clone, Copy, Default)]
pub struct BoundarySignals {
    pub goal_satisfied: bool,
    pub provider_done: bool,
    pub stuck_exhausted: bool,
}

pub struct LoopController {
    step_budget: u32,
    time_budget: Duration,
    started: Instant,
    cancel: CancelFlag,
}

impl LoopController {
    pub fn new(step_budget: u32, time_budget: Duration, cancel: CancelFlag) -> Self {
        Self {
            step_budget,
            time_budget,
            started: Instant::now(),
            cancel,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn steps_remaining(&self, steps_taken: u32) -> u32 {
        self.step_budget.saturating_sub(steps_taken)
    }

    /// Single termination check per boundary. Success outranks cancellation,
    /// which outranks every failure; among failures the stuck ceiling comes
    /// first, then the step budget, then the clock.
    pub fn check(&self, steps_taken: u32, signals: BoundarySignals) -> Option<TerminationReason> {
        if signals.goal_satisfied {
            return Some(TerminationReason::GoalSatisfied);
        }
        if signals.provider_done {
            return Some(TerminationReason::ProviderDone);
        }
        if self.cancel.is_cancelled() {
            return Some(TerminationReason::Cancelled);
        }
        if signals.stuck_exhausted {
            return Some(TerminationReason::NoProgressDetected);
        }
        if steps_taken >= self.step_budget {
            return Some(TerminationReason::StepBudgetExhausted);
        }
        if self.elapsed() >= self.time_budget {
            return Some(TerminationReason::TimeBudgetExhausted);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(steps: u32) -> LoopController {
        LoopController::new(steps, Duration::from_secs(600), CancelFlag::new())
    }

    #[test]
    fn step_budget_is_inclusive() {
        let ctl = controller(3);
        assert_eq!(ctl.check(2, BoundarySignals::default()), None);
        assert_eq!(
            ctl.check(3, BoundarySignals::default()),
            Some(TerminationReason::StepBudgetExhausted)
        );
    }

    #[test]
    fn goal_outranks_budget_and_stuck() {
        let ctl = controller(1);
        let signals = BoundarySignals {
            goal_satisfied: true,
            provider_done: true,
            stuck_exhausted: true,
        };
        assert_eq!(ctl.check(5, signals), Some(TerminationReason::GoalSatisfied));
    }

    #[test]
    fn cancellation_outranks_failures() {
        let cancel = CancelFlag::new();
        let ctl = LoopController::new(1, Duration::from_secs(1), cancel.clone());
        cancel.cancel();
        let signals = BoundarySignals {
            stuck_exhausted: true,
            ..Default::default()
        };
        assert_eq!(ctl.check(9, signals), Some(TerminationReason::Cancelled));
    }

    #[test]
    fn zero_time_budget_expires_immediately() {
        let ctl = LoopController::new(10, Duration::ZERO, CancelFlag::new());
        assert_eq!(
            ctl.check(0, BoundarySignals::default()),
            Some(TerminationReason::TimeBudgetExhausted)
        );
    }
}
