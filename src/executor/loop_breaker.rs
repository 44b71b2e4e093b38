use std::collections::VecDeque;

use crate::config::LoopBreakerConfig;
use crate::orchestrator::state::{ActionKind, ActionSignature};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    /// The proposal repeats the same pair `repeats` times in a row, counting itself.
    Veto { repeats: usize },
}

/// Bounded action history plus the stuck counter.
#[derive(Debug)]
pub struct LoopBreaker {
    history: VecDeque<ActionSignature>,
    window: usize,
    repeat_ceiling: usize,
    stuck: u32,
    stuck_ceiling: u32,
    abandoned: Vec<ActionSignature>,
    pending_notice: Option<ActionSignature>,
}

impl LoopBreaker {
    pub fn new(config: &LoopBreakerConfig) -> Self {
        Self {
            history: VecDeque::with_capacity(config.window),
            window: config.window.max(1),
            repeat_ceiling: config.repeat_ceiling.max(2),
            stuck: 0,
            stuck_ceiling: config.stuck_ceiling,
            abandoned: Vec::new(),
            pending_notice: None,
        }
    }

    /// Checks `proposed` against the window, then records it. The proposal is
    /// what gets remembered even when it ends up overridden.
    pub fn evaluate(&mut self, proposed: ActionSignature) -> Verdict {
        let trailing = self
            .history
            .iter()
            .rev()
            .take_while(|entry| **entry == proposed)
            .count();

        let verdict = if proposed.0 != ActionKind::Done && trailing + 1 >= self.repeat_ceiling {
            self.stuck += 1;
            if !self.abandoned.contains(&proposed) {
                self.abandoned.push(proposed.clone());
            }
            self.pending_notice = Some(proposed.clone());
            tracing::warn!(
                action = %proposed.0,
                locator = proposed.1.as_deref().unwrap_or("-"),
                repeats = trailing + 1,
                stuck = self.stuck,
                "loop breaker veto"
            );
            Verdict::Veto {
                repeats: trailing + 1,
            }
        } else {
            Verdict::Allow
        };

        self.history.push_back(proposed);
        while self.history.len() > self.window {
            self.history.pop_front();
        }
        verdict
    }

    /// Counts a cycle that made no progress for reasons other than a veto.
    pub fn note_stuck(&mut self) {
        self.stuck += 1;
    }

    pub fn reset_stuck(&mut self) {
        if self.stuck > 0 {
            tracing::debug!(previous = self.stuck, "stuck counter reset");
        }
        self.stuck = 0;
    }

    pub fn stuck(&self) -> u32 {
        self.stuck
    }

    pub fn is_exhausted(&self) -> bool {
        self.stuck > self.stuck_ceiling
    }

    pub fn history(&self) -> impl Iterator<Item = &ActionSignature> {
        self.history.iter()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Notice for the next decision request after a veto. Consumed once.
    pub fn take_notice(&mut self) -> Option<String> {
        let (kind, locator) = self.pending_notice.take()?;
        let mut notice = format!(
            "The previous approach ({} {}) was abandoned after repeating without effect. Choose a different element or action.",
            kind,
            locator.as_deref().unwrap_or("without a target")
        );
        let vetoed: Vec<&str> = self
            .abandoned
            .iter()
            .filter_map(|(_, l)| l.as_deref())
            .collect();
        if !vetoed.is_empty() {
            notice.push_str(&format!(" Avoid: {}.", vetoed.join(", ")));
        }
        Some(notice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(window: usize, repeat_ceiling: usize, stuck_ceiling: u32) -> LoopBreakerConfig {
        LoopBreakerConfig {
            window,
            repeat_ceiling,
            stuck_ceiling,
        }
    }

    fn click(locator: &str) -> ActionSignature {
        (ActionKind::Click, Some(locator.to_string()))
    }

    #[test]
    fn vetoes_on_nth_consecutive_repeat() {
        let mut lb = LoopBreaker::new(&config(5, 3, 3));
        assert_eq!(lb.evaluate(click("#same")), Verdict::Allow);
        assert_eq!(lb.evaluate(click("#same")), Verdict::Allow);
        assert_eq!(lb.evaluate(click("#same")), Verdict::Veto { repeats: 3 });
        assert_eq!(lb.stuck(), 1);
    }

    #[test]
    fn interleaved_actions_reset_the_run() {
        let mut lb = LoopBreaker::new(&config(5, 3, 3));
        lb.evaluate(click("#a"));
        lb.evaluate(click("#a"));
        lb.evaluate(click("#b"));
        assert_eq!(lb.evaluate(click("#a")), Verdict::Allow);
        assert_eq!(lb.stuck(), 0);
    }

    #[test]
    fn history_never_exceeds_window() {
        let mut lb = LoopBreaker::new(&config(4, 3, 100));
        for i in 0..50 {
            lb.evaluate(click(&format!("#item-{}", i % 3)));
            assert!(lb.len() <= 4);
        }
        assert_eq!(lb.len(), 4);
    }

    #[test]
    fn exhaustion_is_strictly_beyond_ceiling() {
        let mut lb = LoopBreaker::new(&config(5, 3, 2));
        lb.note_stuck();
        lb.note_stuck();
        assert!(!lb.is_exhausted());
        lb.note_stuck();
        assert!(lb.is_exhausted());
        lb.reset_stuck();
        assert!(!lb.is_exhausted());
    }

    #[test]
    fn notice_is_consumed_once_and_names_locator() {
        let mut lb = LoopBreaker::new(&config(5, 2, 3));
        lb.evaluate(click("#stuck"));
        lb.evaluate(click("#stuck"));
        let notice = lb.take_notice().unwrap();
        assert!(notice.contains("click #stuck"));
        assert!(notice.contains("Avoid: #stuck"));
        assert!(lb.take_notice().is_none());
    }

    #[test]
    fn done_is_never_vetoed() {
        let mut lb = LoopBreaker::new(&config(5, 2, 3));
        lb.evaluate((ActionKind::Done, None));
        assert_eq!(lb.evaluate((ActionKind::Done, None)), Verdict::Allow);
    }
}
