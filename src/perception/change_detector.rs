use serde::{Deserialize, Serialize};

use crate::config::DetectorConfig;
use crate::perception::structural;
use crate::perception::types::Snapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonMethod {
    Hash,
    Structural,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictReason {
    Forced,
    Changed,
    Unchanged,
    /// One of the observations could not be taken; captured to be safe.
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChangeVerdict {
    pub capture: bool,
    /// Difference score: 0 identical, 1 unrelated.
    pub score: f64,
    pub method: ComparisonMethod,
    pub reason: VerdictReason,
}

#[derive(Debug, Clone)]
pub struct ChangeDetector {
    threshold: f64,
    band: f64,
}

impl ChangeDetector {
    pub fn new(config: &DetectorConfig) -> Self {
        Self {
            threshold: config.change_threshold,
            band: config.ambiguity_band,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn should_capture(
        &self,
        current: Option<&Snapshot>,
        baseline: Option<&Snapshot>,
        force: bool,
    ) -> ChangeVerdict {
        let (current, baseline) = match (current, baseline) {
            (Some(c), Some(b)) => (c, b),
            _ => {
                return ChangeVerdict {
                    capture: true,
                    score: 1.0,
                    method: ComparisonMethod::Hash,
                    reason: if force {
                        VerdictReason::Forced
                    } else {
                        VerdictReason::Unavailable
                    },
                }
            }
        };

        let (score, method) = self.score(current, baseline);
        let changed = score >= self.threshold;
        let reason = if force {
            VerdictReason::Forced
        } else if changed {
            VerdictReason::Changed
        } else {
            VerdictReason::Unchanged
        };
        tracing::debug!(score, ?method, threshold = self.threshold, changed, force, "change verdict");

        ChangeVerdict {
            capture: force || changed,
            score,
            method,
            reason,
        }
    }

    /// Fingerprint distance, or the structural difference when the distance
    /// lands inside the ambiguity band (inclusive) around the threshold.
    pub fn score(&self, current: &Snapshot, baseline: &Snapshot) -> (f64, ComparisonMethod) {
        let distance = current.fingerprint().distance(baseline.fingerprint());
        if self.is_ambiguous(distance) {
            let diff = structural::difference(current.structural_plane(), baseline.structural_plane());
            (diff, ComparisonMethod::Structural)
        } else {
            (distance, ComparisonMethod::Hash)
        }
    }

    pub fn is_ambiguous(&self, distance: f64) -> bool {
        (distance - self.threshold).abs() <= self.band + f64::EPSILON
    }
}
