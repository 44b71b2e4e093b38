use std::future::Future;
use std::time::{Duration, Instant};

use crate::errors::FlowshotResult;
use crate::perception::types::Snapshot;

#[derive(Debug, Clone)]
pub struct StabilityConfig {
    pub max_wait: Duration,
    pub check_interval: Duration,
    /// Fingerprint distance under which two consecutive frames count as the same.
    pub tolerance: f64,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            max_wait: Duration::from_millis(5000),
            check_interval: Duration::from_millis(200),
            tolerance: 0.02,
        }
    }
}

#[derive(Debug)]
pub struct Settled {
    pub snapshot: Snapshot,
    pub stable: bool,
    pub frames: u32,
}

/// Polls `observe` until two consecutive frames agree or `max_wait` runs out.
/// The last frame is handed back either way so the caller never observes twice.
pub async fn wait_for_visual_stability<F, Fut>(
    mut observe: F,
    config: &StabilityConfig,
) -> FlowshotResult<Settled>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = FlowshotResult<Snapshot>>,
{
    let started = Instant::now();
    let mut previous = observe().await?;
    let mut frames = 1;

    while started.elapsed() < config.max_wait {
        tokio::time::sleep(config.check_interval).await;
        let current = observe().await?;
        frames += 1;

        let distance = current.fingerprint().distance(previous.fingerprint());
        if distance <= config.tolerance {
            tracing::debug!(elapsed = ?started.elapsed(), frames, "visual stability reached");
            return Ok(Settled {
                snapshot: current,
                stable: true,
                frames,
            });
        }
        previous = current;
    }

    tracing::warn!(elapsed = ?started.elapsed(), frames, "visual stability timeout");
    Ok(Settled {
        snapshot: previous,
        stable: false,
        frames,
    })
}
