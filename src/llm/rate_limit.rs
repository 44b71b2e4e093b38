use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Process-wide token bucket for decision-provider requests.
///
/// Shared between runs behind an `Arc`. Waiters queue on a fair mutex and the
/// holder sleeps until a token is available, so requests are served in
/// arrival order and no run can starve another.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    bucket: Mutex<Bucket>,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last: Instant,
}

impl RateLimiter {
    /// `requests_per_minute = 0` disables limiting.
    pub fn new(requests_per_minute: u32, burst: u32) -> Self {
        let capacity = f64::from(burst.max(1));
        Self {
            capacity,
            refill_per_sec: f64::from(requests_per_minute) / 60.0,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last: Instant::now(),
            }),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(0, 1)
    }

    pub fn is_unlimited(&self) -> bool {
        self.refill_per_sec <= 0.0
    }

    /// Waits for a token. Returns how long the holder slept for it, not
    /// counting time spent queued behind other callers.
    pub async fn acquire(&self) -> Duration {
        if self.is_unlimited() {
            return Duration::ZERO;
        }
        let mut bucket = self.bucket.lock().await;
        self.refill(&mut bucket);

        let mut waited = Duration::ZERO;
        if bucket.tokens < 1.0 {
            waited = Duration::from_secs_f64((1.0 - bucket.tokens) / self.refill_per_sec);
            tracing::debug!(wait_ms = waited.as_millis() as u64, "rate limiter holding request");
            tokio::time::sleep(waited).await;
            self.refill(&mut bucket);
        }
        bucket.tokens = (bucket.tokens - 1.0).max(0.0);
        waited
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        bucket.last = now;
    }
}
