use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::{Instant, sleep};

/// Request-unit token bucket refilled at a fixed rate per second.
///
/// Callers may overdraw the bucket; the debt is paid back by delaying the
/// caller, the way a client retry policy absorbs rate-limit responses.
pub struct CapacityBudget {
    ru_per_second: f64,
    state: Mutex<BucketState>,
    throttled: AtomicU64,
}

struct BucketState {
    available: f64,
    refilled_at: Instant,
}

impl CapacityBudget {
    /// Bucket holding at most one second worth of capacity, starting full.
    pub fn new(ru_per_second: f64) -> Self {
        let ru_per_second = ru_per_second.max(1.0);
        Self {
            ru_per_second,
            state: Mutex::new(BucketState {
                available: ru_per_second,
                refilled_at: Instant::now(),
            }),
            throttled: AtomicU64::new(0),
        }
    }

    pub fn ru_per_second(&self) -> f64 {
        self.ru_per_second
    }

    /// Deduct `charge` and return how long the caller has to wait.
    pub fn reserve(&self, charge: f64) -> Duration {
        let mut state = self.state.lock();
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(state.refilled_at).as_secs_f64();
        state.available = (state.available + elapsed * self.ru_per_second).min(self.ru_per_second);
        state.refilled_at = now;
        state.available -= charge.max(0.0);

        if state.available >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-state.available / self.ru_per_second)
        }
    }

    /// Deduct `charge`, sleeping while the bucket is in debt.
    pub async fn consume(&self, charge: f64) {
        let delay = self.reserve(charge);
        if !delay.is_zero() {
            self.throttled.fetch_add(1, Ordering::Relaxed);
            log::trace!("capacity budget exhausted, delaying {:?}", delay);
            sleep(delay).await;
        }
    }

    /// Number of callers that had to wait.
    pub fn throttled_requests(&self) -> u64 {
        self.throttled.load(Ordering::Relaxed)
    }
}
