use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

/// Time source for the limiter. Tests swap in a manual clock so waits are
/// observable without sleeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Enforces a minimum delay between consecutive remote calls, whichever
/// traversal branch issues them.
pub struct RateLimiter {
    clock: Arc<dyn Clock>,
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self::with_clock(min_interval, Arc::new(SystemClock))
    }

    pub fn with_clock(min_interval: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            min_interval,
            last_request: Mutex::new(None),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Blocks until the next request is permitted, then claims the slot.
    pub fn wait_turn(&self) {
        let mut last = self
            .last_request
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(previous) = *last {
            let elapsed = self.clock.now().saturating_duration_since(previous);
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                debug!(wait_ms = wait.as_millis() as u64, "rate limit wait");
                self.clock.sleep(wait);
            }
        }
        *last = Some(self.clock.now());
    }

    /// Sleeps on the limiter's clock, used for throttling back-off.
    pub fn pause(&self, duration: Duration) {
        self.clock.sleep(duration);
    }
}

/// Retry budget for throttled requests: attempt `n` (0-based) waits
/// `(n + 1) * step` before the next try.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            step: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.step.saturating_mul(attempt.saturating_add(1))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Clock that only moves when told to and records every sleep.
    pub(crate) struct ManualClock {
        start: Instant,
        offset: Mutex<Duration>,
        pub(crate) sleeps: Mutex<Vec<Duration>>,
    }

    impl ManualClock {
        pub(crate) fn new() -> Self {
            Self {
                start: Instant::now(),
                offset: Mutex::new(Duration::ZERO),
                sleeps: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn advance(&self, duration: Duration) {
            *self.offset.lock().expect("offset lock") += duration;
        }

        pub(crate) fn recorded_sleeps(&self) -> Vec<Duration> {
            self.sleeps.lock().expect("sleeps lock").clone()
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            self.start + *self.offset.lock().expect("offset lock")
        }

        fn sleep(&self, duration: Duration) {
            self.sleeps.lock().expect("sleeps lock").push(duration);
            self.advance(duration);
        }
    }

    #[test]
    fn first_request_does_not_wait() {
        let clock = Arc::new(ManualClock::new());
        let limiter = RateLimiter::with_clock(Duration::from_secs(2), clock.clone());

        limiter.wait_turn();

        assert!(clock.recorded_sleeps().is_empty());
    }

    #[test]
    fn back_to_back_requests_wait_for_remaining_interval() {
        let clock = Arc::new(ManualClock::new());
        let limiter = RateLimiter::with_clock(Duration::from_secs(2), clock.clone());

        limiter.wait_turn();
        clock.advance(Duration::from_millis(500));
        limiter.wait_turn();
        limiter.wait_turn();

        assert_eq!(
            clock.recorded_sleeps(),
            vec![Duration::from_millis(1500), Duration::from_secs(2)]
        );
    }

    #[test]
    fn requests_after_interval_do_not_wait() {
        let clock = Arc::new(ManualClock::new());
        let limiter = RateLimiter::with_clock(Duration::from_secs(2), clock.clone());

        limiter.wait_turn();
        clock.advance(Duration::from_secs(3));
        limiter.wait_turn();

        assert!(clock.recorded_sleeps().is_empty());
    }

    #[test]
    fn retry_delay_grows_linearly() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(5));
        assert_eq!(policy.delay_for(1), Duration::from_secs(10));
        assert_eq!(policy.delay_for(2), Duration::from_secs(15));
    }
}
