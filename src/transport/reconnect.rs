//! # Reconnect bookkeeping.
//!
//! [`Reconnector`] turns consecutive connect failures into sleep durations:
//! the `n`-th consecutive failure (1-based) waits `backoff.next(n - 1)`, i.e.
//! `min(first × factor^(n-1), max)` before jitter. The counter resets on success.

use std::time::Duration;

use crate::policies::BackoffPolicy;

/// Consecutive-failure counter paired with a backoff policy.
#[derive(Debug, Clone)]
pub struct Reconnector {
    policy: BackoffPolicy,
    failures: u32,
}

impl Reconnector {
    /// Creates a reconnector with zero recorded failures.
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            failures: 0,
        }
    }

    /// Records a failed attempt and returns how long to wait before the next one.
    pub fn on_failure(&mut self) -> Duration {
        let delay = self.policy.next(self.failures);
        self.failures = self.failures.saturating_add(1);
        delay
    }

    /// Records a successful attempt.
    pub fn on_success(&mut self) {
        self.failures = 0;
    }

    /// Consecutive failures since the last success.
    pub fn failures(&self) -> u32 {
        self.failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policies::JitterPolicy;

    #[test]
    fn counter_grows_and_resets() {
        let mut r = Reconnector::new(BackoffPolicy {
            first: Duration::from_secs(5),
            max: Duration::from_secs(300),
            factor: 2.0,
            jitter: JitterPolicy::None,
        });
        assert_eq!(r.on_failure(), Duration::from_secs(5));
        assert_eq!(r.on_failure(), Duration::from_secs(10));
        assert_eq!(r.on_failure(), Duration::from_secs(20));
        assert_eq!(r.failures(), 3);

        r.on_success();
        assert_eq!(r.failures(), 0);
        assert_eq!(r.on_failure(), Duration::from_secs(5));
    }
}
