//! # Backoff policy for broker reconnection.
//!
//! [`BackoffPolicy`] controls how reconnect delays grow after repeated failures.
//! It is parameterized by:
//! - [`BackoffPolicy::factor`] the multiplicative growth factor;
//! - [`BackoffPolicy::first`] the initial delay;
//! - [`BackoffPolicy::max`] the maximum delay cap.
//!
//! The delay for attempt `n` (0-indexed) is `first × factor^n`, clamped to `max`,
//! then jitter is applied. The base delay is derived purely from the attempt number,
//! so jitter output never feeds back into subsequent calculations.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use devicevisor::{BackoffPolicy, JitterPolicy};
//!
//! let backoff = BackoffPolicy {
//!     first: Duration::from_secs(2),
//!     max: Duration::from_secs(300),
//!     factor: 2.0,
//!     jitter: JitterPolicy::None,
//! };
//!
//! assert_eq!(backoff.next(0), Duration::from_secs(2));
//! assert_eq!(backoff.next(3), Duration::from_secs(16));
//! // 2s × 2^10 = 2048s → capped at max=300s
//! assert_eq!(backoff.next(10), Duration::from_secs(300));
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::core::config::secs;
use crate::error::ConfigError;
use crate::policies::jitter::JitterPolicy;

/// Retry backoff policy.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    /// Delay after the first failure.
    #[serde(with = "secs")]
    pub first: Duration,
    /// Maximum delay cap (applied before jitter).
    #[serde(with = "secs")]
    pub max: Duration,
    /// Multiplicative growth factor (`>= 1.0`).
    pub factor: f64,
    /// Jitter applied to the capped delay.
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// Returns a policy with:
    /// - `first = 2s`;
    /// - `factor = 2.0` (doubling);
    /// - `max = 300s`;
    /// - `jitter = ±20%`.
    fn default() -> Self {
        Self {
            first: Duration::from_secs(2),
            max: Duration::from_secs(300),
            factor: 2.0,
            jitter: JitterPolicy::default(),
        }
    }
}

impl BackoffPolicy {
    /// Computes the un-jittered delay for the given attempt number (0-indexed).
    ///
    /// `min(first × factor^attempt, max)`. Non-finite or negative intermediates clamp to `max`.
    pub fn base(&self, attempt: u32) -> Duration {
        let max_secs = self.max.as_secs_f64();
        let clamped_exp = attempt.min(i32::MAX as u32) as i32;
        let unclamped_secs = self.first.as_secs_f64() * self.factor.powi(clamped_exp);

        if !unclamped_secs.is_finite() || unclamped_secs < 0.0 || unclamped_secs > max_secs {
            self.max
        } else {
            Duration::from_secs_f64(unclamped_secs)
        }
    }

    /// Computes the jittered delay for the given attempt number (0-indexed).
    pub fn next(&self, attempt: u32) -> Duration {
        self.jitter.apply(self.base(attempt))
    }

    /// Checks the policy parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.first.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "reconnect.first",
                reason: "must be greater than zero".into(),
            });
        }
        if self.max < self.first {
            return Err(ConfigError::InvalidValue {
                field: "reconnect.max",
                reason: format!("{:?} is below first delay {:?}", self.max, self.first),
            });
        }
        if !self.factor.is_finite() || self.factor < 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "reconnect.factor",
                reason: format!("{} must be a finite number >= 1.0", self.factor),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(first: u64, max: u64) -> BackoffPolicy {
        BackoffPolicy {
            first: Duration::from_secs(first),
            max: Duration::from_secs(max),
            factor: 2.0,
            jitter: JitterPolicy::None,
        }
    }

    #[test]
    fn nth_failure_waits_base_times_two_to_n_minus_one() {
        let policy = plain(3, 300);
        for n in 1..=12u32 {
            let expected = (3.0 * 2f64.powi(n as i32 - 1)).min(300.0);
            assert_eq!(
                policy.next(n - 1),
                Duration::from_secs_f64(expected),
                "failure #{n}"
            );
        }
    }

    #[test]
    fn clamped_to_cap() {
        assert_eq!(plain(2, 300).next(8), Duration::from_secs(300));
    }

    #[test]
    fn overflow_clamps_to_cap() {
        assert_eq!(plain(2, 300).next(u32::MAX), Duration::from_secs(300));
    }

    #[test]
    fn jitter_keeps_delay_within_bounds() {
        let policy = BackoffPolicy::default();
        for attempt in 0..12 {
            let base = policy.base(attempt);
            let (lo, hi) = policy.jitter.bounds(base);
            for _ in 0..50 {
                let d = policy.next(attempt);
                assert!(d >= lo && d <= hi, "attempt {attempt}: {d:?} outside {lo:?}..{hi:?}");
            }
        }
    }

    #[test]
    fn validate_rejects_shrinking_factor() {
        let mut policy = plain(2, 300);
        policy.factor = 0.5;
        assert!(matches!(
            policy.validate(),
            Err(ConfigError::InvalidValue { field: "reconnect.factor", .. })
        ));
    }
}
