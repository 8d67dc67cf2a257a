//! # Jitter policy for reconnect delays.
//!
//! [`JitterPolicy`] adds randomness to backoff delays so that a fleet of daemons
//! losing the same broker does not reconnect in lockstep.
//!
//! - [`JitterPolicy::None`]: no randomization, predictable delays
//! - [`JitterPolicy::Proportional`]: delay multiplied by a uniform factor in `[1 - r, 1 + r]`

use std::time::Duration;

use rand::Rng;
use serde::Deserialize;

/// Policy controlling randomization of retry delays.
///
/// In configuration files the policy is written as the ratio `r`
/// (`0` disables jitter, `0.2` means ±20%).
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(from = "f64")]
pub enum JitterPolicy {
    /// No jitter: use exact backoff delay.
    None,

    /// Multiply the delay by a uniformly random factor in `[1 - ratio, 1 + ratio]`.
    ///
    /// `ratio` is clamped to `[0, 1]`.
    Proportional(f64),
}

impl Default for JitterPolicy {
    /// Returns `Proportional(0.2)`: ±20% around the computed delay.
    fn default() -> Self {
        JitterPolicy::Proportional(0.2)
    }
}

impl From<f64> for JitterPolicy {
    fn from(ratio: f64) -> Self {
        if ratio.is_finite() && ratio > 0.0 {
            JitterPolicy::Proportional(ratio.min(1.0))
        } else {
            JitterPolicy::None
        }
    }
}

impl JitterPolicy {
    /// Applies jitter to the given delay.
    pub fn apply(&self, delay: Duration) -> Duration {
        match *self {
            JitterPolicy::None => delay,
            JitterPolicy::Proportional(ratio) => {
                let ratio = ratio.clamp(0.0, 1.0);
                if ratio == 0.0 || delay.is_zero() {
                    return delay;
                }
                let factor = rand::rng().random_range((1.0 - ratio)..=(1.0 + ratio));
                delay.mul_f64(factor)
            }
        }
    }

    /// Returns the `(min, max)` bounds a jittered `delay` can fall into.
    pub fn bounds(&self, delay: Duration) -> (Duration, Duration) {
        match *self {
            JitterPolicy::None => (delay, delay),
            JitterPolicy::Proportional(ratio) => {
                let ratio = ratio.clamp(0.0, 1.0);
                (delay.mul_f64(1.0 - ratio), delay.mul_f64(1.0 + ratio))
            }
        }
    }
}
