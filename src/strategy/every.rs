//! # Throttle strategy.
//!
//! One strategy kind, two mutually exclusive variants:
//! - **time**: publish when at least `period` elapsed since the last publish;
//! - **count**: publish every `n`-th sample since the last publish.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;

use super::{Clock, Strategy};

/// Throttle parameters (declarative half of [`Every`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Throttle {
    /// Minimum time between publishes.
    Period(Duration),
    /// Publish every n-th sample.
    Samples(u64),
}

/// Runtime state of a throttle strategy.
pub struct Every {
    throttle: Throttle,
    clock: Arc<dyn Clock>,
    last_published: Option<Instant>,
    seen: u64,
}

impl Every {
    /// Creates a throttle bound to `clock` (only read by the time variant).
    pub fn new(throttle: Throttle, clock: Arc<dyn Clock>) -> Self {
        Self {
            throttle,
            clock,
            last_published: None,
            seen: 0,
        }
    }
}

impl Strategy for Every {
    fn should_publish(&mut self, _current: &Value, _previous: Option<&Value>) -> bool {
        match self.throttle {
            Throttle::Period(period) => match self.last_published {
                None => true,
                Some(last) => self.clock.now().saturating_duration_since(last) >= period,
            },
            Throttle::Samples(n) => {
                self.seen = self.seen.saturating_add(1);
                self.seen >= n
            }
        }
    }

    fn on_published(&mut self) {
        self.last_published = Some(self.clock.now());
        self.seen = 0;
    }
}
