//! # Transmission strategies.
//!
//! A telemetry device samples on its own interval; a [`Strategy`] decides which of
//! those samples are actually transmitted.
//!
//! ## Declarative vs runtime
//! - [`StrategySpec`] is the immutable, cloneable description stored in a
//!   registration. It is validated when the device is registered.
//! - [`Strategy`] is the stateful instance built from it with
//!   [`StrategySpec::build`] when the device task starts. One instance per device,
//!   touched only by that device's loop.
//!
//! ## Built-ins
//! | Spec                          | Publishes when                                  |
//! |-------------------------------|-------------------------------------------------|
//! | [`StrategySpec::always`]      | every sample                                    |
//! | [`StrategySpec::every_period`]| at least `period` elapsed since last publish    |
//! | [`StrategySpec::every_samples`]| every n-th sample                              |
//! | [`StrategySpec::on_change`]   | current differs from the last published reading |
//! | `a \| b`                      | either side would publish                       |
//! | `a & b`                       | both sides would publish                        |
//!
//! ```rust
//! use std::time::Duration;
//! use devicevisor::{OnChangeSpec, StrategySpec};
//!
//! let spec = StrategySpec::on_change(OnChangeSpec::threshold(0.5).with_path("humidity", 2.0))
//!     | StrategySpec::every_period(Duration::from_secs(300));
//! assert!(spec.validate().is_ok());
//! ```
//!
//! The first sample of a device bypasses the strategy entirely; that rule lives in
//! the telemetry loop, which still calls [`Strategy::on_published`] afterwards.

use std::collections::HashMap;
use std::ops::{BitAnd, BitOr};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::error::ConfigError;

mod always;
mod clock;
mod composite;
mod every;
mod on_change;

pub use always::Always;
pub use clock::{Clock, ManualClock, SystemClock};
pub use composite::{AllOf, AnyOf};
pub use every::{Every, Throttle};
pub use on_change::OnChange;

/// Stateful publish decision for one device.
pub trait Strategy: Send {
    /// Returns `true` if `current` should be transmitted.
    ///
    /// `previous` is the last *published* reading, `None` before the first publish.
    fn should_publish(&mut self, current: &Value, previous: Option<&Value>) -> bool;

    /// Called after every successful publish so internal windows can reset.
    fn on_published(&mut self);
}

/// Parameters of an on-change strategy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OnChangeSpec {
    /// Dead-band applied to every numeric leaf without a path override.
    pub threshold: Option<f64>,
    /// Dead-bands by dotted path; take precedence over `threshold`.
    pub paths: HashMap<String, f64>,
}

impl OnChangeSpec {
    /// Exact comparison on every leaf.
    pub fn exact() -> Self {
        Self::default()
    }

    /// Global dead-band for numeric leaves.
    pub fn threshold(threshold: f64) -> Self {
        Self {
            threshold: Some(threshold),
            paths: HashMap::new(),
        }
    }

    /// Adds a dead-band for one leaf, addressed by dotted path.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>, threshold: f64) -> Self {
        self.paths.insert(path.into(), threshold);
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let bad = |t: f64| !t.is_finite() || t < 0.0;
        if self.threshold.is_some_and(bad) || self.paths.values().copied().any(bad) {
            return Err(ConfigError::InvalidValue {
                field: "threshold",
                reason: "must be a finite, non-negative number".into(),
            });
        }
        Ok(())
    }
}

/// Declarative description of a strategy tree.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum StrategySpec {
    /// Publish every sample.
    #[default]
    Always,
    /// Time or count throttle.
    Every(Throttle),
    /// Publish on significant change.
    OnChange(OnChangeSpec),
    /// Either side.
    AnyOf(Box<StrategySpec>, Box<StrategySpec>),
    /// Both sides.
    AllOf(Box<StrategySpec>, Box<StrategySpec>),
}

impl StrategySpec {
    /// Publish every sample.
    pub fn always() -> Self {
        StrategySpec::Always
    }

    /// Throttle by time *or* by sample count.
    ///
    /// Exactly one of the two must be given.
    ///
    /// # Errors
    /// - [`ConfigError::ConflictingThrottle`] if both are set;
    /// - [`ConfigError::MissingThrottle`] if neither is.
    pub fn every(period: Option<Duration>, samples: Option<u64>) -> Result<Self, ConfigError> {
        match (period, samples) {
            (Some(_), Some(_)) => Err(ConfigError::ConflictingThrottle),
            (None, None) => Err(ConfigError::MissingThrottle),
            (Some(p), None) => Ok(Self::every_period(p)),
            (None, Some(n)) => Ok(Self::every_samples(n)),
        }
    }

    /// Publish when at least `period` elapsed since the last publish.
    pub fn every_period(period: Duration) -> Self {
        StrategySpec::Every(Throttle::Period(period))
    }

    /// Publish every `n`-th sample.
    pub fn every_samples(n: u64) -> Self {
        StrategySpec::Every(Throttle::Samples(n))
    }

    /// Publish on significant change.
    pub fn on_change(spec: OnChangeSpec) -> Self {
        StrategySpec::OnChange(spec)
    }

    /// Checks parameters of the whole tree.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            StrategySpec::Always => Ok(()),
            StrategySpec::Every(Throttle::Period(p)) if p.is_zero() => {
                Err(ConfigError::InvalidValue {
                    field: "period",
                    reason: "must be greater than zero".into(),
                })
            }
            StrategySpec::Every(Throttle::Samples(0)) => Err(ConfigError::InvalidValue {
                field: "samples",
                reason: "must be at least 1".into(),
            }),
            StrategySpec::Every(_) => Ok(()),
            StrategySpec::OnChange(spec) => spec.validate(),
            StrategySpec::AnyOf(a, b) | StrategySpec::AllOf(a, b) => {
                a.validate()?;
                b.validate()
            }
        }
    }

    /// Instantiates fresh runtime state for one device.
    pub fn build(&self, clock: Arc<dyn Clock>) -> Box<dyn Strategy> {
        match self {
            StrategySpec::Always => Box::new(Always),
            StrategySpec::Every(throttle) => Box::new(Every::new(*throttle, clock)),
            StrategySpec::OnChange(spec) => {
                Box::new(OnChange::new(spec.threshold, spec.paths.clone()))
            }
            StrategySpec::AnyOf(a, b) => Box::new(AnyOf::new(
                a.build(Arc::clone(&clock)),
                b.build(clock),
            )),
            StrategySpec::AllOf(a, b) => Box::new(AllOf::new(
                a.build(Arc::clone(&clock)),
                b.build(clock),
            )),
        }
    }
}

impl BitOr for StrategySpec {
    type Output = StrategySpec;

    fn bitor(self, rhs: Self) -> Self::Output {
        StrategySpec::AnyOf(Box::new(self), Box::new(rhs))
    }
}

impl BitAnd for StrategySpec {
    type Output = StrategySpec;

    fn bitand(self, rhs: Self) -> Self::Output {
        StrategySpec::AllOf(Box::new(self), Box::new(rhs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    /// Drives a strategy the way the telemetry loop does (first sample bypasses).
    fn run(strategy: &mut dyn Strategy, readings: &[Value]) -> Vec<usize> {
        let mut last: Option<Value> = None;
        let mut published = Vec::new();
        for (i, reading) in readings.iter().enumerate() {
            let publish = last.is_none() || strategy.should_publish(reading, last.as_ref());
            if publish {
                strategy.on_published();
                last = Some(reading.clone());
                published.push(i);
            }
        }
        published
    }

    #[test]
    fn every_and_count_are_exclusive() {
        assert_eq!(
            StrategySpec::every(Some(Duration::from_secs(1)), Some(3)),
            Err(ConfigError::ConflictingThrottle)
        );
        assert_eq!(
            StrategySpec::every(None, None),
            Err(ConfigError::MissingThrottle)
        );
        assert_eq!(
            StrategySpec::every(None, Some(3)),
            Ok(StrategySpec::every_samples(3))
        );
    }

    #[test]
    fn validate_walks_composites() {
        let spec =
            StrategySpec::always() | (StrategySpec::every_samples(0) & StrategySpec::always());
        assert!(matches!(
            spec.validate(),
            Err(ConfigError::InvalidValue { field: "samples", .. })
        ));
        let spec = StrategySpec::on_change(OnChangeSpec::threshold(-1.0));
        assert!(spec.validate().is_err());
    }

    #[test]
    fn time_throttle_publishes_twice_over_301_seconds() {
        let clock = Arc::new(ManualClock::new());
        let mut strategy =
            StrategySpec::every_period(Duration::from_secs(300)).build(clock.clone());

        let mut published = Vec::new();
        let mut last: Option<Value> = None;
        for t in 0..=300u64 {
            let reading = json!(10);
            if last.is_none() || strategy.should_publish(&reading, last.as_ref()) {
                strategy.on_published();
                last = Some(reading);
                published.push(t);
            }
            clock.advance(Duration::from_secs(1));
        }
        assert_eq!(published, vec![0, 300]);
    }

    #[test]
    fn count_throttle_publishes_every_nth() {
        let mut strategy = StrategySpec::every_samples(3).build(Arc::new(SystemClock));
        let readings: Vec<Value> = (0..10).map(|i| json!(i)).collect();
        assert_eq!(run(strategy.as_mut(), &readings), vec![0, 3, 6, 9]);
    }

    #[test]
    fn dead_band_compares_with_last_published() {
        let mut strategy =
            StrategySpec::on_change(OnChangeSpec::threshold(0.5)).build(Arc::new(SystemClock));
        let readings = [json!(20.0), json!(20.4), json!(20.6), json!(21.2)];
        assert_eq!(run(strategy.as_mut(), &readings), vec![0, 2, 3]);
    }

    #[test]
    fn dead_band_boundary_is_strict() {
        let mut strategy = OnChange::new(Some(0.5), HashMap::new());
        assert!(!strategy.should_publish(&json!(10.5), Some(&json!(10.0))));
        assert!(strategy.should_publish(&json!(10.51), Some(&json!(10.0))));
        assert!(strategy.should_publish(&json!(1), None));
    }

    #[test]
    fn path_threshold_overrides_global() {
        let spec = OnChangeSpec::threshold(0.1).with_path("climate.humidity", 5.0);
        let mut strategy = OnChange::new(spec.threshold, spec.paths);
        let prev = json!({"climate": {"temp": 20.0, "humidity": 40.0}});

        let humid = json!({"climate": {"temp": 20.0, "humidity": 44.0}});
        assert!(!strategy.should_publish(&humid, Some(&prev)));

        let warm = json!({"climate": {"temp": 20.2, "humidity": 40.0}});
        assert!(strategy.should_publish(&warm, Some(&prev)));
    }

    #[test]
    fn array_items_are_addressed_by_index() {
        let spec = OnChangeSpec::exact().with_path("sensors.1", 1.0);
        let strategy = OnChange::new(spec.threshold, spec.paths);
        assert!(!strategy.differs(&json!({"sensors": [1, 2.5]}), &json!({"sensors": [1, 2]})));
        assert!(strategy.differs(&json!({"sensors": [1.5, 2]}), &json!({"sensors": [1, 2]})));
        assert!(strategy.differs(&json!({"sensors": [1]}), &json!({"sensors": [1, 2]})));
    }

    #[test]
    fn structure_changes_ignore_thresholds() {
        let strategy = OnChange::new(Some(1000.0), HashMap::new());
        let prev = json!({"a": 1, "b": {"c": 2}});
        assert!(strategy.differs(&json!({"a": 1, "b": {"c": 2, "d": 3}}), &prev));
        assert!(strategy.differs(&json!({"a": 1}), &prev));
        assert!(strategy.differs(&json!({"a": 1, "b": 2}), &prev));
        assert!(!strategy.differs(&json!({"a": 900, "b": {"c": 2}}), &prev));
    }

    #[test]
    fn leaves_without_threshold_use_exact_equality() {
        let strategy = OnChange::new(None, HashMap::new());
        assert!(!strategy.differs(&json!({"t": 1, "s": "on"}), &json!({"t": 1.0, "s": "on"})));
        assert!(strategy.differs(&json!({"t": 1, "s": "off"}), &json!({"t": 1, "s": "on"})));
        assert!(strategy.differs(&json!({"t": 1.0001}), &json!({"t": 1})));
    }

    /// Records every call it receives.
    struct Scripted {
        decision: bool,
        published: Arc<Mutex<u32>>,
    }

    impl Strategy for Scripted {
        fn should_publish(&mut self, _: &Value, _: Option<&Value>) -> bool {
            self.decision
        }

        fn on_published(&mut self) {
            *self.published.lock().unwrap() += 1;
        }
    }

    fn scripted(decision: bool) -> (Box<dyn Strategy>, Arc<Mutex<u32>>) {
        let count = Arc::new(Mutex::new(0));
        (
            Box::new(Scripted {
                decision,
                published: Arc::clone(&count),
            }),
            count,
        )
    }

    #[test]
    fn composites_notify_every_descendant() {
        let (a, a_count) = scripted(true);
        let (b, b_count) = scripted(false);
        let (c, c_count) = scripted(true);
        let mut tree = AnyOf::new(a, Box::new(AllOf::new(b, c)));

        assert!(tree.should_publish(&json!(1), Some(&json!(0))));
        tree.on_published();

        assert_eq!(*a_count.lock().unwrap(), 1);
        assert_eq!(*b_count.lock().unwrap(), 1);
        assert_eq!(*c_count.lock().unwrap(), 1);
    }

    #[test]
    fn and_requires_both_or_requires_one() {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let mut and = (StrategySpec::always() & StrategySpec::on_change(OnChangeSpec::exact()))
            .build(Arc::clone(&clock));
        assert!(!and.should_publish(&json!(1), Some(&json!(1))));
        assert!(and.should_publish(&json!(2), Some(&json!(1))));

        let mut or = (StrategySpec::every_samples(100)
            | StrategySpec::on_change(OnChangeSpec::exact()))
        .build(clock);
        assert!(!or.should_publish(&json!(1), Some(&json!(1))));
        assert!(or.should_publish(&json!(2), Some(&json!(1))));
    }

    #[test]
    fn composite_keeps_counting_child_in_step() {
        // on_change fires at sample 2; the count window must restart from there.
        let mut tree = (StrategySpec::every_samples(3)
            | StrategySpec::on_change(OnChangeSpec::exact()))
        .build(Arc::new(SystemClock));
        let readings = [json!(1), json!(1), json!(2), json!(2), json!(2), json!(2)];
        assert_eq!(run(tree.as_mut(), &readings), vec![0, 2, 5]);
    }
}
