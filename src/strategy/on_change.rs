//! # On-change strategy with numeric dead-band.
//!
//! Compares the current sample with the last published one, leaf by leaf:
//! - any structural difference (key added/removed, array length, type) is a change;
//! - non-numeric leaves use exact equality;
//! - numeric leaves with a threshold change only when `|current - previous| > threshold`
//!   (strictly greater, so a delta landing exactly on the boundary does not flap);
//! - numeric leaves without a threshold use exact equality.
//!
//! Thresholds are looked up by dotted path (`"climate.temp"`, array items by index
//! `"sensors.0"`), falling back to the global threshold. A scalar reading has the
//! empty path `""`.

use std::collections::HashMap;

use serde_json::{Number, Value};

use super::Strategy;

/// Runtime state of an on-change strategy.
#[derive(Debug, Clone)]
pub struct OnChange {
    threshold: Option<f64>,
    paths: HashMap<String, f64>,
}

impl OnChange {
    /// Creates the strategy with a global dead-band and per-path overrides.
    pub fn new(threshold: Option<f64>, paths: HashMap<String, f64>) -> Self {
        Self { threshold, paths }
    }

    fn threshold_for(&self, path: &str) -> Option<f64> {
        self.paths.get(path).copied().or(self.threshold)
    }

    fn numbers_differ(&self, path: &str, cur: &Number, prev: &Number) -> bool {
        match (cur.as_f64(), prev.as_f64()) {
            (Some(c), Some(p)) => match self.threshold_for(path) {
                Some(t) => (c - p).abs() > t,
                None => c != p,
            },
            _ => cur != prev,
        }
    }

    /// True if `current` differs significantly from `previous`.
    pub fn differs(&self, current: &Value, previous: &Value) -> bool {
        self.differs_at("", current, previous)
    }

    fn differs_at(&self, path: &str, cur: &Value, prev: &Value) -> bool {
        match (cur, prev) {
            (Value::Object(c), Value::Object(p)) => {
                if c.len() != p.len() || c.keys().any(|k| !p.contains_key(k)) {
                    return true;
                }
                c.iter().any(|(key, cv)| {
                    p.get(key)
                        .is_none_or(|pv| self.differs_at(&join(path, key), cv, pv))
                })
            }
            (Value::Array(c), Value::Array(p)) => {
                c.len() != p.len()
                    || c.iter()
                        .zip(p)
                        .enumerate()
                        .any(|(i, (cv, pv))| self.differs_at(&join(path, &i.to_string()), cv, pv))
            }
            (Value::Number(c), Value::Number(p)) => self.numbers_differ(path, c, p),
            (c, p) => c != p,
        }
    }
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

impl Strategy for OnChange {
    fn should_publish(&mut self, current: &Value, previous: Option<&Value>) -> bool {
        previous.is_none_or(|prev| self.differs(current, prev))
    }

    fn on_published(&mut self) {}
}
