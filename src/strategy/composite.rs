//! # Strategy composition.
//!
//! Both children always see every sample (no short-circuit), so counting and
//! timing children stay in step with the stream. When the composite publishes,
//! `on_published` reaches every descendant, not only the side that triggered it.

use serde_json::Value;

use super::Strategy;

/// Publishes if either child would publish (`a | b`).
pub struct AnyOf {
    left: Box<dyn Strategy>,
    right: Box<dyn Strategy>,
}

impl AnyOf {
    /// Combines two strategies with OR.
    pub fn new(left: Box<dyn Strategy>, right: Box<dyn Strategy>) -> Self {
        Self { left, right }
    }
}

impl Strategy for AnyOf {
    fn should_publish(&mut self, current: &Value, previous: Option<&Value>) -> bool {
        let l = self.left.should_publish(current, previous);
        let r = self.right.should_publish(current, previous);
        l || r
    }

    fn on_published(&mut self) {
        self.left.on_published();
        self.right.on_published();
    }
}

/// Publishes only if both children would publish (`a & b`).
pub struct AllOf {
    left: Box<dyn Strategy>,
    right: Box<dyn Strategy>,
}

impl AllOf {
    /// Combines two strategies with AND.
    pub fn new(left: Box<dyn Strategy>, right: Box<dyn Strategy>) -> Self {
        Self { left, right }
    }
}

impl Strategy for AllOf {
    fn should_publish(&mut self, current: &Value, previous: Option<&Value>) -> bool {
        let l = self.left.should_publish(current, previous);
        let r = self.right.should_publish(current, previous);
        l && r
    }

    fn on_published(&mut self) {
        self.left.on_published();
        self.right.on_published();
    }
}
