use serde_json::Value;

use super::Strategy;

/// Publishes every sample. Default when no strategy is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct Always;

impl Strategy for Always {
    fn should_publish(&mut self, _current: &Value, _previous: Option<&Value>) -> bool {
        true
    }

    fn on_published(&mut self) {}
}
