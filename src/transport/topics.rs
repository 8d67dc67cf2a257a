//! # Topic layout.
//!
//! ```text
//! {prefix}/{device}/state          JSON, retained
//! {prefix}/{device}/set            inbound commands
//! {prefix}/{device}/availability   "online" | "offline", retained
//! {prefix}/{device}/error          error event, per device
//! {prefix}/error                   error event, aggregate
//! {prefix}/status                  crash sentinel or heartbeat, retained
//! ```
//!
//! The root device (no name) uses `{prefix}/state`, `{prefix}/set` and
//! `{prefix}/availability`; its per-device error topic coincides with the aggregate one.

use std::sync::Arc;

/// Builds every topic of the process from its prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    prefix: Arc<str>,
}

impl Topics {
    /// Creates the layout for the given prefix.
    pub fn new(prefix: impl Into<Arc<str>>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Process prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn device_topic(&self, device: Option<&str>, leaf: &str) -> String {
        match device {
            Some(name) => format!("{}/{}/{}", self.prefix, name, leaf),
            None => format!("{}/{}", self.prefix, leaf),
        }
    }

    /// Retained state topic of a device.
    pub fn state(&self, device: Option<&str>) -> String {
        self.device_topic(device, "state")
    }

    /// Command topic of a device.
    pub fn set(&self, device: Option<&str>) -> String {
        self.device_topic(device, "set")
    }

    /// Availability topic of a device.
    pub fn availability(&self, device: Option<&str>) -> String {
        self.device_topic(device, "availability")
    }

    /// Per-device error topic.
    pub fn device_error(&self, device: Option<&str>) -> String {
        self.device_topic(device, "error")
    }

    /// Aggregate error topic.
    pub fn error(&self) -> String {
        format!("{}/error", self.prefix)
    }

    /// Process status topic (crash sentinel / heartbeat).
    pub fn status(&self) -> String {
        format!("{}/status", self.prefix)
    }
}

/// Matches `topic` against an MQTT subscription `pattern`.
///
/// `+` matches exactly one level, a trailing `#` matches any remaining levels
/// (including none).
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    let mut pat = pattern.split('/');
    let mut top = topic.split('/');
    loop {
        match (pat.next(), top.next()) {
            (Some("#"), _) => return pat.next().is_none(),
            (Some("+"), Some(_)) => {}
            (Some(p), Some(t)) if p == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_and_root_layout() {
        let t = Topics::new("farm");
        assert_eq!(t.state(Some("pump")), "farm/pump/state");
        assert_eq!(t.set(Some("pump")), "farm/pump/set");
        assert_eq!(t.availability(None), "farm/availability");
        assert_eq!(t.state(None), "farm/state");
        assert_eq!(t.device_error(Some("pump")), "farm/pump/error");
        assert_eq!(t.device_error(None), t.error());
        assert_eq!(t.status(), "farm/status");
    }

    #[test]
    fn wildcards() {
        assert!(topic_matches("farm/+/set", "farm/pump/set"));
        assert!(!topic_matches("farm/+/set", "farm/pump/state"));
        assert!(topic_matches("farm/#", "farm"));
        assert!(topic_matches("farm/#", "farm/a/b/c"));
        assert!(topic_matches("farm/set", "farm/set"));
        assert!(!topic_matches("farm/set", "farm/set/x"));
        assert!(!topic_matches("farm/+", "farm"));
    }
}
