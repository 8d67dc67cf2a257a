//! Wire shapes of error and recovery events.
//!
//! ```text
//! error:    {"error_type", "message", "device"?, "timestamp", "details"?}
//! recovery: {"recovered", "message", "device"?, "timestamp"}
//! ```
//!
//! `timestamp` is RFC 3339 UTC. `device` is omitted for the root device.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::DeviceError;

/// Structured error event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorPayload {
    /// Dedup classification.
    pub error_type: String,
    /// Human-readable message.
    pub message: String,
    /// Device name (absent for the root device).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    /// When the fault was reported.
    pub timestamp: DateTime<Utc>,
    /// Handler-provided details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Map<String, Value>>,
}

impl ErrorPayload {
    /// Builds the event for `err` raised by `device`.
    pub fn new(device: Option<&str>, err: &DeviceError) -> Self {
        Self {
            error_type: err.kind().to_string(),
            message: err.message().to_string(),
            device: device.map(str::to_string),
            timestamp: Utc::now(),
            details: err.details().cloned(),
        }
    }
}

/// Structured recovery event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoveryPayload {
    /// Classification that cleared.
    pub recovered: String,
    /// Human-readable message.
    pub message: String,
    /// Device name (absent for the root device).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    /// When the recovery was observed.
    pub timestamp: DateTime<Utc>,
}

impl RecoveryPayload {
    /// Builds the event for a cleared classification.
    pub fn new(device: Option<&str>, kind: &str, suppressed: u32) -> Self {
        Self {
            recovered: kind.to_string(),
            message: format!("recovered from {kind} after {} repeated fault(s)", suppressed + 1),
            device: device.map(str::to_string),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_shape() {
        let err = DeviceError::new("i2c_nack", "no ack").with_detail("addr", 64);
        let v = serde_json::to_value(ErrorPayload::new(Some("gauge"), &err)).unwrap();
        assert_eq!(v["error_type"], "i2c_nack");
        assert_eq!(v["message"], "no ack");
        assert_eq!(v["device"], "gauge");
        assert_eq!(v["details"]["addr"], 64);
        assert!(v["timestamp"].as_str().is_some_and(|t| t.contains('T')));
    }

    #[test]
    fn root_omits_optional_fields() {
        let err = DeviceError::new("x", "y");
        let v = serde_json::to_value(ErrorPayload::new(None, &err)).unwrap();
        let obj = v.as_object().unwrap();
        assert!(!obj.contains_key("device"));
        assert!(!obj.contains_key("details"));
    }
}
