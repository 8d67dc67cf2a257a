//! Heartbeat payload published to `{prefix}/status`.
//!
//! ```json
//! {"status": "online", "uptime_s": 3600, "version": "1.4.0",
//!  "devices": {"pump": {"status": "ok"}, "$root": {"status": "error"}}}
//! ```
//!
//! The same topic carries the plain `"offline"` crash sentinel, so consumers
//! must accept both a bare string and this object.

use std::collections::BTreeMap;

use serde::Serialize;

/// Health of one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    /// No unrecovered fault.
    #[default]
    Ok,
    /// A fault was published and has not recovered yet.
    Error,
}

impl DeviceStatus {
    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            DeviceStatus::Ok => "ok",
            DeviceStatus::Error => "error",
        }
    }
}

/// Per-device entry of the heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceHealth {
    /// Current status.
    pub status: DeviceStatus,
}

/// Aggregate process heartbeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeartbeatPayload {
    /// Always `"online"` while the process runs.
    pub status: &'static str,
    /// Seconds since the reporter was created.
    pub uptime_s: u64,
    /// Process version.
    pub version: String,
    /// Device name (`"$root"` for the root device) → health.
    pub devices: BTreeMap<String, DeviceHealth>,
}

/// Availability payloads.
pub(crate) const ONLINE: &str = "online";
pub(crate) const OFFLINE: &str = "offline";

pub(crate) fn availability(online: bool) -> &'static str {
    if online { ONLINE } else { OFFLINE }
}
