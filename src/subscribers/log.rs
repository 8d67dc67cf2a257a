//! # LogWriter: renders runtime events as `tracing` records.
//!
//! Fault and recovery events are echoed at `debug`; the error reporter already
//! writes the authoritative record for those.
//!
//! ## Example output
//! ```text
//! INFO  devicevisor::events: connection state changed state="connected"
//! WARN  devicevisor::events: connection state changed state="reconnecting"
//! ERROR devicevisor::events: device failed permanently device="fan" error="panic: bearing seized"
//! WARN  devicevisor::events: grace exceeded, aborting devices stuck="fan"
//! ```

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

const TARGET: &str = "devicevisor::events";

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let device = e.device.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("-");
        match e.kind {
            EventKind::ConnectionStateChanged => {
                info!(target: TARGET, state = reason, "connection state changed");
            }
            EventKind::PublishDropped => {
                warn!(target: TARGET, device, error = reason, "publish dropped");
            }
            EventKind::DeviceStarting => {
                debug!(target: TARGET, device, "device starting");
            }
            EventKind::DeviceStopped => {
                debug!(target: TARGET, device, "device stopped");
            }
            EventKind::DeviceFailed => {
                error!(target: TARGET, device, error = reason, "device failed permanently");
            }
            EventKind::ErrorPublished => {
                debug!(target: TARGET, device, classification = reason, "device error published");
            }
            EventKind::ErrorSuppressed => {
                debug!(
                    target: TARGET,
                    device,
                    classification = reason,
                    repeats = e.attempt,
                    "repeated device error suppressed"
                );
            }
            EventKind::DeviceRecovered => {
                debug!(target: TARGET, device, classification = reason, "device recovered");
            }
            EventKind::ObservabilityFailed => {
                warn!(target: TARGET, device, error = reason, "observability publish failed");
            }
            EventKind::PhaseChanged => {
                info!(target: TARGET, phase = reason, "orchestrator phase changed");
            }
            EventKind::HookFailed => {
                error!(target: TARGET, hook = device, error = reason, "hook failed");
            }
            EventKind::ShutdownRequested => {
                info!(target: TARGET, "shutdown requested");
            }
            EventKind::AllStoppedWithin => {
                info!(target: TARGET, "all devices stopped within grace");
            }
            EventKind::GraceExceeded => {
                warn!(
                    target: TARGET,
                    stuck = reason,
                    grace_ms = e.delay_ms,
                    "grace exceeded, aborting devices"
                );
            }
            EventKind::SubscriberOverflow => {
                warn!(target: TARGET, subscriber = device, reason, "subscriber dropped event");
            }
            EventKind::SubscriberPanicked => {
                error!(target: TARGET, subscriber = device, info = reason, "subscriber panicked");
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
