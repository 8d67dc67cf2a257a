//! # Error reporter.
//!
//! Turns device faults into published error events, deduplicated per device by
//! classification through the caller's [`ErrorTracker`]:
//!
//! ```text
//! report(err) ──► tracker.observe(kind)
//!                   ├─ Publish  → status=error, send {prefix}/{dev}/error + {prefix}/error
//!                   └─ Suppress → local log only
//! recovered() ──► tracker.clear()
//!                   └─ Some → status=ok, log, optional recovery event
//! ```
//!
//! Nothing here returns an error: a failed publish is logged and dropped.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::devices::ROOT_LABEL;
use crate::error::DeviceError;
use crate::events::{Bus, Event, EventKind};
use crate::health::{DeviceStatus, HealthReporter};
use crate::transport::{Connection, Outbound, QoS, Topics};

use super::{ErrorPayload, ErrorTracker, RecoveryPayload, Verdict};

/// Publishes device faults and recoveries.
#[derive(Clone)]
pub struct ErrorReporter {
    conn: Arc<dyn Connection>,
    topics: Topics,
    bus: Bus,
    health: Arc<HealthReporter>,
    publish_recovery: bool,
}

impl ErrorReporter {
    /// Creates a reporter publishing through `conn`.
    pub fn new(
        conn: Arc<dyn Connection>,
        topics: Topics,
        bus: Bus,
        health: Arc<HealthReporter>,
        publish_recovery: bool,
    ) -> Self {
        Self {
            conn,
            topics,
            bus,
            health,
            publish_recovery,
        }
    }

    /// Handles one fault of `device`.
    pub async fn report(
        &self,
        tracker: &mut ErrorTracker,
        device: Option<&str>,
        err: &DeviceError,
    ) {
        let label = device.unwrap_or(ROOT_LABEL);
        match tracker.observe(err.kind()) {
            Verdict::Suppress { repeats } => {
                warn!(
                    device = label,
                    kind = err.kind(),
                    repeats,
                    error = err.message(),
                    "device fault repeated"
                );
                self.bus.publish(
                    Event::new(EventKind::ErrorSuppressed)
                        .with_device(label)
                        .with_reason(err.kind())
                        .with_attempt(repeats),
                );
            }
            Verdict::Publish => {
                warn!(device = label, kind = err.kind(), error = err.message(), "device fault");
                self.health.set_status(device, DeviceStatus::Error);
                self.publish(device, &ErrorPayload::new(device, err)).await;
                self.bus.publish(
                    Event::new(EventKind::ErrorPublished)
                        .with_device(label)
                        .with_reason(err.kind()),
                );
            }
        }
    }

    /// Handles a success of `device`; clears a pending classification, if any.
    pub async fn recovered(&self, tracker: &mut ErrorTracker, device: Option<&str>) {
        let Some(cleared) = tracker.clear() else {
            return;
        };
        let label = device.unwrap_or(ROOT_LABEL);
        info!(
            device = label,
            kind = %cleared.kind,
            suppressed = cleared.suppressed,
            "device recovered"
        );
        self.health.set_status(device, DeviceStatus::Ok);
        self.bus.publish(
            Event::new(EventKind::DeviceRecovered)
                .with_device(label)
                .with_reason(cleared.kind.as_str())
                .with_attempt(cleared.suppressed),
        );
        if self.publish_recovery {
            let payload = RecoveryPayload::new(device, &cleared.kind, cleared.suppressed);
            self.publish(device, &payload).await;
        }
    }

    /// Sends `payload` to the per-device and the aggregate error topics.
    ///
    /// The root device's topic is the aggregate one, so it is sent once.
    async fn publish<T: Serialize>(&self, device: Option<&str>, payload: &T) {
        let aggregate = self.topics.error();
        let own = self.topics.device_error(device);
        let targets = if own == aggregate {
            vec![aggregate]
        } else {
            vec![own, aggregate]
        };
        for topic in targets {
            let msg = match Outbound::json(topic.as_str(), payload) {
                Ok(msg) => msg.with_qos(QoS::AtLeastOnce),
                Err(e) => {
                    warn!(topic = %topic, error = %e, "failed to encode error event");
                    continue;
                }
            };
            if let Err(e) = self.conn.send(msg).await {
                debug!(topic = %topic, error = %e, "error event dropped");
                self.bus.publish(
                    Event::new(EventKind::ObservabilityFailed)
                        .with_device(device.unwrap_or(ROOT_LABEL))
                        .with_reason(format!("{topic}: {e}")),
                );
            }
        }
    }
}
