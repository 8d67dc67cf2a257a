//! # Device scheduler.
//!
//! Runs every registration as its own tokio task and drains them on shutdown.
//!
//! ## Architecture
//! ```text
//! Registrations ──► Scheduler::start()
//!                      │  per device: child token, DeviceStarting
//!                      ├─► telemetry::run   sample → strategy → publish → sleep
//!                      ├─► command::run     inbound → handler (one task per message)
//!                      └─► routine::run     user loop with DeviceContext
//!
//! Scheduler::drain(grace)
//!   ├─ cancel parent token (propagates to every device)
//!   ├─ join all within grace      → AllStoppedWithin
//!   └─ grace exceeded             → GraceExceeded{stuck}, abort remaining tasks
//! ```
//!
//! ## Rules
//! - A device task never propagates a fault: handler errors, panics and timeouts
//!   become [`DeviceError`]s handled by the error reporter.
//! - Within one device, sample → decide → publish never interleaves with another cycle.
//! - Strategy state and dedup state live on the device task's stack.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::devices::{Archetype, ROOT_LABEL, Registrations};
use crate::error::{DeviceError, TransportError, panic_message};
use crate::events::{Bus, Event, EventKind};
use crate::health::HealthReporter;
use crate::observability::ErrorReporter;
use crate::strategy::Clock;
use crate::transport::{Connection, Outbound, Topics};

mod alive;
mod command;
mod routine;
mod telemetry;

pub use alive::AliveTracker;

/// Inbound queue depth of a command device.
const COMMAND_QUEUE: usize = 64;

/// Everything a device task needs to talk to the outside world.
pub(crate) struct DeviceIo {
    pub(crate) conn: Arc<dyn Connection>,
    pub(crate) topics: Topics,
    pub(crate) bus: Bus,
    pub(crate) health: Arc<HealthReporter>,
    pub(crate) errors: ErrorReporter,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) alive: Arc<AliveTracker>,
}

impl DeviceIo {
    /// Publishes a reading to the device's retained state topic.
    ///
    /// Failures are logged and reported as `PublishDropped`.
    pub(crate) async fn publish_state(
        &self,
        device: Option<&str>,
        value: &Value,
    ) -> Result<(), TransportError> {
        let topic = self.topics.state(device);
        let sent = match Outbound::json(topic.as_str(), value) {
            Ok(msg) => self.conn.send(msg.retained()).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &sent {
            let label = device.unwrap_or(ROOT_LABEL);
            debug!(device = label, topic = %topic, error = %e, "state publish dropped");
            self.bus.publish(
                Event::new(EventKind::PublishDropped)
                    .with_device(label)
                    .with_reason(format!("{topic}: {e}")),
            );
        }
        sent
    }

    /// Publishes a lifecycle event and records it in the alive tracker.
    pub(crate) fn lifecycle(&self, ev: Event) {
        self.alive.update(&ev);
        self.bus.publish(ev);
    }
}

/// Runs a handler future with panic isolation and an optional time bound.
///
/// Panics become `"panic"` faults, elapsed bounds become `"timeout"` faults.
pub(crate) async fn guarded<T, F>(fut: F, limit: Option<Duration>) -> Result<T, DeviceError>
where
    F: Future<Output = Result<T, DeviceError>>,
{
    let caught = AssertUnwindSafe(fut).catch_unwind();
    let outcome = match limit {
        Some(limit) => tokio::time::timeout(limit, caught)
            .await
            .map_err(|_| DeviceError::timeout(limit))?,
        None => caught.await,
    };
    outcome.unwrap_or_else(|payload| Err(DeviceError::panic(panic_message(payload.as_ref()))))
}

/// How the device tasks ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every task exited within the grace period.
    Clean,
    /// The grace period ran out; these devices were aborted.
    Forced {
        /// Labels of the devices that did not stop in time.
        stuck: Vec<String>,
    },
}

/// Owns the device tasks of one orchestrator run.
pub(crate) struct Scheduler {
    io: Arc<DeviceIo>,
    token: CancellationToken,
    set: JoinSet<()>,
}

impl Scheduler {
    /// Creates a scheduler whose devices are cancelled with `parent`.
    pub(crate) fn new(io: Arc<DeviceIo>, parent: &CancellationToken) -> Self {
        Self {
            io,
            token: parent.child_token(),
            set: JoinSet::new(),
        }
    }

    /// Spawns one task per registration.
    ///
    /// Command devices are subscribed to their command topic first. A failed
    /// subscription is logged; the device still runs and the subscription is
    /// retried by the connection on the next session.
    pub(crate) async fn start(&mut self, registrations: &Registrations) {
        for reg in registrations {
            let name = reg.name_arc();
            let label = reg.label().to_string();
            let token = self.token.child_token();
            let io = Arc::clone(&self.io);

            match reg.archetype() {
                Archetype::Telemetry(spec) => {
                    io.lifecycle(Event::new(EventKind::DeviceStarting).with_device(label.as_str()));
                    self.set.spawn(telemetry::run(io, name, spec.clone(), token));
                }
                Archetype::Command(handler) => {
                    let topic = io.topics.set(name.as_deref());
                    let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
                    if let Err(e) = io.conn.subscribe(&topic, tx).await {
                        warn!(
                            device = %label,
                            topic = %topic,
                            error = %e,
                            "command subscription failed"
                        );
                    }
                    io.lifecycle(Event::new(EventKind::DeviceStarting).with_device(label.as_str()));
                    self.set
                        .spawn(command::run(io, name, Arc::clone(handler), rx, token));
                }
                Archetype::FreeForm(handler) => {
                    io.lifecycle(Event::new(EventKind::DeviceStarting).with_device(label.as_str()));
                    self.set.spawn(routine::run(io, name, Arc::clone(handler), token));
                }
            }
        }
    }

    /// Number of device tasks not yet joined.
    pub(crate) fn len(&self) -> usize {
        self.set.len()
    }

    /// Cancels every device and waits up to `grace` for them to exit.
    ///
    /// Devices still running after `grace` are aborted; this is reported, not fatal.
    pub(crate) async fn drain(mut self, grace: Duration) -> DrainOutcome {
        self.token.cancel();

        let set = &mut self.set;
        let joined = tokio::time::timeout(grace, async {
            while let Some(res) = set.join_next().await {
                log_join(res);
            }
        })
        .await;

        match joined {
            Ok(()) => {
                self.io.bus.publish(Event::new(EventKind::AllStoppedWithin));
                DrainOutcome::Clean
            }
            Err(_) => {
                let stuck = self.io.alive.snapshot();
                warn!(
                    grace_ms = grace.as_millis() as u64,
                    stuck = ?stuck,
                    "devices did not stop in time, aborting"
                );
                self.io.bus.publish(
                    Event::new(EventKind::GraceExceeded)
                        .with_reason(stuck.join(", "))
                        .with_delay(grace),
                );
                self.set.abort_all();
                while self.set.join_next().await.is_some() {}
                DrainOutcome::Forced { stuck }
            }
        }
    }
}

fn log_join(res: Result<(), tokio::task::JoinError>) {
    if let Err(e) = res {
        if e.is_panic() {
            error!(error = %e, "device task panicked outside its handler");
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Shared fixtures for scheduler and device tests.

    use super::*;
    use crate::devices::DeviceRegistry;
    use crate::strategy::SystemClock;
    use crate::transport::{MemoryConnection, Will};

    pub(crate) async fn io_for(
        registry: DeviceRegistry,
        publish_recovery: bool,
    ) -> (Arc<MemoryConnection>, Arc<DeviceIo>, Registrations) {
        let conn = Arc::new(MemoryConnection::new());
        conn.connect(Will::retained("farm/status", "offline"))
            .await
            .unwrap();
        let registrations = registry.close();
        let bus = Bus::new(256);
        let topics = Topics::new("farm");
        let health = Arc::new(HealthReporter::new(
            conn.clone(),
            topics.clone(),
            "test",
            bus.clone(),
            &registrations,
        ));
        let errors = ErrorReporter::new(
            conn.clone(),
            topics.clone(),
            bus.clone(),
            Arc::clone(&health),
            publish_recovery,
        );
        let io = Arc::new(DeviceIo {
            conn: conn.clone(),
            topics,
            bus,
            health,
            errors,
            clock: Arc::new(SystemClock),
            alive: Arc::new(AliveTracker::new()),
        });
        (conn, io, registrations)
    }
}
