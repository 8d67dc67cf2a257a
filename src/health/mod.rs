//! # Health and availability reporting.
//!
//! [`HealthReporter`] owns the per-device flags and publishes them:
//!
//! ```text
//! {prefix}/{device}/availability   "online" | "offline"   retained
//! {prefix}/status                  HeartbeatPayload        retained
//! ```
//!
//! - availability goes online when the device starts, offline on shutdown or
//!   when a free-form device dies;
//! - status goes to `error` when a fault is published, back to `ok` on recovery;
//! - the heartbeat loop publishes every interval (first tick one interval after start);
//! - the session watcher republishes the heartbeat and every availability flag each
//!   time the connection comes back, overwriting the broker's crash sentinel.
//!
//! Publish failures are logged and reported as `ObservabilityFailed`, never returned.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::devices::{ROOT_LABEL, Registrations};
use crate::events::{Bus, Event, EventKind};
use crate::transport::{Connection, ConnectionState, Outbound, Topics};

mod heartbeat;

pub use heartbeat::{DeviceHealth, DeviceStatus, HeartbeatPayload};

#[derive(Debug, Clone, Copy, Default)]
struct Flags {
    status: DeviceStatus,
    online: bool,
}

type DeviceKey = Option<Arc<str>>;

/// Liveness flags of every device plus the process heartbeat.
pub struct HealthReporter {
    conn: Arc<dyn Connection>,
    topics: Topics,
    version: String,
    bus: Bus,
    started: Instant,
    devices: Mutex<BTreeMap<DeviceKey, Flags>>,
}

impl HealthReporter {
    /// Creates the reporter; every registration starts offline with status `ok`.
    pub fn new(
        conn: Arc<dyn Connection>,
        topics: Topics,
        version: impl Into<String>,
        bus: Bus,
        registrations: &Registrations,
    ) -> Self {
        let devices = registrations
            .iter()
            .map(|reg| (reg.name_arc(), Flags::default()))
            .collect();
        Self {
            conn,
            topics,
            version: version.into(),
            bus,
            started: Instant::now(),
            devices: Mutex::new(devices),
        }
    }

    /// Measures uptime from `at` instead of from construction.
    pub fn started_at(mut self, at: Instant) -> Self {
        self.started = at;
        self
    }

    fn devices(&self) -> MutexGuard<'_, BTreeMap<DeviceKey, Flags>> {
        self.devices.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn key(device: Option<&str>) -> DeviceKey {
        device.map(Arc::from)
    }

    /// Current status of a device.
    pub fn status(&self, device: Option<&str>) -> Option<DeviceStatus> {
        self.devices().get(&Self::key(device)).map(|f| f.status)
    }

    /// Current availability of a device.
    pub fn is_online(&self, device: Option<&str>) -> bool {
        self.devices()
            .get(&Self::key(device))
            .is_some_and(|f| f.online)
    }

    /// Sets the status; returns `true` if it changed.
    pub fn set_status(&self, device: Option<&str>, status: DeviceStatus) -> bool {
        let mut devices = self.devices();
        let flags = devices.entry(Self::key(device)).or_default();
        let changed = flags.status != status;
        flags.status = status;
        changed
    }

    /// Sets and publishes the availability of one device.
    pub async fn set_online(&self, device: Option<&str>, online: bool) {
        self.devices().entry(Self::key(device)).or_default().online = online;
        self.publish_availability(device, online).await;
    }

    /// Sets and publishes the availability of every device.
    pub async fn set_all_online(&self, online: bool) {
        let keys: Vec<DeviceKey> = {
            let mut devices = self.devices();
            devices.values_mut().for_each(|f| f.online = online);
            devices.keys().cloned().collect()
        };
        for key in keys {
            self.publish_availability(key.as_deref(), online).await;
        }
    }

    /// Snapshot of the aggregate heartbeat.
    pub fn heartbeat(&self) -> HeartbeatPayload {
        let devices = self
            .devices()
            .iter()
            .map(|(key, flags)| {
                let name = key.as_deref().unwrap_or(ROOT_LABEL).to_string();
                (name, DeviceHealth { status: flags.status })
            })
            .collect();
        HeartbeatPayload {
            status: heartbeat::ONLINE,
            uptime_s: self.started.elapsed().as_secs(),
            version: self.version.clone(),
            devices,
        }
    }

    /// Publishes the heartbeat once.
    pub async fn publish_heartbeat(&self) {
        let topic = self.topics.status();
        match Outbound::json(topic.as_str(), &self.heartbeat()) {
            Ok(msg) => self.send(msg.retained(), None).await,
            Err(e) => warn!(error = %e, "failed to encode heartbeat"),
        }
    }

    /// Republishes the heartbeat and every availability flag.
    pub async fn republish(&self) {
        self.publish_heartbeat().await;
        let flags: Vec<(DeviceKey, bool)> = self
            .devices()
            .iter()
            .map(|(k, f)| (k.clone(), f.online))
            .collect();
        for (key, online) in flags {
            self.publish_availability(key.as_deref(), online).await;
        }
    }

    async fn publish_availability(&self, device: Option<&str>, online: bool) {
        let msg = Outbound::new(
            self.topics.availability(device),
            heartbeat::availability(online),
        )
        .retained();
        self.send(msg, device).await;
    }

    async fn send(&self, msg: Outbound, device: Option<&str>) {
        let topic = msg.topic.clone();
        if let Err(e) = self.conn.send(msg).await {
            debug!(topic = %topic, error = %e, "health publish dropped");
            let mut ev = Event::new(EventKind::ObservabilityFailed)
                .with_reason(format!("{topic}: {e}"));
            if let Some(name) = device {
                ev = ev.with_device(name);
            }
            self.bus.publish(ev);
        }
    }

    /// Publishes the heartbeat every `every` until `token` is cancelled.
    pub async fn run_heartbeat(self: Arc<Self>, every: Duration, token: CancellationToken) {
        let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => self.publish_heartbeat().await,
            }
        }
        debug!("heartbeat loop stopped");
    }

    /// Republishes everything each time the session is re-established.
    ///
    /// Transitions that happened between taking `state` and calling this are
    /// not lost: a session that came back in that window is republished at once.
    pub async fn watch_sessions(
        self: Arc<Self>,
        mut state: watch::Receiver<ConnectionState>,
        token: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                changed = state.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    // Only real transitions notify, so seeing Connected here means
                    // the session went down and came back since the last look.
                    let connected = *state.borrow_and_update() == ConnectionState::Connected;
                    if connected {
                        info!("session re-established, republishing health");
                        self.republish().await;
                    }
                }
            }
        }
    }
}
