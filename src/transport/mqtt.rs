//! # MQTT connection built on `rumqttc`.
//!
//! ## Architecture
//! ```text
//!  device tasks ──send()──► AsyncClient (clone-safe request queue) ──┐
//!                                                                    ▼
//!                         driver task: loop { EventLoop::poll() }  ──► broker
//!                              │
//!                              ├─ ConnAck        → Connected, re-issue subscriptions, reset backoff
//!                              ├─ Publish        → Router → per-subscription sinks
//!                              ├─ Err(e)         → Reconnecting, sleep(backoff), Connecting
//!                              └─ Out Disconnect → exit (clean close)
//! ```
//!
//! `rumqttc` reconnects on the next `poll()` after an error; the driver only
//! decides how long to wait in between.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, EventLoop, LastWill, MqttOptions, Outgoing, Packet};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::{BrokerConfig, RuntimeConfig};
use crate::error::TransportError;
use crate::policies::BackoffPolicy;

use super::{
    Connection, ConnectionState, Inbound, InboundSink, Outbound, QoS, Reconnector, Router,
    StateCell, Will,
};

/// How long `disconnect()` waits for the DISCONNECT packet to be flushed.
const DISCONNECT_FLUSH: Duration = Duration::from_secs(2);

fn to_mqtt(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

/// State shared between the connection handle and its driver task.
struct Shared {
    state: StateCell,
    router: Router,
    closing: AtomicBool,
}

/// [`Connection`] to a real MQTT broker.
pub struct MqttConnection {
    broker: BrokerConfig,
    client_id: String,
    reconnect: BackoffPolicy,
    shared: Arc<Shared>,
    client: OnceLock<AsyncClient>,
    driver: Mutex<Option<JoinHandle<()>>>,
    token: CancellationToken,
}

impl MqttConnection {
    /// Creates an unconnected client for `broker`.
    pub fn new(
        broker: BrokerConfig,
        client_id: impl Into<String>,
        reconnect: BackoffPolicy,
    ) -> Self {
        Self {
            broker,
            client_id: client_id.into(),
            reconnect,
            shared: Arc::new(Shared {
                state: StateCell::new(),
                router: Router::default(),
                closing: AtomicBool::new(false),
            }),
            client: OnceLock::new(),
            driver: Mutex::new(None),
            token: CancellationToken::new(),
        }
    }

    /// Creates an unconnected client from the runtime configuration.
    pub fn from_config(cfg: &RuntimeConfig) -> Self {
        Self::new(cfg.broker.clone(), cfg.client_id(), cfg.reconnect)
    }

    fn options(&self, will: Will) -> MqttOptions {
        let mut opts = MqttOptions::new(&self.client_id, &self.broker.host, self.broker.port);
        opts.set_keep_alive(self.broker.keep_alive);
        opts.set_clean_session(self.broker.clean_session);
        if let Some(user) = &self.broker.username {
            opts.set_credentials(user, self.broker.password.as_deref().unwrap_or_default());
        }
        opts.set_last_will(LastWill::new(
            will.topic,
            will.payload.to_vec(),
            to_mqtt(will.qos),
            will.retain,
        ));
        opts
    }
}

#[async_trait]
impl Connection for MqttConnection {
    async fn connect(&self, will: Will) -> Result<(), TransportError> {
        if self.shared.closing.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let (client, eventloop) =
            AsyncClient::new(self.options(will), self.broker.request_capacity.max(1));
        if self.client.set(client.clone()).is_err() {
            return Err(TransportError::AlreadyStarted);
        }

        self.shared.state.set(ConnectionState::Connecting);
        info!(
            host = %self.broker.host,
            port = self.broker.port,
            client_id = %self.client_id,
            "connecting to broker"
        );

        let driver = Driver {
            eventloop,
            client,
            shared: Arc::clone(&self.shared),
            reconnector: Reconnector::new(self.reconnect),
            token: self.token.clone(),
        };
        let handle = tokio::spawn(driver.run());
        *self.driver.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        self.shared.state.wait_connected().await
    }

    async fn send(&self, msg: Outbound) -> Result<(), TransportError> {
        if self.shared.state.get() != ConnectionState::Connected {
            return Err(TransportError::NotConnected);
        }
        let client = self.client.get().ok_or(TransportError::NotConnected)?;
        client
            .publish_bytes(msg.topic, to_mqtt(msg.qos), msg.retain, msg.payload)
            .await
            .map_err(|e| TransportError::Rejected {
                reason: e.to_string(),
            })
    }

    async fn subscribe(&self, pattern: &str, sink: InboundSink) -> Result<(), TransportError> {
        if self.shared.closing.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.shared.router.add(pattern, sink);

        // Otherwise issued on the next CONNACK.
        if self.shared.state.get() == ConnectionState::Connected {
            if let Some(client) = self.client.get() {
                client
                    .subscribe(pattern, rumqttc::QoS::AtLeastOnce)
                    .await
                    .map_err(|e| TransportError::Rejected {
                        reason: e.to_string(),
                    })?;
            }
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.shared.closing.store(true, Ordering::SeqCst);

        if self.shared.state.get() == ConnectionState::Connected {
            if let Some(client) = self.client.get() {
                if let Err(e) = client.disconnect().await {
                    debug!(error = %e, "disconnect request not delivered");
                }
            }
        }

        let handle = self
            .driver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(DISCONNECT_FLUSH, &mut handle).await.is_err() {
                self.token.cancel();
                let _ = handle.await;
            }
        }
        self.token.cancel();
        self.shared.state.set(ConnectionState::Disconnected);
        info!("disconnected from broker");
        Ok(())
    }

    fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }
}

/// Owns the `rumqttc` event loop.
struct Driver {
    eventloop: EventLoop,
    client: AsyncClient,
    shared: Arc<Shared>,
    reconnector: Reconnector,
    token: CancellationToken,
}

impl Driver {
    async fn run(mut self) {
        loop {
            let polled = tokio::select! {
                _ = self.token.cancelled() => break,
                polled = self.eventloop.poll() => polled,
            };

            match polled {
                Ok(rumqttc::Event::Incoming(Packet::ConnAck(_))) => self.on_connected(),
                Ok(rumqttc::Event::Incoming(Packet::Publish(p))) => {
                    self.shared.router.route(&Inbound {
                        topic: p.topic.clone(),
                        payload: p.payload.clone(),
                    });
                }
                Ok(rumqttc::Event::Outgoing(Outgoing::Disconnect)) => {
                    if self.shared.closing.load(Ordering::SeqCst) {
                        break;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    if self.shared.closing.load(Ordering::SeqCst) {
                        break;
                    }
                    if self.shared.state.get() == ConnectionState::Connected {
                        self.shared.state.set(ConnectionState::Reconnecting);
                        warn!(error = %e, "broker session lost");
                    }

                    let delay = self.reconnector.on_failure();
                    warn!(
                        attempt = self.reconnector.failures(),
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "connect attempt failed, retrying"
                    );
                    tokio::select! {
                        _ = self.token.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    self.shared.state.set(ConnectionState::Connecting);
                }
            }
        }
        self.shared.state.set(ConnectionState::Disconnected);
    }

    fn on_connected(&mut self) {
        self.reconnector.on_success();
        for pattern in self.shared.router.patterns() {
            if let Err(e) = self
                .client
                .try_subscribe(pattern.as_str(), rumqttc::QoS::AtLeastOnce)
            {
                warn!(pattern = %pattern, error = %e, "failed to re-issue subscription");
            }
        }
        self.shared.state.set(ConnectionState::Connected);
        info!("broker session established");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qos_mapping() {
        assert_eq!(to_mqtt(QoS::AtMostOnce), rumqttc::QoS::AtMostOnce);
        assert_eq!(to_mqtt(QoS::AtLeastOnce), rumqttc::QoS::AtLeastOnce);
        assert_eq!(to_mqtt(QoS::ExactlyOnce), rumqttc::QoS::ExactlyOnce);
    }

    #[tokio::test]
    async fn send_before_connect_is_rejected() {
        let conn = MqttConnection::from_config(&RuntimeConfig::default());
        let err = conn.send(Outbound::new("p/x", "1")).await.unwrap_err();
        assert_eq!(err, TransportError::NotConnected);
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn disconnect_is_terminal() {
        let conn = MqttConnection::from_config(&RuntimeConfig::default());
        conn.disconnect().await.unwrap();
        let err = conn
            .connect(Will::retained("p/status", "offline"))
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::Closed);
    }
}
