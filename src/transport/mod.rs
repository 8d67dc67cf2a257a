//! # Broker transport.
//!
//! The runtime owns exactly one outbound connection per process. It is reached
//! through the [`Connection`] trait so the orchestrator can run against the real
//! MQTT client ([`MqttConnection`]) or the in-memory double ([`MemoryConnection`]).
//!
//! ## State machine
//! ```text
//! Disconnected ──connect()──► Connecting ──CONNACK──► Connected
//!                                 ▲  │                    │
//!                    backoff slept│  │attempt failed      │unexpected drop
//!                                 │  ▼                    ▼
//!                                 └─ (sleep) ◄────── Reconnecting
//!
//! any ──disconnect()──► Disconnected   (terminal)
//! ```
//!
//! ## Rules
//! - `connect()` blocks (retrying with [`BackoffPolicy`](crate::BackoffPolicy)) until the first success.
//! - Reconnection is unbounded; the failure counter resets on every success.
//! - `send()` outside `Connected` fails immediately with [`TransportError::NotConnected`];
//!   nothing is queued (at-most-once, fire-and-forget).
//! - `send()` is safe to call concurrently from every device task.
//! - The [`Will`] passed to `connect()` is the crash sentinel the broker publishes
//!   when the session drops without a clean disconnect.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use tokio::sync::{mpsc, watch};

use crate::error::TransportError;

pub mod memory;
#[cfg(feature = "mqtt")]
pub mod mqtt;
mod reconnect;
mod router;
mod topics;

pub use memory::MemoryConnection;
#[cfg(feature = "mqtt")]
pub use mqtt::MqttConnection;
pub use reconnect::Reconnector;
pub(crate) use router::Router;
pub use topics::{Topics, topic_matches};

/// Delivery guarantee requested for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QoS {
    /// Fire and forget.
    AtMostOnce,
    /// Acknowledged delivery, duplicates possible.
    #[default]
    AtLeastOnce,
    /// Exactly-once handshake.
    ExactlyOnce,
}

/// Broker session state. Owned by the connection, driven only by I/O outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not started yet, or closed with `disconnect()`.
    Disconnected,
    /// A connect attempt is in progress.
    Connecting,
    /// Session established.
    Connected,
    /// Session dropped unexpectedly; waiting for the next attempt.
    Reconnecting,
}

impl ConnectionState {
    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// A message to transmit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    /// Destination topic.
    pub topic: String,
    /// Raw payload.
    pub payload: Bytes,
    /// Ask the broker to keep this as the topic's retained message.
    pub retain: bool,
    /// Delivery level.
    pub qos: QoS,
}

impl Outbound {
    /// Creates a non-retained, at-least-once message.
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            retain: false,
            qos: QoS::AtLeastOnce,
        }
    }

    /// Creates a message with a JSON-encoded payload.
    pub fn json<T: Serialize + ?Sized>(
        topic: impl Into<String>,
        value: &T,
    ) -> Result<Self, TransportError> {
        let payload = serde_json::to_vec(value)?;
        Ok(Self::new(topic, payload))
    }

    /// Marks the message as retained.
    #[must_use]
    pub fn retained(mut self) -> Self {
        self.retain = true;
        self
    }

    /// Overrides the delivery level.
    #[must_use]
    pub fn with_qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }
}

/// Crash sentinel registered with the broker at connect time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Will {
    /// Topic the broker publishes to on an unclean drop.
    pub topic: String,
    /// Payload (e.g. `"offline"`).
    pub payload: Bytes,
    /// Whether the broker retains the sentinel.
    pub retain: bool,
    /// Delivery level.
    pub qos: QoS,
}

impl Will {
    /// Retained, at-least-once sentinel.
    pub fn retained(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            retain: true,
            qos: QoS::AtLeastOnce,
        }
    }
}

/// A message received from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    /// Topic the message arrived on.
    pub topic: String,
    /// Raw payload.
    pub payload: Bytes,
}

/// Where inbound messages for a subscription are delivered.
pub type InboundSink = mpsc::Sender<Inbound>;

/// # The single broker connection of the process.
///
/// Implementations must tolerate concurrent `send` calls from many tasks.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Establishes the session, retrying with backoff until the first success.
    ///
    /// `will` is registered as the crash sentinel.
    async fn connect(&self, will: Will) -> Result<(), TransportError>;

    /// Transmits one message. Fails immediately when not connected.
    async fn send(&self, msg: Outbound) -> Result<(), TransportError>;

    /// Registers `sink` for messages whose topic matches `pattern` (MQTT wildcards).
    ///
    /// Subscriptions survive reconnects.
    async fn subscribe(&self, pattern: &str, sink: InboundSink) -> Result<(), TransportError>;

    /// Closes the session cleanly (the crash sentinel is not published).
    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Watches session state transitions.
    fn watch_state(&self) -> watch::Receiver<ConnectionState>;

    /// Current session state.
    fn state(&self) -> ConnectionState {
        *self.watch_state().borrow()
    }
}

/// Shared state holder used by connection implementations.
#[derive(Debug)]
pub(crate) struct StateCell {
    tx: watch::Sender<ConnectionState>,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(ConnectionState::Disconnected);
        Self { tx }
    }

    /// Sets the new state; returns `true` if it changed.
    pub(crate) fn set(&self, next: ConnectionState) -> bool {
        self.tx.send_if_modified(|cur| {
            if *cur == next {
                false
            } else {
                *cur = next;
                true
            }
        })
    }

    pub(crate) fn get(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }

    /// Waits until the state is `Connected` (`Ok`) or `Disconnected` (`Err(Closed)`).
    pub(crate) async fn wait_connected(&self) -> Result<(), TransportError> {
        let mut rx = self.subscribe();
        let state = rx
            .wait_for(|s| matches!(s, ConnectionState::Connected | ConnectionState::Disconnected))
            .await
            .map_err(|_| TransportError::Closed)?;
        match *state {
            ConnectionState::Connected => Ok(()),
            _ => Err(TransportError::Closed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_builders() {
        let msg = Outbound::json("p/dev/state", &serde_json::json!({"t": 1}))
            .unwrap()
            .retained()
            .with_qos(QoS::AtMostOnce);
        assert_eq!(msg.payload, Bytes::from_static(br#"{"t":1}"#));
        assert!(msg.retain);
        assert_eq!(msg.qos, QoS::AtMostOnce);
    }

    #[test]
    fn state_cell_reports_changes_only() {
        let cell = StateCell::new();
        assert!(!cell.set(ConnectionState::Disconnected));
        assert!(cell.set(ConnectionState::Connecting));
        assert_eq!(cell.get(), ConnectionState::Connecting);
    }
}
