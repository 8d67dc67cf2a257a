//! # In-memory connection double.
//!
//! [`MemoryConnection`] behaves like a broker plus client in one process:
//! - keeps a log of every message the client sent and a retained-message store;
//! - fires the registered [`Will`] on [`MemoryConnection::drop_connection`];
//! - routes injected messages (and sent ones, like a broker would) to subscriptions;
//! - can simulate failing connect attempts (slept with the configured backoff)
//!   and rejected sends.
//!
//! It is public so downstream crates can test their devices against the real
//! orchestrator without a broker.
//!
//! ```rust
//! use devicevisor::{Connection, MemoryConnection, Outbound, Will};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let conn = MemoryConnection::new();
//! conn.connect(Will::retained("demo/status", "offline")).await.unwrap();
//! conn.send(Outbound::new("demo/status", "online").retained()).await.unwrap();
//!
//! conn.drop_connection();
//! assert_eq!(conn.retained_str("demo/status").as_deref(), Some("offline"));
//! # }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::watch;

use crate::error::TransportError;
use crate::policies::BackoffPolicy;

use super::{
    Connection, ConnectionState, Inbound, InboundSink, Outbound, Reconnector, Router, StateCell,
    Will,
};

#[derive(Default)]
struct Broker {
    will: Option<Will>,
    sent: Vec<Outbound>,
    retained: HashMap<String, Bytes>,
    wills_fired: u32,
}

/// In-memory [`Connection`] for tests and dry runs.
pub struct MemoryConnection {
    state: StateCell,
    router: Router,
    broker: Mutex<Broker>,
    reconnector: Mutex<Reconnector>,
    pending_failures: AtomicU32,
    connect_attempts: AtomicU32,
    reject_sends: AtomicBool,
    closed: AtomicBool,
}

impl Default for MemoryConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryConnection {
    /// Creates a disconnected double using the default backoff policy.
    pub fn new() -> Self {
        Self::with_backoff(BackoffPolicy::default())
    }

    /// Creates a disconnected double that sleeps `policy` delays between failed connects.
    pub fn with_backoff(policy: BackoffPolicy) -> Self {
        Self {
            state: StateCell::new(),
            router: Router::default(),
            broker: Mutex::new(Broker::default()),
            reconnector: Mutex::new(Reconnector::new(policy)),
            pending_failures: AtomicU32::new(0),
            connect_attempts: AtomicU32::new(0),
            reject_sends: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    fn broker(&self) -> MutexGuard<'_, Broker> {
        self.broker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes the next `n` connect attempts fail.
    pub fn fail_next_connects(&self, n: u32) {
        self.pending_failures.store(n, Ordering::SeqCst);
    }

    /// Makes every subsequent send fail with [`TransportError::Rejected`] while `reject` is set.
    pub fn reject_sends(&self, reject: bool) {
        self.reject_sends.store(reject, Ordering::SeqCst);
    }

    /// Number of connect attempts made so far (failed and successful).
    pub fn connect_attempts(&self) -> u32 {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    /// Simulates an unexpected session loss: the broker publishes the will.
    pub fn drop_connection(&self) {
        if self.state.get() != ConnectionState::Connected {
            return;
        }
        {
            let mut broker = self.broker();
            if let Some(will) = broker.will.clone() {
                if will.retain {
                    broker.retained.insert(will.topic.clone(), will.payload.clone());
                }
                broker.wills_fired += 1;
            }
        }
        self.state.set(ConnectionState::Reconnecting);
    }

    /// Simulates a successful reconnect after [`drop_connection`](Self::drop_connection).
    pub fn restore_connection(&self) {
        if self.state.get() != ConnectionState::Reconnecting {
            return;
        }
        self.state.set(ConnectionState::Connecting);
        self.state.set(ConnectionState::Connected);
    }

    /// Delivers an inbound message to matching subscriptions; returns the delivery count.
    pub fn inject(&self, topic: impl Into<String>, payload: impl Into<Bytes>) -> usize {
        self.router.route(&Inbound {
            topic: topic.into(),
            payload: payload.into(),
        })
    }

    /// Every message the client sent, in order.
    pub fn sent(&self) -> Vec<Outbound> {
        self.broker().sent.clone()
    }

    /// Messages the client sent to `topic`, in order.
    pub fn sent_to(&self, topic: &str) -> Vec<Outbound> {
        self.broker()
            .sent
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    /// UTF-8 payloads the client sent to `topic`, in order.
    pub fn payloads(&self, topic: &str) -> Vec<String> {
        self.sent_to(topic)
            .iter()
            .map(|m| String::from_utf8_lossy(&m.payload).into_owned())
            .collect()
    }

    /// Forgets the send log (retained store is kept).
    pub fn clear_sent(&self) {
        self.broker().sent.clear();
    }

    /// Current retained payload of `topic`.
    pub fn retained(&self, topic: &str) -> Option<Bytes> {
        self.broker().retained.get(topic).cloned()
    }

    /// Current retained payload of `topic` as text.
    pub fn retained_str(&self, topic: &str) -> Option<String> {
        self.retained(topic)
            .map(|b| String::from_utf8_lossy(&b).into_owned())
    }

    /// The crash sentinel registered at connect time.
    pub fn will(&self) -> Option<Will> {
        self.broker().will.clone()
    }

    /// How many times the broker fired the will.
    pub fn wills_fired(&self) -> u32 {
        self.broker().wills_fired
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn connect(&self, will: Will) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if self.state.get() != ConnectionState::Disconnected {
            return Err(TransportError::AlreadyStarted);
        }
        self.broker().will = Some(will);
        self.state.set(ConnectionState::Connecting);

        loop {
            self.connect_attempts.fetch_add(1, Ordering::SeqCst);
            let failed = self
                .pending_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if !failed {
                break;
            }
            let delay = self
                .reconnector
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .on_failure();
            tokio::time::sleep(delay).await;
            if self.closed.load(Ordering::SeqCst) {
                return Err(TransportError::Closed);
            }
        }

        self.reconnector
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .on_success();
        self.state.set(ConnectionState::Connected);
        Ok(())
    }

    async fn send(&self, msg: Outbound) -> Result<(), TransportError> {
        if self.state.get() != ConnectionState::Connected {
            return Err(TransportError::NotConnected);
        }
        if self.reject_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Rejected {
                reason: "rejected by memory connection".into(),
            });
        }
        {
            let mut broker = self.broker();
            if msg.retain {
                if msg.payload.is_empty() {
                    broker.retained.remove(&msg.topic);
                } else {
                    broker.retained.insert(msg.topic.clone(), msg.payload.clone());
                }
            }
            broker.sent.push(msg.clone());
        }
        self.router.route(&Inbound {
            topic: msg.topic,
            payload: msg.payload,
        });
        Ok(())
    }

    async fn subscribe(&self, pattern: &str, sink: InboundSink) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.router.add(pattern, sink);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        self.state.set(ConnectionState::Disconnected);
        Ok(())
    }

    fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policies::JitterPolicy;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn sentinel() -> Will {
        Will::retained("p/status", "offline")
    }

    #[tokio::test]
    async fn send_requires_connection() {
        let conn = MemoryConnection::new();
        let err = conn.send(Outbound::new("p/x", "1")).await.unwrap_err();
        assert_eq!(err, TransportError::NotConnected);

        conn.connect(sentinel()).await.unwrap();
        conn.send(Outbound::new("p/x", "1")).await.unwrap();
        assert_eq!(conn.payloads("p/x"), vec!["1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_retries_with_backoff() {
        let conn = MemoryConnection::with_backoff(BackoffPolicy {
            first: Duration::from_secs(2),
            max: Duration::from_secs(300),
            factor: 2.0,
            jitter: JitterPolicy::None,
        });
        conn.fail_next_connects(3);

        let start = tokio::time::Instant::now();
        conn.connect(sentinel()).await.unwrap();

        // 2s + 4s + 8s
        assert_eq!(start.elapsed(), Duration::from_secs(14));
        assert_eq!(conn.connect_attempts(), 4);
        assert_eq!(conn.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn unclean_drop_fires_will_clean_disconnect_does_not() {
        let conn = MemoryConnection::new();
        conn.connect(sentinel()).await.unwrap();
        conn.send(Outbound::new("p/status", "{}").retained()).await.unwrap();

        conn.drop_connection();
        assert_eq!(conn.state(), ConnectionState::Reconnecting);
        assert_eq!(conn.retained_str("p/status").as_deref(), Some("offline"));
        assert!(conn.send(Outbound::new("p/x", "1")).await.is_err());

        conn.restore_connection();
        assert_eq!(conn.state(), ConnectionState::Connected);
        conn.disconnect().await.unwrap();
        assert_eq!(conn.wills_fired(), 1);
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn injected_messages_reach_subscribers() {
        let conn = MemoryConnection::new();
        let (tx, mut rx) = mpsc::channel(4);
        conn.subscribe("p/+/set", tx).await.unwrap();
        assert_eq!(conn.inject("p/lamp/set", "on"), 1);
        assert_eq!(rx.recv().await.unwrap().payload, Bytes::from_static(b"on"));
    }
}
