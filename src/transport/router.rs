//! Demultiplexes inbound messages to subscription sinks by topic.

use std::sync::{PoisonError, RwLock};

use tokio::sync::mpsc::error::TrySendError;
use tracing::warn;

use super::{Inbound, InboundSink, topic_matches};

struct Route {
    pattern: String,
    sink: InboundSink,
}

/// Subscription table shared by connection implementations.
#[derive(Default)]
pub(crate) struct Router {
    routes: RwLock<Vec<Route>>,
}

impl Router {
    pub(crate) fn add(&self, pattern: &str, sink: InboundSink) {
        self.routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Route {
                pattern: pattern.to_string(),
                sink,
            });
    }

    /// Distinct patterns, in registration order.
    pub(crate) fn patterns(&self) -> Vec<String> {
        let routes = self.routes.read().unwrap_or_else(PoisonError::into_inner);
        let mut out: Vec<String> = Vec::with_capacity(routes.len());
        for r in routes.iter() {
            if !out.contains(&r.pattern) {
                out.push(r.pattern.clone());
            }
        }
        out
    }

    /// Delivers `msg` to every matching sink without waiting; returns the delivery count.
    ///
    /// A full sink drops the message for that subscriber only.
    pub(crate) fn route(&self, msg: &Inbound) -> usize {
        let routes = self.routes.read().unwrap_or_else(PoisonError::into_inner);
        let mut delivered = 0;
        for r in routes.iter().filter(|r| topic_matches(&r.pattern, &msg.topic)) {
            match r.sink.try_send(msg.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        topic = %msg.topic,
                        pattern = %r.pattern,
                        "inbound queue full, message dropped"
                    );
                }
                Err(TrySendError::Closed(_)) => {}
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tokio::sync::mpsc;

    #[test]
    fn routes_by_pattern() {
        let router = Router::default();
        let (a_tx, mut a_rx) = mpsc::channel(4);
        let (b_tx, mut b_rx) = mpsc::channel(4);
        router.add("p/a/set", a_tx.clone());
        router.add("p/+/set", b_tx);
        router.add("p/a/set", a_tx);
        assert_eq!(router.patterns(), vec!["p/a/set", "p/+/set"]);

        let msg = Inbound {
            topic: "p/a/set".into(),
            payload: Bytes::from_static(b"on"),
        };
        assert_eq!(router.route(&msg), 3);
        assert_eq!(a_rx.try_recv().unwrap(), msg);
        assert_eq!(b_rx.try_recv().unwrap(), msg);

        let other = Inbound {
            topic: "p/b/state".into(),
            payload: Bytes::new(),
        };
        assert_eq!(router.route(&other), 0);
    }
}
