use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::devices::Registrations;
use crate::strategy::{Clock, SystemClock};
use crate::subscribers::Subscribe;
use crate::transport::Connection;

use super::config::RuntimeConfig;
use super::hooks::Hook;
use super::orchestrator::Orchestrator;

/// Builder for an [`Orchestrator`] with optional features.
pub struct OrchestratorBuilder {
    cfg: RuntimeConfig,
    conn: Arc<dyn Connection>,
    registrations: Registrations,
    subscribers: Vec<Arc<dyn Subscribe>>,
    start_hooks: Vec<Arc<dyn Hook>>,
    shutdown_hooks: Vec<Arc<dyn Hook>>,
    clock: Arc<dyn Clock>,
    os_signals: bool,
    shutdown: Option<CancellationToken>,
}

impl OrchestratorBuilder {
    /// Creates a builder for the given configuration, connection and devices.
    ///
    /// Defaults: no subscribers, no hooks, wall clock, OS signals handled.
    pub fn new(
        cfg: RuntimeConfig,
        conn: Arc<dyn Connection>,
        registrations: Registrations,
    ) -> Self {
        Self {
            cfg,
            conn,
            registrations,
            subscribers: Vec::new(),
            start_hooks: Vec::new(),
            shutdown_hooks: Vec::new(),
            clock: Arc::new(SystemClock),
            os_signals: true,
            shutdown: None,
        }
    }

    /// Sets event subscribers for observability.
    ///
    /// Subscribers receive runtime events (device lifecycle, faults, phases)
    /// through dedicated workers with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Adds one event subscriber.
    pub fn with_subscriber(mut self, subscriber: Arc<dyn Subscribe>) -> Self {
        self.subscribers.push(subscriber);
        self
    }

    /// Adds a hook that runs after connecting and before any device starts.
    ///
    /// Hooks run in insertion order; the first failure aborts the run.
    pub fn on_start(mut self, hook: Arc<dyn Hook>) -> Self {
        self.start_hooks.push(hook);
        self
    }

    /// Adds a hook that runs after every device stopped and before going offline.
    pub fn on_shutdown(mut self, hook: Arc<dyn Hook>) -> Self {
        self.shutdown_hooks.push(hook);
        self
    }

    /// Replaces the clock used by time-window strategies.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Uses `token` as the shutdown trigger instead of a fresh one.
    pub fn with_shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown = Some(token);
        self
    }

    /// Whether SIGINT/SIGTERM/SIGQUIT (Ctrl-C elsewhere) request shutdown.
    ///
    /// Disable in tests and when the embedding application owns signal handling.
    pub fn handle_os_signals(mut self, enabled: bool) -> Self {
        self.os_signals = enabled;
        self
    }

    /// Builds the orchestrator; nothing runs until [`Orchestrator::run`].
    pub fn build(self) -> Orchestrator {
        Orchestrator::new_internal(
            self.cfg,
            self.conn,
            self.registrations,
            self.subscribers,
            self.start_hooks,
            self.shutdown_hooks,
            self.clock,
            self.os_signals,
            self.shutdown.unwrap_or_default(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Phase;
    use crate::transport::MemoryConnection;

    #[test]
    fn injected_token_controls_shutdown() {
        let token = CancellationToken::new();
        let orch = OrchestratorBuilder::new(
            RuntimeConfig::default(),
            Arc::new(MemoryConnection::new()),
            Registrations::default(),
        )
        .with_shutdown_token(token.clone())
        .build();

        token.cancel();
        assert!(orch.shutdown_token().is_cancelled());
        assert_eq!(*orch.phase().borrow(), Phase::Idle);
    }
}
