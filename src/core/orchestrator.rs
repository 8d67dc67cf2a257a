//! # Orchestrator: connection, device tasks and ordered teardown.
//!
//! ## Phases
//! ```text
//! Idle ──run()──► Connecting ──connected + start hooks ok──► Running
//!                    │                                          │ token / OS signal
//!                    │ config / hook / transport fault          ▼
//!                    └──────────────────────────────────────► Draining ──► Stopped
//! ```
//! A fault before `Running` goes straight to `Stopped` without starting devices.
//!
//! ## Startup
//! 1. validate config, spawn the event listener (Bus ─► SubscriberSet)
//! 2. connect with the crash sentinel (`{prefix}/status` = `"offline"`, retained)
//! 3. run start hooks (a failure aborts the run)
//! 4. availability `online` for every device, first heartbeat
//! 5. spawn device tasks, heartbeat loop and session watcher
//!
//! ## Teardown (strict order)
//! 1. stop heartbeat loop and session watcher
//! 2. cancel devices, wait up to `grace`, abort the rest
//! 3. shutdown hooks (failures reported, the rest still run)
//! 4. availability `offline` for every device
//! 5. clean disconnect (the broker does not fire the sentinel)
//! 6. flush subscribers
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use devicevisor::{
//!     DeviceError, DeviceRegistry, MemoryConnection, Orchestrator, Phase, RuntimeConfig,
//!     SampleFn, Telemetry,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut registry = DeviceRegistry::new();
//! registry.telemetry(
//!     "thermo",
//!     Telemetry::new(
//!         Duration::from_secs(5),
//!         SampleFn::arc(|| async { Ok::<_, DeviceError>(Some(serde_json::json!(21.5))) }),
//!     ),
//! )?;
//!
//! let mut cfg = RuntimeConfig::default();
//! cfg.prefix = "home".into();
//!
//! let conn = Arc::new(MemoryConnection::new());
//! let orchestrator = Orchestrator::builder(cfg, conn.clone(), registry.close())
//!     .handle_os_signals(false)
//!     .build();
//!
//! let token = orchestrator.shutdown_token();
//! let mut phase = orchestrator.phase();
//! tokio::spawn(async move {
//!     let _ = phase.wait_for(|p| *p == Phase::Running).await;
//!     tokio::time::sleep(Duration::from_millis(50)).await;
//!     token.cancel();
//! });
//!
//! orchestrator.run().await?;
//! assert_eq!(conn.retained_str("home/thermo/state").as_deref(), Some("21.5"));
//! assert_eq!(conn.retained_str("home/thermo/availability").as_deref(), Some("offline"));
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::devices::Registrations;
use crate::error::RuntimeError;
use crate::events::{Bus, Event, EventKind};
use crate::health::HealthReporter;
use crate::observability::ErrorReporter;
use crate::scheduler::{AliveTracker, DeviceIo, DrainOutcome, Scheduler};
use crate::strategy::Clock;
use crate::subscribers::{Subscribe, SubscriberSet};
use crate::transport::{Connection, ConnectionState, Topics, Will};

use super::builder::OrchestratorBuilder;
use super::config::RuntimeConfig;
use super::hooks::{Hook, run_hook};
use super::shutdown;

/// Sentinel payload the broker publishes on an unclean disconnect.
const SENTINEL: &str = "offline";

/// Lifecycle phase of an [`Orchestrator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Built, `run()` not called yet.
    Idle,
    /// Connecting to the broker and running start hooks.
    Connecting,
    /// Devices are running.
    Running,
    /// Teardown in progress.
    Draining,
    /// Terminal.
    Stopped,
}

impl Phase {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Connecting => "connecting",
            Phase::Running => "running",
            Phase::Draining => "draining",
            Phase::Stopped => "stopped",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Runs the devices of one process against one broker connection.
///
/// Built with [`Orchestrator::builder`]; [`run`](Self::run) may be called once.
pub struct Orchestrator {
    cfg: RuntimeConfig,
    conn: Arc<dyn Connection>,
    registrations: Registrations,
    subscribers: Mutex<Vec<Arc<dyn Subscribe>>>,
    start_hooks: Vec<Arc<dyn Hook>>,
    shutdown_hooks: Vec<Arc<dyn Hook>>,
    clock: Arc<dyn Clock>,
    os_signals: bool,
    shutdown: CancellationToken,
    phase: watch::Sender<Phase>,
    started: AtomicBool,
}

/// Background tasks that live for the `Running` phase.
struct Background {
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl Background {
    async fn stop(self) {
        self.token.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    error!(error = %e, "background task panicked");
                }
            }
        }
    }
}

impl Orchestrator {
    /// Starts building an orchestrator.
    pub fn builder(
        cfg: RuntimeConfig,
        conn: Arc<dyn Connection>,
        registrations: Registrations,
    ) -> OrchestratorBuilder {
        OrchestratorBuilder::new(cfg, conn, registrations)
    }

    #[allow(clippy::too_many_arguments)]
    pub(super) fn new_internal(
        cfg: RuntimeConfig,
        conn: Arc<dyn Connection>,
        registrations: Registrations,
        subscribers: Vec<Arc<dyn Subscribe>>,
        start_hooks: Vec<Arc<dyn Hook>>,
        shutdown_hooks: Vec<Arc<dyn Hook>>,
        clock: Arc<dyn Clock>,
        os_signals: bool,
        shutdown: CancellationToken,
    ) -> Self {
        let (phase, _) = watch::channel(Phase::Idle);
        Self {
            cfg,
            conn,
            registrations,
            subscribers: Mutex::new(subscribers),
            start_hooks,
            shutdown_hooks,
            clock,
            os_signals,
            shutdown,
            phase,
            started: AtomicBool::new(false),
        }
    }

    /// Token that stops a running orchestrator when cancelled.
    ///
    /// Cancelling it before `Running` aborts startup cleanly.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Watches the current phase.
    pub fn phase(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    /// Runtime configuration.
    pub fn config(&self) -> &RuntimeConfig {
        &self.cfg
    }

    /// Registered devices.
    pub fn registrations(&self) -> &Registrations {
        &self.registrations
    }

    /// Connects, runs every device until shutdown is requested, then tears down.
    ///
    /// Returns once the phase is `Stopped`. Faults before `Running` (invalid
    /// config, closed connection, failing start hook) are returned; a grace
    /// overrun during teardown is reported through events only.
    pub async fn run(&self) -> Result<(), RuntimeError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(RuntimeError::AlreadyStarted);
        }
        let started = Instant::now();
        if let Err(e) = self.cfg.validate() {
            error!(error = %e, "invalid configuration");
            self.phase.send_replace(Phase::Stopped);
            return Err(e.into());
        }

        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let subscribers = std::mem::take(
            &mut *self
                .subscribers
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        let listener_stop = CancellationToken::new();
        let listener = spawn_listener(
            &bus,
            SubscriberSet::new(subscribers, bus.clone()),
            listener_stop.clone(),
        );

        let result = self.drive(&bus, started).await;

        self.enter(&bus, Phase::Stopped);
        listener_stop.cancel();
        match listener.await {
            Ok(set) => set.shutdown().await,
            Err(e) => error!(error = %e, "event listener panicked"),
        }
        result
    }

    /// Everything between `Idle` and `Stopped`.
    async fn drive(&self, bus: &Bus, started: Instant) -> Result<(), RuntimeError> {
        let topics = Topics::new(self.cfg.prefix.as_str());

        self.enter(bus, Phase::Connecting);
        let state_watcher = spawn_state_watcher(self.conn.watch_state(), bus.clone());

        let will = Will::retained(topics.status(), SENTINEL);
        let connected = tokio::select! {
            res = self.conn.connect(will) => Some(res),
            _ = shutdown::requested(&self.shutdown, self.os_signals) => None,
        };
        match connected {
            Some(Ok(())) => info!(prefix = %topics.prefix(), "connected"),
            Some(Err(e)) => {
                error!(error = %e, "connect failed");
                state_watcher.stop().await;
                return Err(e.into());
            }
            None => {
                bus.publish(Event::new(EventKind::ShutdownRequested));
                info!("shutdown requested before the connection was established");
                self.disconnect().await;
                state_watcher.stop().await;
                return Ok(());
            }
        }

        // Taken now so a session lost and regained during startup is republished.
        let sessions = self.conn.watch_state();

        for hook in &self.start_hooks {
            if let Err(msg) = run_hook(hook.as_ref()).await {
                error!(hook = hook.name(), error = %msg, "start hook failed, aborting startup");
                bus.publish(
                    Event::new(EventKind::HookFailed)
                        .with_device(hook.name())
                        .with_reason(msg.as_str()),
                );
                self.disconnect().await;
                state_watcher.stop().await;
                return Err(RuntimeError::StartHook {
                    hook: hook.name().to_string(),
                    error: msg,
                });
            }
        }

        let health = Arc::new(
            HealthReporter::new(
                Arc::clone(&self.conn),
                topics.clone(),
                self.cfg.version.as_str(),
                bus.clone(),
                &self.registrations,
            )
            .started_at(started),
        );
        let errors = ErrorReporter::new(
            Arc::clone(&self.conn),
            topics.clone(),
            bus.clone(),
            Arc::clone(&health),
            self.cfg.publish_recovery,
        );
        let io = Arc::new(DeviceIo {
            conn: Arc::clone(&self.conn),
            topics,
            bus: bus.clone(),
            health: Arc::clone(&health),
            errors,
            clock: Arc::clone(&self.clock),
            alive: Arc::new(AliveTracker::new()),
        });

        health.set_all_online(true).await;
        health.publish_heartbeat().await;

        let mut scheduler = Scheduler::new(io, &CancellationToken::new());
        scheduler.start(&self.registrations).await;
        info!(devices = scheduler.len(), "devices started");

        let background = self.spawn_background(&health, sessions);
        self.enter(bus, Phase::Running);

        shutdown::requested(&self.shutdown, self.os_signals).await;
        bus.publish(Event::new(EventKind::ShutdownRequested));
        self.enter(bus, Phase::Draining);

        background.stop().await;

        if let DrainOutcome::Forced { stuck } = scheduler.drain(self.cfg.grace).await {
            warn!(stuck = ?stuck, "teardown continued after aborting devices");
        }

        for hook in &self.shutdown_hooks {
            if let Err(msg) = run_hook(hook.as_ref()).await {
                warn!(hook = hook.name(), error = %msg, "shutdown hook failed");
                bus.publish(
                    Event::new(EventKind::HookFailed)
                        .with_device(hook.name())
                        .with_reason(msg.as_str()),
                );
            }
        }

        health.set_all_online(false).await;
        self.disconnect().await;
        state_watcher.stop().await;
        Ok(())
    }

    fn spawn_background(
        &self,
        health: &Arc<HealthReporter>,
        sessions: watch::Receiver<ConnectionState>,
    ) -> Background {
        let token = CancellationToken::new();
        let mut handles = Vec::with_capacity(2);
        if let Some(every) = self.cfg.heartbeat {
            handles.push(tokio::spawn(
                Arc::clone(health).run_heartbeat(every, token.child_token()),
            ));
        }
        handles.push(tokio::spawn(
            Arc::clone(health).watch_sessions(sessions, token.child_token()),
        ));
        Background { token, handles }
    }

    async fn disconnect(&self) {
        if let Err(e) = self.conn.disconnect().await {
            warn!(error = %e, "disconnect failed");
        }
    }

    fn enter(&self, bus: &Bus, phase: Phase) {
        let prev = self.phase.send_replace(phase);
        if prev != phase {
            debug!(from = %prev, to = %phase, "phase transition");
            bus.publish(Event::new(EventKind::PhaseChanged).with_reason(phase.as_label()));
        }
    }
}

/// Forwards bus events to the subscriber set until `stop`, then hands the set back.
///
/// Events already queued when `stop` fires are still delivered.
fn spawn_listener(
    bus: &Bus,
    set: SubscriberSet,
    stop: CancellationToken,
) -> JoinHandle<SubscriberSet> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                ev = rx.recv() => match ev {
                    Ok(ev) => set.emit(&ev),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "event listener lagged, events lost");
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = stop.cancelled() => {
                    while let Ok(ev) = rx.try_recv() {
                        set.emit(&ev);
                    }
                    break;
                }
            }
        }
        set
    })
}

/// Publishes `ConnectionStateChanged` for every transition of the connection.
fn spawn_state_watcher(mut rx: watch::Receiver<ConnectionState>, bus: Bus) -> Background {
    let token = CancellationToken::new();
    let stop = token.clone();
    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                changed = rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = *rx.borrow_and_update();
                    bus.publish(
                        Event::new(EventKind::ConnectionStateChanged).with_reason(state.as_label()),
                    );
                }
            }
        }
    });
    Background {
        token,
        handles: vec![handle],
    }
}
