//! # devicevisor
//!
//! **Devicevisor** is a runtime for unattended daemons that bridge local devices
//! (sensors, actuators, background routines) to an MQTT broker.
//!
//! The application registers devices; the runtime owns the connection, runs every
//! device as a supervised task, decides when readings are worth sending, turns
//! handler faults into deduplicated error events and keeps health and availability
//! topics current, including a crash sentinel the broker publishes if the process
//! dies.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   DeviceRegistry ──close()──► Registrations
//!                                    │
//!                                    ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Orchestrator (Idle → Connecting → Running → Draining → Stopped)  │
//! │  - Connection (MQTT or in-memory; backoff, crash sentinel)        │
//! │  - HealthReporter (availability, heartbeat, session watcher)      │
//! │  - ErrorReporter (dedup, error topics, recovery)                  │
//! │  - Scheduler (one task per device, grace drain)                   │
//! └──────┬──────────────────┬──────────────────┬──────────────────────┘
//!        ▼                  ▼                  ▼
//!  ┌────────────┐     ┌────────────┐     ┌────────────┐
//!  │ telemetry  │     │  command   │     │ free-form  │
//!  │ sample →   │     │ inbound →  │     │ user loop  │
//!  │ strategy → │     │ handler →  │     │ + context  │
//!  │ publish    │     │ state      │     │            │
//!  └─────┬──────┘     └─────┬──────┘     └─────┬──────┘
//!        └───── publish(Event) ──► Bus ──► SubscriberSet ──► Subscribe::on_event
//! ```
//!
//! ### Topic layout
//! ```text
//! {prefix}/{device}/state          retained JSON reading
//! {prefix}/{device}/set            inbound commands
//! {prefix}/{device}/availability   "online" | "offline", retained
//! {prefix}/{device}/error          error events of one device
//! {prefix}/error                   error events of every device
//! {prefix}/status                  heartbeat, or "offline" after a crash
//! ```
//!
//! ## Features
//! | Area              | Description                                                  | Key types / traits                                  |
//! |-------------------|--------------------------------------------------------------|-----------------------------------------------------|
//! | **Devices**       | Telemetry, command and free-form archetypes.                 | [`DeviceRegistry`], [`Sample`], [`Command`], [`Routine`] |
//! | **Strategies**    | When a telemetry reading is published.                       | [`StrategySpec`], [`OnChangeSpec`]                  |
//! | **Transport**     | Broker connection with backoff and crash sentinel.           | [`Connection`], [`MemoryConnection`]                |
//! | **Orchestration** | Phases, hooks, ordered teardown.                             | [`Orchestrator`], [`Hook`]                          |
//! | **Subscriber API**| Hook into runtime events (logging, metrics, custom).         | [`Subscribe`], [`LogWriter`]                        |
//! | **Errors**        | Typed errors for configuration, transport and devices.       | [`ConfigError`], [`TransportError`], [`DeviceError`] |
//! | **Configuration** | TOML or in-code runtime settings.                            | [`RuntimeConfig`], [`BrokerConfig`]                 |
//!
//! ## Optional features
//! - `mqtt` (default): [`MqttConnection`] built on `rumqttc`.
//! - `logging` (default): [`logging`] helpers that install a `tracing-subscriber`.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use devicevisor::{
//!     DeviceError, DeviceRegistry, LogWriter, MemoryConnection, OnChangeSpec, Orchestrator,
//!     RuntimeConfig, SampleFn, StrategySpec, Telemetry,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut registry = DeviceRegistry::new();
//!     registry.telemetry(
//!         "soil",
//!         Telemetry::new(
//!             Duration::from_secs(10),
//!             SampleFn::arc(|| async { Ok::<_, DeviceError>(Some(serde_json::json!({"moisture": 41}))) }),
//!         )
//!         .with_strategy(StrategySpec::on_change(OnChangeSpec::threshold(2.0))),
//!     )?;
//!
//!     let mut cfg = RuntimeConfig::default();
//!     cfg.prefix = "greenhouse".into();
//!
//!     let orchestrator = Orchestrator::builder(cfg, Arc::new(MemoryConnection::new()), registry.close())
//!         .with_subscriber(Arc::new(LogWriter::new()))
//!         .handle_os_signals(false)
//!         .build();
//!
//!     // Stop right away; a daemon would keep running until SIGTERM.
//!     orchestrator.shutdown_token().cancel();
//!     orchestrator.run().await?;
//!     Ok(())
//! }
//! ```
mod core;
mod devices;
mod error;
mod events;
mod health;
mod observability;
mod policies;
mod scheduler;
mod strategy;
mod subscribers;
mod transport;

#[cfg(feature = "logging")]
pub mod logging;

// ---- Public re-exports ----

pub use core::{
    BrokerConfig, Hook, HookError, HookFn, Orchestrator, OrchestratorBuilder, Phase,
    RuntimeConfig, wait_for_shutdown_signal,
};
pub use devices::{
    Archetype, Command, CommandFn, DeviceContext, DeviceRegistration, DeviceRegistry, Provider,
    ROOT_LABEL, Registrations, Resources, Routine, RoutineFn, Sample, SampleFn, Telemetry,
};
pub use error::{ConfigError, DeviceError, RuntimeError, TransportError};
pub use events::{Bus, Event, EventKind};
pub use health::{DeviceHealth, DeviceStatus, HealthReporter, HeartbeatPayload};
pub use observability::{
    Cleared, ErrorPayload, ErrorReporter, ErrorTracker, RecoveryPayload, Verdict,
};
pub use policies::{BackoffPolicy, JitterPolicy};
pub use scheduler::{AliveTracker, DrainOutcome};
pub use strategy::{
    AllOf, Always, AnyOf, Clock, Every, ManualClock, OnChange, OnChangeSpec, Strategy,
    StrategySpec, SystemClock, Throttle,
};
pub use subscribers::{LogWriter, Subscribe, SubscriberSet};
pub use transport::{
    Connection, ConnectionState, Inbound, InboundSink, MemoryConnection, Outbound, QoS,
    Reconnector, Topics, Will, topic_matches,
};

// Optional: real broker transport.
// Enable with: `--features mqtt`
#[cfg(feature = "mqtt")]
pub use transport::MqttConnection;
