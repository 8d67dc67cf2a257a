//! Runtime events: types and broadcast bus.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `Orchestrator`, `Scheduler` and device loops, `ErrorReporter`,
//!   `HealthReporter`, `MqttConnection`, `SubscriberSet` workers (overflow/panic).
//! - **Consumers**: the orchestrator's subscriber listener (fans out to `SubscriberSet`)
//!   and the scheduler's `AliveTracker`.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
