//! Runtime core: configuration, orchestration and lifecycle.
//!
//! The public API of this module is [`Orchestrator`] (built with
//! [`OrchestratorBuilder`]) and [`RuntimeConfig`].
//!
//! Internal modules:
//! - [`orchestrator`]: connect, start devices, wait for shutdown, ordered teardown;
//! - [`builder`]: optional subscribers, hooks, clock and shutdown token;
//! - [`hooks`]: start/shutdown callbacks;
//! - [`shutdown`]: cross-platform shutdown signal handling;
//! - [`config`]: runtime and broker configuration.

mod builder;
pub(crate) mod config;
mod hooks;
mod orchestrator;
mod shutdown;

pub use builder::OrchestratorBuilder;
pub use config::{BrokerConfig, RuntimeConfig};
pub use hooks::{Hook, HookError, HookFn};
pub use orchestrator::{Orchestrator, Phase};
pub use shutdown::wait_for_shutdown_signal;
