//! # Device declarations.
//!
//! Everything needed to describe devices before the orchestrator starts:
//!
//! - [`DeviceRegistry`] / [`Registrations`]: the registration table and its closed form;
//! - [`DeviceRegistration`], [`Archetype`], [`Telemetry`]: one device;
//! - [`Sample`], [`Command`], [`Routine`] and their closure adapters;
//! - [`Resources`]: typed collaborators handed to handlers;
//! - [`DeviceContext`]: runtime handle given to free-form routines.

mod context;
mod handler;
mod registration;
mod registry;
mod resources;

pub use context::DeviceContext;
pub use handler::{Command, CommandFn, Routine, RoutineFn, Sample, SampleFn};
pub use registration::{Archetype, DeviceRegistration, ROOT_LABEL, Telemetry};
pub use registry::{DeviceRegistry, Registrations};
pub use resources::{Provider, Resources};
