//! # Error observability.
//!
//! - [`ErrorTracker`]: per-device dedup state (owned by the device task);
//! - [`ErrorReporter`]: publishes error/recovery events and updates health status;
//! - [`ErrorPayload`], [`RecoveryPayload`]: wire shapes.

mod payload;
mod reporter;
mod tracker;

pub use payload::{ErrorPayload, RecoveryPayload};
pub use reporter::ErrorReporter;
pub use tracker::{Cleared, ErrorTracker, Verdict};
