//! # Context handed to free-form routines.
//!
//! Gives a routine what the built-in loops use internally: the cancellation
//! token, its state topic, and the error reporter with its own dedup state.
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use devicevisor::{DeviceContext, DeviceError, RoutineFn};
//! use serde_json::json;
//!
//! let fan = RoutineFn::arc(|mut ctx: DeviceContext| async move {
//!     while ctx.sleep(Duration::from_secs(1)).await {
//!         match read_rpm().await {
//!             Ok(rpm) => {
//!                 ctx.recovered().await;
//!                 let _ = ctx.publish_state(&json!({"rpm": rpm})).await;
//!             }
//!             Err(e) => ctx.report(&e).await,
//!         }
//!     }
//!     Ok::<_, DeviceError>(())
//! });
//! # async fn read_rpm() -> Result<u32, DeviceError> { Ok(1200) }
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{DeviceError, TransportError};
use crate::observability::ErrorTracker;
use crate::scheduler::DeviceIo;

use super::ROOT_LABEL;

/// Per-device handle for free-form routines.
pub struct DeviceContext {
    io: Arc<DeviceIo>,
    name: Option<Arc<str>>,
    token: CancellationToken,
    tracker: ErrorTracker,
}

impl DeviceContext {
    pub(crate) fn new(io: Arc<DeviceIo>, name: Option<Arc<str>>, token: CancellationToken) -> Self {
        Self {
            io,
            name,
            token,
            tracker: ErrorTracker::new(),
        }
    }

    /// Device name; `None` for the root device.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Cancelled when the device must stop.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// True once shutdown started.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Completes when shutdown starts.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Sleeps for `duration`; returns `false` (early) if cancelled.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.token.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    /// Publishes `value` to the device's retained state topic.
    pub async fn publish_state(&self, value: &Value) -> Result<(), TransportError> {
        self.io.publish_state(self.name(), value).await
    }

    /// Reports a fault, deduplicated like the built-in loops.
    pub async fn report(&mut self, err: &DeviceError) {
        self.io.errors.report(&mut self.tracker, self.name.as_deref(), err).await;
    }

    /// Signals a successful operation; clears a pending fault classification.
    pub async fn recovered(&mut self) {
        self.io.errors.recovered(&mut self.tracker, self.name.as_deref()).await;
    }
}

impl fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceContext")
            .field("device", &self.name().unwrap_or(ROOT_LABEL))
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
