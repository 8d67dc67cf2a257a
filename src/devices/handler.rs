//! # Device handlers and function-backed adapters.
//!
//! Each archetype has its own handler trait:
//! - [`Sample`]: called once per telemetry interval, returns a reading or `None`
//!   (nothing to report this cycle);
//! - [`Command`]: called once per inbound message on the device's command topic,
//!   may return a new state to publish;
//! - [`Routine`]: owns its own loop and must honor [`DeviceContext::token`].
//!
//! [`SampleFn`], [`CommandFn`] and [`RoutineFn`] wrap closures. The closure is
//! guarded by a [`Mutex`] held only while the future is created, not while it runs,
//! so `FnMut` closures work and command invocations still overlap.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use crate::error::DeviceError;

use super::DeviceContext;

/// Sampling handler of a telemetry device.
#[async_trait]
pub trait Sample: Send + Sync + 'static {
    /// Produces one reading. `Ok(None)` skips this cycle without counting as a fault.
    async fn sample(&self) -> Result<Option<Value>, DeviceError>;
}

/// Handler of a command device.
#[async_trait]
pub trait Command: Send + Sync + 'static {
    /// Handles one inbound payload. `Ok(Some(state))` is published to the state topic.
    async fn handle(&self, payload: Bytes) -> Result<Option<Value>, DeviceError>;
}

/// Body of a free-form device.
#[async_trait]
pub trait Routine: Send + Sync + 'static {
    /// Runs until `ctx.token()` is cancelled.
    ///
    /// Returning early (with or without an error) takes the device offline.
    async fn run(&self, ctx: DeviceContext) -> Result<(), DeviceError>;
}

/// Closure-backed [`Sample`].
///
/// ```rust
/// use devicevisor::{DeviceError, Sample, SampleFn};
/// use serde_json::json;
///
/// let sensor = SampleFn::arc(|| async { Ok::<_, DeviceError>(Some(json!({"t": 21.5}))) });
/// # let _: std::sync::Arc<dyn Sample> = sensor;
/// ```
pub struct SampleFn<F> {
    func: Mutex<F>,
}

impl<F, Fut> SampleFn<F>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Option<Value>, DeviceError>> + Send + 'static,
{
    /// Wraps a closure.
    pub fn new(func: F) -> Self {
        Self {
            func: Mutex::new(func),
        }
    }

    /// Wraps a closure into a shared handler.
    pub fn arc(func: F) -> Arc<dyn Sample> {
        Arc::new(Self::new(func))
    }
}

#[async_trait]
impl<F, Fut> Sample for SampleFn<F>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Option<Value>, DeviceError>> + Send + 'static,
{
    async fn sample(&self) -> Result<Option<Value>, DeviceError> {
        let fut = {
            let mut f = self.func.lock().unwrap_or_else(PoisonError::into_inner);
            (f)()
        };
        fut.await
    }
}

/// Closure-backed [`Command`].
pub struct CommandFn<F> {
    func: Mutex<F>,
}

impl<F, Fut> CommandFn<F>
where
    F: FnMut(Bytes) -> Fut + Send + 'static,
    Fut: Future<Output = Result<Option<Value>, DeviceError>> + Send + 'static,
{
    /// Wraps a closure.
    pub fn new(func: F) -> Self {
        Self {
            func: Mutex::new(func),
        }
    }

    /// Wraps a closure into a shared handler.
    pub fn arc(func: F) -> Arc<dyn Command> {
        Arc::new(Self::new(func))
    }
}

#[async_trait]
impl<F, Fut> Command for CommandFn<F>
where
    F: FnMut(Bytes) -> Fut + Send + 'static,
    Fut: Future<Output = Result<Option<Value>, DeviceError>> + Send + 'static,
{
    async fn handle(&self, payload: Bytes) -> Result<Option<Value>, DeviceError> {
        let fut = {
            let mut f = self.func.lock().unwrap_or_else(PoisonError::into_inner);
            (f)(payload)
        };
        fut.await
    }
}

/// Closure-backed [`Routine`].
pub struct RoutineFn<F> {
    func: Mutex<F>,
}

impl<F, Fut> RoutineFn<F>
where
    F: FnMut(DeviceContext) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), DeviceError>> + Send + 'static,
{
    /// Wraps a closure.
    pub fn new(func: F) -> Self {
        Self {
            func: Mutex::new(func),
        }
    }

    /// Wraps a closure into a shared handler.
    pub fn arc(func: F) -> Arc<dyn Routine> {
        Arc::new(Self::new(func))
    }
}

#[async_trait]
impl<F, Fut> Routine for RoutineFn<F>
where
    F: FnMut(DeviceContext) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), DeviceError>> + Send + 'static,
{
    async fn run(&self, ctx: DeviceContext) -> Result<(), DeviceError> {
        let fut = {
            let mut f = self.func.lock().unwrap_or_else(PoisonError::into_inner);
            (f)(ctx)
        };
        fut.await
    }
}
