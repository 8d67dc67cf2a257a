//! # Start and shutdown hooks.
//!
//! Hooks run application code at fixed points of the orchestrator lifecycle:
//!
//! - start hooks run after the first successful connect and before any device
//!   starts; a failing start hook aborts the run;
//! - shutdown hooks run after every device task has stopped (or was aborted) and
//!   before availability goes offline; failures are reported and the remaining
//!   hooks still run.
//!
//! Hooks are panic-isolated: a panic counts as a failure.

use std::borrow::Cow;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use futures::FutureExt;

use crate::error::panic_message;

/// Error type returned by hooks.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Lifecycle callback.
#[async_trait]
pub trait Hook: Send + Sync + 'static {
    /// Stable name for logs and events.
    fn name(&self) -> &str;

    /// Runs the hook once.
    async fn call(&self) -> Result<(), HookError>;
}

/// Closure-backed [`Hook`].
///
/// ```rust
/// use devicevisor::{Hook, HookError, HookFn};
///
/// let close_bus = HookFn::arc("close-i2c", || async { Ok::<_, HookError>(()) });
/// assert_eq!(close_bus.name(), "close-i2c");
/// ```
pub struct HookFn<F> {
    name: Cow<'static, str>,
    func: Mutex<F>,
}

impl<F, Fut> HookFn<F>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), HookError>> + Send + 'static,
{
    /// Wraps a closure.
    pub fn new(name: impl Into<Cow<'static, str>>, func: F) -> Self {
        Self {
            name: name.into(),
            func: Mutex::new(func),
        }
    }

    /// Wraps a closure into a shared hook.
    pub fn arc(name: impl Into<Cow<'static, str>>, func: F) -> Arc<dyn Hook> {
        Arc::new(Self::new(name, func))
    }
}

#[async_trait]
impl<F, Fut> Hook for HookFn<F>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), HookError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self) -> Result<(), HookError> {
        let fut = {
            let mut f = self.func.lock().unwrap_or_else(PoisonError::into_inner);
            (f)()
        };
        fut.await
    }
}

/// Runs `hook`, turning errors and panics into a message.
pub(crate) async fn run_hook(hook: &dyn Hook) -> Result<(), String> {
    match AssertUnwindSafe(hook.call()).catch_unwind().await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(payload) => Err(format!("panic: {}", panic_message(payload.as_ref()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn errors_and_panics_become_messages() {
        let ok = HookFn::arc("ok", || async { Ok::<_, HookError>(()) });
        assert_eq!(run_hook(ok.as_ref()).await, Ok(()));

        let failing = HookFn::arc("failing", || async { Err::<(), HookError>("disk full".into()) });
        assert_eq!(run_hook(failing.as_ref()).await, Err("disk full".to_string()));

        let panicking = HookFn::arc("panicking", || async {
            if true {
                panic!("oops");
            }
            Ok::<_, HookError>(())
        });
        assert_eq!(run_hook(panicking.as_ref()).await, Err("panic: oops".to_string()));
    }
}
