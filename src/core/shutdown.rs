//! # Shutdown triggers.
//!
//! The orchestrator leaves `Running` when either:
//! - the process receives a termination signal, or
//! - the injected [`CancellationToken`] is cancelled.
//!
//! ## Signals
//! **Unix:** `SIGINT`, `SIGTERM` (systemd/containers stop), `SIGQUIT`.
//! **Other platforms:** `Ctrl-C` via [`tokio::signal::ctrl_c`].

use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Waits for a termination signal.
///
/// Each call creates independent signal listeners.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = sigint.recv()  => {},
        _ = sigterm.recv() => {},
        _ = sigquit.recv() => {},
    }
    Ok(())
}

/// Waits for a termination signal.
#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

/// Completes when `token` is cancelled or (if `os_signals`) a signal arrives.
///
/// If signal listeners cannot be installed, only the token is watched.
pub(crate) async fn requested(token: &CancellationToken, os_signals: bool) {
    if !os_signals {
        return token.cancelled().await;
    }
    tokio::select! {
        _ = token.cancelled() => {}
        res = wait_for_shutdown_signal() => {
            if let Err(e) = res {
                warn!(
                    error = %e,
                    "cannot listen for termination signals, waiting for the shutdown token only"
                );
                token.cancelled().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn token_triggers_shutdown() {
        let token = CancellationToken::new();
        let waiter = tokio::spawn({
            let token = token.clone();
            async move { requested(&token, true).await }
        });
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(!waiter.is_finished());
        token.cancel();
        waiter.await.unwrap();
    }
}
