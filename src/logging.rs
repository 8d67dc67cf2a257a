//! # `tracing` subscriber setup for daemons.
//!
//! Library code only emits `tracing` records; a binary picks one of these
//! initialisers once at startup. `RUST_LOG` overrides the default filter.
//!
//! Both are safe to call more than once (later calls are no-ops), which keeps
//! tests that share a process happy.

use tracing_subscriber::{EnvFilter, fmt};

/// Output flavour of the process log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines (journald, terminals).
    #[default]
    Text,
    /// One JSON object per line (log shippers).
    Json,
}

fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Installs a human-readable subscriber.
///
/// `default_level` is used when `RUST_LOG` is unset (e.g. `"info"`,
/// `"devicevisor=debug,warn"`).
pub fn init_logging(process: &str, default_level: &str) {
    fmt()
        .with_env_filter(filter(default_level))
        .with_target(true)
        .with_thread_ids(false)
        .with_level(true)
        .try_init()
        .ok();

    tracing::info!(process, "logging initialised (text)");
}

/// Installs a JSON subscriber.
pub fn init_logging_json(process: &str, default_level: &str) {
    fmt()
        .json()
        .with_env_filter(filter(default_level))
        .with_target(true)
        .with_current_span(false)
        .with_level(true)
        .try_init()
        .ok();

    tracing::info!(process, "logging initialised (json)");
}

/// Installs the subscriber for `format`.
pub fn init(format: LogFormat, process: &str, default_level: &str) {
    match format {
        LogFormat::Text => init_logging(process, default_level),
        LogFormat::Json => init_logging_json(process, default_level),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_is_harmless() {
        init(LogFormat::Text, "test", "warn");
        init(LogFormat::Json, "test", "warn");
    }
}
