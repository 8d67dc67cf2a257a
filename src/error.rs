//! Error types used by the devicevisor runtime, its transport and device handlers.
//!
//! - [`ConfigError`]: registration and configuration faults. Always fatal, always raised
//!   before the orchestrator starts.
//! - [`TransportError`]: connect/send/subscribe failures. Never fatal at runtime.
//! - [`RuntimeError`]: errors returned by [`Orchestrator::run`](crate::Orchestrator).
//! - [`DeviceError`]: a fault raised by a device handler. Carries the stable
//!   classification used for error deduplication.
//!
//! The enums provide `as_label` (stable snake_case) for logs and events.

use std::borrow::Cow;
use std::time::Duration;

use serde_json::{Map, Value};
use thiserror::Error;

/// # Configuration and registration faults.
///
/// Raised while the device table is being built or the configuration is loaded.
/// None of these can happen once the orchestrator is running.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Two registrations share the same device name.
    #[error("device {name:?} is registered more than once")]
    DuplicateDevice {
        /// The clashing device name.
        name: String,
    },

    /// More than one registration claims the root topic.
    #[error("only one root device may be registered")]
    MultipleRoots,

    /// Device name cannot be used as a topic segment.
    #[error("invalid device name {name:?}: {reason}")]
    InvalidName {
        /// The rejected name.
        name: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// Both a time period and a sample count were given to a throttle strategy.
    #[error("throttle strategy takes either a period or a sample count, not both")]
    ConflictingThrottle,

    /// Neither a time period nor a sample count were given to a throttle strategy.
    #[error("throttle strategy needs a period or a sample count")]
    MissingThrottle,

    /// A numeric parameter is out of range.
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        /// Field or parameter name.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// A handler asked for a resource type nobody provides.
    #[error("no provider registered for {type_name}")]
    UnresolvedParameter {
        /// Rust type name of the missing resource.
        type_name: &'static str,
    },

    /// The configuration document could not be parsed.
    #[error("failed to parse configuration: {0}")]
    Parse(String),
}

impl ConfigError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::DuplicateDevice { .. } => "config_duplicate_device",
            ConfigError::MultipleRoots => "config_multiple_roots",
            ConfigError::InvalidName { .. } => "config_invalid_name",
            ConfigError::ConflictingThrottle => "config_conflicting_throttle",
            ConfigError::MissingThrottle => "config_missing_throttle",
            ConfigError::InvalidValue { .. } => "config_invalid_value",
            ConfigError::UnresolvedParameter { .. } => "config_unresolved_parameter",
            ConfigError::Parse(_) => "config_parse",
        }
    }
}

/// # Transport failures.
///
/// Sends are fire-and-forget: a failed send is reported to the caller once and dropped.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The connection is not in the `Connected` state.
    #[error("not connected")]
    NotConnected,

    /// The connection was explicitly closed and cannot be reused.
    #[error("connection closed")]
    Closed,

    /// `connect` was called on an already started connection.
    #[error("connection already started")]
    AlreadyStarted,

    /// The underlying client rejected the request.
    #[error("request rejected: {reason}")]
    Rejected {
        /// Client-provided reason.
        reason: String,
    },

    /// Payload could not be encoded.
    #[error("payload encoding failed: {reason}")]
    Encode {
        /// Encoder message.
        reason: String,
    },
}

impl TransportError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            TransportError::NotConnected => "transport_not_connected",
            TransportError::Closed => "transport_closed",
            TransportError::AlreadyStarted => "transport_already_started",
            TransportError::Rejected { .. } => "transport_rejected",
            TransportError::Encode { .. } => "transport_encode",
        }
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(e: serde_json::Error) -> Self {
        TransportError::Encode {
            reason: e.to_string(),
        }
    }
}

/// # Errors returned by the orchestrator.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Invalid configuration detected before startup.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Transport failure that aborted startup (e.g. a closed connection).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The pre-start hook failed; no device was started.
    #[error("start hook {hook:?} failed: {error}")]
    StartHook {
        /// Hook name.
        hook: String,
        /// Hook error message.
        error: String,
    },

    /// [`Orchestrator::run`](crate::Orchestrator) was called twice.
    #[error("orchestrator already started")]
    AlreadyStarted,
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::Config(e) => e.as_label(),
            RuntimeError::Transport(e) => e.as_label(),
            RuntimeError::StartHook { .. } => "runtime_start_hook",
            RuntimeError::AlreadyStarted => "runtime_already_started",
        }
    }
}

/// # Fault raised by a device handler.
///
/// `kind` is the dedup classification: two faults with the same `kind` on the same
/// device are considered the same failure. Keep it stable (e.g. `"timeout"`,
/// `"i2c_nack"`); put variable data into `message` or `details`.
///
/// # Example
/// ```
/// use devicevisor::DeviceError;
///
/// let err = DeviceError::new("sensor_nack", "no ack from 0x40")
///     .with_detail("address", 0x40);
/// assert_eq!(err.kind(), "sensor_nack");
/// assert_eq!(err.details().unwrap()["address"], 64);
/// ```
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind}: {message}")]
pub struct DeviceError {
    kind: Cow<'static, str>,
    message: String,
    details: Option<Map<String, Value>>,
}

impl DeviceError {
    /// Creates a fault with the given classification and message.
    pub fn new(kind: impl Into<Cow<'static, str>>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            details: None,
        }
    }

    /// Fault raised when a handler exceeds its time budget.
    pub fn timeout(after: Duration) -> Self {
        Self::new("timeout", format!("timed out after {after:?}"))
    }

    /// Fault raised when a handler panics.
    pub fn panic(info: impl Into<String>) -> Self {
        Self::new("panic", info)
    }

    /// Attaches one structured detail.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details
            .get_or_insert_with(Map::new)
            .insert(key.into(), value.into());
        self
    }

    /// Replaces the structured details.
    pub fn with_details(mut self, details: Map<String, Value>) -> Self {
        self.details = Some(details);
        self
    }

    /// Dedup classification.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Human-readable message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Optional structured details.
    pub fn details(&self) -> Option<&Map<String, Value>> {
        self.details.as_ref()
    }
}

impl From<std::io::Error> for DeviceError {
    fn from(e: std::io::Error) -> Self {
        let kind = match e.kind() {
            std::io::ErrorKind::TimedOut => "timeout".to_string(),
            other => format!("io_{}", snake_case(&format!("{other:?}"))),
        };
        Self::new(kind, e.to_string())
    }
}

impl From<serde_json::Error> for DeviceError {
    fn from(e: serde_json::Error) -> Self {
        Self::new("invalid_payload", e.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for DeviceError {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        Self::new("timeout", e.to_string())
    }
}

/// Extracts the message from a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn snake_case(camel: &str) -> String {
    let mut out = String::with_capacity(camel.len() + 4);
    for (i, ch) in camel.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}
