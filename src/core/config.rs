//! # Global runtime configuration.
//!
//! Provides [`RuntimeConfig`] centralized settings for the orchestrator and the
//! [`BrokerConfig`] used by the MQTT transport.
//!
//! Configuration can be built in code (every field is public and has a default)
//! or loaded from TOML with [`RuntimeConfig::from_toml_str`]:
//!
//! ```toml
//! prefix = "greenhouse"
//! version = "1.4.0"
//! grace = 5
//! heartbeat = 60          # seconds, 0 disables the heartbeat
//! publish_recovery = false
//!
//! [reconnect]
//! first = 2
//! max = 300
//! factor = 2.0
//! jitter = 0.2
//!
//! [broker]
//! host = "mqtt.local"
//! port = 1883
//! ```
//!
//! ## Sentinel values
//! - `heartbeat = 0` → no periodic heartbeat (`None`)
//! - `bus_capacity = 0` → clamped to 1

use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::policies::BackoffPolicy;

/// Global configuration for the orchestrator runtime.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Process identity; the first segment of every topic.
    pub prefix: String,

    /// Version string reported in the heartbeat.
    pub version: String,

    /// Maximum time to wait for device tasks to stop before they are aborted.
    #[serde(with = "secs")]
    pub grace: Duration,

    /// Heartbeat interval (`None` = no periodic heartbeat).
    ///
    /// A heartbeat is still published once after every (re)connect.
    #[serde(with = "secs::optional")]
    pub heartbeat: Option<Duration>,

    /// Reconnect delays for the broker connection.
    pub reconnect: BackoffPolicy,

    /// Publish a transport event when a device recovers from a reported error.
    ///
    /// When `false` recovery is only logged (the device status still returns to `ok`).
    pub publish_recovery: bool,

    /// Capacity of the internal runtime event bus.
    pub bus_capacity: usize,

    /// Broker connection settings.
    pub broker: BrokerConfig,
}

impl Default for RuntimeConfig {
    /// Default configuration:
    ///
    /// - `prefix = "devicevisor"`
    /// - `version` = crate version
    /// - `grace = 10s`
    /// - `heartbeat = 60s`
    /// - `reconnect = BackoffPolicy::default()` (2s doubling to 300s, ±20%)
    /// - `publish_recovery = false`
    /// - `bus_capacity = 1024`
    fn default() -> Self {
        Self {
            prefix: "devicevisor".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            grace: Duration::from_secs(10),
            heartbeat: Some(Duration::from_secs(60)),
            reconnect: BackoffPolicy::default(),
            publish_recovery: false,
            bus_capacity: 1024,
            broker: BrokerConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Parses a TOML document and validates the result.
    pub fn from_toml_str(doc: &str) -> Result<Self, ConfigError> {
        let cfg: RuntimeConfig =
            toml::from_str(doc).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Checks field values that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.prefix.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "prefix",
                reason: "must not be empty".into(),
            });
        }
        if self.prefix.contains(['+', '#']) {
            return Err(ConfigError::InvalidValue {
                field: "prefix",
                reason: "must not contain MQTT wildcards".into(),
            });
        }
        if self.prefix.starts_with('/') || self.prefix.ends_with('/') {
            return Err(ConfigError::InvalidValue {
                field: "prefix",
                reason: "must not start or end with '/'".into(),
            });
        }
        if self.heartbeat.is_some_and(|every| every.is_zero()) {
            return Err(ConfigError::InvalidValue {
                field: "heartbeat",
                reason: "interval must be non-zero (use None to disable)".into(),
            });
        }
        if self.broker.host.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "broker.host",
                reason: "must not be empty".into(),
            });
        }
        let keep_alive = self.broker.keep_alive;
        if !keep_alive.is_zero() && keep_alive < Duration::from_secs(1) {
            return Err(ConfigError::InvalidValue {
                field: "broker.keep_alive",
                reason: "must be 0 (disabled) or at least 1 second".into(),
            });
        }
        self.reconnect.validate()
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Client identifier to present to the broker (defaults to the prefix).
    pub fn client_id(&self) -> &str {
        self.broker.client_id.as_deref().unwrap_or(&self.prefix)
    }
}

/// Broker address, credentials and session settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Broker host name or address.
    pub host: String,
    /// Broker TCP port.
    pub port: u16,
    /// Client identifier (`None` = use the topic prefix).
    pub client_id: Option<String>,
    /// Optional user name.
    pub username: Option<String>,
    /// Optional password (ignored without `username`).
    pub password: Option<String>,
    /// MQTT keep-alive interval.
    #[serde(with = "secs")]
    pub keep_alive: Duration,
    /// Start every session clean (subscriptions are re-issued by the client anyway).
    pub clean_session: bool,
    /// Capacity of the client request queue.
    pub request_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            client_id: None,
            username: None,
            password: None,
            keep_alive: Duration::from_secs(30),
            clean_session: true,
            request_capacity: 64,
        }
    }
}

/// Serde helpers: durations written as (fractional) seconds.
pub(crate) mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, de::Error};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = f64::deserialize(d)?;
        if !raw.is_finite() || raw < 0.0 {
            return Err(D::Error::custom(format!(
                "expected a non-negative number of seconds, got {raw}"
            )));
        }
        Ok(Duration::from_secs_f64(raw))
    }

    /// `0` means "disabled".
    pub mod optional {
        use std::time::Duration;

        use serde::Deserializer;

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
            let dur = super::deserialize(d)?;
            Ok((!dur.is_zero()).then_some(dur))
        }
    }
}
