//! # Device registrations.
//!
//! A [`DeviceRegistration`] is the immutable description of one device: its name
//! (or root), its archetype and the archetype's parameters. Registrations are
//! validated when added to a [`DeviceRegistry`](super::DeviceRegistry) and never
//! change afterwards.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ConfigError;
use crate::strategy::StrategySpec;

use super::{Command, Routine, Sample};

/// Parameters of a telemetry device.
#[derive(Clone)]
pub struct Telemetry {
    /// Time between two samples.
    pub interval: Duration,
    /// Transmission strategy (defaults to publishing every sample).
    pub strategy: StrategySpec,
    /// Optional bound on a single sample call.
    pub timeout: Option<Duration>,
    /// Sampling handler.
    pub handler: Arc<dyn Sample>,
}

impl Telemetry {
    /// Samples every `interval`, publishing every reading.
    pub fn new(interval: Duration, handler: Arc<dyn Sample>) -> Self {
        Self {
            interval,
            strategy: StrategySpec::Always,
            timeout: None,
            handler,
        }
    }

    /// Sets the transmission strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: StrategySpec) -> Self {
        self.strategy = strategy;
        self
    }

    /// Fails a sample that takes longer than `timeout` (classified `"timeout"`).
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Execution pattern of a device.
#[derive(Clone)]
pub enum Archetype {
    /// Periodic sampling loop.
    Telemetry(Telemetry),
    /// One handler invocation per inbound command.
    Command(Arc<dyn Command>),
    /// User-owned loop.
    FreeForm(Arc<dyn Routine>),
}

impl Archetype {
    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            Archetype::Telemetry(_) => "telemetry",
            Archetype::Command(_) => "command",
            Archetype::FreeForm(_) => "free_form",
        }
    }
}

/// One declared device.
#[derive(Clone)]
pub struct DeviceRegistration {
    name: Option<Arc<str>>,
    archetype: Archetype,
}

impl DeviceRegistration {
    /// Creates a registration. An empty `name` registers the root device.
    pub fn new(name: &str, archetype: Archetype) -> Self {
        Self {
            name: (!name.is_empty()).then(|| Arc::from(name)),
            archetype,
        }
    }

    /// Telemetry device.
    pub fn telemetry(name: &str, telemetry: Telemetry) -> Self {
        Self::new(name, Archetype::Telemetry(telemetry))
    }

    /// Command device.
    pub fn command(name: &str, handler: Arc<dyn Command>) -> Self {
        Self::new(name, Archetype::Command(handler))
    }

    /// Free-form device.
    pub fn free_form(name: &str, handler: Arc<dyn Routine>) -> Self {
        Self::new(name, Archetype::FreeForm(handler))
    }

    /// Device name; `None` for the root device.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub(crate) fn name_arc(&self) -> Option<Arc<str>> {
        self.name.clone()
    }

    /// True for the device publishing at the top-level topics.
    pub fn is_root(&self) -> bool {
        self.name.is_none()
    }

    /// Execution pattern and its parameters.
    pub fn archetype(&self) -> &Archetype {
        &self.archetype
    }

    /// Name used in logs and events (`"$root"` for the root device).
    pub fn label(&self) -> &str {
        self.name().unwrap_or(ROOT_LABEL)
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if let Some(name) = self.name() {
            validate_name(name)?;
        }
        if let Archetype::Telemetry(t) = &self.archetype {
            if t.interval.is_zero() {
                return Err(ConfigError::InvalidValue {
                    field: "interval",
                    reason: "must be greater than zero".into(),
                });
            }
            if t.timeout.is_some_and(|d| d.is_zero()) {
                return Err(ConfigError::InvalidValue {
                    field: "timeout",
                    reason: "must be greater than zero".into(),
                });
            }
            t.strategy.validate()?;
        }
        Ok(())
    }
}

impl fmt::Debug for DeviceRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("DeviceRegistration");
        d.field("name", &self.label())
            .field("archetype", &self.archetype.as_label());
        if let Archetype::Telemetry(t) = &self.archetype {
            d.field("interval", &t.interval)
                .field("strategy", &t.strategy)
                .field("timeout", &t.timeout);
        }
        d.finish()
    }
}

/// Label of the root device in logs, events and the heartbeat.
pub const ROOT_LABEL: &str = "$root";

/// Device names become topic segments.
fn validate_name(name: &str) -> Result<(), ConfigError> {
    let reason = if name.trim().is_empty() {
        Some("must not be blank")
    } else if name.contains(['/', '+', '#']) {
        Some("must not contain '/', '+' or '#'")
    } else if name.starts_with('$') {
        Some("must not start with '$'")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(ConfigError::InvalidName {
            name: name.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::SampleFn;
    use crate::error::DeviceError;

    fn sensor() -> Arc<dyn Sample> {
        SampleFn::arc(|| async { Ok::<_, DeviceError>(None) })
    }

    #[test]
    fn empty_name_is_root() {
        let reg =
            DeviceRegistration::telemetry("", Telemetry::new(Duration::from_secs(1), sensor()));
        assert!(reg.is_root());
        assert_eq!(reg.label(), "$root");
    }

    #[test]
    fn names_must_be_topic_safe() {
        for bad in ["a/b", "x+", "#", "$sys", "  "] {
            let telemetry = Telemetry::new(Duration::from_secs(1), sensor());
            let reg = DeviceRegistration::telemetry(bad, telemetry);
            assert!(
                matches!(reg.validate(), Err(ConfigError::InvalidName { .. })),
                "{bad:?} accepted"
            );
        }
    }

    #[test]
    fn zero_interval_is_rejected() {
        let reg = DeviceRegistration::telemetry("t", Telemetry::new(Duration::ZERO, sensor()));
        assert!(matches!(
            reg.validate(),
            Err(ConfigError::InvalidValue { field: "interval", .. })
        ));
    }
}
