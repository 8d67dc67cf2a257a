//! # Registration table.
//!
//! [`DeviceRegistry`] is filled during setup and closed into [`Registrations`]
//! when handed to the orchestrator. Every rule is checked on insertion:
//!
//! - names are unique across all archetypes;
//! - at most one root device;
//! - names are valid topic segments;
//! - strategy and interval parameters are sane.
//!
//! ```rust
//! use std::time::Duration;
//! use devicevisor::{DeviceError, DeviceRegistry, SampleFn, StrategySpec, Telemetry};
//!
//! let mut registry = DeviceRegistry::new();
//! let sensor = SampleFn::arc(|| async { Ok::<_, DeviceError>(None) });
//! registry
//!     .telemetry("greenhouse", Telemetry::new(Duration::from_secs(5), sensor.clone()))
//!     .unwrap();
//! assert!(registry.telemetry("greenhouse", Telemetry::new(Duration::from_secs(5), sensor)).is_err());
//! let devices = registry.close();
//! assert_eq!(devices.len(), 1);
//! ```

use std::any::Any;
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::ConfigError;

use super::{Command, DeviceRegistration, Resources, Routine, Telemetry};

/// Mutable registration table used during setup.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    resources: Resources,
    devices: Vec<DeviceRegistration>,
    names: HashSet<Arc<str>>,
    has_root: bool,
}

impl DeviceRegistry {
    /// Creates an empty registry with no resources.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty registry resolving handler resources from `resources`.
    pub fn with_resources(resources: Resources) -> Self {
        Self {
            resources,
            ..Self::default()
        }
    }

    /// Resource table used by [`resolve`](Self::resolve).
    pub fn resources_mut(&mut self) -> &mut Resources {
        &mut self.resources
    }

    /// Resolves a handler resource by type.
    ///
    /// # Errors
    /// [`ConfigError::UnresolvedParameter`] if nothing provides `T`.
    pub fn resolve<T: Any + Send + Sync>(&self) -> Result<Arc<T>, ConfigError> {
        self.resources.resolve::<T>()
    }

    /// Adds a validated registration.
    pub fn register(&mut self, reg: DeviceRegistration) -> Result<&mut Self, ConfigError> {
        reg.validate()?;
        match reg.name_arc() {
            None if self.has_root => return Err(ConfigError::MultipleRoots),
            None => self.has_root = true,
            Some(name) => {
                if !self.names.insert(Arc::clone(&name)) {
                    return Err(ConfigError::DuplicateDevice {
                        name: name.to_string(),
                    });
                }
            }
        }
        self.devices.push(reg);
        Ok(self)
    }

    /// Adds a telemetry device (empty name = root).
    pub fn telemetry(
        &mut self,
        name: &str,
        telemetry: Telemetry,
    ) -> Result<&mut Self, ConfigError> {
        self.register(DeviceRegistration::telemetry(name, telemetry))
    }

    /// Adds a command device (empty name = root).
    pub fn command(
        &mut self,
        name: &str,
        handler: Arc<dyn Command>,
    ) -> Result<&mut Self, ConfigError> {
        self.register(DeviceRegistration::command(name, handler))
    }

    /// Adds a free-form device (empty name = root).
    pub fn free_form(
        &mut self,
        name: &str,
        handler: Arc<dyn Routine>,
    ) -> Result<&mut Self, ConfigError> {
        self.register(DeviceRegistration::free_form(name, handler))
    }

    /// Number of registered devices.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// True if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Closes the table; no device can be added afterwards.
    pub fn close(self) -> Registrations {
        Registrations {
            devices: self.devices.into(),
        }
    }
}

/// Closed, immutable set of registrations.
#[derive(Clone, Debug, Default)]
pub struct Registrations {
    devices: Arc<[DeviceRegistration]>,
}

impl Registrations {
    /// Registrations in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &DeviceRegistration> {
        self.devices.iter()
    }

    /// Number of devices.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// True if there are no devices.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Finds a device by name (`None` = root).
    pub fn get(&self, name: Option<&str>) -> Option<&DeviceRegistration> {
        self.devices.iter().find(|d| d.name() == name)
    }
}

impl<'a> IntoIterator for &'a Registrations {
    type Item = &'a DeviceRegistration;
    type IntoIter = std::slice::Iter<'a, DeviceRegistration>;

    fn into_iter(self) -> Self::IntoIter {
        self.devices.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::{CommandFn, RoutineFn, SampleFn};
    use crate::error::DeviceError;
    use crate::strategy::StrategySpec;
    use std::time::Duration;

    fn telemetry() -> Telemetry {
        Telemetry::new(
            Duration::from_secs(1),
            SampleFn::arc(|| async { Ok::<_, DeviceError>(None) }),
        )
    }

    #[test]
    fn names_are_unique_across_archetypes() {
        let mut reg = DeviceRegistry::new();
        reg.telemetry("pump", telemetry()).unwrap();
        let err = reg
            .command("pump", CommandFn::arc(|_| async { Ok::<_, DeviceError>(None) }))
            .unwrap_err();
        assert_eq!(err, ConfigError::DuplicateDevice { name: "pump".into() });

        let err = reg
            .free_form("pump", RoutineFn::arc(|_| async { Ok::<_, DeviceError>(()) }))
            .unwrap_err();
        assert_eq!(err.as_label(), "config_duplicate_device");
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn only_one_root() {
        let mut reg = DeviceRegistry::new();
        reg.telemetry("", telemetry()).unwrap();
        let err = reg
            .command("", CommandFn::arc(|_| async { Ok::<_, DeviceError>(None) }))
            .unwrap_err();
        assert_eq!(err, ConfigError::MultipleRoots);
    }

    #[test]
    fn invalid_strategy_is_rejected_at_registration() {
        let mut reg = DeviceRegistry::new();
        let err = reg
            .telemetry("t", telemetry().with_strategy(StrategySpec::every_samples(0)))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "samples", .. }));
        assert!(reg.is_empty());
    }

    #[test]
    fn resolution_failures_surface_before_start() {
        struct Gpio;
        let reg = DeviceRegistry::new();
        assert!(matches!(
            reg.resolve::<Gpio>(),
            Err(ConfigError::UnresolvedParameter { .. })
        ));
    }

    #[test]
    fn closed_set_preserves_order() {
        let mut reg = DeviceRegistry::new();
        reg.telemetry("b", telemetry()).unwrap();
        reg.telemetry("a", telemetry()).unwrap();
        reg.telemetry("", telemetry()).unwrap();
        let set = reg.close();
        let names: Vec<_> = set.iter().map(|d| d.label()).collect();
        assert_eq!(names, vec!["b", "a", "$root"]);
        assert!(set.get(None).is_some_and(|d| d.is_root()));
    }

    #[test]
    fn debug_lists_registered_devices() {
        let mut reg = DeviceRegistry::new();
        reg.telemetry("pump", telemetry()).unwrap();
        assert!(format!("{reg:?}").contains("pump"));
    }
}
