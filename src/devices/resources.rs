//! # Typed resources for device handlers.
//!
//! Handlers get their collaborators (buses, adapters, clients) by type from an
//! explicit `TypeId → Provider` table filled during setup:
//!
//! - [`Provider::Instance`]: one shared value, every resolution returns the same `Arc`;
//! - [`Provider::Factory`]: a constructor, every resolution builds a fresh value.
//!
//! Resolution happens while devices are registered, so a missing provider is a
//! [`ConfigError::UnresolvedParameter`] before anything starts.
//!
//! ```rust
//! use std::sync::Arc;
//! use devicevisor::Resources;
//!
//! struct I2cBus(u8);
//!
//! let mut res = Resources::new();
//! res.insert(I2cBus(1));
//! let bus: Arc<I2cBus> = res.resolve().unwrap();
//! assert_eq!(bus.0, 1);
//! assert!(res.resolve::<String>().is_err());
//! ```

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::ConfigError;

type AnyArc = Arc<dyn Any + Send + Sync>;

/// How a resource type is provided.
#[derive(Clone)]
pub enum Provider {
    /// Shared singleton.
    Instance(AnyArc),
    /// Fresh value per resolution.
    Factory(Arc<dyn Fn() -> AnyArc + Send + Sync>),
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::Instance(_) => f.write_str("Instance"),
            Provider::Factory(_) => f.write_str("Factory"),
        }
    }
}

/// Type-indexed provider table.
#[derive(Clone, Default, Debug)]
pub struct Resources {
    providers: HashMap<TypeId, (&'static str, Provider)>,
}

impl Resources {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a shared instance of `T` (replaces any previous provider of `T`).
    pub fn insert<T: Any + Send + Sync>(&mut self, value: T) -> &mut Self {
        self.insert_arc(Arc::new(value))
    }

    /// Registers an already shared instance of `T`.
    pub fn insert_arc<T: Any + Send + Sync>(&mut self, value: Arc<T>) -> &mut Self {
        self.providers
            .insert(TypeId::of::<T>(), (type_name::<T>(), Provider::Instance(value)));
        self
    }

    /// Registers a constructor of `T`; each resolution calls it.
    pub fn factory<T, F>(&mut self, make: F) -> &mut Self
    where
        T: Any + Send + Sync,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let make: Arc<dyn Fn() -> AnyArc + Send + Sync> =
            Arc::new(move || -> AnyArc { Arc::new(make()) });
        self.providers
            .insert(TypeId::of::<T>(), (type_name::<T>(), Provider::Factory(make)));
        self
    }

    /// True if a provider of `T` is registered.
    pub fn contains<T: Any>(&self) -> bool {
        self.providers.contains_key(&TypeId::of::<T>())
    }

    /// Resolves `T`.
    ///
    /// # Errors
    /// [`ConfigError::UnresolvedParameter`] if nothing provides `T`.
    pub fn resolve<T: Any + Send + Sync>(&self) -> Result<Arc<T>, ConfigError> {
        let unresolved = || ConfigError::UnresolvedParameter {
            type_name: type_name::<T>(),
        };
        let (_, provider) = self.providers.get(&TypeId::of::<T>()).ok_or_else(unresolved)?;
        let value = match provider {
            Provider::Instance(v) => Arc::clone(v),
            Provider::Factory(make) => make(),
        };
        value.downcast::<T>().map_err(|_| unresolved())
    }

    /// Names of every provided type, sorted.
    pub fn provided(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.providers.values().map(|(name, _)| *name).collect();
        names.sort_unstable();
        names
    }
}
