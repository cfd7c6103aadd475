//! Service descriptors for introspection and diagnostics.

use std::any::TypeId;

use crate::key::Key;
use crate::lifetime::Lifetime;
use crate::registration::Registration;
use crate::worker::WorkerOptions;

/// Service descriptor for introspection and diagnostics
///
/// Describes a registration using only its static metadata; producing a
/// descriptor never runs a provider.
///
/// # Examples
///
/// ```rust
/// use ferrous_runtime::{Container, Lifetime};
/// use std::sync::Arc;
///
/// struct Database { url: String }
/// struct Request { id: u32 }
///
/// trait Logger: Send + Sync {}
/// struct ConsoleLogger;
/// impl Logger for ConsoleLogger {}
///
/// let container = Container::new();
/// container.add_singleton(Database { url: "postgres://localhost".to_string() }).unwrap();
/// container.add_transient_factory::<Request, _>(|_| Request { id: 1 }).unwrap();
/// container.add_singleton_trait::<dyn Logger>(Arc::new(ConsoleLogger)).unwrap();
/// container.add_named_singleton("config_value", 42u32).unwrap();
///
/// let descriptors = container.descriptors();
/// assert_eq!(descriptors.len(), 4);
///
/// let db = descriptors.iter()
///     .find(|d| d.type_name().contains("Database"))
///     .unwrap();
/// assert_eq!(db.lifetime, Lifetime::Singleton);
/// assert!(db.prebuilt);
/// assert!(!db.instantiated);
///
/// let config = descriptors.iter().find(|d| d.is_named()).unwrap();
/// assert_eq!(config.service_name(), Some("config_value"));
///
/// let transients = descriptors.iter()
///     .filter(|d| d.lifetime == Lifetime::Transient)
///     .count();
/// assert_eq!(transients, 1);
/// ```
#[derive(Debug, Clone)]
pub struct ServiceDescriptor {
    /// The service key (type with optional service name)
    pub key: Key,
    /// Service lifetime
    pub lifetime: Lifetime,
    /// Implementation type ID
    pub impl_type_id: TypeId,
    /// Implementation type name
    pub impl_type_name: &'static str,
    /// Registered with a ready-made value
    pub prebuilt: bool,
    /// Declared the `Starter` capability
    pub starter: bool,
    /// Declared the `Stopper` capability
    pub stopper: bool,
    /// Worker settings, for worker registrations
    pub worker: Option<WorkerOptions>,
    /// Interfaces bound with `bind::<dyn I>()`
    pub interfaces: Vec<&'static str>,
    /// A cached instance exists
    pub instantiated: bool,
}

impl ServiceDescriptor {
    pub(crate) fn from_registration(registration: &Registration) -> Self {
        Self {
            key: registration.key,
            lifetime: registration.lifetime,
            impl_type_id: registration.impl_id,
            impl_type_name: registration.impl_name,
            prebuilt: registration.prebuilt,
            starter: registration.starter.is_some(),
            stopper: registration.stopper.is_some(),
            worker: registration.worker.map(|(_, options)| options),
            interfaces: registration.interfaces.iter().map(|i| i.type_name).collect(),
            instantiated: registration.cached().is_some(),
        }
    }

    /// Get the service name for named services, or None for unnamed services
    pub fn service_name(&self) -> Option<&'static str> {
        self.key.service_name()
    }

    /// Get the registered type name
    ///
    /// For trait registrations this is the trait object type, e.g.
    /// `dyn my_crate::Logger`.
    pub fn type_name(&self) -> &'static str {
        self.key.display_name()
    }

    /// Check if this is a named service
    pub fn is_named(&self) -> bool {
        self.service_name().is_some()
    }

    /// True for registrations declared with `.worker(..)`.
    pub fn is_worker(&self) -> bool {
        self.worker.is_some()
    }

    /// True if the instance will join the lifecycle once constructed.
    pub fn is_participant(&self) -> bool {
        self.lifetime.is_cached() && self.worker.is_none() && (self.starter || self.stopper)
    }
}
