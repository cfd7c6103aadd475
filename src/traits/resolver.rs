//! Resolver traits for service resolution.

use std::any::{Any, TypeId};
use std::sync::Arc;

use crate::error::{DiError, DiResult};
use crate::key::Key;

/// Core resolver trait for object-safe service resolution.
///
/// This trait provides the fundamental service resolution capabilities that are
/// object-safe (can be used as trait objects). It handles the low-level resolution
/// mechanics including cycle detection through per-thread resolution chains.
///
/// Most users should use the [`Resolver`] trait instead, which provides more
/// ergonomic generic methods built on top of this trait.
pub trait ResolverCore: Send + Sync {
    /// Resolves a single registration by key.
    ///
    /// # Returns
    ///
    /// * `Ok(AnyArc)` - The resolved service wrapped in `Arc<dyn Any>`
    /// * `Err(DiError)` - Resolution error (not found, not built, circular, provider failure)
    fn resolve_any(&self, key: &Key) -> DiResult<Arc<dyn Any + Send + Sync>>;

    /// Resolves every registration that provides the interface `interface`.
    ///
    /// Matches are registrations keyed by the interface itself and
    /// registrations that declared a binding to it. Nothing else is
    /// instantiated. Each element is an `Arc<Arc<dyn I>>` erased as `Any`.
    fn resolve_all_any(
        &self,
        interface: TypeId,
        interface_name: &'static str,
    ) -> DiResult<Vec<Arc<dyn Any + Send + Sync>>>;
}

/// High-level resolver interface with generic methods for type-safe service resolution.
///
/// This trait provides the main API that users interact with for resolving services.
/// It builds on [`ResolverCore`] to offer type-safe generic methods that handle
/// the complexities of type erasure and casting internally.
///
/// Both [`Container`](crate::Container) and the
/// [`ResolverContext`](crate::ResolverContext) handed to providers implement
/// this trait.
///
/// # Examples
///
/// ```
/// use ferrous_runtime::{Container, Resolver};
/// use std::sync::Arc;
///
/// trait Logger: Send + Sync {
///     fn log(&self, msg: &str);
/// }
///
/// struct ConsoleLogger;
/// impl Logger for ConsoleLogger {
///     fn log(&self, msg: &str) {
///         println!("LOG: {}", msg);
///     }
/// }
///
/// let container = Container::new();
/// container.add_singleton(42usize).unwrap();
/// container.add_singleton_trait::<dyn Logger>(Arc::new(ConsoleLogger)).unwrap();
/// container.build().unwrap();
///
/// // Resolve concrete types
/// let number = container.get_required::<usize>();
/// assert_eq!(*number, 42);
///
/// // Resolve trait objects
/// let logger = container.get_required_trait::<dyn Logger>();
/// logger.log("Service resolved successfully");
/// ```
pub trait Resolver: ResolverCore {
    /// Resolves a concrete service type.
    ///
    /// # Deadlocks
    ///
    /// Cycles are detected per thread: two threads that concurrently build
    /// singletons depending on each other block forever instead of failing
    /// with [`DiError::Circular`](crate::DiError::Circular).
    ///
    /// # Examples
    ///
    /// ```
    /// use ferrous_runtime::{Container, Resolver};
    ///
    /// let container = Container::new();
    /// container.add_singleton("configuration".to_string()).unwrap();
    /// container.build().unwrap();
    ///
    /// let config = container.get::<String>().unwrap();
    /// assert_eq!(&*config, "configuration");
    /// ```
    fn get<T: 'static + Send + Sync>(&self) -> DiResult<Arc<T>> {
        let any = self.resolve_any(&Key::of::<T>())?;
        any.downcast::<T>()
            .map_err(|_| DiError::TypeMismatch(std::any::type_name::<T>()))
    }

    /// Resolves a named concrete service type.
    fn get_named<T: 'static + Send + Sync>(&self, name: &'static str) -> DiResult<Arc<T>> {
        let any = self.resolve_any(&Key::named::<T>(name))?;
        any.downcast::<T>()
            .map_err(|_| DiError::TypeMismatch(std::any::type_name::<T>()))
    }

    /// Resolves a trait-object registration.
    ///
    /// Trait registrations are stored as `Arc<Arc<dyn I>>`; this unwraps one
    /// level and hands out the shared `Arc<dyn I>`.
    fn get_trait<T: ?Sized + 'static + Send + Sync>(&self) -> DiResult<Arc<T>> {
        let any = self.resolve_any(&Key::of::<T>())?;
        any.downcast::<Arc<T>>()
            .map(|boxed| (*boxed).clone())
            .map_err(|_| DiError::TypeMismatch(std::any::type_name::<T>()))
    }

    /// Resolves a named trait-object registration.
    fn get_named_trait<T: ?Sized + 'static + Send + Sync>(&self, name: &'static str) -> DiResult<Arc<T>> {
        let any = self.resolve_any(&Key::named::<T>(name))?;
        any.downcast::<Arc<T>>()
            .map(|boxed| (*boxed).clone())
            .map_err(|_| DiError::TypeMismatch(std::any::type_name::<T>()))
    }

    /// Resolves every registration providing the interface `T`, in
    /// registration order.
    ///
    /// Only registrations keyed by `T` or bound to it with
    /// [`bind`](crate::RegistrationBuilder::bind) are considered; unrelated
    /// registrations (transient ones included) are never constructed.
    ///
    /// # Examples
    ///
    /// ```
    /// use ferrous_runtime::{Container, Resolver};
    /// use std::sync::Arc;
    ///
    /// trait Plugin: Send + Sync {
    ///     fn name(&self) -> &str;
    /// }
    ///
    /// struct PluginA;
    /// impl Plugin for PluginA {
    ///     fn name(&self) -> &str { "Plugin A" }
    /// }
    ///
    /// struct PluginB;
    /// impl Plugin for PluginB {
    ///     fn name(&self) -> &str { "Plugin B" }
    /// }
    ///
    /// let container = Container::new();
    /// container.register::<PluginA>().bind::<dyn Plugin>(|p| p).instance(PluginA).unwrap();
    /// container.register::<PluginB>().bind::<dyn Plugin>(|p| p).instance(PluginB).unwrap();
    /// container.build().unwrap();
    ///
    /// let plugins = container.get_all::<dyn Plugin>().unwrap();
    /// assert_eq!(plugins.len(), 2);
    /// assert_eq!(plugins[0].name(), "Plugin A");
    /// assert_eq!(plugins[1].name(), "Plugin B");
    /// ```
    fn get_all<T: ?Sized + 'static + Send + Sync>(&self) -> DiResult<Vec<Arc<T>>> {
        let anys = self.resolve_all_any(TypeId::of::<T>(), std::any::type_name::<T>())?;

        let mut results = Vec::with_capacity(anys.len());
        for any in anys {
            let arc = any
                .downcast::<Arc<T>>()
                .map(|boxed| (*boxed).clone())
                .map_err(|_| DiError::TypeMismatch(std::any::type_name::<T>()))?;
            results.push(arc);
        }
        Ok(results)
    }

    /// Resolves a concrete service type, panicking on failure.
    ///
    /// Meant for tests and wiring code where a missing registration is a
    /// programming error.
    ///
    /// # Panics
    ///
    /// Panics if the service cannot be resolved.
    fn get_required<T: 'static + Send + Sync>(&self) -> Arc<T> {
        self.get::<T>()
            .unwrap_or_else(|e| panic!("Failed to resolve {}: {}", std::any::type_name::<T>(), e))
    }

    /// Resolves a named concrete service type, panicking on failure.
    fn get_named_required<T: 'static + Send + Sync>(&self, name: &'static str) -> Arc<T> {
        self.get_named::<T>(name).unwrap_or_else(|e| {
            panic!("Failed to resolve named {} ({}): {}", std::any::type_name::<T>(), name, e)
        })
    }

    /// Resolves a trait-object registration, panicking on failure.
    fn get_required_trait<T: ?Sized + 'static + Send + Sync>(&self) -> Arc<T> {
        self.get_trait::<T>().unwrap_or_else(|e| {
            panic!("Failed to resolve trait {}: {}", std::any::type_name::<T>(), e)
        })
    }
}
