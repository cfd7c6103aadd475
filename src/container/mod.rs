//! The dependency injection container.
//!
//! A [`Container`] has two phases:
//!
//! ```text
//! Open ── build() ──► Built
//!  register: ok        register: AlreadyBuilt
//!  resolve:  NotBuilt  resolve:  ok
//! ```
//!
//! Resolution of an uncached registration pushes its key onto the calling
//! thread's resolution chain, runs the provider (which may resolve its own
//! dependencies through the [`ResolverContext`]) and pops the key again.
//! Singleton and eager instances are cached in a per-registration
//! `OnceCell`, so a provider runs at most once even under concurrent
//! callers. Cached instances are recorded as lifecycle participants in the
//! order they were first constructed.
//!
//! Cycle detection is per thread. Two threads that concurrently start
//! building singletons which depend on each other block on each other's
//! cell instead of reporting [`DiError::Circular`].

use std::any::{Any, TypeId};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};

mod context;
mod register;

pub use context::ResolverContext;
pub use register::RegistrationBuilder;

use crate::descriptors::ServiceDescriptor;
use crate::error::{BoxError, DiError, DiResult};
use crate::internal::{panic_message, ResolutionChains};
use crate::key::Key;
use crate::lifecycle::{Lifecycle, Participant};
use crate::lifetime::Lifetime;
use crate::observer::{DiObserver, Observers};
use crate::registration::{AnyArc, Registration, Registry};
use crate::traits::{Resolver, ResolverCore};
use crate::worker::{Worker, WorkerOptions};

/// Type-keyed service container.
///
/// Cloning is cheap and yields a handle to the same container.
///
/// # Examples
///
/// ```
/// use ferrous_runtime::{Container, Resolver};
/// use std::sync::Arc;
///
/// struct Config { url: String }
/// struct Repository { config: Arc<Config> }
///
/// let container = Container::new();
/// container.add_singleton(Config { url: "postgres://localhost".into() }).unwrap();
/// container.add_provider::<Repository, _>(|r| {
///     Ok(Repository { config: r.get::<Config>()? })
/// }).unwrap();
/// container.build().unwrap();
///
/// let repo = container.get_required::<Repository>();
/// assert_eq!(repo.config.url, "postgres://localhost");
/// ```
#[derive(Clone)]
pub struct Container {
    inner: Arc<Inner>,
}

struct Inner {
    registry: RwLock<Registry>,
    built: AtomicBool,
    chains: ResolutionChains,
    participants: Mutex<Vec<Participant>>,
    observers: RwLock<Arc<Observers>>,
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl Container {
    /// Creates an empty, open container.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: RwLock::new(Registry::new()),
                built: AtomicBool::new(false),
                chains: ResolutionChains::new(),
                participants: Mutex::new(Vec::new()),
                observers: RwLock::new(Arc::new(Observers::new())),
            }),
        }
    }

    /// Adds a resolution observer.
    ///
    /// Observers can be added in either phase; resolutions already in flight
    /// keep the set they started with.
    pub fn add_observer(&self, observer: Arc<dyn DiObserver>) {
        let mut observers = self.inner.observers.write();
        let mut next = (**observers).clone();
        next.add(observer);
        *observers = Arc::new(next);
    }

    /// True once [`build`](Self::build) ran.
    pub fn is_built(&self) -> bool {
        self.inner.built.load(Ordering::Acquire)
    }

    /// Number of registrations.
    pub fn len(&self) -> usize {
        self.inner.registry.read().len()
    }

    /// True if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if an unnamed registration for `T` exists.
    pub fn contains<T: ?Sized + 'static>(&self) -> bool {
        self.inner.registry.read().contains_key(&Key::of::<T>())
    }

    /// True if a registration for `T` named `name` exists.
    pub fn contains_named<T: ?Sized + 'static>(&self, name: &'static str) -> bool {
        self.inner.registry.read().contains_key(&Key::named::<T>(name))
    }

    /// Closes registration and constructs every eager registration, in
    /// registration order.
    ///
    /// Pre-built instances that declared `starter()` or `stopper()` already
    /// exist, so they are recorded as participants here too, at their
    /// registration position, whether or not anything resolves them later.
    ///
    /// The transition is one-way: if an eager provider fails, the error is
    /// returned and the container stays built with the eager set partially
    /// constructed.
    pub fn build(&self) -> DiResult<()> {
        let (eager, total) = {
            let registry = self.inner.registry.write();
            if self.inner.built.swap(true, Ordering::AcqRel) {
                return Err(DiError::AlreadyBuilt("container".to_string()));
            }
            let eager: Vec<Arc<Registration>> = registry
                .iter()
                .filter(|r| r.lifetime == Lifetime::Eager || r.is_prebuilt_participant())
                .cloned()
                .collect();
            (eager, registry.len())
        };

        tracing::info!(services = total, eager = eager.len(), "container built");
        for registration in eager {
            if let Err(error) = self.resolve_registration(&registration) {
                tracing::error!(
                    service = %registration.key,
                    error = %error,
                    label = error.as_label(),
                    "eager construction failed"
                );
                return Err(error);
            }
        }
        Ok(())
    }

    /// Snapshot of the participants constructed so far, as a [`Lifecycle`].
    ///
    /// Call after `build()` and after resolving the application's roots, so
    /// that lazily constructed singletons are included.
    pub fn lifecycle(&self) -> Lifecycle {
        Lifecycle::new(self.participants())
    }

    /// Participants in first-construction order.
    pub fn participants(&self) -> Vec<Participant> {
        self.inner.participants.lock().clone()
    }

    /// Resolves every registration declared with `.worker(..)`, in
    /// registration order.
    pub fn workers(&self) -> DiResult<Vec<(Arc<dyn Worker>, WorkerOptions)>> {
        let registrations: Vec<Arc<Registration>> = self
            .inner
            .registry
            .read()
            .iter()
            .filter(|r| r.worker.is_some())
            .cloned()
            .collect();

        let mut workers = Vec::with_capacity(registrations.len());
        for registration in registrations {
            self.ensure_built(&registration.key)?;
            let value = self.resolve_registration(&registration)?;
            if let Some((cast, options)) = registration.worker {
                let worker = cast(&value).ok_or(DiError::TypeMismatch(registration.impl_name))?;
                workers.push((worker, options));
            }
        }
        Ok(workers)
    }

    /// Resolves `T` into a late-bound slot.
    ///
    /// Lets two services refer to each other without a construction-time
    /// cycle: one of them holds a `OnceCell` that is filled after both exist.
    ///
    /// # Examples
    ///
    /// ```
    /// use ferrous_runtime::{Container, DiError};
    /// use once_cell::sync::OnceCell;
    /// use std::sync::Arc;
    ///
    /// let container = Container::new();
    /// container.add_singleton(7u8).unwrap();
    /// container.build().unwrap();
    ///
    /// let slot: OnceCell<Arc<u8>> = OnceCell::new();
    /// container.resolve_into(&slot).unwrap();
    /// assert_eq!(**slot.get().unwrap(), 7);
    /// assert!(matches!(container.resolve_into(&slot), Err(DiError::NotSettable(_))));
    /// ```
    pub fn resolve_into<T: Send + Sync + 'static>(&self, slot: &OnceCell<Arc<T>>) -> DiResult<()> {
        if slot.get().is_some() {
            return Err(DiError::NotSettable(std::any::type_name::<T>()));
        }
        let value = self.get::<T>()?;
        slot.set(value)
            .map_err(|_| DiError::NotSettable(std::any::type_name::<T>()))
    }

    /// Describes every registration without instantiating anything.
    pub fn descriptors(&self) -> Vec<ServiceDescriptor> {
        self.inner
            .registry
            .read()
            .iter()
            .map(|r| ServiceDescriptor::from_registration(r))
            .collect()
    }

    /// Multi-line dump of registrations and participants.
    #[cfg(feature = "diagnostics")]
    pub fn to_debug_string(&self) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        let _ = writeln!(out, "Container (built: {})", self.is_built());
        for d in self.descriptors() {
            let _ = writeln!(
                out,
                "  {} [{:?}] impl={} starter={} stopper={} worker={} interfaces={:?} instantiated={}",
                d.key,
                d.lifetime,
                d.impl_type_name,
                d.starter,
                d.stopper,
                d.worker.is_some(),
                d.interfaces,
                d.instantiated,
            );
        }
        let participants = self.participants();
        let _ = writeln!(out, "Participants ({}):", participants.len());
        for (i, p) in participants.iter().enumerate() {
            let _ = writeln!(out, "  {}. {:?}", i + 1, p);
        }
        out
    }

    pub(crate) fn insert(&self, registration: Registration, replace: bool) -> DiResult<()> {
        let key = registration.key;
        let mut registry = self.inner.registry.write();
        if self.is_built() {
            return Err(DiError::AlreadyBuilt(key.to_string()));
        }
        registry.insert(registration, replace)?;
        tracing::debug!(service = %key, replace, "registered");
        Ok(())
    }

    fn ensure_built(&self, key: &Key) -> DiResult<()> {
        if self.is_built() {
            Ok(())
        } else {
            Err(DiError::NotBuilt(key.to_string()))
        }
    }

    fn observers(&self) -> Arc<Observers> {
        self.inner.observers.read().clone()
    }

    fn resolve_registration(&self, registration: &Arc<Registration>) -> DiResult<AnyArc> {
        // Hot path: no chain push, no provider call
        if let Some(instance) = registration.cached() {
            return Ok(instance.clone());
        }

        let key = registration.key;
        let observers = self.observers();
        let _guard = match self.inner.chains.enter(key) {
            Ok(guard) => guard,
            Err(error) => {
                if let DiError::Circular(chain) = &error {
                    tracing::warn!(service = %key, %error, "dependency cycle");
                    observers.cycle_detected(chain);
                }
                return Err(error);
            }
        };

        observers.resolving(&key);
        let started = Instant::now();
        let result = if registration.lifetime.is_cached() {
            registration
                .instance
                .get_or_try_init(|| self.construct(registration))
                .cloned()
        } else {
            self.construct(registration)
        };
        match &result {
            Ok(_) => observers.resolved(&key, started.elapsed()),
            Err(error) => observers.provider_failed(&key, error),
        }
        result
    }

    fn construct(&self, registration: &Registration) -> DiResult<AnyArc> {
        let key = registration.key;
        tracing::debug!(service = %key, lifetime = ?registration.lifetime, "constructing");

        let resolver = ResolverContext::new(self);
        let value = match panic::catch_unwind(AssertUnwindSafe(|| (registration.ctor)(&resolver))) {
            Ok(result) => result?,
            Err(payload) => {
                let reason = panic_message(payload);
                tracing::error!(service = %key, %reason, "provider panicked");
                return Err(DiError::InvalidProvider {
                    service: key.to_string(),
                    reason,
                });
            }
        };

        if registration.lifetime.is_cached() && registration.worker.is_none() {
            let starter = registration.starter.and_then(|cast| cast(&value));
            let stopper = registration.stopper.and_then(|cast| cast(&value));
            self.inner
                .participants
                .lock()
                .push(Participant::new(key, starter, stopper));
        }
        Ok(value)
    }
}

/// Wraps a provider error with the registration it came from.
///
/// Cycles are passed through unchanged so the caller sees the full chain.
pub(crate) fn provider_error(key: Key, source: BoxError) -> DiError {
    match source.downcast::<DiError>() {
        Ok(inner) => match *inner {
            DiError::Circular(chain) => DiError::Circular(chain),
            other => DiError::Provider {
                service: key.to_string(),
                source: Box::new(other),
            },
        },
        Err(source) => DiError::Provider {
            service: key.to_string(),
            source,
        },
    }
}

impl ResolverCore for Container {
    fn resolve_any(&self, key: &Key) -> DiResult<Arc<dyn Any + Send + Sync>> {
        self.ensure_built(key)?;
        let registration = self
            .inner
            .registry
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| DiError::NotFound(key.to_string()))?;
        self.resolve_registration(&registration)
    }

    fn resolve_all_any(
        &self,
        interface: TypeId,
        interface_name: &'static str,
    ) -> DiResult<Vec<Arc<dyn Any + Send + Sync>>> {
        if !self.is_built() {
            return Err(DiError::NotBuilt(interface_name.to_string()));
        }
        // Static pre-filter: only registrations that declare the interface
        let matches: Vec<Arc<Registration>> = self
            .inner
            .registry
            .read()
            .iter()
            .filter(|r| r.key.type_id() == interface || r.implements(interface).is_some())
            .cloned()
            .collect();

        let mut values = Vec::with_capacity(matches.len());
        for registration in matches {
            let value = self.resolve_registration(&registration)?;
            if registration.key.type_id() == interface {
                values.push(value);
            } else if let Some(binding) = registration.implements(interface) {
                let cast = (binding.cast)(&value).ok_or(DiError::TypeMismatch(binding.type_name))?;
                values.push(cast);
            }
        }
        Ok(values)
    }
}

impl Resolver for Container {}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("services", &self.len())
            .field("built", &self.is_built())
            .field("participants", &self.inner.participants.lock().len())
            .finish()
    }
}
