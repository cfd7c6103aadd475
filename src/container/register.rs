//! Registration builder and convenience registration methods.

use std::any::TypeId;
use std::marker::PhantomData;
use std::sync::Arc;

use once_cell::sync::OnceCell;

use super::{provider_error, Container, ResolverContext};
use crate::error::{BoxError, DiResult};
use crate::key::Key;
use crate::lifecycle::{Starter, Stopper};
use crate::lifetime::Lifetime;
use crate::registration::{AnyArc, Ctor, Interface, Registration, StarterCast, StopperCast, WorkerCast};
use crate::worker::{Worker, WorkerOptions};

/// Builder for a single registration, created by [`Container::register`].
///
/// Options are set first; the builder is finished with exactly one of
/// [`provider`](Self::provider), [`factory`](Self::factory) or
/// [`instance`](Self::instance), which performs the registration.
///
/// Lifecycle capabilities are declared here rather than discovered later:
/// [`starter`](Self::starter) only compiles when `T: Starter`, and the cast
/// it records runs once, right after the instance is constructed.
///
/// # Examples
///
/// ```
/// use ferrous_runtime::{BoxError, Container, Context, Lifetime, Resolver, Starter, Stopper};
/// use async_trait::async_trait;
///
/// struct Pool;
///
/// #[async_trait]
/// impl Starter for Pool {
///     async fn on_start(&self, _: &Context) -> Result<(), BoxError> { Ok(()) }
/// }
///
/// #[async_trait]
/// impl Stopper for Pool {
///     async fn on_stop(&self, _: &Context) -> Result<(), BoxError> { Ok(()) }
/// }
///
/// let container = Container::new();
/// container
///     .register::<Pool>()
///     .scope(Lifetime::Eager)
///     .lifecycle()
///     .factory(|_| Pool)
///     .unwrap();
/// container.build().unwrap();
///
/// assert_eq!(container.lifecycle().len(), 1);
/// ```
#[must_use = "a registration builder does nothing until provider(), factory() or instance() is called"]
pub struct RegistrationBuilder<'c, T> {
    container: &'c Container,
    key: Key,
    lifetime: Lifetime,
    replace: bool,
    starter: Option<StarterCast>,
    stopper: Option<StopperCast>,
    interfaces: Vec<Interface>,
    worker: Option<(WorkerCast, WorkerOptions)>,
    _marker: PhantomData<fn() -> T>,
}

impl<'c, T> RegistrationBuilder<'c, T>
where
    T: Send + Sync + 'static,
{
    pub(crate) fn new(container: &'c Container) -> Self {
        Self {
            container,
            key: Key::of::<T>(),
            lifetime: Lifetime::default(),
            replace: false,
            starter: None,
            stopper: None,
            interfaces: Vec::new(),
            worker: None,
            _marker: PhantomData,
        }
    }

    /// Registers under `name` instead of the bare type.
    pub fn named(mut self, name: &'static str) -> Self {
        self.key = Key::named::<T>(name);
        self
    }

    /// Sets the lifetime (default [`Lifetime::Singleton`]).
    pub fn scope(mut self, lifetime: Lifetime) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Overwrites an existing registration for the same key instead of failing.
    pub fn replace(mut self) -> Self {
        self.replace = true;
        self
    }

    /// The instance takes part in [`Lifecycle::start`](crate::Lifecycle::start).
    pub fn starter(mut self) -> Self
    where
        T: Starter,
    {
        self.starter = Some(cast_starter::<T>);
        self
    }

    /// The instance takes part in [`Lifecycle::stop`](crate::Lifecycle::stop).
    pub fn stopper(mut self) -> Self
    where
        T: Stopper,
    {
        self.stopper = Some(cast_stopper::<T>);
        self
    }

    /// Shorthand for `.starter().stopper()`.
    pub fn lifecycle(self) -> Self
    where
        T: Starter + Stopper,
    {
        self.starter().stopper()
    }

    /// Declares that the registration provides the interface `I`, making it
    /// visible to [`get_all::<I>`](crate::Resolver::get_all).
    ///
    /// `cast` is usually the identity closure `|value| value`, which coerces
    /// `Arc<T>` into `Arc<dyn I>`.
    pub fn bind<I>(mut self, cast: fn(Arc<T>) -> Arc<I>) -> Self
    where
        I: ?Sized + Send + Sync + 'static,
    {
        self.interfaces.push(Interface {
            type_id: TypeId::of::<I>(),
            type_name: std::any::type_name::<I>(),
            cast: Arc::new(move |any: &AnyArc| {
                any.clone()
                    .downcast::<T>()
                    .ok()
                    .map(|value| Arc::new(cast(value)) as AnyArc)
            }),
        });
        self
    }

    /// Marks the registration as a background worker.
    ///
    /// Workers are handed to the [`WorkerManager`](crate::WorkerManager) by
    /// [`Application`](crate::Application) and never become lifecycle
    /// participants, even if `starter()`/`stopper()` were also declared.
    pub fn worker(mut self, options: WorkerOptions) -> Self
    where
        T: Worker,
    {
        self.worker = Some((cast_worker::<T>, options));
        self
    }

    /// Finishes with a fallible provider.
    ///
    /// Errors are reported as [`DiError::Provider`](crate::DiError::Provider)
    /// naming this registration; cycles detected below it stay
    /// [`DiError::Circular`](crate::DiError::Circular).
    pub fn provider<F>(self, provider: F) -> DiResult<()>
    where
        F: Fn(&ResolverContext<'_>) -> Result<T, BoxError> + Send + Sync + 'static,
    {
        let key = self.key;
        let ctor: Ctor = Arc::new(move |resolver: &ResolverContext<'_>| match provider(resolver) {
            Ok(value) => Ok(Arc::new(value) as AnyArc),
            Err(source) => Err(provider_error(key, source)),
        });
        self.finish(ctor, false)
    }

    /// Finishes with an infallible factory.
    pub fn factory<F>(self, factory: F) -> DiResult<()>
    where
        F: Fn(&ResolverContext<'_>) -> T + Send + Sync + 'static,
    {
        let ctor: Ctor =
            Arc::new(move |resolver: &ResolverContext<'_>| Ok(Arc::new(factory(resolver)) as AnyArc));
        self.finish(ctor, false)
    }

    /// Finishes with a pre-built value. A transient lifetime is promoted to
    /// singleton since there is only one value to hand out.
    pub fn instance(mut self, value: T) -> DiResult<()> {
        if self.lifetime == Lifetime::Transient {
            self.lifetime = Lifetime::Singleton;
        }
        let value: AnyArc = Arc::new(value);
        let ctor: Ctor = Arc::new(move |_: &ResolverContext<'_>| Ok(value.clone()));
        self.finish(ctor, true)
    }

    fn finish(self, ctor: Ctor, prebuilt: bool) -> DiResult<()> {
        let registration = Registration {
            key: self.key,
            lifetime: self.lifetime,
            ctor,
            impl_id: TypeId::of::<T>(),
            impl_name: std::any::type_name::<T>(),
            prebuilt,
            starter: self.starter,
            stopper: self.stopper,
            interfaces: self.interfaces,
            worker: self.worker,
            instance: OnceCell::new(),
        };
        self.container.insert(registration, self.replace)
    }
}

fn cast_starter<T: Starter>(any: &AnyArc) -> Option<Arc<dyn Starter>> {
    any.clone()
        .downcast::<T>()
        .ok()
        .map(|value| value as Arc<dyn Starter>)
}

fn cast_stopper<T: Stopper>(any: &AnyArc) -> Option<Arc<dyn Stopper>> {
    any.clone()
        .downcast::<T>()
        .ok()
        .map(|value| value as Arc<dyn Stopper>)
}

fn cast_worker<T: Worker>(any: &AnyArc) -> Option<Arc<dyn Worker>> {
    any.clone()
        .downcast::<T>()
        .ok()
        .map(|value| value as Arc<dyn Worker>)
}

impl Container {
    /// Starts a registration for `T`.
    pub fn register<T: Send + Sync + 'static>(&self) -> RegistrationBuilder<'_, T> {
        RegistrationBuilder::new(self)
    }

    /// Registers a singleton instance.
    ///
    /// # Examples
    ///
    /// ```
    /// use ferrous_runtime::{Container, Resolver};
    ///
    /// struct Config { port: u16 }
    ///
    /// let container = Container::new();
    /// container.add_singleton(Config { port: 8080 }).unwrap();
    /// container.build().unwrap();
    ///
    /// assert_eq!(container.get_required::<Config>().port, 8080);
    /// ```
    pub fn add_singleton<T: Send + Sync + 'static>(&self, value: T) -> DiResult<()> {
        self.register::<T>().instance(value)
    }

    /// Registers a named singleton instance.
    pub fn add_named_singleton<T: Send + Sync + 'static>(&self, name: &'static str, value: T) -> DiResult<()> {
        self.register::<T>().named(name).instance(value)
    }

    /// Registers a lazily constructed singleton.
    pub fn add_singleton_factory<T, F>(&self, factory: F) -> DiResult<()>
    where
        T: Send + Sync + 'static,
        F: Fn(&ResolverContext<'_>) -> T + Send + Sync + 'static,
    {
        self.register::<T>().factory(factory)
    }

    /// Registers a transient: a new instance on every resolution.
    pub fn add_transient_factory<T, F>(&self, factory: F) -> DiResult<()>
    where
        T: Send + Sync + 'static,
        F: Fn(&ResolverContext<'_>) -> T + Send + Sync + 'static,
    {
        self.register::<T>().scope(Lifetime::Transient).factory(factory)
    }

    /// Registers a singleton constructed during [`build`](Container::build).
    pub fn add_eager_factory<T, F>(&self, factory: F) -> DiResult<()>
    where
        T: Send + Sync + 'static,
        F: Fn(&ResolverContext<'_>) -> T + Send + Sync + 'static,
    {
        self.register::<T>().scope(Lifetime::Eager).factory(factory)
    }

    /// Registers a singleton with a fallible provider.
    pub fn add_provider<T, F>(&self, provider: F) -> DiResult<()>
    where
        T: Send + Sync + 'static,
        F: Fn(&ResolverContext<'_>) -> Result<T, BoxError> + Send + Sync + 'static,
    {
        self.register::<T>().provider(provider)
    }

    /// Registers a trait-object singleton, resolvable with
    /// [`get_trait::<I>`](crate::Resolver::get_trait).
    pub fn add_singleton_trait<I>(&self, value: Arc<I>) -> DiResult<()>
    where
        I: ?Sized + Send + Sync + 'static,
    {
        self.insert_trait::<I>(Key::of::<I>(), Lifetime::Singleton, true, move |_| Ok(value.clone()))
    }

    /// Registers a named trait-object singleton.
    pub fn add_named_singleton_trait<I>(&self, name: &'static str, value: Arc<I>) -> DiResult<()>
    where
        I: ?Sized + Send + Sync + 'static,
    {
        self.insert_trait::<I>(Key::named::<I>(name), Lifetime::Singleton, true, move |_| {
            Ok(value.clone())
        })
    }

    /// Registers a trait-object provider with the given lifetime.
    pub fn add_trait_provider<I, F>(&self, lifetime: Lifetime, provider: F) -> DiResult<()>
    where
        I: ?Sized + Send + Sync + 'static,
        F: Fn(&ResolverContext<'_>) -> Result<Arc<I>, BoxError> + Send + Sync + 'static,
    {
        self.insert_trait::<I>(Key::of::<I>(), lifetime, false, provider)
    }

    /// Registers `worker` as a singleton background worker.
    pub fn add_worker<W: Worker>(&self, worker: W, options: WorkerOptions) -> DiResult<()> {
        self.register::<W>().worker(options).instance(worker)
    }

    fn insert_trait<I>(
        &self,
        key: Key,
        lifetime: Lifetime,
        prebuilt: bool,
        provider: impl Fn(&ResolverContext<'_>) -> Result<Arc<I>, BoxError> + Send + Sync + 'static,
    ) -> DiResult<()>
    where
        I: ?Sized + Send + Sync + 'static,
    {
        let ctor: Ctor = Arc::new(move |resolver: &ResolverContext<'_>| match provider(resolver) {
            Ok(value) => Ok(Arc::new(value) as AnyArc),
            Err(source) => Err(provider_error(key, source)),
        });
        self.insert(
            Registration {
                key,
                lifetime,
                ctor,
                impl_id: TypeId::of::<Arc<I>>(),
                impl_name: std::any::type_name::<I>(),
                prebuilt,
                starter: None,
                stopper: None,
                interfaces: Vec::new(),
                worker: None,
                instance: OnceCell::new(),
            },
            false,
        )
    }
}
