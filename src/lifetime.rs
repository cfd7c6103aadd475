//! Service lifetime definitions.

/// Service lifetimes controlling instance caching behavior
///
/// Defines how service instances are created, cached, and shared within
/// the container.
///
/// # Examples
///
/// ```rust
/// use ferrous_runtime::{Container, Resolver, Lifetime};
/// use std::sync::Arc;
///
/// struct Database { url: String }
/// struct RequestModel { id: u32 }
///
/// let container = Container::new();
///
/// // Eager: constructed during build()
/// container.register::<Database>()
///     .scope(Lifetime::Eager)
///     .factory(|_| Database { url: "postgres://localhost".to_string() })
///     .unwrap();
///
/// // Transient: New instance every time
/// container.add_transient_factory::<RequestModel, _>(|_| RequestModel { id: 12345 }).unwrap();
///
/// container.build().unwrap();
///
/// let db1 = container.get_required::<Database>();
/// let db2 = container.get_required::<Database>();
/// assert!(Arc::ptr_eq(&db1, &db2));
///
/// let model1 = container.get_required::<RequestModel>();
/// let model2 = container.get_required::<RequestModel>();
/// assert!(!Arc::ptr_eq(&model1, &model2));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lifetime {
    /// Single instance per container, created on first resolution
    ///
    /// The provider runs at most once per container lifetime, even under
    /// concurrent callers.
    #[default]
    Singleton,
    /// New instance per resolution, never cached
    ///
    /// Transient instances are not lifecycle participants: the container
    /// does not own them.
    Transient,
    /// Singleton that is force-instantiated during `build()`
    ///
    /// Eager services are constructed in registration order and abort the
    /// build on the first failure.
    Eager,
}

impl Lifetime {
    /// True for lifetimes whose instance is cached by the container.
    #[inline]
    pub fn is_cached(self) -> bool {
        matches!(self, Lifetime::Singleton | Lifetime::Eager)
    }
}
