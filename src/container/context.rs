//! Resolver context handed to providers.

use std::any::{Any, TypeId};
use std::sync::Arc;

use crate::error::DiResult;
use crate::key::Key;
use crate::traits::{Resolver, ResolverCore};

/// Context passed to provider closures for resolving dependencies.
///
/// Resolutions made through the context extend the caller's resolution
/// chain, which is how cycles spanning several providers are detected.
///
/// # Examples
///
/// ```
/// use ferrous_runtime::{Container, Resolver};
/// use std::sync::Arc;
///
/// struct Database { url: String }
/// struct UserService { db: Arc<Database> }
///
/// let container = Container::new();
/// container.add_singleton(Database {
///     url: "postgres://localhost".to_string()
/// }).unwrap();
/// container.add_provider::<UserService, _>(|resolver| {
///     // resolver is a ResolverContext that provides access to other services
///     Ok(UserService { db: resolver.get::<Database>()? })
/// }).unwrap();
/// container.build().unwrap();
///
/// let users = container.get_required::<UserService>();
/// assert_eq!(users.db.url, "postgres://localhost");
/// ```
pub struct ResolverContext<'a> {
    resolver: &'a dyn ResolverCore,
}

impl<'a> ResolverContext<'a> {
    /// Creates a new ResolverContext wrapping the given resolver.
    pub(crate) fn new<T>(resolver: &'a T) -> Self
    where
        T: ResolverCore,
    {
        Self { resolver }
    }
}

impl ResolverCore for ResolverContext<'_> {
    fn resolve_any(&self, key: &Key) -> DiResult<Arc<dyn Any + Send + Sync>> {
        self.resolver.resolve_any(key)
    }

    fn resolve_all_any(
        &self,
        interface: TypeId,
        interface_name: &'static str,
    ) -> DiResult<Vec<Arc<dyn Any + Send + Sync>>> {
        self.resolver.resolve_all_any(interface, interface_name)
    }
}

impl Resolver for ResolverContext<'_> {}
