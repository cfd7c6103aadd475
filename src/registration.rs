//! Service registration types.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::container::ResolverContext;
use crate::error::{DiError, DiResult};
use crate::key::Key;
use crate::lifecycle::{Starter, Stopper};
use crate::lifetime::Lifetime;
use crate::worker::{Worker, WorkerOptions};

// Type-erased Arc for storage
pub(crate) type AnyArc = Arc<dyn Any + Send + Sync>;

pub(crate) type Ctor = Arc<dyn for<'a> Fn(&ResolverContext<'a>) -> DiResult<AnyArc> + Send + Sync>;

pub(crate) type StarterCast = fn(&AnyArc) -> Option<Arc<dyn Starter>>;
pub(crate) type StopperCast = fn(&AnyArc) -> Option<Arc<dyn Stopper>>;
pub(crate) type WorkerCast = fn(&AnyArc) -> Option<Arc<dyn Worker>>;

/// An interface the registered type was bound to with `bind::<dyn I>()`.
///
/// `cast` produces an `Arc<Arc<dyn I>>` erased as [`AnyArc`], the same
/// storage shape trait registrations use.
#[derive(Clone)]
pub(crate) struct Interface {
    pub(crate) type_id: TypeId,
    pub(crate) type_name: &'static str,
    pub(crate) cast: Arc<dyn Fn(&AnyArc) -> Option<AnyArc> + Send + Sync>,
}

/// Service registration with lifetime and constructor
pub(crate) struct Registration {
    pub(crate) key: Key,
    pub(crate) lifetime: Lifetime,
    pub(crate) ctor: Ctor,
    /// Implementation type backing the registration (differs from the key for trait registrations)
    pub(crate) impl_id: TypeId,
    pub(crate) impl_name: &'static str,
    /// Registered with a ready-made value instead of a provider
    pub(crate) prebuilt: bool,
    pub(crate) starter: Option<StarterCast>,
    pub(crate) stopper: Option<StopperCast>,
    pub(crate) interfaces: Vec<Interface>,
    pub(crate) worker: Option<(WorkerCast, WorkerOptions)>,
    /// Cache for Singleton and Eager lifetimes
    pub(crate) instance: OnceCell<AnyArc>,
}

impl Registration {
    /// Returns the cached instance, if any.
    #[inline(always)]
    pub(crate) fn cached(&self) -> Option<&AnyArc> {
        self.instance.get()
    }

    /// A ready-made value with a lifecycle capability; it is recorded at
    /// build time instead of on first resolution.
    pub(crate) fn is_prebuilt_participant(&self) -> bool {
        self.prebuilt
            && self.lifetime.is_cached()
            && self.worker.is_none()
            && (self.starter.is_some() || self.stopper.is_some())
    }

    pub(crate) fn implements(&self, interface: TypeId) -> Option<&Interface> {
        self.interfaces.iter().find(|i| i.type_id == interface)
    }
}

/// Service registry holding all registrations.
///
/// Entries keep registration order (eager construction and `get_all` walk
/// them in order); the index gives O(1) lookup by key.
#[derive(Default)]
pub(crate) struct Registry {
    entries: Vec<Arc<Registration>>,
    index: HashMap<Key, usize>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Inserts a registration.
    ///
    /// An existing key is an error unless `replace` is set, in which case the
    /// old entry is overwritten in place and keeps its position.
    pub(crate) fn insert(&mut self, registration: Registration, replace: bool) -> DiResult<()> {
        let key = registration.key;
        match self.index.get(&key) {
            Some(&pos) if replace => {
                self.entries[pos] = Arc::new(registration);
                Ok(())
            }
            Some(_) => Err(DiError::Duplicate(key.to_string())),
            None => {
                self.index.insert(key, self.entries.len());
                self.entries.push(Arc::new(registration));
                Ok(())
            }
        }
    }

    /// Gets a registration by key.
    #[inline(always)]
    pub(crate) fn get(&self, key: &Key) -> Option<&Arc<Registration>> {
        self.index.get(key).map(|&pos| &self.entries[pos])
    }

    #[inline(always)]
    pub(crate) fn contains_key(&self, key: &Key) -> bool {
        self.index.contains_key(key)
    }

    /// Registrations in registration order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &Arc<Registration>> {
        self.entries.iter()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration(key: Key, value: u32) -> Registration {
        Registration {
            key,
            lifetime: Lifetime::Singleton,
            ctor: Arc::new(move |_: &ResolverContext<'_>| Ok(Arc::new(value) as AnyArc)),
            impl_id: TypeId::of::<u32>(),
            impl_name: "u32",
            prebuilt: true,
            starter: None,
            stopper: None,
            interfaces: Vec::new(),
            worker: None,
            instance: OnceCell::new(),
        }
    }

    #[test]
    fn duplicate_rejected_without_replace() {
        let mut registry = Registry::new();
        registry.insert(registration(Key::of::<u32>(), 1), false).unwrap();
        let err = registry.insert(registration(Key::of::<u32>(), 2), false).unwrap_err();
        assert!(matches!(err, DiError::Duplicate(_)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn replace_keeps_position() {
        let mut registry = Registry::new();
        registry.insert(registration(Key::named::<u32>("a"), 1), false).unwrap();
        registry.insert(registration(Key::named::<u32>("b"), 2), false).unwrap();
        registry.insert(registration(Key::named::<u32>("a"), 3), true).unwrap();

        let keys: Vec<Key> = registry.iter().map(|r| r.key).collect();
        assert_eq!(keys, vec![Key::named::<u32>("a"), Key::named::<u32>("b")]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn replace_of_missing_key_inserts() {
        let mut registry = Registry::new();
        registry.insert(registration(Key::of::<u32>(), 1), true).unwrap();
        assert!(registry.contains_key(&Key::of::<u32>()));
        assert!(registry.get(&Key::of::<u64>()).is_none());
    }
}
