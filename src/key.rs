//! Service key types for the dependency injection container.

use std::any::TypeId;
use std::fmt;

/// Key for service storage and lookup.
///
/// Keys uniquely identify a registration: the static type plus an optional
/// name. Trait objects are keyed by `TypeId::of::<dyn Trait>()`, so
/// `Arc<dyn Logger>` and a concrete `ConsoleLogger` never collide.
///
/// # Examples
///
/// ```rust
/// use ferrous_runtime::{Container, Resolver, Key, key_of};
///
/// let container = Container::new();
/// container.add_singleton(42u32).unwrap();
/// container.add_named_singleton("config_port", 8080u32).unwrap();
/// container.build().unwrap();
///
/// let number = container.get_required::<u32>(); // Uses Type key
/// let port = container.get_named_required::<u32>("config_port"); // Uses Named key
///
/// assert_eq!(*number, 42);
/// assert_eq!(*port, 8080);
/// assert_eq!(key_of::<u32>(), Key::of::<u32>());
/// ```
#[derive(Debug, Clone, Copy)]
pub enum Key {
    /// Concrete type key with TypeId and name for diagnostics
    ///
    /// The TypeId provides fast lookup while the name helps with debugging.
    Type(TypeId, &'static str),
    /// Named type key with TypeId, typename, and name
    ///
    /// Like `Type` but with an additional string name for cases where
    /// multiple instances of the same type need different registrations.
    Named(TypeId, &'static str, &'static str),
}

impl Key {
    /// Key of the unnamed registration for `T`.
    #[inline(always)]
    pub fn of<T: ?Sized + 'static>() -> Key {
        Key::Type(TypeId::of::<T>(), std::any::type_name::<T>())
    }

    /// Key of the registration for `T` under `name`.
    #[inline(always)]
    pub fn named<T: ?Sized + 'static>(name: &'static str) -> Key {
        Key::Named(TypeId::of::<T>(), std::any::type_name::<T>(), name)
    }

    /// Get the type name for display
    ///
    /// Returns the human-readable type name for debugging and error messages.
    /// This is the `std::any::type_name` result, without the service name.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ferrous_runtime::Key;
    ///
    /// let type_key = Key::of::<String>();
    /// assert_eq!(type_key.display_name(), "alloc::string::String");
    ///
    /// let named_key = Key::named::<u32>("port");
    /// assert_eq!(named_key.display_name(), "u32");
    /// ```
    pub fn display_name(&self) -> &'static str {
        match self {
            Key::Type(_, name) => name,
            Key::Named(_, name, _) => name,
        }
    }

    /// Get the service name for named services, or None for unnamed services
    pub fn service_name(&self) -> Option<&'static str> {
        match self {
            Key::Type(_, _) => None,
            Key::Named(_, _, name) => Some(name),
        }
    }

    /// The `TypeId` of the registered type.
    pub fn type_id(&self) -> TypeId {
        match self {
            Key::Type(id, _) | Key::Named(id, _, _) => *id,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Type(_, ty) => f.write_str(ty),
            Key::Named(_, ty, name) => write!(f, "{}[{}]", ty, name),
        }
    }
}

// Equality ignores the diagnostic type name
impl PartialEq for Key {
    #[inline(always)]
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Key::Type(a, _), Key::Type(b, _)) => a == b,
            (Key::Named(a, _, name_a), Key::Named(b, _, name_b)) => a == b && name_a == name_b,
            _ => false,
        }
    }
}

impl Eq for Key {}

impl PartialOrd for Key {
    #[inline(always)]
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    #[inline(always)]
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use std::cmp::Ordering;

        match (self, other) {
            (Key::Type(a, _), Key::Type(b, _)) => a.cmp(b),
            (Key::Named(a, _, name_a), Key::Named(b, _, name_b)) => {
                a.cmp(b).then_with(|| name_a.cmp(name_b))
            }
            (Key::Type(_, _), Key::Named(_, _, _)) => Ordering::Less,
            (Key::Named(_, _, _), Key::Type(_, _)) => Ordering::Greater,
        }
    }
}

impl std::hash::Hash for Key {
    #[inline(always)]
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        match self {
            Key::Type(id, _) => {
                0u8.hash(state);
                id.hash(state);
            }
            Key::Named(id, _, name) => {
                1u8.hash(state);
                id.hash(state);
                name.hash(state);
            }
        }
    }
}

/// Helper for creating unnamed type keys.
#[inline(always)]
pub fn key_of<T: ?Sized + 'static>() -> Key {
    Key::of::<T>()
}
