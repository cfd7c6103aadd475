//! Diagnostic observers for resolution events.
//!
//! Observers see every uncached resolution: when it starts, when it
//! succeeds (with its duration) and when it fails. They are called
//! synchronously on the resolving thread, so implementations should stay
//! cheap. With no observers registered the calls cost one branch.

use std::sync::Arc;
use std::time::Duration;

use crate::error::DiError;
use crate::Key;

/// Observer trait for dependency injection resolution events.
///
/// Only `resolving` and `resolved` are required; the failure hooks default
/// to no-ops.
///
/// # Examples
///
/// ```
/// use ferrous_runtime::{Container, DiObserver, Key, Resolver};
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// #[derive(Default)]
/// struct CountingObserver {
///     resolved: AtomicUsize,
/// }
///
/// impl DiObserver for CountingObserver {
///     fn resolving(&self, _key: &Key) {}
///
///     fn resolved(&self, _key: &Key, _duration: Duration) {
///         self.resolved.fetch_add(1, Ordering::SeqCst);
///     }
/// }
///
/// let observer = Arc::new(CountingObserver::default());
/// let container = Container::new();
/// container.add_observer(observer.clone());
/// container.add_singleton_factory::<u32, _>(|_| 5).unwrap();
/// container.build().unwrap();
///
/// container.get_required::<u32>();
/// container.get_required::<u32>(); // cached, not observed
/// assert_eq!(observer.resolved.load(Ordering::SeqCst), 1);
/// ```
pub trait DiObserver: Send + Sync {
    /// Called before the provider runs.
    fn resolving(&self, key: &Key);

    /// Called after the provider returned successfully.
    fn resolved(&self, key: &Key, duration: Duration);

    /// Called when the provider failed or panicked.
    fn provider_failed(&self, key: &Key, error: &DiError) {
        let _ = (key, error);
    }

    /// Called when a cycle is detected; `chain` ends with the repeated key.
    fn cycle_detected(&self, chain: &[Key]) {
        let _ = chain;
    }
}

/// Container for registered observers.
#[derive(Default, Clone)]
pub(crate) struct Observers {
    observers: Vec<Arc<dyn DiObserver>>,
}

impl Observers {
    pub(crate) fn new() -> Self {
        Self {
            observers: Vec::new(),
        }
    }

    pub(crate) fn add(&mut self, observer: Arc<dyn DiObserver>) {
        self.observers.push(observer);
    }

    #[inline]
    pub(crate) fn has_observers(&self) -> bool {
        !self.observers.is_empty()
    }

    #[inline]
    pub(crate) fn resolving(&self, key: &Key) {
        if self.has_observers() {
            for observer in &self.observers {
                observer.resolving(key);
            }
        }
    }

    #[inline]
    pub(crate) fn resolved(&self, key: &Key, duration: Duration) {
        if self.has_observers() {
            for observer in &self.observers {
                observer.resolved(key, duration);
            }
        }
    }

    #[inline]
    pub(crate) fn provider_failed(&self, key: &Key, error: &DiError) {
        if self.has_observers() {
            for observer in &self.observers {
                observer.provider_failed(key, error);
            }
        }
    }

    #[inline]
    pub(crate) fn cycle_detected(&self, chain: &[Key]) {
        if self.has_observers() {
            for observer in &self.observers {
                observer.cycle_detected(chain);
            }
        }
    }
}

/// Built-in observer that emits `tracing` events.
///
/// Resolutions are logged at `TRACE`, provider failures at `WARN` and cycles
/// at `ERROR`.
///
/// # Examples
///
/// ```
/// use ferrous_runtime::{Container, LoggingObserver};
/// use std::sync::Arc;
///
/// let container = Container::new();
/// container.add_observer(Arc::new(LoggingObserver::new()));
/// ```
#[derive(Debug, Clone)]
pub struct LoggingObserver {
    prefix: String,
}

impl LoggingObserver {
    /// Creates a logging observer with the default `ferrous-runtime` prefix.
    pub fn new() -> Self {
        Self {
            prefix: "ferrous-runtime".to_string(),
        }
    }

    /// Creates a logging observer with a custom prefix, recorded on every event.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Default for LoggingObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl DiObserver for LoggingObserver {
    fn resolving(&self, key: &Key) {
        tracing::trace!(prefix = %self.prefix, service = %key, "resolving");
    }

    fn resolved(&self, key: &Key, duration: Duration) {
        tracing::trace!(prefix = %self.prefix, service = %key, ?duration, "resolved");
    }

    fn provider_failed(&self, key: &Key, error: &DiError) {
        tracing::warn!(
            prefix = %self.prefix,
            service = %key,
            label = error.as_label(),
            %error,
            "provider failed"
        );
    }

    fn cycle_detected(&self, chain: &[Key]) {
        let chain = chain
            .iter()
            .map(|k| k.to_string())
            .collect::<Vec<_>>()
            .join(" -> ");
        tracing::error!(prefix = %self.prefix, %chain, "dependency cycle");
    }
}
