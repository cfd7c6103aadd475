//! Lifecycle capability traits and participants.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::Context;
use crate::error::BoxError;
use crate::key::Key;

/// Capability: the instance has startup work.
///
/// `on_start` must return promptly. Anything that has to run for the life
/// of the application belongs in a task spawned from here, or in a
/// [`Worker`](crate::Worker).
///
/// # Examples
///
/// ```
/// use ferrous_runtime::{BoxError, Context, Starter};
/// use async_trait::async_trait;
///
/// struct Cache;
///
/// #[async_trait]
/// impl Starter for Cache {
///     async fn on_start(&self, _ctx: &Context) -> Result<(), BoxError> {
///         // warm up...
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Starter: Send + Sync + 'static {
    /// Called once, in construction order, by [`Lifecycle::start`](crate::Lifecycle::start).
    async fn on_start(&self, ctx: &Context) -> Result<(), BoxError>;
}

/// Capability: the instance has shutdown work.
#[async_trait]
pub trait Stopper: Send + Sync + 'static {
    /// Called once, in reverse construction order, by [`Lifecycle::stop`](crate::Lifecycle::stop).
    async fn on_stop(&self, ctx: &Context) -> Result<(), BoxError>;
}

/// A constructed instance together with the capabilities it exposes.
///
/// Participants are recorded by the container in first-construction order;
/// the capability casts happen once, right after the provider returns.
#[derive(Clone)]
pub struct Participant {
    key: Key,
    starter: Option<Arc<dyn Starter>>,
    stopper: Option<Arc<dyn Stopper>>,
}

impl Participant {
    /// Creates a participant from already-cast capabilities.
    pub fn new(
        key: Key,
        starter: Option<Arc<dyn Starter>>,
        stopper: Option<Arc<dyn Stopper>>,
    ) -> Self {
        Self {
            key,
            starter,
            stopper,
        }
    }

    /// Participant exposing both capabilities of `value`.
    pub fn both<T>(key: Key, value: Arc<T>) -> Self
    where
        T: Starter + Stopper,
    {
        let starter: Arc<dyn Starter> = value.clone();
        let stopper: Arc<dyn Stopper> = value;
        Self::new(key, Some(starter), Some(stopper))
    }

    /// Registration key of the instance.
    pub fn key(&self) -> Key {
        self.key
    }

    /// Identity used in logs and errors.
    pub fn name(&self) -> String {
        self.key.to_string()
    }

    /// The `Starter` view, if the instance is one.
    pub fn starter(&self) -> Option<&Arc<dyn Starter>> {
        self.starter.as_ref()
    }

    /// The `Stopper` view, if the instance is one.
    pub fn stopper(&self) -> Option<&Arc<dyn Stopper>> {
        self.stopper.as_ref()
    }

    /// True if the instance exposes neither capability.
    pub fn is_passive(&self) -> bool {
        self.starter.is_none() && self.stopper.is_none()
    }
}

impl fmt::Debug for Participant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Participant")
            .field("key", &self.key.to_string())
            .field("starter", &self.starter.is_some())
            .field("stopper", &self.stopper.is_some())
            .finish()
    }
}
