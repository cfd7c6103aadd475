//! Ordered start/stop of container-managed instances.
//!
//! The [`Lifecycle`] walks the participants recorded by the container in
//! first-construction order. Because a provider cannot return before its
//! dependencies are constructed, that order already puts dependencies
//! first.
//!
//! - [`Lifecycle::start`] calls `on_start` front to back. When participant
//!   `k` fails, participants `0..k` are stopped in reverse (errors there are
//!   logged) and the original error is returned.
//! - [`Lifecycle::stop`] calls `on_stop` back to front. Every participant
//!   gets its turn; failures are collected into one aggregate error.
//!
//! Every hook call races the context. A start that runs out of time is
//! rolled back like a failure; a stop that runs out of time reports the
//! participants it could not reach.

use std::time::Duration;

use parking_lot::Mutex;

mod participant;

pub use participant::{Participant, Starter, Stopper};

use crate::context::Context;
use crate::error::{LifecycleError, ParticipantError, Phase};

/// Grace period for rollback when the start context has already expired.
pub const DEFAULT_ROLLBACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle engine state.
///
/// ```text
/// Idle ─► Starting ─► Started ─► Stopping ─► Stopped
///             │                                 ▲
///             └────────── start failed ─────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Not started.
    Idle,
    /// `start` in progress.
    Starting,
    /// Every starter succeeded.
    Started,
    /// `stop` in progress.
    Stopping,
    /// Stopped, or start failed and was rolled back.
    Stopped,
}

/// Starts and stops an ordered list of [`Participant`]s.
///
/// # Examples
///
/// ```
/// use ferrous_runtime::{BoxError, Container, Context, Resolver, Starter};
/// use async_trait::async_trait;
///
/// struct Server;
///
/// #[async_trait]
/// impl Starter for Server {
///     async fn on_start(&self, _: &Context) -> Result<(), BoxError> { Ok(()) }
/// }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let container = Container::new();
/// container.register::<Server>().starter().instance(Server).unwrap();
/// container.build().unwrap();
/// container.get_required::<Server>();
///
/// let lifecycle = container.lifecycle();
/// assert_eq!(lifecycle.len(), 1);
///
/// let ctx = Context::background();
/// lifecycle.start(&ctx).await.unwrap();
/// lifecycle.stop(&ctx).await.unwrap();
/// # }
/// ```
#[derive(Debug)]
pub struct Lifecycle {
    participants: Vec<Participant>,
    state: Mutex<LifecycleState>,
    rollback_timeout: Duration,
}

impl Lifecycle {
    /// Engine over `participants`, in start order.
    pub fn new(participants: Vec<Participant>) -> Self {
        Self {
            participants,
            state: Mutex::new(LifecycleState::Idle),
            rollback_timeout: DEFAULT_ROLLBACK_TIMEOUT,
        }
    }

    /// Sets the rollback grace period used when the start context expired.
    pub fn with_rollback_timeout(mut self, timeout: Duration) -> Self {
        self.rollback_timeout = timeout;
        self
    }

    /// Participants in start order.
    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    /// Number of participants.
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    /// True if there is nothing to start or stop.
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Current state.
    pub fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    fn set_state(&self, state: LifecycleState) {
        *self.state.lock() = state;
    }

    /// Calls every starter in order, rolling back on the first failure.
    pub async fn start(&self, ctx: &Context) -> Result<(), LifecycleError> {
        {
            let mut state = self.state.lock();
            if *state != LifecycleState::Idle {
                return Err(LifecycleError::InvalidState {
                    action: "start",
                    state: *state,
                });
            }
            *state = LifecycleState::Starting;
        }
        tracing::info!(participants = self.participants.len(), "lifecycle starting");

        for (index, participant) in self.participants.iter().enumerate() {
            let Some(starter) = participant.starter() else {
                continue;
            };
            let name = participant.name();
            tracing::debug!(participant = %name, "on_start");

            match ctx.run(starter.on_start(ctx)).await {
                Ok(Ok(())) => {}
                Ok(Err(source)) => {
                    tracing::error!(participant = %name, error = %source, "start failed; rolling back");
                    self.rollback(ctx, index).await;
                    self.set_state(LifecycleState::Stopped);
                    return Err(LifecycleError::StartFailed {
                        participant: name,
                        source,
                    });
                }
                Err(reason) => {
                    let pending: Vec<String> = self.participants[index..]
                        .iter()
                        .filter(|p| p.starter().is_some())
                        .map(Participant::name)
                        .collect();
                    tracing::error!(participant = %name, %reason, ?pending, "start interrupted; rolling back");
                    self.rollback(ctx, index).await;
                    self.set_state(LifecycleState::Stopped);
                    return Err(LifecycleError::Timeout {
                        phase: Phase::Start,
                        reason,
                        pending,
                    });
                }
            }
        }

        self.set_state(LifecycleState::Started);
        tracing::info!("lifecycle started");
        Ok(())
    }

    /// Stops participants `0..started` in reverse. Errors are logged only.
    async fn rollback(&self, ctx: &Context, started: usize) {
        let grace;
        let ctx = if ctx.is_done() {
            grace = Context::background().with_timeout(self.rollback_timeout);
            &grace
        } else {
            ctx
        };

        for participant in self.participants[..started].iter().rev() {
            let Some(stopper) = participant.stopper() else {
                continue;
            };
            let name = participant.name();
            tracing::debug!(participant = %name, "rollback on_stop");
            match ctx.run(stopper.on_stop(ctx)).await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    tracing::warn!(participant = %name, %error, "rollback stop failed");
                }
                Err(reason) => {
                    tracing::warn!(participant = %name, %reason, "rollback stop interrupted");
                }
            }
        }
    }

    /// Calls every stopper in reverse order.
    ///
    /// Stopping a stopped lifecycle is a no-op; stopping one that never
    /// started is an [`InvalidState`](LifecycleError::InvalidState) error.
    pub async fn stop(&self, ctx: &Context) -> Result<(), LifecycleError> {
        {
            let mut state = self.state.lock();
            match *state {
                LifecycleState::Started => *state = LifecycleState::Stopping,
                LifecycleState::Stopped => return Ok(()),
                other => {
                    return Err(LifecycleError::InvalidState {
                        action: "stop",
                        state: other,
                    })
                }
            }
        }
        tracing::info!(participants = self.participants.len(), "lifecycle stopping");

        let mut errors = Vec::new();
        for participant in self.participants.iter().rev() {
            let Some(stopper) = participant.stopper() else {
                continue;
            };
            let name = participant.name();

            // Past the deadline the remaining stoppers are reported, not called
            if let Some(reason) = ctx.err() {
                errors.push(ParticipantError {
                    participant: name,
                    source: Box::new(reason),
                });
                continue;
            }

            tracing::debug!(participant = %name, "on_stop");
            match ctx.run(stopper.on_stop(ctx)).await {
                Ok(Ok(())) => {}
                Ok(Err(source)) => {
                    tracing::warn!(participant = %name, error = %source, "stop failed");
                    errors.push(ParticipantError {
                        participant: name,
                        source,
                    });
                }
                Err(reason) => {
                    tracing::warn!(participant = %name, %reason, "stop interrupted");
                    errors.push(ParticipantError {
                        participant: name,
                        source: Box::new(reason),
                    });
                }
            }
        }

        self.set_state(LifecycleState::Stopped);
        if errors.is_empty() {
            tracing::info!("lifecycle stopped");
            Ok(())
        } else {
            tracing::warn!(failed = errors.len(), "lifecycle stopped with errors");
            Err(LifecycleError::StopFailed(errors))
        }
    }
}
