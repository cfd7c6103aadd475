//! Supervised background workers.
//!
//! A [`Worker`] is a long-running component kept outside the generic DI
//! lifecycle. Each registered worker gets its own [`Supervisor`] that retries
//! `on_start` with exponential backoff until it succeeds, the circuit breaker
//! trips, or the worker is stopped.
//!
//! ## State machine
//! ```text
//! Stopped ─► Starting ─► Running ─────────────────────► Stopping ─► Stopped
//!               │  ▲        │
//!        failure│  │retry   │report_failure
//!               ▼  │        ▼
//!           BackoffWait ◄───┘
//!               │
//!               └── failures ≥ max_restarts ──► CircuitTripped
//! ```
//!
//! A worker leaves `Running` when the loop it spawned calls
//! [`Context::report_failure`] on the context it was started with.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::context::Context;
use crate::error::BoxError;

mod backoff;
mod manager;
mod supervisor;

pub use backoff::{BackoffConfig, BackoffState};
pub use manager::{WorkerManager, WorkerRecord};
pub use supervisor::Supervisor;

/// A long-running background component.
///
/// `on_start` follows the same non-blocking contract as
/// [`Starter`](crate::Starter): spawn the loop, return. The context passed to
/// `on_start` stays live until the worker is stopped, so spawned tasks can
/// watch it for shutdown.
///
/// # Examples
///
/// ```
/// use ferrous_runtime::{BoxError, Context, Worker};
/// use async_trait::async_trait;
///
/// struct Poller;
///
/// #[async_trait]
/// impl Worker for Poller {
///     fn name(&self) -> &str { "poller" }
///
///     async fn on_start(&self, ctx: &Context) -> Result<(), BoxError> {
///         let ctx = ctx.clone();
///         tokio::spawn(async move {
///             ctx.done().await;
///         });
///         Ok(())
///     }
///
///     async fn on_stop(&self, _ctx: &Context) -> Result<(), BoxError> {
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Worker: Send + Sync + 'static {
    /// Unique name, used for logs and lookups.
    fn name(&self) -> &str;

    /// Starts the worker. Failures and panics are retried with backoff.
    async fn on_start(&self, ctx: &Context) -> Result<(), BoxError>;

    /// Stops the worker. Called exactly once; errors are logged only.
    async fn on_stop(&self, ctx: &Context) -> Result<(), BoxError>;
}

/// Current state of a supervised worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Not started, or stopped normally.
    Stopped,
    /// `on_start` in progress.
    Starting,
    /// `on_start` succeeded.
    Running,
    /// Waiting before the next attempt.
    BackoffWait,
    /// Too many consecutive failures; no further attempts.
    CircuitTripped,
    /// `on_stop` in progress.
    Stopping,
}

impl WorkerState {
    /// True for states the supervisor never leaves on its own.
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkerState::Stopped | WorkerState::CircuitTripped)
    }

    /// Stable label for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerState::Stopped => "stopped",
            WorkerState::Starting => "starting",
            WorkerState::Running => "running",
            WorkerState::BackoffWait => "backoff_wait",
            WorkerState::CircuitTripped => "circuit_tripped",
            WorkerState::Stopping => "stopping",
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-worker supervision settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorkerOptions {
    /// A tripped circuit on a critical worker shuts the application down.
    pub critical: bool,
    /// Restart delays.
    pub backoff: BackoffConfig,
    /// Consecutive failures before the circuit trips. `None` retries forever.
    pub max_restarts: Option<u32>,
    /// A worker that reports a failure sooner than this after starting is
    /// considered still failing: its earlier failures keep counting.
    pub stable_after: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            critical: false,
            backoff: BackoffConfig::default(),
            max_restarts: Some(5),
            stable_after: Duration::from_secs(60),
        }
    }
}

impl WorkerOptions {
    /// Defaults: non-critical, default backoff, 5 restarts, stable after 60s.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the worker critical.
    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    /// Sets the circuit-breaker threshold.
    pub fn max_restarts(mut self, max: u32) -> Self {
        self.max_restarts = Some(max);
        self
    }

    /// Never trip the circuit.
    pub fn unlimited_restarts(mut self) -> Self {
        self.max_restarts = None;
        self
    }

    /// Sets how long a started worker must run before a reported failure
    /// begins a fresh failure streak.
    pub fn stable_after(mut self, window: Duration) -> Self {
        self.stable_after = window;
        self
    }

    /// Sets the backoff parameters.
    pub fn backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Something that happened inside a supervisor.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// Attempt `attempt` (1-based) is calling `on_start`.
    Starting {
        /// Attempt number.
        attempt: u32,
    },
    /// `on_start` succeeded.
    Started {
        /// Attempt number that succeeded.
        attempt: u32,
    },
    /// Backoff returned to its initial interval after a success.
    BackoffReset {
        /// Consecutive failures that preceded the success.
        previous_failures: u32,
    },
    /// `on_start` failed or panicked, or the running worker reported a failure.
    Failed {
        /// Attempt number that failed.
        attempt: u32,
        /// Consecutive failures so far.
        failures: u32,
        /// Error message.
        error: String,
    },
    /// Next attempt scheduled after `delay`.
    BackoffScheduled {
        /// Attempt that just failed.
        attempt: u32,
        /// Wait before the next attempt.
        delay: Duration,
    },
    /// The circuit breaker tripped.
    CircuitTripped {
        /// Consecutive failures.
        failures: u32,
    },
    /// `on_stop` returned an error.
    StopFailed {
        /// Error message.
        error: String,
    },
    /// The worker is stopped.
    Stopped,
}

/// Receives [`WorkerEvent`]s from every supervisor of a manager.
///
/// Calls are synchronous and made from the supervisor task; keep them cheap.
pub trait WorkerObserver: Send + Sync {
    /// Called for every event of the named worker.
    fn on_event(&self, worker: &str, event: &WorkerEvent);
}
