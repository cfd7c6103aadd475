//! Error types for the runtime.
//!
//! Each subsystem has its own enum so callers can match on the failure that
//! concerns them:
//!
//! - [`DiError`]: registration and resolution failures raised by the [`Container`](crate::Container).
//! - [`LifecycleError`]: start/stop failures raised by the [`Lifecycle`](crate::Lifecycle) engine.
//! - [`WorkerError`]: supervisor and worker-manager outcomes.
//! - [`AppError`]: everything [`Application`](crate::Application) can surface.
//!
//! All enums expose `as_label()`, a short stable snake_case label for logs.

use thiserror::Error;

use crate::context::ContextError;

/// Boxed error returned by providers and lifecycle hooks.
///
/// Any `std::error::Error + Send + Sync` converts into it with `?`, as do
/// `&str` and `String`.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Dependency injection errors
///
/// Represents the various error conditions that can occur during service
/// registration, resolution, or container operations.
///
/// # Examples
///
/// ```rust
/// use ferrous_runtime::{Container, DiError, Resolver};
///
/// let container = Container::new();
/// container.build().unwrap();
/// match container.get::<String>() {
///     Err(DiError::NotFound(name)) => assert_eq!(name, "alloc::string::String"),
///     _ => unreachable!(),
/// }
/// ```
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum DiError {
    /// Service not registered
    #[error("di: service not found: {0}")]
    NotFound(String),
    /// Circular dependency detected (includes the full resolution chain)
    #[error("di: circular dependency: {}", format_chain(.0))]
    Circular(Vec<crate::Key>),
    /// The same (type, name) was registered twice without `replace()`
    #[error("di: duplicate registration: {0}")]
    Duplicate(String),
    /// Registration attempted after `build()`
    #[error("di: container already built, cannot register {0}")]
    AlreadyBuilt(String),
    /// Resolution attempted before `build()`
    #[error("di: container not built, cannot resolve {0}")]
    NotBuilt(String),
    /// Type downcast failed
    #[error("di: type mismatch for: {0}")]
    TypeMismatch(&'static str),
    /// The provider could not produce an instance (it panicked)
    #[error("di: invalid provider for {service}: {reason}")]
    InvalidProvider {
        /// Registration whose provider misbehaved.
        service: String,
        /// Panic message or other description.
        reason: String,
    },
    /// A late-binding slot was already populated
    #[error("di: target for {0} is not settable: already populated")]
    NotSettable(&'static str),
    /// Maximum resolution depth exceeded
    #[error("di: max resolution depth {0} exceeded")]
    DepthExceeded(usize),
    /// The provider returned an error
    #[error("di: resolve {service}: {source}")]
    Provider {
        /// Registration whose provider failed.
        service: String,
        /// Error returned by the provider.
        #[source]
        source: BoxError,
    },
}

fn format_chain(chain: &[crate::Key]) -> String {
    chain
        .iter()
        .map(|k| k.to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

impl DiError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            DiError::NotFound(_) => "di_not_found",
            DiError::Circular(_) => "di_cycle",
            DiError::Duplicate(_) => "di_duplicate",
            DiError::AlreadyBuilt(_) => "di_already_built",
            DiError::NotBuilt(_) => "di_not_built",
            DiError::TypeMismatch(_) => "di_type_mismatch",
            DiError::InvalidProvider { .. } => "di_invalid_provider",
            DiError::NotSettable(_) => "di_not_settable",
            DiError::DepthExceeded(_) => "di_depth_exceeded",
            DiError::Provider { .. } => "di_provider_failed",
        }
    }

    /// Returns the resolution chain when this is a [`DiError::Circular`].
    pub fn cycle(&self) -> Option<&[crate::Key]> {
        match self {
            DiError::Circular(chain) => Some(chain),
            _ => None,
        }
    }
}

/// Result type for DI operations
///
/// A convenience type alias for `Result<T, DiError>`.
pub type DiResult<T> = Result<T, DiError>;

/// Lifecycle phase, used in timeout reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// `Lifecycle::start`
    Start,
    /// `Lifecycle::stop`
    Stop,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Start => f.write_str("start"),
            Phase::Stop => f.write_str("stop"),
        }
    }
}

/// A single participant's hook failure.
#[derive(Error, Debug)]
#[error("{participant}: {source}")]
pub struct ParticipantError {
    /// Identity of the participant (its registration key).
    pub participant: String,
    /// Error returned by the hook, or the context error if it never ran.
    #[source]
    pub source: BoxError,
}

/// Errors produced by the lifecycle engine.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// A starter failed; earlier participants were rolled back.
    #[error("lifecycle: start {participant}: {source}")]
    StartFailed {
        /// Participant whose `on_start` failed.
        participant: String,
        /// The original error.
        #[source]
        source: BoxError,
    },
    /// One or more stoppers failed. Every stopper was still given a chance to run.
    #[error("lifecycle: stop: {} participant(s) failed: {}", .0.len(), join_errors(.0))]
    StopFailed(Vec<ParticipantError>),
    /// The context expired before all participants finished.
    #[error("lifecycle: {phase} interrupted ({reason}); pending: {pending:?}")]
    Timeout {
        /// Phase that was interrupted.
        phase: Phase,
        /// Deadline elapsed or cancelled.
        reason: ContextError,
        /// Participants that had not completed.
        pending: Vec<String>,
    },
    /// Operation not permitted in the current state.
    #[error("lifecycle: cannot {action} while {state:?}")]
    InvalidState {
        /// Attempted operation.
        action: &'static str,
        /// State at the time of the attempt.
        state: crate::lifecycle::LifecycleState,
    },
}

fn join_errors(errors: &[ParticipantError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl LifecycleError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            LifecycleError::StartFailed { .. } => "lifecycle_start_failed",
            LifecycleError::StopFailed(_) => "lifecycle_stop_failed",
            LifecycleError::Timeout { .. } => "lifecycle_timeout",
            LifecycleError::InvalidState { .. } => "lifecycle_invalid_state",
        }
    }
}

/// Errors and outcomes reported by the worker subsystem.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    /// The worker failed `max_restarts` consecutive times and will not be retried.
    #[error("worker {worker}: circuit tripped after {failures} consecutive failures: {last_error}")]
    CircuitTripped {
        /// Worker name.
        worker: String,
        /// Consecutive failures observed.
        failures: u32,
        /// Message of the last `on_start` failure.
        last_error: String,
    },
    /// Normal termination. Not a failure.
    #[error("worker {0}: stopped")]
    Stopped(String),
    /// A worker marked critical tripped its circuit.
    #[error("worker {worker}: critical worker failed: {source}")]
    CriticalFailed {
        /// Worker name.
        worker: String,
        /// Underlying trip.
        #[source]
        source: Box<WorkerError>,
    },
    /// Registration attempted after `start_all`.
    #[error("worker manager: already running, cannot register {0}")]
    ManagerRunning(String),
    /// Two workers share a name.
    #[error("worker manager: duplicate worker name {0}")]
    DuplicateWorker(String),
}

impl WorkerError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            WorkerError::CircuitTripped { .. } => "worker_circuit_tripped",
            WorkerError::Stopped(_) => "worker_stopped",
            WorkerError::CriticalFailed { .. } => "worker_critical_failed",
            WorkerError::ManagerRunning(_) => "worker_manager_running",
            WorkerError::DuplicateWorker(_) => "worker_duplicate",
        }
    }

    /// True for outcomes that represent a failure.
    pub fn is_failure(&self) -> bool {
        !matches!(self, WorkerError::Stopped(_))
    }
}

/// Errors surfaced by [`Application`](crate::Application).
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum AppError {
    /// Building or resolving failed.
    #[error(transparent)]
    Di(#[from] DiError),
    /// Start or stop of DI-managed participants failed.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    /// Worker registration failed, or a critical worker tripped.
    #[error(transparent)]
    Worker(#[from] WorkerError),
}

impl AppError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            AppError::Di(e) => e.as_label(),
            AppError::Lifecycle(e) => e.as_label(),
            AppError::Worker(e) => e.as_label(),
        }
    }
}
