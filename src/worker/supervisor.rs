//! # Supervisor: one worker, one task.
//!
//! Runs the restart loop for a single [`Worker`]:
//!
//! ```text
//! loop {
//!   ├─► Starting: on_start(run ctx) (panics become failures)
//!   ├─► Ok  → reset backoff, Running
//!   │         └─► wait for report_failure on the run ctx, or stop
//!   └─► failure → cancel run ctx, failures += 1
//!          ├─► failures ≥ max_restarts → CircuitTripped, loop exits
//!          └─► BackoffWait: sleep(next_delay) or stop signal
//! }
//! ```
//!
//! Each attempt gets its own child context. A failure reported on it after
//! `on_start` returned sends the worker back into backoff; if that happens
//! within `stable_after` of the start, the failures before the start keep
//! counting toward the circuit breaker.
//!
//! [`Supervisor::stop`] cancels the loop (even mid-backoff), waits for it to
//! exit and then calls `on_stop` exactly once. If the stop context expires
//! first the loop and any in-flight `on_start` are aborted. Once stopping
//! has begun the loop never publishes another state. A failing `on_stop` is
//! logged and returned to the caller, never escalated.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::task::AbortOnDropHandle;

use crate::context::Context;
use crate::error::{BoxError, WorkerError};
use crate::internal::panic_message;
use crate::worker::{BackoffState, Worker, WorkerEvent, WorkerObserver, WorkerOptions, WorkerState};

pub(crate) type WorkerObservers = Arc<[Arc<dyn WorkerObserver>]>;

struct Shared {
    name: String,
    worker: Arc<dyn Worker>,
    options: WorkerOptions,
    state: watch::Sender<WorkerState>,
    outcome: OnceCell<WorkerError>,
    attempts: AtomicU32,
    observers: WorkerObservers,
}

impl Shared {
    fn set_state(&self, state: WorkerState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::trace!(worker = %self.name, from = %previous, to = %state, "worker state changed");
        }
    }

    /// Transition made by the restart loop. Refused once `stop` has taken
    /// over, so a stopped worker never shows up as running again.
    fn advance(&self, state: WorkerState) -> bool {
        let mut previous = state;
        let changed = self.state.send_if_modified(|current| {
            if matches!(*current, WorkerState::Stopping | WorkerState::Stopped) {
                return false;
            }
            previous = *current;
            *current = state;
            true
        });
        if changed && previous != state {
            tracing::trace!(worker = %self.name, from = %previous, to = %state, "worker state changed");
        }
        changed
    }

    fn emit(&self, event: WorkerEvent) {
        for observer in self.observers.iter() {
            observer.on_event(&self.name, &event);
        }
    }
}

/// Supervises a single [`Worker`].
///
/// # Examples
///
/// ```
/// use ferrous_runtime::{BoxError, Context, Supervisor, Worker, WorkerOptions, WorkerState};
/// use async_trait::async_trait;
/// use std::sync::Arc;
///
/// struct Noop;
///
/// #[async_trait]
/// impl Worker for Noop {
///     fn name(&self) -> &str { "noop" }
///     async fn on_start(&self, _: &Context) -> Result<(), BoxError> { Ok(()) }
///     async fn on_stop(&self, _: &Context) -> Result<(), BoxError> { Ok(()) }
/// }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let ctx = Context::background();
/// let supervisor = Supervisor::spawn(Arc::new(Noop), WorkerOptions::default(), &ctx);
/// supervisor.wait_for(WorkerState::Running).await;
/// supervisor.stop(&ctx).await.unwrap();
/// assert_eq!(supervisor.state(), WorkerState::Stopped);
/// # }
/// ```
pub struct Supervisor {
    shared: Arc<Shared>,
    worker_ctx: Context,
    handle: Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl Supervisor {
    /// Spawns the restart loop on the current tokio runtime.
    ///
    /// The worker receives a child of `ctx` without its deadline; it is
    /// cancelled by [`stop`](Self::stop) or by cancelling `ctx`.
    pub fn spawn(worker: Arc<dyn Worker>, options: WorkerOptions, ctx: &Context) -> Arc<Self> {
        Self::spawn_observed(worker, options, ctx, Arc::from(Vec::new()))
    }

    pub(crate) fn spawn_observed(
        worker: Arc<dyn Worker>,
        options: WorkerOptions,
        ctx: &Context,
        observers: WorkerObservers,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(WorkerState::Stopped);
        let shared = Arc::new(Shared {
            name: worker.name().to_string(),
            worker,
            options,
            state,
            outcome: OnceCell::new(),
            attempts: AtomicU32::new(0),
            observers,
        });
        let worker_ctx = ctx.detached_deadline();

        // Visible as Starting before spawn returns, so waiters never see the initial Stopped
        shared.set_state(WorkerState::Starting);
        let handle = tokio::spawn(supervise(shared.clone(), worker_ctx.clone()));

        Arc::new(Self {
            shared,
            worker_ctx,
            handle: Mutex::new(Some(handle)),
            stopped: AtomicBool::new(false),
        })
    }

    /// Worker name.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Supervision settings.
    pub fn options(&self) -> &WorkerOptions {
        &self.shared.options
    }

    /// True if a tripped circuit is fatal to the application.
    pub fn is_critical(&self) -> bool {
        self.shared.options.critical
    }

    /// Current state.
    pub fn state(&self) -> WorkerState {
        *self.shared.state.borrow()
    }

    /// Number of `on_start` attempts made so far.
    pub fn attempts(&self) -> u32 {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    /// Watch channel of state changes.
    pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.shared.state.subscribe()
    }

    /// The circuit-trip error, once tripped.
    pub fn outcome(&self) -> Option<WorkerError> {
        self.shared.outcome.get().cloned()
    }

    /// Waits until the worker reaches `state`.
    pub async fn wait_for(&self, state: WorkerState) {
        let mut rx = self.subscribe();
        let _ = rx.wait_for(|s| *s == state).await;
    }

    /// Waits until the worker is `Stopped` or `CircuitTripped`.
    pub async fn wait_terminal(&self) -> WorkerState {
        let mut rx = self.subscribe();
        let reached = rx.wait_for(|s| s.is_terminal()).await.map(|s| *s);
        match reached {
            Ok(state) => state,
            Err(_) => *rx.borrow(),
        }
    }

    /// Stops retrying and calls `on_stop` once.
    ///
    /// Subsequent calls return `Ok(())` without touching the worker. The
    /// returned error is informational; callers log it and carry on.
    pub async fn stop(&self, ctx: &Context) -> Result<(), BoxError> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let shared = &self.shared;
        self.worker_ctx.cancel();

        let tripped = self.state() == WorkerState::CircuitTripped;
        if !tripped {
            shared.set_state(WorkerState::Stopping);
        }
        tracing::debug!(worker = %shared.name, "stopping worker");

        let handle = self.handle.lock().take();
        if let Some(mut handle) = handle {
            if let Err(reason) = ctx.run(&mut handle).await {
                tracing::warn!(worker = %shared.name, %reason, "supervisor loop still running at stop deadline; aborting it");
                handle.abort();
            }
        }

        let result = match ctx.run(shared.worker.on_stop(ctx)).await {
            Ok(result) => result,
            Err(reason) => Err(Box::new(reason) as BoxError),
        };
        if let Err(error) = &result {
            tracing::warn!(worker = %shared.name, %error, "worker on_stop failed");
            shared.emit(WorkerEvent::StopFailed {
                error: error.to_string(),
            });
        }

        if !tripped {
            shared.set_state(WorkerState::Stopped);
        }
        shared.emit(WorkerEvent::Stopped);
        tracing::info!(worker = %shared.name, "worker stopped");
        result
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .field("critical", &self.is_critical())
            .finish()
    }
}

async fn supervise(shared: Arc<Shared>, ctx: Context) {
    let mut backoff = BackoffState::new(shared.options.backoff);

    loop {
        if ctx.is_done() {
            return;
        }

        let attempt = shared.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if !shared.advance(WorkerState::Starting) {
            return;
        }
        shared.emit(WorkerEvent::Starting { attempt });
        tracing::debug!(worker = %shared.name, attempt, "starting worker");

        let (faults, mut reports) = mpsc::unbounded_channel();
        let run_ctx = ctx.with_fault_reporter(faults);

        let (message, failures) = match start_once(&shared.worker, &run_ctx).await {
            Ok(()) => {
                // Stopped while on_start was in flight
                if ctx.is_done() {
                    return;
                }
                let previous_failures = backoff.failures();
                backoff.reset();
                if !shared.advance(WorkerState::Running) {
                    return;
                }
                shared.emit(WorkerEvent::Started { attempt });
                shared.emit(WorkerEvent::BackoffReset { previous_failures });
                tracing::info!(worker = %shared.name, attempt, "worker running");

                let reported = tokio::select! {
                    _ = ctx.token().cancelled() => return,
                    reported = reports.recv() => reported,
                };
                // run_ctx keeps a sender alive, so the channel cannot close first
                let Some(message) = reported else {
                    ctx.token().cancelled().await;
                    return;
                };
                run_ctx.cancel();
                if ctx.is_done() {
                    return;
                }
                let failures = backoff.record_failure_after_start(shared.options.stable_after);
                tracing::warn!(worker = %shared.name, attempt, failures, error = %message, "running worker failed");
                (message, failures)
            }
            Err(error) => {
                run_ctx.cancel();
                let failures = backoff.record_failure();
                let message = error.to_string();
                tracing::warn!(worker = %shared.name, attempt, failures, error = %message, "worker start failed");
                (message, failures)
            }
        };

        shared.emit(WorkerEvent::Failed {
            attempt,
            failures,
            error: message.clone(),
        });

        if let Some(max) = shared.options.max_restarts {
            if failures >= max {
                if ctx.is_done() {
                    return;
                }
                let _ = shared.outcome.set(WorkerError::CircuitTripped {
                    worker: shared.name.clone(),
                    failures,
                    last_error: message,
                });
                if shared.advance(WorkerState::CircuitTripped) {
                    shared.emit(WorkerEvent::CircuitTripped { failures });
                    tracing::error!(
                        worker = %shared.name,
                        failures,
                        critical = shared.options.critical,
                        "worker circuit tripped"
                    );
                }
                return;
            }
        }

        let delay = backoff.next_delay();
        if !shared.advance(WorkerState::BackoffWait) {
            return;
        }
        shared.emit(WorkerEvent::BackoffScheduled { attempt, delay });
        tracing::debug!(worker = %shared.name, attempt, ?delay, "restart scheduled");

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = ctx.token().cancelled() => return,
        }
    }
}

/// One `on_start` call in its own task, so a panic surfaces as a failure.
///
/// The task is aborted if this future is dropped, which happens when
/// [`Supervisor::stop`] aborts the loop.
async fn start_once(worker: &Arc<dyn Worker>, ctx: &Context) -> Result<(), BoxError> {
    let worker = worker.clone();
    let ctx = ctx.clone();
    let task = AbortOnDropHandle::new(tokio::spawn(async move { worker.on_start(&ctx).await }));
    match task.await {
        Ok(result) => result,
        Err(join) if join.is_panic() => {
            Err(format!("on_start panicked: {}", panic_message(join.into_panic())).into())
        }
        Err(join) => Err(Box::new(join)),
    }
}
