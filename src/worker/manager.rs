//! Worker registry and critical-failure policy.
//!
//! The manager owns one [`WorkerRecord`] per registered worker. Records are
//! only added before [`WorkerManager::start_all`]; afterwards the list is read
//! only and every record holds its [`Supervisor`].
//!
//! A monitor task per supervisor waits for a terminal state. A tripped
//! circuit on a critical worker is fatal: the first one is stored and the
//! manager's fatal token is cancelled. Trips that arrive after that, or
//! during shutdown, are logged and absorbed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::context::Context;
use crate::error::WorkerError;
use crate::worker::supervisor::WorkerObservers;
use crate::worker::{Supervisor, Worker, WorkerObserver, WorkerOptions, WorkerState};

/// A registered worker and, once started, its supervisor.
pub struct WorkerRecord {
    name: String,
    worker: Arc<dyn Worker>,
    options: WorkerOptions,
    supervisor: OnceCell<Arc<Supervisor>>,
}

impl WorkerRecord {
    /// Worker name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The delegate worker.
    pub fn worker(&self) -> &Arc<dyn Worker> {
        &self.worker
    }

    /// Supervision settings.
    pub fn options(&self) -> &WorkerOptions {
        &self.options
    }

    /// Supervisor, once `start_all` ran.
    pub fn supervisor(&self) -> Option<&Arc<Supervisor>> {
        self.supervisor.get()
    }

    /// Current state; `Stopped` before start.
    pub fn state(&self) -> WorkerState {
        self.supervisor
            .get()
            .map(|s| s.state())
            .unwrap_or(WorkerState::Stopped)
    }
}

impl std::fmt::Debug for WorkerRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerRecord")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("critical", &self.options.critical)
            .finish()
    }
}

/// Starts, supervises and stops a set of [`Worker`]s.
///
/// # Examples
///
/// ```
/// use ferrous_runtime::{BoxError, Context, Worker, WorkerManager, WorkerOptions};
/// use async_trait::async_trait;
/// use std::sync::Arc;
///
/// struct Ticker;
///
/// #[async_trait]
/// impl Worker for Ticker {
///     fn name(&self) -> &str { "ticker" }
///     async fn on_start(&self, _: &Context) -> Result<(), BoxError> { Ok(()) }
///     async fn on_stop(&self, _: &Context) -> Result<(), BoxError> { Ok(()) }
/// }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let manager = WorkerManager::new();
/// manager.register(Arc::new(Ticker), WorkerOptions::default()).unwrap();
///
/// let ctx = Context::background();
/// manager.start_all(&ctx).unwrap();
/// manager.stop_all(&ctx).await;
/// assert!(manager.fatal().is_none());
/// # }
/// ```
pub struct WorkerManager {
    records: RwLock<Vec<Arc<WorkerRecord>>>,
    observers: RwLock<Vec<Arc<dyn WorkerObserver>>>,
    running: AtomicBool,
    shutting_down: Arc<AtomicBool>,
    fatal: Arc<OnceCell<WorkerError>>,
    fatal_token: CancellationToken,
    monitors: Mutex<Vec<JoinHandle<()>>>,
}

impl Default for WorkerManager {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerManager {
    /// Empty manager.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            observers: RwLock::new(Vec::new()),
            running: AtomicBool::new(false),
            shutting_down: Arc::new(AtomicBool::new(false)),
            fatal: Arc::new(OnceCell::new()),
            fatal_token: CancellationToken::new(),
            monitors: Mutex::new(Vec::new()),
        }
    }

    /// Adds a worker. Fails once started or if the name is taken.
    pub fn register(&self, worker: Arc<dyn Worker>, options: WorkerOptions) -> Result<(), WorkerError> {
        let name = worker.name().to_string();
        let mut records = self.records.write();
        if self.running.load(Ordering::SeqCst) {
            return Err(WorkerError::ManagerRunning(name));
        }
        if records.iter().any(|r| r.name == name) {
            return Err(WorkerError::DuplicateWorker(name));
        }
        tracing::debug!(worker = %name, critical = options.critical, "worker registered");
        records.push(Arc::new(WorkerRecord {
            name,
            worker,
            options,
            supervisor: OnceCell::new(),
        }));
        Ok(())
    }

    /// Adds an observer for events of every worker. Only observers added
    /// before `start_all` are wired in.
    pub fn add_observer(&self, observer: Arc<dyn WorkerObserver>) {
        self.observers.write().push(observer);
    }

    /// Number of registered workers.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// True if no worker is registered.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// True once `start_all` ran.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Snapshot of the records in registration order.
    pub fn records(&self) -> Vec<Arc<WorkerRecord>> {
        self.records.read().clone()
    }

    /// Name and state of every worker.
    pub fn states(&self) -> Vec<(String, WorkerState)> {
        self.records
            .read()
            .iter()
            .map(|r| (r.name.clone(), r.state()))
            .collect()
    }

    /// Supervisor of the named worker, once started.
    pub fn supervisor(&self, name: &str) -> Option<Arc<Supervisor>> {
        self.records
            .read()
            .iter()
            .find(|r| r.name == name)
            .and_then(|r| r.supervisor.get().cloned())
    }

    /// Spawns one supervisor per worker and returns without waiting for
    /// them to reach `Running`.
    pub fn start_all(&self, ctx: &Context) -> Result<(), WorkerError> {
        let records = {
            let records = self.records.write();
            if self.running.swap(true, Ordering::SeqCst) {
                return Err(WorkerError::ManagerRunning("start_all".to_string()));
            }
            records.clone()
        };
        let observers: WorkerObservers = Arc::from(self.observers.read().clone());

        let mut monitors = self.monitors.lock();
        for record in &records {
            let supervisor = Supervisor::spawn_observed(
                record.worker.clone(),
                record.options,
                ctx,
                observers.clone(),
            );
            let _ = record.supervisor.set(supervisor.clone());
            monitors.push(tokio::spawn(monitor(
                supervisor,
                self.fatal.clone(),
                self.fatal_token.clone(),
                self.shutting_down.clone(),
            )));
        }
        tracing::info!(count = records.len(), "workers started");
        Ok(())
    }

    /// Stops every supervisor concurrently and waits for all of them.
    ///
    /// `on_stop` failures are logged; they never abort the shutdown.
    pub async fn stop_all(&self, ctx: &Context) {
        self.shutting_down.store(true, Ordering::SeqCst);
        let supervisors: Vec<Arc<Supervisor>> = self
            .records
            .read()
            .iter()
            .filter_map(|r| r.supervisor.get().cloned())
            .collect();

        let mut set = JoinSet::new();
        for supervisor in supervisors {
            let ctx = ctx.clone();
            set.spawn(async move {
                let result = supervisor.stop(&ctx).await;
                (supervisor.name().to_string(), result)
            });
        }
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((worker, Err(error))) => {
                    tracing::warn!(%worker, %error, "worker stop failed; continuing shutdown");
                }
                Err(error) => {
                    tracing::warn!(%error, "worker stop task aborted");
                }
            }
        }

        let monitors: Vec<_> = self.monitors.lock().drain(..).collect();
        for monitor in monitors {
            monitor.abort();
        }
        tracing::info!("workers stopped");
    }

    /// The first critical failure, if any.
    pub fn fatal(&self) -> Option<WorkerError> {
        self.fatal.get().cloned()
    }

    /// Cancelled when a critical worker fails.
    pub fn fatal_token(&self) -> CancellationToken {
        self.fatal_token.clone()
    }

    /// Waits for the first critical failure.
    pub async fn wait_fatal(&self) -> Option<WorkerError> {
        self.fatal_token.cancelled().await;
        self.fatal()
    }
}

impl std::fmt::Debug for WorkerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerManager")
            .field("workers", &self.states())
            .field("running", &self.is_running())
            .field("fatal", &self.fatal.get())
            .finish()
    }
}

async fn monitor(
    supervisor: Arc<Supervisor>,
    fatal: Arc<OnceCell<WorkerError>>,
    fatal_token: CancellationToken,
    shutting_down: Arc<AtomicBool>,
) {
    if supervisor.wait_terminal().await != WorkerState::CircuitTripped {
        return;
    }
    let worker = supervisor.name().to_string();
    let tripped = supervisor.outcome().unwrap_or_else(|| WorkerError::CircuitTripped {
        worker: worker.clone(),
        failures: supervisor.attempts(),
        last_error: String::new(),
    });

    if !supervisor.is_critical() {
        tracing::warn!(%worker, error = %tripped, "non-critical worker gave up; continuing without it");
        return;
    }
    if shutting_down.load(Ordering::SeqCst) {
        tracing::warn!(%worker, error = %tripped, "critical worker failed during shutdown; ignored");
        return;
    }

    let failure = WorkerError::CriticalFailed {
        worker: worker.clone(),
        source: Box::new(tripped),
    };
    match fatal.set(failure) {
        Ok(()) => {
            tracing::error!(%worker, "critical worker failed; initiating shutdown");
            fatal_token.cancel();
        }
        Err(absorbed) => {
            tracing::warn!(%worker, error = %absorbed, "critical worker failed after shutdown began; absorbed");
        }
    }
}
