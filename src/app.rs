//! Application orchestration: container, lifecycle and workers together.
//!
//! ```text
//! start:  lifecycle.start ──► workers.start_all
//! stop:   workers.stop_all ──► lifecycle.stop
//! run:    start ─► wait(signal | ctx done | critical failure) ─► stop
//! ```
//!
//! Workers are the last to start and the first to stop, so they never run
//! against a dependency that is not up.

use std::future::Future;
use std::time::Duration;

use once_cell::sync::OnceCell;

use crate::container::Container;
use crate::context::Context;
use crate::error::AppError;
use crate::lifecycle::Lifecycle;
use crate::os_signals;
use crate::worker::WorkerManager;

/// Timeouts for [`Application`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppOptions {
    /// Upper bound for the lifecycle start phase. `None` waits as long as the caller's context allows.
    pub start_timeout: Option<Duration>,
    /// Upper bound for the whole shutdown (workers plus lifecycle).
    pub shutdown_timeout: Duration,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            start_timeout: None,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl AppOptions {
    /// Sets the start timeout.
    pub fn start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = Some(timeout);
        self
    }

    /// Sets the shutdown timeout.
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// A built container plus its lifecycle and workers.
///
/// # Examples
///
/// ```
/// use ferrous_runtime::{Application, BoxError, Container, Context, Resolver, Starter};
/// use async_trait::async_trait;
///
/// struct Http;
///
/// #[async_trait]
/// impl Starter for Http {
///     async fn on_start(&self, _: &Context) -> Result<(), BoxError> { Ok(()) }
/// }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), ferrous_runtime::AppError> {
/// let container = Container::new();
/// container.register::<Http>().starter().instance(Http)?;
///
/// let app = Application::new(container)?;
/// app.container().get::<Http>()?;
///
/// let ctx = Context::background();
/// app.start(&ctx).await?;
/// app.shutdown().await?;
/// # Ok(())
/// # }
/// ```
pub struct Application {
    container: Container,
    lifecycle: OnceCell<Lifecycle>,
    workers: WorkerManager,
    options: AppOptions,
}

impl Application {
    /// Wraps `container` with default options, building it if needed.
    pub fn new(container: Container) -> Result<Self, AppError> {
        Self::with_options(container, AppOptions::default())
    }

    /// Wraps `container`, building it if needed, and registers the workers
    /// it declares.
    pub fn with_options(container: Container, options: AppOptions) -> Result<Self, AppError> {
        if !container.is_built() {
            container.build()?;
        }
        let workers = WorkerManager::new();
        for (worker, worker_options) in container.workers()? {
            workers.register(worker, worker_options)?;
        }
        Ok(Self {
            container,
            lifecycle: OnceCell::new(),
            workers,
            options,
        })
    }

    /// The container.
    pub fn container(&self) -> &Container {
        &self.container
    }

    /// The worker manager. Workers can be added here until `start`.
    pub fn workers(&self) -> &WorkerManager {
        &self.workers
    }

    /// The lifecycle, once `start` took its snapshot.
    pub fn lifecycle(&self) -> Option<&Lifecycle> {
        self.lifecycle.get()
    }

    /// Configured timeouts.
    pub fn options(&self) -> &AppOptions {
        &self.options
    }

    /// Starts the lifecycle, then the workers.
    ///
    /// The participant list is captured here, so singletons resolved before
    /// this call (eagerly or by hand) take part. If the workers cannot be
    /// started the lifecycle is stopped again.
    pub async fn start(&self, ctx: &Context) -> Result<(), AppError> {
        let lifecycle = self.lifecycle.get_or_init(|| self.container.lifecycle());

        let start_ctx = match self.options.start_timeout {
            Some(timeout) => ctx.with_timeout(timeout),
            None => ctx.child(),
        };
        lifecycle.start(&start_ctx).await?;

        if let Err(error) = self.workers.start_all(ctx) {
            tracing::error!(%error, "workers failed to start; stopping lifecycle");
            let stop_ctx = self.shutdown_context();
            if let Err(stop_error) = lifecycle.stop(&stop_ctx).await {
                tracing::warn!(error = %stop_error, "lifecycle stop after worker failure reported errors");
            }
            return Err(error.into());
        }
        tracing::info!(
            participants = lifecycle.len(),
            workers = self.workers.len(),
            "application started"
        );
        Ok(())
    }

    /// Stops the workers, then the lifecycle, within `ctx`.
    pub async fn stop(&self, ctx: &Context) -> Result<(), AppError> {
        tracing::info!("application stopping");
        self.workers.stop_all(ctx).await;
        if let Some(lifecycle) = self.lifecycle.get() {
            lifecycle.stop(ctx).await?;
        }
        tracing::info!("application stopped");
        Ok(())
    }

    /// [`stop`](Self::stop) with a fresh context bounded by `shutdown_timeout`.
    ///
    /// Used after the run context is already cancelled.
    pub async fn shutdown(&self) -> Result<(), AppError> {
        self.stop(&self.shutdown_context()).await
    }

    /// Starts, waits for a termination signal, `ctx` ending or a critical
    /// worker failure, then shuts down.
    pub async fn run(&self, ctx: &Context) -> Result<(), AppError> {
        self.run_until(ctx, async {
            match os_signals::wait_for_shutdown_signal().await {
                Ok(signal) => tracing::info!(%signal, "shutdown signal received"),
                Err(error) => {
                    tracing::warn!(%error, "signal handlers unavailable; waiting for cancellation");
                    std::future::pending::<()>().await
                }
            }
        })
        .await
    }

    /// Like [`run`](Self::run) with a caller-supplied shutdown trigger
    /// instead of OS signals.
    ///
    /// Returns the critical worker failure, if that is what ended the run.
    pub async fn run_until<F>(&self, ctx: &Context, shutdown: F) -> Result<(), AppError>
    where
        F: Future<Output = ()>,
    {
        self.start(ctx).await?;

        let fatal = self.workers.fatal_token();
        tokio::select! {
            _ = shutdown => {}
            reason = ctx.done() => tracing::info!(%reason, "run context ended"),
            _ = fatal.cancelled() => tracing::error!("critical worker failure; shutting down"),
        }

        let stopped = self.shutdown().await;
        if let Some(failure) = self.workers.fatal() {
            if let Err(error) = &stopped {
                tracing::warn!(%error, "shutdown after critical failure reported errors");
            }
            return Err(AppError::Worker(failure));
        }
        stopped
    }

    fn shutdown_context(&self) -> Context {
        Context::background().with_timeout(self.options.shutdown_timeout)
    }
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("container", &self.container)
            .field("lifecycle", &self.lifecycle.get().map(Lifecycle::state))
            .field("workers", &self.workers)
            .field("options", &self.options)
            .finish()
    }
}
