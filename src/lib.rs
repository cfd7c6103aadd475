//! # ferrous-runtime
//!
//! An embeddable application runtime: type-keyed dependency injection, an
//! ordered start/stop lifecycle, and supervised background workers.
//!
//! ## Features
//!
//! - **Type-keyed container**: register by type (optionally named), resolve as `Arc<T>`
//! - **Lifetimes**: lazy singletons, eager singletons built by `build()`, transients
//! - **Cycle detection**: cycles fail with the full chain instead of deadlocking
//! - **Lifecycle**: instances that implement [`Starter`]/[`Stopper`] are started in
//!   dependency order and stopped in reverse, with rollback on a failed start
//! - **Workers**: each [`Worker`] runs under a [`Supervisor`] with exponential
//!   backoff and a circuit breaker; a critical worker failing stops the application
//!
//! ## Quick Start
//!
//! ```rust
//! use ferrous_runtime::{Container, Resolver};
//! use std::sync::Arc;
//!
//! struct Database {
//!     url: String,
//! }
//!
//! struct UserService {
//!     db: Arc<Database>,
//! }
//!
//! let container = Container::new();
//! container.add_singleton(Database { url: "postgres://localhost".to_string() }).unwrap();
//! container
//!     .add_provider::<UserService, _>(|r| Ok(UserService { db: r.get::<Database>()? }))
//!     .unwrap();
//! container.build().unwrap();
//!
//! let users = container.get_required::<UserService>();
//! assert_eq!(users.db.url, "postgres://localhost");
//! assert!(Arc::ptr_eq(&users.db, &container.get_required::<Database>()));
//! ```
//!
//! ## Trait Resolution
//!
//! ```rust
//! use ferrous_runtime::{Container, Resolver};
//! use std::sync::Arc;
//!
//! trait Logger: Send + Sync {
//!     fn log(&self, message: &str);
//! }
//!
//! struct ConsoleLogger;
//! impl Logger for ConsoleLogger {
//!     fn log(&self, message: &str) {
//!         println!("[LOG] {}", message);
//!     }
//! }
//!
//! let container = Container::new();
//! container.add_singleton_trait::<dyn Logger>(Arc::new(ConsoleLogger)).unwrap();
//! container.build().unwrap();
//!
//! let logger = container.get_required_trait::<dyn Logger>();
//! logger.log("Hello, World!");
//! ```
//!
//! ## Running an application
//!
//! ```rust,no_run
//! use ferrous_runtime::{Application, BoxError, Container, Context, Worker, WorkerOptions};
//! use async_trait::async_trait;
//!
//! struct Poller;
//!
//! #[async_trait]
//! impl Worker for Poller {
//!     fn name(&self) -> &str { "poller" }
//!     async fn on_start(&self, ctx: &Context) -> Result<(), BoxError> {
//!         let ctx = ctx.clone();
//!         tokio::spawn(async move { ctx.done().await });
//!         Ok(())
//!     }
//!     async fn on_stop(&self, _ctx: &Context) -> Result<(), BoxError> { Ok(()) }
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), ferrous_runtime::AppError> {
//! let container = Container::new();
//! container.add_worker(Poller, WorkerOptions::new().critical())?;
//!
//! let app = Application::new(container)?;
//! app.run(&Context::background()).await
//! # }
//! ```

pub mod app;
pub mod context;
pub mod descriptors;
pub mod error;
pub mod key;
pub mod lifecycle;
pub mod lifetime;
pub mod observer;
pub mod os_signals;
pub mod traits;
pub mod worker;

#[cfg(feature = "config")]
pub mod config;

#[cfg(feature = "subscriber")]
pub mod telemetry;

mod container;
mod internal;
mod registration;

pub use app::{AppOptions, Application};
pub use container::{Container, RegistrationBuilder, ResolverContext};
pub use context::{Context, ContextError};
pub use descriptors::ServiceDescriptor;
pub use error::{AppError, BoxError, DiError, DiResult, LifecycleError, ParticipantError, Phase, WorkerError};
pub use key::{key_of, Key};
pub use lifecycle::{Lifecycle, LifecycleState, Participant, Starter, Stopper};
pub use lifetime::Lifetime;
pub use observer::{DiObserver, LoggingObserver};
pub use traits::{Resolver, ResolverCore};
pub use worker::{
    BackoffConfig, BackoffState, Supervisor, Worker, WorkerEvent, WorkerManager, WorkerObserver,
    WorkerOptions, WorkerRecord, WorkerState,
};
