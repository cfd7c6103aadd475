//! Convenience `tracing` subscriber for binaries.
//!
//! Libraries embedding the runtime usually install their own subscriber;
//! this is for small services that just want readable logs.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Environment variable consulted for the log filter.
pub const LOG_ENV: &str = "FERROUS_LOG";

/// Installs a global fmt subscriber.
///
/// The filter comes from `FERROUS_LOG` (for example
/// `info,ferrous_runtime=debug`) and falls back to `default_filter`.
/// Returns an error if a global subscriber is already set.
pub fn init_tracing(default_filter: &str) -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_filter));
    let layer = fmt::layer().with_target(true).with_thread_names(true);
    Registry::default().with(filter).with(layer).try_init()?;
    tracing::debug!(default_filter, "tracing initialized");
    Ok(())
}
