//! Cancellation and deadlines for lifecycle hooks and workers.
//!
//! A [`Context`] is a [`CancellationToken`] plus an optional deadline. It is
//! handed to every `on_start`/`on_stop` hook so long-running work can observe
//! shutdown, and the lifecycle engine races each hook against it.
//!
//! Contexts handed to [`Worker::on_start`](crate::Worker::on_start) also carry
//! a failure reporter: a worker whose spawned loop dies after `on_start`
//! returned calls [`Context::report_failure`] and its supervisor restarts it.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a [`Context`] is done.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    /// The token was cancelled.
    #[error("context cancelled")]
    Cancelled,
    /// The deadline elapsed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Cancellation token with an optional deadline.
///
/// Cloning is cheap; clones share the same token.
///
/// # Examples
///
/// ```
/// use ferrous_runtime::Context;
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let root = Context::background();
/// let ctx = root.with_timeout(Duration::from_secs(5));
///
/// root.cancel();
/// assert!(ctx.is_done());
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
    faults: Option<mpsc::UnboundedSender<String>>,
}

impl Context {
    /// A context that is never cancelled unless [`cancel`](Self::cancel) is called.
    pub fn background() -> Self {
        Self::new(CancellationToken::new())
    }

    /// Wraps an existing token, without a deadline.
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
            faults: None,
        }
    }

    /// Child context that is cancelled with this one and expires after `timeout`.
    ///
    /// The effective deadline is the earlier of the parent's and `now + timeout`.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let at = Instant::now()
            .checked_add(timeout)
            .unwrap_or_else(far_future);
        self.with_deadline(at)
    }

    /// Child context that is cancelled with this one and expires at `at`.
    pub fn with_deadline(&self, at: Instant) -> Self {
        let deadline = match self.deadline {
            Some(existing) if existing < at => existing,
            _ => at,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
            faults: self.faults.clone(),
        }
    }

    /// Child context sharing this deadline; cancelling the child leaves the parent alone.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
            faults: self.faults.clone(),
        }
    }

    /// Child context without a deadline that is still cancelled with this one.
    pub fn detached_deadline(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: None,
            faults: self.faults.clone(),
        }
    }

    /// Child context whose failure reports go to `faults`.
    pub(crate) fn with_fault_reporter(&self, faults: mpsc::UnboundedSender<String>) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
            faults: Some(faults),
        }
    }

    /// Reports that work started under this context has failed.
    ///
    /// Inside a supervised worker this moves the worker from `Running` back
    /// into backoff and restarts it; the context of the failed run is
    /// cancelled first. Returns `false` when nobody is listening: the context
    /// was not handed out by a supervisor, or the run it belongs to is over.
    pub fn report_failure(&self, error: impl fmt::Display) -> bool {
        match &self.faults {
            Some(faults) => faults.send(error.to_string()).is_ok(),
            None => false,
        }
    }

    /// Cancels this context and every child derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// The underlying token.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns the reason if the context is already done.
    pub fn err(&self) -> Option<ContextError> {
        if self.token.is_cancelled() {
            return Some(ContextError::Cancelled);
        }
        match self.deadline {
            Some(at) if Instant::now() >= at => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// True once cancelled or past the deadline.
    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Completes when the context is cancelled or its deadline elapses.
    pub async fn done(&self) -> ContextError {
        match self.deadline {
            Some(at) => tokio::select! {
                _ = self.token.cancelled() => ContextError::Cancelled,
                _ = tokio::time::sleep_until(at) => ContextError::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                ContextError::Cancelled
            }
        }
    }

    /// Races `fut` against this context.
    ///
    /// The future is dropped, not aborted, when the context wins; work it
    /// already spawned keeps running and is expected to observe the token.
    pub async fn run<F>(&self, fut: F) -> Result<F::Output, ContextError>
    where
        F: Future,
    {
        tokio::select! {
            biased;
            out = fut => Ok(out),
            reason = self.done() => Err(reason),
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

fn far_future() -> Instant {
    // Roughly 30 years, same bound tokio uses internally
    Instant::now() + Duration::from_secs(86400 * 365 * 30)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn deadline_elapses() {
        let ctx = Context::background().with_timeout(Duration::from_millis(50));
        assert!(!ctx.is_done());
        assert_eq!(ctx.done().await, ContextError::DeadlineExceeded);
        assert_eq!(ctx.err(), Some(ContextError::DeadlineExceeded));
    }

    #[tokio::test(start_paused = true)]
    async fn child_inherits_earlier_deadline() {
        let parent = Context::background().with_timeout(Duration::from_millis(10));
        let child = parent.with_timeout(Duration::from_secs(10));
        assert_eq!(child.deadline(), parent.deadline());
    }

    #[tokio::test]
    async fn parent_cancel_reaches_child() {
        let parent = Context::background();
        let child = parent.child();
        parent.cancel();
        assert_eq!(child.err(), Some(ContextError::Cancelled));
    }

    #[tokio::test]
    async fn child_cancel_leaves_parent() {
        let parent = Context::background();
        let child = parent.child();
        child.cancel();
        assert!(!parent.is_done());
    }

    #[tokio::test]
    async fn failure_reports_reach_the_listener_through_children() {
        assert!(!Context::background().report_failure("nobody listens"));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let ctx = Context::background().with_fault_reporter(tx);
        let child = ctx.with_timeout(Duration::from_secs(1)).child();
        assert!(child.report_failure("socket closed"));
        assert_eq!(rx.recv().await.as_deref(), Some("socket closed"));

        drop(rx);
        assert!(!ctx.report_failure("too late"));
    }

    #[tokio::test(start_paused = true)]
    async fn run_returns_output_or_reason() {
        let ctx = Context::background().with_timeout(Duration::from_millis(100));
        assert_eq!(ctx.run(async { 7 }).await, Ok(7));

        let slow = ctx.run(tokio::time::sleep(Duration::from_secs(1))).await;
        assert_eq!(slow, Err(ContextError::DeadlineExceeded));
    }
}
