//! Per-thread resolution chains for cycle detection.
//!
//! Every in-flight resolution pushes its key onto the chain of the calling
//! thread. Providers run synchronously, so a provider's nested resolutions
//! always happen on the thread that entered it and extend the same chain.
//! The table lock is held only to push or pop, never across a provider call.

use std::collections::HashMap;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;

use crate::error::{DiError, DiResult};
use crate::key::Key;

/// Deepest legal resolution chain.
pub(crate) const MAX_DEPTH: usize = 1024;

#[derive(Default)]
pub(crate) struct ResolutionChains {
    chains: Mutex<HashMap<ThreadId, Vec<Key>>>,
}

impl ResolutionChains {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Pushes `key` onto the current thread's chain.
    ///
    /// Fails with [`DiError::Circular`] carrying the chain plus `key` when the
    /// key is already in flight on this thread. Nothing is pushed on failure.
    pub(crate) fn enter(&self, key: Key) -> DiResult<ChainGuard<'_>> {
        let thread = thread::current().id();
        let mut chains = self.chains.lock();
        let chain = chains.entry(thread).or_default();

        if chain.contains(&key) {
            let mut cycle = chain.clone();
            cycle.push(key);
            return Err(DiError::Circular(cycle));
        }
        if chain.len() >= MAX_DEPTH {
            return Err(DiError::DepthExceeded(chain.len()));
        }

        chain.push(key);
        Ok(ChainGuard {
            owner: self,
            thread,
        })
    }

    /// Snapshot of the current thread's chain.
    #[cfg(test)]
    pub(crate) fn current(&self) -> Vec<Key> {
        let thread = thread::current().id();
        self.chains
            .lock()
            .get(&thread)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of threads with a resolution in flight.
    #[cfg(test)]
    pub(crate) fn active_threads(&self) -> usize {
        self.chains.lock().len()
    }
}

/// Pops the key on drop, including when a provider panicked.
pub(crate) struct ChainGuard<'a> {
    owner: &'a ResolutionChains,
    thread: ThreadId,
}

impl Drop for ChainGuard<'_> {
    fn drop(&mut self) {
        let mut chains = self.owner.chains.lock();
        if let Some(chain) = chains.get_mut(&self.thread) {
            chain.pop();
            if chain.is_empty() {
                chains.remove(&self.thread);
            }
        }
    }
}
