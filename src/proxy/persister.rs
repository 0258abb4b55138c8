//! Best-effort background persistence of fresh, fast candidates
//!
//! Pipelines hand candidates over a bounded queue and never wait. A single
//! worker drains the queue and appends to the [`WorkingCache`], giving up on
//! any write that exceeds its timeout.

use crate::proxy::cache::WorkingCache;
use crate::proxy::models::Candidate;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Per-write budget before the worker gives up on an entry
pub const PERSIST_TIMEOUT: Duration = Duration::from_secs(2);

/// Queued candidates beyond this are dropped
pub const PERSIST_QUEUE_CAPACITY: usize = 256;

/// Sending side handed to probe pipelines
#[derive(Debug, Clone)]
pub struct PersisterHandle {
    tx: mpsc::Sender<Candidate>,
}

impl PersisterHandle {
    /// Queue a candidate without blocking. Returns `false` if it was dropped.
    pub fn submit(&self, candidate: Candidate) -> bool {
        match self.tx.try_send(candidate) {
            Ok(()) => true,
            Err(TrySendError::Full(candidate)) => {
                debug!(%candidate, "persist queue full, dropping");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

/// Spawns the background writer
pub struct IncrementalPersister;

impl IncrementalPersister {
    /// Start a worker with the default queue size and timeout.
    /// Must be called from within a tokio runtime.
    pub fn spawn(cache: WorkingCache) -> (PersisterHandle, JoinHandle<()>) {
        Self::spawn_with(cache, PERSIST_QUEUE_CAPACITY, PERSIST_TIMEOUT)
    }

    /// The worker exits once every handle has been dropped and the queue is drained.
    pub fn spawn_with(
        cache: WorkingCache,
        capacity: usize,
        timeout: Duration,
    ) -> (PersisterHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let worker = tokio::spawn(run_worker(cache, rx, timeout));
        (PersisterHandle { tx }, worker)
    }
}

async fn run_worker(cache: WorkingCache, mut rx: mpsc::Receiver<Candidate>, timeout: Duration) {
    while let Some(candidate) = rx.recv().await {
        let writer = cache.clone();
        let entry = candidate.clone();
        let write = tokio::task::spawn_blocking(move || writer.append_if_absent(&entry));

        match tokio::time::timeout(timeout, write).await {
            Ok(Ok(Ok(true))) => debug!(%candidate, "persisted working candidate"),
            Ok(Ok(Ok(false))) => trace!(%candidate, "candidate already cached"),
            Ok(Ok(Err(e))) => warn!(%candidate, error = %e, "failed to persist candidate"),
            Ok(Err(e)) => warn!(%candidate, error = %e, "persist task failed"),
            Err(_) => debug!(%candidate, "persist timed out, giving up"),
        }
    }
    trace!("persister worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::parser::ProxyParser;

    fn candidate(s: &str) -> Candidate {
        ProxyParser::normalize(s).unwrap()
    }

    #[tokio::test]
    async fn test_worker_appends_unique_entries() {
        let dir = tempfile::tempdir().unwrap();
        let cache = WorkingCache::new(dir.path().join("cache.txt"));
        cache.ensure_exists().unwrap();

        let (handle, worker) = IncrementalPersister::spawn(cache.clone());
        assert!(handle.submit(candidate("1.1.1.1:80")));
        assert!(handle.submit(candidate("2.2.2.2:80")));
        assert!(handle.submit(candidate("1.1.1.1:80")));
        drop(handle);
        worker.await.unwrap();

        assert_eq!(
            cache.read_entries().unwrap(),
            vec![candidate("1.1.1.1:80"), candidate("2.2.2.2:80")]
        );
    }

    #[tokio::test]
    async fn test_submit_never_blocks_when_full() {
        let (tx, _rx) = mpsc::channel(1);
        let handle = PersisterHandle { tx };

        assert!(handle.submit(candidate("1.1.1.1:80")));
        assert!(!handle.submit(candidate("2.2.2.2:80")));
    }

    #[tokio::test]
    async fn test_submit_after_worker_gone() {
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let handle = PersisterHandle { tx };
        assert!(!handle.submit(candidate("1.1.1.1:80")));
    }

    #[tokio::test]
    async fn test_write_errors_are_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        // A directory path cannot be appended to
        let cache = WorkingCache::new(dir.path());

        let (handle, worker) = IncrementalPersister::spawn(cache);
        assert!(handle.submit(candidate("1.1.1.1:80")));
        drop(handle);
        worker.await.unwrap();
    }
}
