//! Background job execution.
//!
//! Fetches triggered by the aggregator run as fire-and-forget jobs. A
//! runner keeps at most one job per key alive; enqueueing a key that is
//! already running drops the new job.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::BoxFuture;
use tracing::{debug, trace};

/// Runs background jobs, at most one concurrently per key.
pub trait SyncJobRunner: Send + Sync {
    /// Run `job` in the background unless a job for `key` is running.
    ///
    /// Returns whether the job was accepted.
    fn enqueue(&self, key: String, job: BoxFuture<'static, ()>) -> bool;
}

/// Runs jobs as Tokio tasks in this process.
#[derive(Clone, Default)]
pub struct LocalJobRunner {
    running: Arc<Mutex<HashSet<String>>>,
}

/// Removes the job key when the task finishes or is dropped.
struct RunningGuard {
    running: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

impl LocalJobRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a job for `key` is running.
    pub fn is_running(&self, key: &str) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }
}

impl SyncJobRunner for LocalJobRunner {
    fn enqueue(&self, key: String, job: BoxFuture<'static, ()>) -> bool {
        {
            let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
            if !running.insert(key.clone()) {
                trace!(job = %key, "job already running");
                return false;
            }
        }

        debug!(job = %key, "job started");
        let guard = RunningGuard {
            running: self.running.clone(),
            key,
        };
        tokio::spawn(async move {
            job.await;
            trace!(job = %guard.key, "job finished");
            drop(guard);
        });
        true
    }
}
