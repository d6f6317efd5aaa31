//! Reusable worker pool.
//!
//! The pool is owned by the workflow that uses it, built lazily on the
//! first parallel map and kept for later runs until
//! [`WorkerPool::resize`] changes the number of workers.

use std::sync::{Arc, Mutex};

use rayon::ThreadPool;
use rayon::prelude::*;

use crate::types::WorkflowError;

/// Lazily built `rayon` thread pool with a fixed number of workers.
#[derive(Debug)]
pub struct WorkerPool {
    n_jobs: usize,
    pool: Mutex<Option<Arc<ThreadPool>>>,
}

impl WorkerPool {
    /// Pool of `n_jobs` workers (at least one). Nothing is spawned yet.
    #[must_use]
    pub fn new(n_jobs: usize) -> Self {
        Self {
            n_jobs: n_jobs.max(1),
            pool: Mutex::new(None),
        }
    }

    /// Number of workers.
    #[must_use]
    pub const fn n_jobs(&self) -> usize {
        self.n_jobs
    }

    /// Change the number of workers, dropping the current threads.
    pub fn resize(&mut self, n_jobs: usize) {
        let n_jobs = n_jobs.max(1);
        if n_jobs != self.n_jobs {
            self.n_jobs = n_jobs;
            // A poisoned lock only means a previous map panicked; the slot
            // is replaced either way.
            *self.pool.get_mut().unwrap_or_else(|e| e.into_inner()) = None;
        }
    }

    /// Whether the threads have been spawned.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.pool.lock().is_ok_and(|pool| pool.is_some())
    }

    fn threads(&self) -> Result<Arc<ThreadPool>, WorkflowError> {
        let mut slot = self
            .pool
            .lock()
            .map_err(|_| WorkflowError::Worker("worker pool lock poisoned".to_owned()))?;
        if let Some(pool) = slot.as_ref() {
            return Ok(Arc::clone(pool));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.n_jobs)
            .thread_name(|index| format!("sldc-worker-{index}"))
            .build()
            .map_err(|e| WorkflowError::Worker(e.to_string()))?;
        tracing::debug!(n_jobs = self.n_jobs, "started worker pool");
        let pool = Arc::new(pool);
        *slot = Some(Arc::clone(&pool));
        Ok(pool)
    }

    /// Apply `f` to every item, on the workers when there are several.
    ///
    /// Results keep the order of `items`. Waits for every item before
    /// returning.
    ///
    /// # Errors
    ///
    /// Returns the first error produced by `f`, or
    /// [`WorkflowError::Worker`] if the threads cannot be started.
    pub fn map<T, R, F>(&self, items: Vec<T>, f: F) -> Result<Vec<R>, WorkflowError>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> Result<R, WorkflowError> + Send + Sync,
    {
        if self.n_jobs == 1 || items.len() <= 1 {
            return items.into_iter().map(f).collect();
        }
        let pool = self.threads()?;
        pool.install(|| items.into_par_iter().map(f).collect())
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(1)
    }
}
