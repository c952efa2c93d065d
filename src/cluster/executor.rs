//! Per-group task execution.
//!
//! Fitting submits one task per group and joins on all of them. Tasks never share
//! mutable state: each returns its group's result by value and results come back in
//! group order.

use std::sync::Arc;

use rayon::prelude::*;

use crate::error::{Error, Result};

/// Runs one task per group and collects the results in group order.
pub trait Executor: Sync {
    /// Run `task(group)` for every `group` in `0..group_count`.
    fn map_groups<T, F>(&self, group_count: usize, task: F) -> Vec<T>
    where
        T: Send,
        F: Fn(usize) -> T + Sync + Send;
}

/// Runs groups one after another on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sequential;

impl Executor for Sequential {
    fn map_groups<T, F>(&self, group_count: usize, task: F) -> Vec<T>
    where
        T: Send,
        F: Fn(usize) -> T + Sync + Send,
    {
        (0..group_count).map(task).collect()
    }
}

/// Runs groups concurrently on rayon, either on the global pool or on a dedicated one.
#[derive(Debug, Clone, Default)]
pub struct Parallel {
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl Parallel {
    /// Use rayon's global thread pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a dedicated pool with `threads` workers.
    pub fn with_threads(threads: usize) -> Result<Self> {
        if threads == 0 {
            return Err(Error::InvalidParameter {
                name: "threads",
                message: "must be at least 1",
            });
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| Error::Executor(e.to_string()))?;
        Ok(Self {
            pool: Some(Arc::new(pool)),
        })
    }

    /// Worker count of the pool this executor submits to.
    pub fn threads(&self) -> usize {
        match &self.pool {
            Some(pool) => pool.current_num_threads(),
            None => rayon::current_num_threads(),
        }
    }
}

impl Executor for Parallel {
    fn map_groups<T, F>(&self, group_count: usize, task: F) -> Vec<T>
    where
        T: Send,
        F: Fn(usize) -> T + Sync + Send,
    {
        match &self.pool {
            Some(pool) => pool.install(|| (0..group_count).into_par_iter().map(&task).collect()),
            None => (0..group_count).into_par_iter().map(task).collect(),
        }
    }
}
