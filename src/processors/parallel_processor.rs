use crate::error::{PipelineError, Result};
use crate::utils::constants::DEFAULT_CHUNK_SIZE;
use rayon::prelude::*;
use rayon::ThreadPool;
use std::sync::Arc;

/// Bounded rayon pool for per-record and per-station work. Each worker
/// sees only its own slice; results come back in input order.
#[derive(Clone)]
pub struct ShardedExecutor {
    pool: Arc<ThreadPool>,
    max_workers: usize,
    chunk_size: usize,
}

impl ShardedExecutor {
    pub fn new(max_workers: usize) -> Result<Self> {
        let max_workers = max_workers.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(max_workers)
            .thread_name(|i| format!("hydromet-worker-{}", i))
            .build()
            .map_err(|e| PipelineError::Config(e.to_string()))?;

        Ok(Self {
            pool: Arc::new(pool),
            max_workers,
            chunk_size: DEFAULT_CHUNK_SIZE,
        })
    }

    /// One worker per available CPU.
    pub fn with_available_cpus() -> Result<Self> {
        Self::new(num_cpus::get())
    }

    /// Minimum number of items handed to a worker at once.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Apply `f` to every item in parallel, preserving order.
    pub fn map<T, R, F>(&self, items: &[T], f: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync + Send,
    {
        let chunk_size = self.chunk_size;
        self.pool
            .install(|| items.par_iter().with_min_len(chunk_size).map(f).collect())
    }

    /// Like [`map`](Self::map) but consumes the items.
    pub fn map_owned<T, R, F>(&self, items: Vec<T>, f: F) -> Vec<R>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> R + Sync + Send,
    {
        let chunk_size = self.chunk_size;
        self.pool
            .install(|| items.into_par_iter().with_min_len(chunk_size).map(f).collect())
    }
}

impl std::fmt::Debug for ShardedExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardedExecutor")
            .field("max_workers", &self.max_workers)
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}
