//! The worker-pool seam used by parallel execution.
//!
//! The runner schedules against [`WorkerPool`] only; hosts may plug in
//! their own. [`RayonPool`] is the default, running batches on rayon's
//! global pool or on a dedicated one.

use crate::op::OpOutput;
use rayon::prelude::*;

/// A single dispatched compute invocation.
pub type PoolTask = Box<dyn FnOnce() -> anyhow::Result<OpOutput> + Send>;

/// Executes one frontier batch of independent compute tasks.
///
/// Implementations must return one result per task, in task order; they
/// are free to run the tasks in any order or degree of parallelism.
pub trait WorkerPool: Send + Sync {
    /// Run all tasks to completion and return their results in order.
    fn run_batch(&self, tasks: Vec<PoolTask>) -> Vec<anyhow::Result<OpOutput>>;
}

/// The default pool, backed by rayon.
pub struct RayonPool {
    pool: Option<rayon::ThreadPool>,
}

impl RayonPool {
    /// Use rayon's global thread pool.
    #[must_use]
    pub fn new() -> Self {
        RayonPool { pool: None }
    }

    /// Build a dedicated pool with the given number of threads.
    ///
    /// # Errors
    ///
    /// When the underlying thread pool cannot be built.
    pub fn with_threads(threads: usize) -> anyhow::Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .build()?;
        Ok(RayonPool { pool: Some(pool) })
    }

    /// A dedicated pool sized to the machine.
    ///
    /// # Errors
    ///
    /// When the underlying thread pool cannot be built.
    pub fn bounded() -> anyhow::Result<Self> {
        Self::with_threads(num_cpus::get().max(2))
    }
}

impl Default for RayonPool {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerPool for RayonPool {
    fn run_batch(&self, tasks: Vec<PoolTask>) -> Vec<anyhow::Result<OpOutput>> {
        let run = move || tasks.into_par_iter().map(|task| task()).collect();
        match &self.pool {
            Some(pool) => pool.install(run),
            None => run(),
        }
    }
}
