//! Fork-join worker pool for parallel GC phases.
//!
//! A phase hands a [`WorkerTask`] to [`WorkerPool::run_task`], which runs
//! `work(worker_id)` on every worker and returns only when all of them are
//! done. Each call is therefore a full barrier between phases.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::GcConfig;

/// A unit of parallel work run by every active worker.
pub trait WorkerTask: Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Body executed by worker `worker_id` (`0..num_workers`).
    fn work(&self, worker_id: usize);
}

/// Runs [`WorkerTask`]s on scoped threads.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    max_workers: usize,
}

impl WorkerPool {
    #[must_use]
    pub const fn new(max_workers: usize) -> Self {
        Self {
            max_workers: if max_workers < 1 { 1 } else { max_workers },
        }
    }

    #[must_use]
    pub const fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Run `task` on `num_workers` workers (clamped to the pool size) and
    /// wait for all of them. Worker 0 runs on the calling thread.
    pub fn run_task(&self, task: &dyn WorkerTask, num_workers: usize) {
        let n = num_workers.clamp(1, self.max_workers);
        let _span = crate::tracing::trace_worker_task(task.name(), n);
        if n == 1 {
            task.work(0);
            return;
        }
        std::thread::scope(|scope| {
            for worker_id in 1..n {
                scope.spawn(move || task.work(worker_id));
            }
            task.work(0);
        });
    }
}

/// Hands out each region to exactly one worker during a parallel walk.
#[derive(Debug)]
pub struct RegionClaimer {
    claimed: Box<[AtomicBool]>,
    num_workers: usize,
}

impl RegionClaimer {
    #[must_use]
    pub fn new(num_regions: usize, num_workers: usize) -> Self {
        Self {
            claimed: (0..num_regions).map(|_| AtomicBool::new(false)).collect(),
            num_workers: num_workers.max(1),
        }
    }

    /// Claim `region`; `true` for exactly one caller.
    pub fn claim(&self, region: usize) -> bool {
        !self.claimed[region].swap(true, Ordering::AcqRel)
    }

    /// Visit every region this worker manages to claim, starting at a
    /// worker-specific offset so workers spread out.
    pub fn par_iterate(&self, worker_id: usize, mut f: impl FnMut(usize)) {
        let n = self.claimed.len();
        if n == 0 {
            return;
        }
        let start = worker_id * n / self.num_workers;
        for i in 0..n {
            let region = (start + i) % n;
            if self.claim(region) {
                f(region);
            }
        }
    }
}

/// Worker count for a full collection.
///
/// Each worker wastes about half a region at the end of its compaction
/// list, so the count is bounded by the configured heap waste, and by the
/// number of used regions.
#[must_use]
pub fn calc_active_workers(config: &GcConfig, num_regions: usize, used_regions: usize) -> usize {
    let max_workers = config.parallel_workers.max(1);
    if !config.use_dynamic_workers {
        return max_workers;
    }
    let max_wasted_regions = num_regions * config.heap_waste_percent / 100;
    let waste_limit = (max_wasted_regions * 2).max(1).min(max_workers);
    let used_limit = used_regions.max(1);
    let workers = waste_limit.min(used_limit);
    crate::tracing::log_active_workers(workers, waste_limit, used_limit, max_workers);
    workers
}
