//! Fork/join fan-out of one block of loci across a fixed pool of workers.
//!
//! Every call to [`ParallelDispatcher::dispatch`] splits the block into contiguous
//! ranges, one per worker, hands each range to the worker together with that worker's
//! private scratch value, and returns only after all ranges are done.

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use std::ops::Range;

#[derive(Debug)]
pub struct ParallelDispatcher {
    pool: ThreadPool,
    workers: usize,
}

impl ParallelDispatcher {
    /// Builds a dedicated pool with exactly `workers` threads. Zero is treated as one.
    pub fn new(workers: usize) -> Result<Self, ThreadPoolBuildError> {
        let workers = workers.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|idx| format!("eigmix-worker-{idx}"))
            .build()?;
        Ok(Self { pool, workers })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Runs `work(worker_index, scratch, range)` for every non-empty range of
    /// `0..total_items`, on the pool, and joins.
    ///
    /// # Panics
    /// If `scratch` does not hold exactly one value per worker.
    pub fn dispatch<T, F>(&self, scratch: &mut [T], total_items: usize, work: F)
    where
        T: Send,
        F: Fn(usize, &mut T, Range<usize>) + Send + Sync,
    {
        assert_eq!(
            scratch.len(),
            self.workers,
            "Logic error: dispatcher needs one scratch value per worker."
        );

        let ranges = split_ranges(total_items, self.workers);
        self.pool.install(|| {
            scratch
                .par_iter_mut()
                .zip(ranges.into_par_iter())
                .enumerate()
                .filter(|(_, (_, range))| !range.is_empty())
                .for_each(|(worker, (slot, range))| work(worker, slot, range));
        });
    }
}

/// Splits `0..total` into `parts` contiguous ranges whose lengths differ by at most one.
/// The first `total % parts` ranges take the extra item.
pub fn split_ranges(total: usize, parts: usize) -> Vec<Range<usize>> {
    let parts = parts.max(1);
    let base = total / parts;
    let extra = total % parts;

    let mut ranges = Vec::with_capacity(parts);
    let mut start = 0usize;
    for idx in 0..parts {
        let len = base + usize::from(idx < extra);
        ranges.push(start..start + len);
        start += len;
    }
    ranges
}
