use super::scratch::ScratchBufferPool;
use super::PhysicsResult;
use parking_lot::{Mutex, MutexGuard};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Fewer items than this per worker run inline on the calling thread
const MIN_ITEMS_PER_WORKER: usize = 64;

/// Bounded set of workers used to parallelise simulation work.
///
/// Owns a rayon pool of `worker_count` long-lived threads, and one scratch pool
/// per worker index for the dispatcher's whole lifetime. Retained scratch memory
/// is therefore bounded by the worker count and released deterministically by
/// [`ThreadDispatcher::clear_pools`] or on drop.
pub struct ThreadDispatcher {
    workers: ThreadPool,
    pools: Vec<Mutex<ScratchBufferPool>>,
    next_lease: AtomicUsize,
}

impl ThreadDispatcher {
    pub fn new(worker_count: usize, block_capacity: usize) -> PhysicsResult<Self> {
        let worker_count = worker_count.max(1);
        let workers = ThreadPoolBuilder::new()
            .num_threads(worker_count)
            .thread_name(|index| format!("physics-worker-{index}"))
            .build()?;

        Ok(Self {
            workers,
            pools: (0..worker_count)
                .map(|_| Mutex::new(ScratchBufferPool::new(block_capacity)))
                .collect(),
            next_lease: AtomicUsize::new(0),
        })
    }

    pub fn worker_count(&self) -> usize {
        self.pools.len()
    }

    /// Index of the calling thread if it is one of this dispatcher's workers
    pub fn current_worker(&self) -> Option<usize> {
        self.workers.current_thread_index()
    }

    /// Apply `body` to every element, split into one contiguous chunk per
    /// worker. `body` receives the index of the worker running it. Small slices
    /// stay on the calling thread and report worker 0.
    pub fn for_each_chunk<T, F>(&self, items: &mut [T], body: F)
    where
        T: Send,
        F: Fn(usize, &mut T) + Sync,
    {
        let workers = (items.len() / MIN_ITEMS_PER_WORKER).clamp(1, self.worker_count());
        if workers == 1 {
            items.iter_mut().for_each(|item| body(0, item));
            return;
        }

        let chunk_size = items.len().div_ceil(workers);
        let body = &body;
        self.workers.install(|| {
            items.par_chunks_mut(chunk_size).for_each(|chunk| {
                let worker = rayon::current_thread_index().unwrap_or(0);
                chunk.iter_mut().for_each(|item| body(worker, item));
            });
        });
    }

    /// Borrow a scratch pool.
    ///
    /// A worker thread gets its own pool. Other threads try the pools
    /// round-robin without blocking and only wait when every pool is in use.
    pub fn lease_pool(&self) -> MutexGuard<'_, ScratchBufferPool> {
        if let Some(worker) = self.current_worker() {
            return self.pools[worker].lock();
        }

        let count = self.worker_count();
        let start = self.next_lease.fetch_add(1, Ordering::Relaxed) % count;
        for offset in 0..count {
            if let Some(pool) = self.pools[(start + offset) % count].try_lock() {
                return pool;
            }
        }
        self.pools[start].lock()
    }

    /// Release retained scratch memory in every pool
    pub fn clear_pools(&self) {
        for pool in &self.pools {
            pool.lock().clear();
        }
    }

    /// Total bytes retained across all pools
    pub fn retained_bytes(&self) -> usize {
        self.pools.iter().map(|pool| pool.lock().retained_bytes()).sum()
    }
}

impl std::fmt::Debug for ThreadDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadDispatcher")
            .field("workers", &self.worker_count())
            .field("retained_bytes", &self.retained_bytes())
            .finish()
    }
}
