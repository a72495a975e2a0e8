//! Bounded worker pool for per-page jobs.
//!
//! Runs an indexed job (`0..count`) on a fixed number of scoped worker
//! threads. Workers pull the next index from a shared counter, so at most
//! `workers` pages are in flight at once. Results come back ordered by index
//! regardless of completion order.

use crate::{Cancelled, CancellationToken};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::thread;

/// Error from a pool run.
#[derive(Debug, thiserror::Error)]
pub enum PoolError<E> {
    /// The caller's token was cancelled before every job finished.
    #[error("pool run cancelled")]
    Cancelled,

    /// A job failed. When several fail, the lowest index wins.
    #[error("job {index} failed: {error}")]
    Job { index: u32, error: E },
}

impl<E> From<Cancelled> for PoolError<E> {
    fn from(_: Cancelled) -> Self {
        PoolError::Cancelled
    }
}

/// Configuration for the page pool.
#[derive(Debug, Clone, Copy)]
pub struct PagePool {
    workers: usize,
}

impl Default for PagePool {
    fn default() -> Self {
        Self { workers: num_cpus() }
    }
}

impl PagePool {
    /// Pool with `workers` threads (at least one).
    pub fn new(workers: usize) -> Self {
        Self { workers: workers.max(1) }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `job` for every index in `0..count`.
    ///
    /// The first failing job stops workers from picking up further indices;
    /// jobs already running are allowed to finish. `token` is checked before
    /// each job.
    pub fn run<T, E, F>(
        &self,
        count: u32,
        token: &CancellationToken,
        job: F,
    ) -> Result<Vec<T>, PoolError<E>>
    where
        T: Send,
        E: Send,
        F: Fn(u32) -> Result<T, E> + Sync,
    {
        token.check()?;
        if count == 0 {
            return Ok(Vec::new());
        }

        let next = AtomicU32::new(0);
        let stop = AtomicBool::new(false);
        let slots: Mutex<Vec<Option<T>>> = Mutex::new((0..count).map(|_| None).collect());
        let failure: Mutex<Option<(u32, E)>> = Mutex::new(None);
        let workers = self.workers.min(count as usize);

        log::debug!("running {count} page jobs on {workers} workers");

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    if stop.load(Ordering::Acquire) || token.is_cancelled() {
                        break;
                    }

                    let index = next.fetch_add(1, Ordering::AcqRel);
                    if index >= count {
                        break;
                    }

                    match job(index) {
                        Ok(value) => {
                            if let Ok(mut slots) = slots.lock() {
                                slots[index as usize] = Some(value);
                            }
                        }
                        Err(error) => {
                            stop.store(true, Ordering::Release);
                            if let Ok(mut failure) = failure.lock() {
                                let replace = match failure.as_ref() {
                                    Some((existing, _)) => index < *existing,
                                    None => true,
                                };
                                if replace {
                                    *failure = Some((index, error));
                                }
                            }
                        }
                    }
                });
            }
        });

        if let Some((index, error)) = failure.into_inner().ok().flatten() {
            return Err(PoolError::Job { index, error });
        }

        token.check()?;

        let slots = slots.into_inner().map_err(|_| PoolError::Cancelled)?;
        // Every slot is filled when no job failed and the token is live.
        slots.into_iter().collect::<Option<Vec<T>>>().ok_or(PoolError::Cancelled)
    }
}

/// Number of logical CPU cores, used as the default worker count.
fn num_cpus() -> usize {
    thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}
