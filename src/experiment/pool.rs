//! Persistent bounded worker pool for per-tick experiment evaluation.
//!
//! Workers are spawned lazily as passes need them and then kept for the life
//! of the pool, so a pass over N experiments never runs more than
//! `min(N, capacity)` of them at once and no thread is created per tick.

#![allow(missing_docs)]

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::thread;

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use parking_lot::Mutex;

use crate::core::errors::{ChaosError, Result};

/// Upper bound on evaluation workers.
pub const MAX_WORKERS: usize = 64;

/// Unit of work handed to a worker.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// What happened during one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    pub completed: usize,
    pub panicked: usize,
}

pub struct EvaluationPool {
    capacity: usize,
    tx: Option<Sender<Job>>,
    rx: Receiver<Job>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl std::fmt::Debug for EvaluationPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluationPool")
            .field("capacity", &self.capacity)
            .field("workers", &self.worker_count())
            .finish()
    }
}

impl EvaluationPool {
    /// Pool with at most `capacity` workers, clamped to `1..=MAX_WORKERS`.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = unbounded::<Job>();
        Self {
            capacity: capacity.clamp(1, MAX_WORKERS),
            tx: Some(tx),
            rx,
            workers: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Threads spawned so far.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.lock().len()
    }

    /// Run every job exactly once and wait for all of them. A panicking job
    /// is counted and does not affect the others.
    pub fn run_pass(&self, jobs: Vec<Job>) -> Result<PassReport> {
        if jobs.is_empty() {
            return Ok(PassReport::default());
        }
        let tx = self.tx.as_ref().ok_or(ChaosError::ChannelClosed {
            component: "evaluation-pool",
        })?;
        self.ensure_workers(jobs.len().min(self.capacity))?;

        let total = jobs.len();
        let (done_tx, done_rx) = bounded::<bool>(total);
        for job in jobs {
            let done_tx = done_tx.clone();
            let wrapped: Job = Box::new(move || {
                let ok = catch_unwind(AssertUnwindSafe(job)).is_ok();
                let _ = done_tx.send(ok);
            });
            tx.send(wrapped).map_err(|_| ChaosError::ChannelClosed {
                component: "evaluation-pool",
            })?;
        }
        drop(done_tx);

        let mut report = PassReport::default();
        for _ in 0..total {
            match done_rx.recv() {
                Ok(true) => report.completed += 1,
                Ok(false) => report.panicked += 1,
                Err(_) => {
                    return Err(ChaosError::ChannelClosed {
                        component: "evaluation-pool",
                    });
                }
            }
        }
        Ok(report)
    }

    fn ensure_workers(&self, wanted: usize) -> Result<()> {
        let mut workers = self.workers.lock();
        while workers.len() < wanted {
            let rx = self.rx.clone();
            let handle = thread::Builder::new()
                .name(format!("chaos-eval-{}", workers.len()))
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        job();
                    }
                })
                .map_err(|e| ChaosError::Runtime {
                    details: format!("failed to spawn evaluation worker: {e}"),
                })?;
            workers.push(handle);
        }
        Ok(())
    }
}

impl Drop for EvaluationPool {
    fn drop(&mut self) {
        self.tx.take();
        for handle in self.workers.lock().drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn counting_jobs(n: usize, counter: &Arc<AtomicUsize>) -> Vec<Job> {
        (0..n)
            .map(|_| {
                let counter = Arc::clone(counter);
                Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }) as Job
            })
            .collect()
    }

    #[test]
    fn every_job_runs_once() {
        let pool = EvaluationPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));
        let report = pool.run_pass(counting_jobs(25, &counter)).unwrap();
        assert_eq!(report.completed, 25);
        assert_eq!(counter.load(Ordering::SeqCst), 25);
    }

    #[test]
    fn workers_are_reused_across_passes() {
        let pool = EvaluationPool::new(8);
        let counter = Arc::new(AtomicUsize::new(0));
        pool.run_pass(counting_jobs(3, &counter)).unwrap();
        assert_eq!(pool.worker_count(), 3);
        pool.run_pass(counting_jobs(2, &counter)).unwrap();
        assert_eq!(pool.worker_count(), 3);
        pool.run_pass(counting_jobs(20, &counter)).unwrap();
        assert_eq!(pool.worker_count(), 8);
    }

    #[test]
    fn concurrency_never_exceeds_capacity() {
        let pool = EvaluationPool::new(3);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let jobs: Vec<Job> = (0..12)
            .map(|_| {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                Box::new(move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(5));
                    running.fetch_sub(1, Ordering::SeqCst);
                }) as Job
            })
            .collect();
        pool.run_pass(jobs).unwrap();
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[test]
    fn panicking_job_is_isolated() {
        let pool = EvaluationPool::new(2);
        let counter = Arc::new(AtomicUsize::new(0));
        let mut jobs = counting_jobs(4, &counter);
        jobs.insert(1, Box::new(|| panic!("evaluation blew up")));
        let report = pool.run_pass(jobs).unwrap();
        assert_eq!(report, PassReport { completed: 4, panicked: 1 });
        assert_eq!(counter.load(Ordering::SeqCst), 4);

        let report = pool.run_pass(counting_jobs(2, &counter)).unwrap();
        assert_eq!(report.completed, 2);
    }

    #[test]
    fn capacity_is_clamped() {
        assert_eq!(EvaluationPool::new(0).capacity(), 1);
        assert_eq!(EvaluationPool::new(1000).capacity(), MAX_WORKERS);
    }
}
