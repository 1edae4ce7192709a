//! Fixed-size worker pool.
//!
//! Jobs flow through a bounded intake channel to `worker_count` workers
//! that share its receiving end. Every executed job produces exactly one
//! [`JobResult`] on the results stream. Once every intake handle is gone
//! and the workers have drained the queue (or cancellation stopped them),
//! the results stream closes and the done signal fires once with the
//! pool totals.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::error::ScanError;
use crate::job::{Job, JobResult};

/// Totals reported on the done signal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub executed: usize,
    pub failed: usize,
}

impl PoolStats {
    fn merge(&mut self, other: PoolStats) {
        self.executed += other.executed;
        self.failed += other.failed;
    }
}

/// Cloneable job submission handle. The intake closes when every clone,
/// including the one held by the pool, has been dropped.
#[derive(Clone)]
pub struct JobIntake {
    tx: mpsc::Sender<Job>,
}

impl JobIntake {
    /// Queue one job, waiting while the intake is full.
    pub async fn submit(&self, job: Job) -> Result<(), ScanError> {
        self.tx.send(job).await.map_err(|e| {
            ScanError::Pool(format!(
                "intake closed, job {} not queued",
                e.0.descriptor().id
            ))
        })
    }

    /// Queue jobs in order, then release this handle. Stops early if the
    /// workers are gone. Returns how many jobs were queued.
    pub async fn submit_all(self, jobs: Vec<Job>) -> usize {
        let total = jobs.len();
        let mut queued = 0;
        for job in jobs {
            if let Err(e) = self.submit(job).await {
                tracing::warn!(error = %e, queued, total, "Job submission stopped");
                break;
            }
            queued += 1;
        }
        tracing::debug!(queued, total, "Job submission finished");
        queued
    }
}

/// The running side of a pool.
pub struct PoolHandle {
    /// One entry per executed job, closed after the last worker exits.
    pub results: mpsc::UnboundedReceiver<JobResult>,
    /// Fires once, after the results stream has closed.
    pub done: oneshot::Receiver<PoolStats>,
}

pub struct WorkerPool {
    worker_count: usize,
    intake: mpsc::Sender<Job>,
    pending: mpsc::Receiver<Job>,
}

impl WorkerPool {
    /// Create a pool. `worker_count` is taken as given; callers apply
    /// their own floor.
    pub fn new(worker_count: usize) -> Self {
        debug_assert!(worker_count >= 1, "worker pool needs at least one worker");
        let (intake, pending) = mpsc::channel(worker_count.max(1));
        Self {
            worker_count,
            intake,
            pending,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn intake(&self) -> JobIntake {
        JobIntake {
            tx: self.intake.clone(),
        }
    }

    /// Submit `jobs` from a background producer task. The task's output is
    /// the number of jobs queued.
    pub fn generate_from(&self, jobs: Vec<Job>) -> JoinHandle<usize> {
        let intake = self.intake();
        tokio::spawn(intake.submit_all(jobs))
    }

    /// Start the workers. The pool's own intake handle is released here, so
    /// the queue closes once every outstanding [`JobIntake`] is dropped.
    pub fn run(self, cancel: CancellationToken) -> PoolHandle {
        let WorkerPool {
            worker_count,
            intake,
            pending,
        } = self;
        drop(intake);

        let pending = Arc::new(Mutex::new(pending));
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = oneshot::channel();

        let mut workers = JoinSet::new();
        for worker_id in 0..worker_count {
            workers.spawn(worker_loop(
                worker_id,
                Arc::clone(&pending),
                results_tx.clone(),
                cancel.clone(),
            ));
        }
        drop(pending);
        drop(results_tx);

        tracing::debug!(workers = worker_count, "Worker pool started");

        tokio::spawn(async move {
            let mut stats = PoolStats::default();
            while let Some(joined) = workers.join_next().await {
                match joined {
                    Ok(worker_stats) => stats.merge(worker_stats),
                    Err(e) => tracing::error!(error = %e, "Worker task failed"),
                }
            }
            tracing::debug!(
                executed = stats.executed,
                failed = stats.failed,
                "Worker pool finished"
            );
            let _ = done_tx.send(stats);
        });

        PoolHandle {
            results: results_rx,
            done: done_rx,
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    pending: Arc<Mutex<mpsc::Receiver<Job>>>,
    results: mpsc::UnboundedSender<JobResult>,
    cancel: CancellationToken,
) -> PoolStats {
    let mut stats = PoolStats::default();

    loop {
        let next = {
            let mut queue = pending.lock().await;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                job = queue.recv() => job,
            }
        };
        let Some(job) = next else {
            break;
        };

        let descriptor = job.descriptor().clone();
        tracing::trace!(
            worker = worker_id,
            job_id = %descriptor.id,
            job_type = %descriptor.job_type,
            ip = %descriptor.payload.address(),
            "Executing job"
        );

        // Run on its own task so a panicking executor still yields a result.
        let job_cancel = cancel.clone();
        let result = match tokio::spawn(async move { job.execute(&job_cancel).await }).await {
            Ok(result) => result,
            Err(e) => JobResult {
                outcome: Err(ScanError::Pool(format!("job task failed: {e}"))),
                descriptor,
            },
        };

        stats.executed += 1;
        if result.outcome.is_err() {
            stats.failed += 1;
        }

        if results.send(result).is_err() {
            tracing::warn!(worker = worker_id, "Results receiver dropped, worker exiting");
            break;
        }
    }

    tracing::trace!(worker = worker_id, executed = stats.executed, "Worker exiting");
    stats
}
