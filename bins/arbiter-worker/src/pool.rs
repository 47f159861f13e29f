// Worker pool: N independent consumers of the grading queue.
//
// Each worker owns at most one job at a time. Shutdown is checked between
// jobs, so a job that has started is always finished, and a job popped after
// shutdown goes back on the queue.

use crate::orchestrator::{Grader, PassOutcome};
use arbiter_common::queue::JobQueue;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

pub struct WorkerPool {
    queue: Arc<dyn JobQueue>,
    grader: Arc<Grader>,
    concurrency: usize,
    poll_timeout: Duration,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        grader: Arc<Grader>,
        concurrency: usize,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            grader,
            concurrency,
            poll_timeout,
        }
    }

    /// Run until `shutdown` flips to true, then wait for in-flight jobs
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        info!(concurrency = self.concurrency, "Worker pool started");

        let workers: Vec<_> = (0..self.concurrency)
            .map(|worker_id| {
                let queue = self.queue.clone();
                let grader = self.grader.clone();
                let shutdown = shutdown.clone();
                let poll_timeout = self.poll_timeout;
                tokio::spawn(async move {
                    worker_loop(worker_id, queue, grader, poll_timeout, shutdown).await
                })
            })
            .collect();

        for result in futures_util::future::join_all(workers).await {
            if let Err(e) = result {
                error!(error = %e, "Worker task panicked");
            }
        }

        info!("Worker pool stopped");
    }
}

#[instrument(skip(queue, grader, shutdown))]
async fn worker_loop(
    worker_id: usize,
    queue: Arc<dyn JobQueue>,
    grader: Arc<Grader>,
    poll_timeout: Duration,
    shutdown: watch::Receiver<bool>,
) {
    // The pop is never cancelled: a BLPOP that already removed a job would
    // lose it. Shutdown waits at most one poll timeout instead.
    loop {
        if *shutdown.borrow() {
            break;
        }

        match queue.dequeue(poll_timeout).await {
            Ok(Some(job)) if *shutdown.borrow() => {
                info!(solution_id = %job.solution_id, "Shutting down, returning job to the queue");
                if let Err(e) = queue.enqueue(&job).await {
                    error!(solution_id = %job.solution_id, error = %e, "Failed to requeue job");
                }
                break;
            }
            Ok(Some(job)) => {
                info!(solution_id = %job.solution_id, "Received job");
                match grader.handle(job.solution_id).await {
                    Ok(PassOutcome::Skipped(state)) => {
                        info!(solution_id = %job.solution_id, state = ?state, "Duplicate delivery ignored");
                    }
                    Ok(outcome) => {
                        info!(solution_id = %job.solution_id, outcome = ?outcome, "Job finished");
                    }
                    Err(e) => {
                        // The solution already carries the error; keep consuming
                        error!(solution_id = %job.solution_id, error = %e, "Job failed");
                    }
                }
            }
            Ok(None) => continue,
            Err(e) => {
                warn!(error = %e, "Queue error");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
    info!("Worker exiting");
}
