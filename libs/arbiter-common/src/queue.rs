// Job queue contract. Delivery is at-least-once: a consumer may see the same
// job twice and must tolerate it.

use crate::store::StoreError;
use crate::types::GradeJob;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: &GradeJob) -> Result<(), StoreError>;

    /// Wait up to `timeout` for a job. `None` on timeout.
    async fn dequeue(&self, timeout: Duration) -> Result<Option<GradeJob>, StoreError>;
}

#[derive(Default)]
pub struct MemoryQueue {
    jobs: Mutex<VecDeque<GradeJob>>,
    notify: Notify,
}

impl MemoryQueue {
    pub async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(&self, job: &GradeJob) -> Result<(), StoreError> {
        self.jobs.lock().await.push_back(*job);
        self.notify.notify_one();
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<GradeJob>, StoreError> {
        let wait = async {
            loop {
                if let Some(job) = self.jobs.lock().await.pop_front() {
                    return job;
                }
                self.notify.notified().await;
            }
        };
        Ok(tokio::time::timeout(timeout, wait).await.ok())
    }
}
