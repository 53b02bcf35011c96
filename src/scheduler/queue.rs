use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::QueueError;
use crate::scheduler::job::Job;

/// Producer side of the job channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
}

impl JobQueue {
    pub(crate) fn new(tx: mpsc::Sender<Job>) -> Self {
        Self { tx }
    }

    /// Queue `job`, waiting while the buffer is full.
    pub async fn enqueue(&self, job: Job) -> Result<(), QueueError> {
        self.tx.send(job).await.map_err(|_| QueueError::Closed)
    }

    pub fn try_enqueue(&self, job: Job) -> Result<(), QueueError> {
        self.tx.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => QueueError::Full,
            mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
        })
    }

    /// Queue `job` from a background task once `delay` has passed. The job
    /// is dropped if the queue closes first; its stored state stays as is.
    pub fn enqueue_after(&self, job: Job, delay: Duration) {
        let queue = self.clone();
        tokio::spawn(async move {
            let job_id = job.id;
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = queue.closed() => {
                    tracing::warn!(job_id = %job_id, "Queue closed, dropping delayed job");
                    return;
                }
            }
            if queue.enqueue(job).await.is_err() {
                tracing::warn!(job_id = %job_id, "Queue closed, dropping delayed job");
            }
        });
    }

    /// Resolves once the dispatcher stops accepting jobs.
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
