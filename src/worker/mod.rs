//! Pool workers: each runs one job at a time and re-advertises its inbox
//! after every job.

pub mod executor;

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::scheduler::context::JobContext;
use crate::scheduler::job::Job;
use crate::scheduler::queue::JobQueue;
use crate::scheduler::retry;

pub use executor::JobExecutor;

/// Inboxes of idle workers, in the order they became idle.
pub type Pool = Arc<Mutex<mpsc::Receiver<mpsc::Sender<Job>>>>;

pub struct Worker {
    id: usize,
    ctx: Arc<JobContext>,
    queue: JobQueue,
    pool: mpsc::Sender<mpsc::Sender<Job>>,
    executor: JobExecutor,
}

impl Worker {
    pub fn new(
        id: usize,
        ctx: Arc<JobContext>,
        queue: JobQueue,
        pool: mpsc::Sender<mpsc::Sender<Job>>,
    ) -> Self {
        let executor = JobExecutor::new(ctx.clone());
        Self {
            id,
            ctx,
            queue,
            pool,
            executor,
        }
    }

    pub async fn run(self, done: CancellationToken) {
        let (inbox_tx, mut inbox) = mpsc::channel(self.ctx.queue.worker_capacity);

        loop {
            if self.pool.send(inbox_tx.clone()).await.is_err() {
                break;
            }
            tokio::select! {
                biased;
                job = inbox.recv() => match job {
                    Some(job) => self.process(job).await,
                    None => break,
                },
                _ = done.cancelled() => break,
            }
        }
        tracing::debug!(worker = self.id, "Worker stopped");
    }

    async fn process(&self, job: Job) {
        tracing::debug!(worker = self.id, job_id = %job.id, action = %job.kind(), "Processing job");
        let result = self.executor.execute(&job).await;
        retry::settle(&self.ctx, &self.queue, job, result).await;
    }
}
