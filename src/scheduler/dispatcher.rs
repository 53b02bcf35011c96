use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::scheduler::context::JobContext;
use crate::scheduler::job::{Job, JobState};
use crate::scheduler::queue::JobQueue;
use crate::scheduler::retry;
use crate::worker::{Pool, Worker};

/// Hands queued jobs to a fixed pool of workers, one job per free worker.
pub struct Dispatcher {
    ctx: Arc<JobContext>,
    rx: mpsc::Receiver<Job>,
    queue: JobQueue,
}

impl Dispatcher {
    pub fn new(ctx: Arc<JobContext>) -> (Self, JobQueue) {
        let (tx, rx) = mpsc::channel(ctx.queue.queue_buffer);
        let queue = JobQueue::new(tx);
        let dispatcher = Self {
            ctx,
            rx,
            queue: queue.clone(),
        };
        (dispatcher, queue)
    }

    /// Dispatch until `done` fires, then close the ingress, drain what is
    /// buffered, wait for every handoff and stop the workers.
    pub async fn run(mut self, done: CancellationToken) {
        let workers_done = CancellationToken::new();
        let (pool_tx, pool_rx) = mpsc::channel(self.ctx.queue.workers);
        let pool: Pool = Arc::new(Mutex::new(pool_rx));

        let workers: Vec<JoinHandle<()>> = (0..self.ctx.queue.workers)
            .map(|id| {
                let worker = Worker::new(id, self.ctx.clone(), self.queue.clone(), pool_tx.clone());
                tokio::spawn(worker.run(workers_done.clone()))
            })
            .collect();
        drop(pool_tx);

        tracing::info!(workers = workers.len(), "Dispatcher started");
        let handoffs = TaskTracker::new();

        loop {
            tokio::select! {
                biased;
                _ = done.cancelled() => break,
                job = self.rx.recv() => match job {
                    Some(job) => self.dispatch(job, &pool, &handoffs).await,
                    None => break,
                },
            }
        }

        self.rx.close();
        let mut drained = 0usize;
        while let Some(job) = self.rx.recv().await {
            self.dispatch(job, &pool, &handoffs).await;
            drained += 1;
        }
        tracing::info!(drained, "Dispatcher draining");

        handoffs.close();
        handoffs.wait().await;
        workers_done.cancel();
        for worker in workers {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "Worker task panicked");
            }
        }
        tracing::info!("Dispatcher stopped");
    }

    /// Mark the job pending, then hand it to the next free worker from its
    /// own task.
    async fn dispatch(&self, mut job: Job, pool: &Pool, handoffs: &TaskTracker) {
        if !job.transition(JobState::Pending) {
            return;
        }
        if let Err(e) = self.ctx.storage.update_job(&job).await {
            retry::fail(&self.ctx, &self.queue, job, e.into()).await;
            return;
        }

        let pool = pool.clone();
        handoffs.spawn(async move {
            let job_id = job.id;
            let inbox = pool.lock().await.recv().await;
            match inbox {
                Some(inbox) => {
                    if inbox.send(job).await.is_err() {
                        tracing::error!(job_id = %job_id, "Worker inbox closed, job lost");
                    }
                }
                None => tracing::error!(job_id = %job_id, "No workers left, job lost"),
            }
        });
    }
}
