//! Settling a job after a handler run: success, bounded retry, blocking on
//! a sibling, and escalation of failed jobs.

use uuid::Uuid;

use crate::error::{AppError, ErrorKind};
use crate::scheduler::context::JobContext;
use crate::scheduler::job::{ActionKind, Job, JobAction, JobOutcome, JobState, Notify, Verdict};
use crate::scheduler::queue::JobQueue;

pub async fn settle(ctx: &JobContext, queue: &JobQueue, job: Job, result: Result<JobOutcome, AppError>) {
    match result {
        Ok(JobOutcome::Done) => succeed(ctx, queue, job).await,
        Ok(JobOutcome::HostSaved { host_id }) => {
            let mut job = job;
            job.host_id = Some(host_id);
            succeed(ctx, queue, job).await
        }
        Ok(JobOutcome::Blocked { requester_id }) => block(ctx, queue, job, requester_id).await,
        Ok(JobOutcome::Dropped) => {}
        Err(err) => fail(ctx, queue, job, err).await,
    }
}

async fn succeed(ctx: &JobContext, queue: &JobQueue, mut job: Job) {
    let attempt = job.clone();
    if !job.transition(JobState::Done) {
        return;
    }
    if let Err(e) = ctx.storage.update_job(&job).await {
        fail(ctx, queue, attempt, e.into()).await;
        return;
    }
    tracing::info!(job_id = %job.id, action = %job.kind(), "Job done");
    flush_errors(ctx, &job).await;
    signal_terminal(ctx, &job);
}

/// The retry gate: record `err` and either requeue the job after the retry
/// interval or fail it for good.
pub async fn fail(ctx: &JobContext, queue: &JobQueue, mut job: Job, err: AppError) {
    tracing::warn!(
        job_id = %job.id,
        action = %job.kind(),
        error = %err,
        source = err.source_message.as_deref().unwrap_or(""),
        "Job attempt failed"
    );

    match job.append_error(err, ctx.queue.max_job_fails) {
        Verdict::Retry => {
            if let Err(e) = ctx.storage.update_job(&job).await {
                tracing::warn!(job_id = %job.id, error = %e, "Failed to persist job before retry");
            }
            tracing::info!(job_id = %job.id, fail_count = job.fail_count, "Retrying job");
            queue.enqueue_after(job, ctx.queue.retry_interval());
        }
        Verdict::Failed => {
            job.transition(JobState::Failed);
            if let Err(e) = ctx.storage.update_job(&job).await {
                tracing::error!(job_id = %job.id, error = %e, "Failed to persist failed job");
            }
            tracing::warn!(job_id = %job.id, fail_count = job.fail_count, "Job failed");
            flush_errors(ctx, &job).await;
            signal_terminal(ctx, &job);
            escalate(ctx, queue, &job).await;
        }
    }
}

/// Park the job until the host-create job of `requester_id` settles, then
/// hand it back to the queue.
async fn block(ctx: &JobContext, queue: &JobQueue, mut job: Job, requester_id: Uuid) {
    if !job.transition(JobState::Blocked) {
        return;
    }
    if let Err(e) = ctx.storage.update_job(&job).await {
        tracing::warn!(job_id = %job.id, error = %e, "Failed to persist blocked job");
    }
    tracing::debug!(job_id = %job.id, requester_id = %requester_id, "Job blocked on sibling");

    let mut signal = ctx.completions.subscribe(requester_id);
    let ctx = ctx.clone();
    let queue = queue.clone();
    tokio::spawn(async move {
        // The sibling may have settled before we subscribed.
        let settled = matches!(
            ctx.storage.find_job_by_requester(requester_id, ActionKind::HostCreate).await,
            Ok(Some(sibling)) if sibling.state.is_terminal()
        );
        let closed = if settled {
            false
        } else {
            tokio::select! {
                _ = signal.wait_for(|done| *done) => false,
                _ = tokio::time::sleep(ctx.queue.block_timeout()) => false,
                _ = queue.closed() => true,
            }
        };
        drop(signal);
        ctx.completions.release(requester_id);
        if closed {
            tracing::warn!(job_id = %job.id, "Queue closed, leaving job blocked");
            return;
        }

        let job_id = job.id;
        if queue.enqueue(job).await.is_err() {
            tracing::warn!(job_id = %job_id, "Queue closed, leaving job blocked");
        }
    });
}

fn signal_terminal(ctx: &JobContext, job: &Job) {
    if job.kind() == ActionKind::HostCreate {
        ctx.completions.complete(job.requester_id);
    }
}

/// Write every error the job collected. A write that fails is reported as
/// a secondary internal error.
async fn flush_errors(ctx: &JobContext, job: &Job) {
    for err in &job.errors {
        if let Err(e) = ctx.storage.insert_error(err).await {
            tracing::error!(job_id = %job.id, error_id = %err.id, error = %e, "Failed to record job error");
            let mut secondary = AppError::new(ErrorKind::InternalSqlError).with_source(e);
            secondary.job_id = Some(job.id);
            if let Err(e) = ctx.storage.insert_error(&secondary).await {
                tracing::error!(job_id = %job.id, error = %e, "Failed to record secondary error");
            }
        }
    }
}

async fn escalate(ctx: &JobContext, queue: &JobQueue, job: &Job) {
    if job.kind() == ActionKind::Notify {
        return;
    }
    let notice = Job::new(
        job.requester_id,
        JobAction::Notify(Notify {
            failed_job_id: job.id,
            failed_action: job.kind(),
            errors: job.errors.iter().map(|e| e.kind.title().to_string()).collect(),
        }),
    );
    if let Err(e) = ctx.storage.insert_job(&notice).await {
        tracing::error!(job_id = %job.id, error = %e, "Failed to create notify job");
        return;
    }
    queue.enqueue_after(notice, std::time::Duration::ZERO);
}
