use std::sync::Arc;

use crate::error::AppError;
use crate::handlers;
use crate::scheduler::context::JobContext;
use crate::scheduler::job::{Job, JobAction, JobOutcome};

/// Runs the handler matching a job's action.
#[derive(Clone)]
pub struct JobExecutor {
    ctx: Arc<JobContext>,
}

impl JobExecutor {
    pub fn new(ctx: Arc<JobContext>) -> Self {
        Self { ctx }
    }

    pub async fn execute(&self, job: &Job) -> Result<JobOutcome, AppError> {
        match &job.action {
            JobAction::Ping => Ok(JobOutcome::Done),
            JobAction::HostCreate(req) => {
                let host = handlers::host::create_host(&self.ctx, job.id, req).await?;
                Ok(JobOutcome::HostSaved { host_id: host.id })
            }
            JobAction::TopologyParse(req) => handlers::port::parse_topology(&self.ctx, job, req).await,
            JobAction::Notify(notice) => {
                self.ctx.notifier.notify(notice).await?;
                Ok(JobOutcome::Done)
            }
            JobAction::Unknown => {
                tracing::warn!(job_id = %job.id, "Dropping job with unknown action");
                Ok(JobOutcome::Dropped)
            }
        }
    }
}
