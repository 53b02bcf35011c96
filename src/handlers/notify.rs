use async_trait::async_trait;

use crate::error::AppError;
use crate::scheduler::job::Notify;

/// Delivers failure notices for jobs that ran out of attempts.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notice: &Notify) -> Result<(), AppError>;
}

/// Reports failed jobs in the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notice: &Notify) -> Result<(), AppError> {
        tracing::warn!(
            failed_job_id = %notice.failed_job_id,
            action = %notice.failed_action,
            errors = ?notice.errors,
            "Job failed permanently"
        );
        Ok(())
    }
}
