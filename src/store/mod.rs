//! Persistence collaborator for jobs, hosts, ports and error records.

pub mod memory;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{AppError, ErrorKind};
use crate::model::{Host, MacAddr, Port};
use crate::scheduler::job::{ActionKind, Job};

pub use memory::MemoryStorage;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("record already exists: {0}")]
    Duplicate(String),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::new(ErrorKind::InternalSqlError).with_source(err)
    }
}

#[async_trait]
pub trait Storage: Send + Sync {
    async fn insert_job(&self, job: &Job) -> Result<(), StoreError>;

    /// Overwrite the stored job with `job` (state, failure count, errors).
    async fn update_job(&self, job: &Job) -> Result<(), StoreError>;

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, StoreError>;

    /// The job of `action` created for the same originating request.
    async fn find_job_by_requester(
        &self,
        requester_id: Uuid,
        action: ActionKind,
    ) -> Result<Option<Job>, StoreError>;

    async fn find_host_by_hostname(&self, hostname: &str) -> Result<Option<Host>, StoreError>;

    async fn get_host(&self, id: Uuid) -> Result<Option<Host>, StoreError>;

    /// Insert, or replace the host with the same hostname.
    async fn upsert_host(&self, host: &Host) -> Result<(), StoreError>;

    /// Insert, or replace the port with the same MAC.
    async fn upsert_port(&self, port: &Port) -> Result<(), StoreError>;

    async fn get_port(&self, mac: MacAddr) -> Result<Option<Port>, StoreError>;

    async fn insert_error(&self, err: &AppError) -> Result<(), StoreError>;

    async fn errors_for_job(&self, job_id: Uuid) -> Result<Vec<AppError>, StoreError>;
}
