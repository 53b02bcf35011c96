use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Storage, StoreError};
use crate::error::AppError;
use crate::model::{Host, MacAddr, Port};
use crate::scheduler::job::{ActionKind, Job};

#[derive(Debug, Default)]
struct Tables {
    jobs: HashMap<Uuid, Job>,
    /// Hosts keyed by hostname.
    hosts: HashMap<String, Host>,
    ports: HashMap<MacAddr, Port>,
    errors: Vec<AppError>,
}

/// Process-local storage, used by single-node deployments and tests.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    tables: RwLock<Tables>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn job_count(&self) -> usize {
        self.tables.read().await.jobs.len()
    }

    pub async fn port_count(&self) -> usize {
        self.tables.read().await.ports.len()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn insert_job(&self, job: &Job) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.jobs.contains_key(&job.id) {
            return Err(StoreError::Duplicate(job.id.to_string()));
        }
        tables.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn update_job(&self, job: &Job) -> Result<(), StoreError> {
        self.tables.write().await.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        Ok(self.tables.read().await.jobs.get(&id).cloned())
    }

    async fn find_job_by_requester(
        &self,
        requester_id: Uuid,
        action: ActionKind,
    ) -> Result<Option<Job>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .jobs
            .values()
            .filter(|j| j.requester_id == requester_id && j.kind() == action)
            .min_by_key(|j| j.created_at)
            .cloned())
    }

    async fn find_host_by_hostname(&self, hostname: &str) -> Result<Option<Host>, StoreError> {
        Ok(self.tables.read().await.hosts.get(hostname).cloned())
    }

    async fn get_host(&self, id: Uuid) -> Result<Option<Host>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.hosts.values().find(|h| h.id == id).cloned())
    }

    async fn upsert_host(&self, host: &Host) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .hosts
            .insert(host.hostname.clone(), host.clone());
        Ok(())
    }

    async fn upsert_port(&self, port: &Port) -> Result<(), StoreError> {
        self.tables.write().await.ports.insert(port.mac, port.clone());
        Ok(())
    }

    async fn get_port(&self, mac: MacAddr) -> Result<Option<Port>, StoreError> {
        Ok(self.tables.read().await.ports.get(&mac).cloned())
    }

    async fn insert_error(&self, err: &AppError) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.errors.iter().any(|e| e.id == err.id) {
            return Err(StoreError::Duplicate(err.id.to_string()));
        }
        tables.errors.push(err.clone());
        Ok(())
    }

    async fn errors_for_job(&self, job_id: Uuid) -> Result<Vec<AppError>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .errors
            .iter()
            .filter(|e| e.job_id == Some(job_id))
            .cloned()
            .collect())
    }
}
