//! In-memory job store for tests and ephemeral runs.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::jobs::{Job, JobStatus};
use crate::store::traits::JobStore;

#[derive(Default)]
pub struct MemoryStore {
    jobs: RwLock<HashMap<Uuid, Job>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found(id: Uuid) -> DatabaseError {
    DatabaseError::NotFound {
        entity: "job".into(),
        id: id.to_string(),
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn save(&self, job: &Job) -> Result<(), DatabaseError> {
        self.jobs.write().await.insert(job.id, job.clone());
        Ok(())
    }

    async fn load(&self, id: Uuid) -> Result<Option<Job>, DatabaseError> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn update_status(&self, id: Uuid, status: JobStatus) -> Result<(), DatabaseError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or_else(|| not_found(id))?;
        job.status = status;
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>, DatabaseError> {
        let jobs = self.jobs.read().await;
        let mut matching: Vec<Job> = jobs.values().filter(|j| j.status == status).cloned().collect();
        matching.sort_by_key(|j| j.created_at);
        Ok(matching)
    }

    async fn transition_status(
        &self,
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
    ) -> Result<bool, DatabaseError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or_else(|| not_found(id))?;
        if job.status != from {
            return Ok(false);
        }
        job.status = to;
        job.updated_at = Utc::now();
        Ok(true)
    }

    async fn update_progress(
        &self,
        id: Uuid,
        delivered_count: usize,
    ) -> Result<(), DatabaseError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or_else(|| not_found(id))?;
        job.delivered_count = delivered_count;
        job.updated_at = Utc::now();
        Ok(())
    }
}
