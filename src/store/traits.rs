//! `JobStore` trait, the single async interface for job persistence.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::jobs::{Job, JobStatus};

/// Backend-agnostic job persistence.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert or replace a job record.
    async fn save(&self, job: &Job) -> Result<(), DatabaseError>;

    /// Get a job by ID.
    async fn load(&self, id: Uuid) -> Result<Option<Job>, DatabaseError>;

    /// Overwrite a job's status unconditionally.
    async fn update_status(&self, id: Uuid, status: JobStatus) -> Result<(), DatabaseError>;

    /// All jobs currently in `status`, oldest first.
    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>, DatabaseError>;

    /// Compare-and-set: move `id` from `from` to `to` only if it is still in
    /// `from`. Returns whether this call performed the change.
    async fn transition_status(
        &self,
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
    ) -> Result<bool, DatabaseError>;

    /// Record how many items have been posted.
    async fn update_progress(&self, id: Uuid, delivered_count: usize)
    -> Result<(), DatabaseError>;
}
