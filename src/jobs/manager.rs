//! Operator actions over stored jobs.
//!
//! Every action loads the job, checks ownership, applies one state machine
//! step and persists the result. Actions on a job that is already terminal
//! return it unchanged.

use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Error, JobError};
use crate::jobs::model::{Job, PrivacyMode, Target, Transition};
use crate::jobs::state::JobStatus;
use crate::parser::{ParseResult, Parser};
use crate::store::JobStore;

/// Result of submitting operator text.
#[derive(Debug)]
pub enum Submission {
    /// The text parsed cleanly; the job now awaits a privacy choice.
    Accepted { job: Job, parse: ParseResult },
    /// Blocking errors; no job was created.
    Rejected { parse: ParseResult },
}

pub struct JobManager {
    store: Arc<dyn JobStore>,
    parser: Parser,
    targets: Vec<Target>,
}

impl JobManager {
    pub fn new(store: Arc<dyn JobStore>, parser: Parser, targets: Vec<Target>) -> Self {
        Self {
            store,
            parser,
            targets,
        }
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Parse `text` and, if clean, create a job owned by `owner`.
    pub async fn submit(&self, owner: i64, text: &str) -> Result<Submission, Error> {
        let parse = self.parser.parse(text);
        if !parse.ok {
            debug!(owner, errors = parse.error_count(), "Submission rejected");
            return Ok(Submission::Rejected { parse });
        }

        let mut job = Job::from_parse(owner, &parse)?;
        job.transition_to(JobStatus::AwaitingPrivacyChoice)?;
        self.store.save(&job).await?;
        info!(
            job_id = %job.id,
            owner,
            items = job.total_count(),
            questions = job.sequence.question_count(),
            "Job created"
        );
        Ok(Submission::Accepted { job, parse })
    }

    pub async fn get(&self, owner: i64, id: Uuid) -> Result<Job, Error> {
        let job = self
            .store
            .load(id)
            .await?
            .ok_or(JobError::NotFound { id })?;
        if job.owner != owner {
            return Err(JobError::NotOwner { id }.into());
        }
        Ok(job)
    }

    pub async fn choose_privacy(
        &self,
        owner: i64,
        id: Uuid,
        mode: PrivacyMode,
    ) -> Result<Job, Error> {
        let mut job = self.get(owner, id).await?;
        if job.status.is_terminal() {
            return Ok(job);
        }
        let previous = job.privacy_mode.replace(mode);
        if let Err(e) = job.transition_to(JobStatus::AwaitingTarget) {
            job.privacy_mode = previous;
            return Err(e.into());
        }
        self.store.save(&job).await?;
        debug!(job_id = %id, privacy = %mode, "Privacy chosen");
        Ok(job)
    }

    /// Bind the job to a configured target and queue it for delivery.
    pub async fn choose_target(&self, owner: i64, id: Uuid, name: &str) -> Result<Job, Error> {
        let target = self
            .targets
            .iter()
            .find(|t| t.name == name)
            .cloned()
            .ok_or_else(|| JobError::UnknownTarget(name.to_string()))?;

        let mut job = self.get(owner, id).await?;
        if job.status.is_terminal() {
            return Ok(job);
        }
        job.target = Some(target);
        job.transition_to(JobStatus::Queued)?;
        self.store.save(&job).await?;
        info!(job_id = %id, target = name, "Job queued");
        Ok(job)
    }

    /// Cancel a job that has not started delivery.
    pub async fn cancel(&self, owner: i64, id: Uuid) -> Result<Job, Error> {
        let mut job = self.get(owner, id).await?;
        let from = job.status;
        if job.transition_to(JobStatus::Cancelled)? == Transition::Ignored {
            return Ok(job);
        }
        // A queued job may be claimed by the delivery engine meanwhile.
        if !self
            .store
            .transition_status(id, from, JobStatus::Cancelled)
            .await?
        {
            let current = self.get(owner, id).await?;
            if current.status.is_terminal() {
                return Ok(current);
            }
            return Err(JobError::InvalidTransition {
                id,
                state: current.status,
                target: JobStatus::Cancelled,
            }
            .into());
        }
        info!(job_id = %id, from = %from, "Job cancelled");
        Ok(job)
    }
}
