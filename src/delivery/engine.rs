//! Sequential delivery of one job's items.
//!
//! One call to [`DeliveryEngine::deliver`] claims a queued job, posts its
//! items strictly in order and settles it in exactly one terminal state.
//! All waits happen inside the calling task, so other jobs keep moving.

use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::DeliveryConfig;
use crate::delivery::policy::{CircuitBreaker, Pacing, RetryPolicy};
use crate::delivery::report::{DeliveryOutcome, DeliveryReport};
use crate::error::{DatabaseError, Error, GatewayError, JobError};
use crate::gateway::{MessagingGateway, PollAck, PollRequest};
use crate::jobs::{Job, JobStatus};
use crate::sequence::{Item, Question};
use crate::store::JobStore;

pub struct DeliveryEngine {
    store: Arc<dyn JobStore>,
    gateway: Arc<dyn MessagingGateway>,
    config: DeliveryConfig,
    policy: RetryPolicy,
    pacing: Pacing,
}

impl DeliveryEngine {
    pub fn new(
        store: Arc<dyn JobStore>,
        gateway: Arc<dyn MessagingGateway>,
        config: DeliveryConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            policy: RetryPolicy::from_config(&config),
            pacing: Pacing::from_config(&config),
            config,
        }
    }

    /// Run `deliver` on its own task.
    pub fn spawn(self: &Arc<Self>, job_id: Uuid) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = engine.deliver(job_id).await {
                error!(job_id = %job_id, error = %e, "Delivery failed");
            }
        })
    }

    /// Deliver a queued job.
    ///
    /// Returns `Ok(None)` when the job was not `queued`, which is how a
    /// duplicate invocation is detected; nothing is posted in that case.
    pub async fn deliver(&self, job_id: Uuid) -> Result<Option<DeliveryOutcome>, Error> {
        let job = self
            .store
            .load(job_id)
            .await?
            .ok_or(JobError::NotFound { id: job_id })?;

        if !self
            .store
            .transition_status(job_id, JobStatus::Queued, JobStatus::Running)
            .await?
        {
            info!(job_id = %job_id, status = %job.status, "Job not queued, skipping delivery");
            return Ok(None);
        }

        let (Some(target), Some(privacy)) = (job.target.clone(), job.privacy_mode) else {
            // Unreachable through the state machine; settle the job anyway.
            self.store
                .transition_status(job_id, JobStatus::Running, JobStatus::Failed)
                .await?;
            return Err(JobError::Incomplete {
                id: job_id,
                what: "a target or privacy choice".into(),
            }
            .into());
        };

        let total = job.total_count();
        let pacing = self.pacing.delay_for(job.sequence.question_count());
        info!(
            job_id = %job_id,
            target = %target.name,
            items = total,
            pacing_ms = pacing.as_millis() as u64,
            "Delivery started"
        );

        let mut breaker = CircuitBreaker::new(self.config.breaker_threshold);
        let mut outcome = DeliveryOutcome {
            delivered_count: 0,
            total_count: total,
            aborted: false,
            failing_item_index: None,
            failed_items: Vec::new(),
        };

        for (index, item) in job.sequence.iter().enumerate() {
            let posted = match item {
                Item::Announcement { text } => {
                    self.post_announcement(job_id, index, target.chat_id, text)
                        .await
                }
                Item::Question(question) => {
                    let Some(poll) = self.poll_request(question, privacy.is_anonymous()) else {
                        warn!(job_id = %job_id, item = index, "Question has no resolvable answer");
                        outcome.failed_items.push(index);
                        if breaker.record_failure() {
                            outcome.aborted = true;
                            outcome.failing_item_index = Some(index);
                            break;
                        }
                        continue;
                    };
                    match self.post_question(job_id, index, target.chat_id, &poll).await {
                        Ok(ack) => {
                            breaker.record_success();
                            self.post_long_explanation(job_id, index, target.chat_id, question, &poll, &ack)
                                .await;
                            true
                        }
                        Err(e) => {
                            warn!(job_id = %job_id, item = index, error = %e, "Question not posted");
                            outcome.failed_items.push(index);
                            if breaker.record_failure() {
                                outcome.aborted = true;
                                outcome.failing_item_index = Some(index);
                                warn!(
                                    job_id = %job_id,
                                    item = index,
                                    consecutive = breaker.consecutive_failures(),
                                    "Circuit breaker open, aborting job"
                                );
                                break;
                            }
                            false
                        }
                    }
                }
            };

            if posted {
                outcome.delivered_count += 1;
                if let Err(e) = self
                    .store
                    .update_progress(job_id, outcome.delivered_count)
                    .await
                {
                    warn!(job_id = %job_id, error = %e, "Failed to persist progress");
                }
                if item.is_question() {
                    sleep(pacing).await;
                }
            }
        }

        self.finish(&job, &target.name, &outcome).await?;
        Ok(Some(outcome))
    }

    /// Settle a running job and notify its owner if this call won.
    ///
    /// If the terminal status cannot be written, the owner is still told
    /// and the job is left `running` for the next startup to fail.
    async fn finish(
        &self,
        job: &Job,
        target_name: &str,
        outcome: &DeliveryOutcome,
    ) -> Result<(), Error> {
        let status = outcome.status();
        let summary = DeliveryReport {
            outcome,
            job_ref: &job.short_id(),
            target_name,
        }
        .render();

        let won = match self.settle(job.id, status).await {
            Ok(won) => won,
            Err(e) => {
                error!(
                    job_id = %job.id,
                    %status,
                    error = %e,
                    "Could not record terminal status, notifying owner anyway"
                );
                self.notify(job.id, job.owner, &summary).await;
                return Err(e.into());
            }
        };
        if !won {
            warn!(job_id = %job.id, %status, "Job already left running; no notification sent");
            return Ok(());
        }

        info!(
            job_id = %job.id,
            %status,
            delivered = outcome.delivered_count,
            total = outcome.total_count,
            failed = outcome.failed_items.len(),
            "Delivery finished"
        );
        self.notify(job.id, job.owner, &summary).await;
        Ok(())
    }

    /// `running → status`, retried once on a store error.
    async fn settle(&self, job_id: Uuid, status: JobStatus) -> Result<bool, DatabaseError> {
        match self
            .store
            .transition_status(job_id, JobStatus::Running, status)
            .await
        {
            Ok(won) => Ok(won),
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Terminal status write failed, retrying");
                self.store
                    .transition_status(job_id, JobStatus::Running, status)
                    .await
            }
        }
    }

    /// Fail jobs interrupted mid-delivery and return the queued ones.
    ///
    /// Interrupted jobs are never resumed: their items may already be posted.
    pub async fn recover(&self) -> Result<Vec<Uuid>, Error> {
        for job in self.store.list_by_status(JobStatus::Running).await? {
            if self
                .store
                .transition_status(job.id, JobStatus::Running, JobStatus::Failed)
                .await?
            {
                warn!(
                    job_id = %job.id,
                    delivered = job.delivered_count,
                    "Failing job interrupted by restart"
                );
                let text = format!(
                    "⚠️ Job {} was interrupted by a restart after {}/{} item(s) and was not resumed.",
                    job.short_id(),
                    job.delivered_count,
                    job.total_count()
                );
                self.notify(job.id, job.owner, &text).await;
            }
        }

        let queued: Vec<Uuid> = self
            .store
            .list_by_status(JobStatus::Queued)
            .await?
            .into_iter()
            .map(|j| j.id)
            .collect();
        if !queued.is_empty() {
            info!(count = queued.len(), "Resuming queued jobs");
        }
        Ok(queued)
    }

    // ── Posting ─────────────────────────────────────────────────────

    fn poll_request(&self, question: &Question, is_anonymous: bool) -> Option<PollRequest> {
        let correct_option_id = question.correct_index()?;
        let limit = self.gateway.inline_explanation_limit();
        let explanation = question
            .explanation
            .clone()
            .filter(|e| limit.is_none_or(|max| e.chars().count() <= max));
        Some(PollRequest {
            question: question.prompt.clone(),
            options: question.ordered_options(),
            correct_option_id,
            is_anonymous,
            explanation,
        })
    }

    async fn post_question(
        &self,
        job_id: Uuid,
        index: usize,
        chat_id: i64,
        poll: &PollRequest,
    ) -> Result<PollAck, GatewayError> {
        let ack = self
            .with_retry(&self.policy, job_id, Some(index), || {
                self.gateway.create_poll(chat_id, poll)
            })
            .await?;
        debug!(job_id = %job_id, item = index, poll_id = %ack.poll_id, "Question posted");
        Ok(ack)
    }

    /// Best effort: one attempt, rate-limit waits honored.
    async fn post_announcement(&self, job_id: Uuid, index: usize, chat_id: i64, text: &str) -> bool {
        let policy = self.policy.single_attempt();
        match self
            .with_retry(&policy, job_id, Some(index), || self.gateway.send_text(chat_id, text))
            .await
        {
            Ok(()) => {
                debug!(job_id = %job_id, item = index, "Announcement posted");
                true
            }
            Err(e) => {
                warn!(job_id = %job_id, item = index, error = %e, "Announcement not posted, continuing");
                false
            }
        }
    }

    /// Explanations too long for the poll follow it as a reply.
    async fn post_long_explanation(
        &self,
        job_id: Uuid,
        index: usize,
        chat_id: i64,
        question: &Question,
        poll: &PollRequest,
        ack: &PollAck,
    ) {
        let Some(explanation) = question.explanation.as_deref() else {
            return;
        };
        if poll.explanation.is_some() {
            return;
        }
        let text = format!("💡 {explanation}");
        let policy = self.policy.single_attempt();
        if let Err(e) = self
            .with_retry(&policy, job_id, Some(index), || {
                self.gateway.send_reply(chat_id, &text, ack)
            })
            .await
        {
            warn!(job_id = %job_id, item = index, error = %e, "Explanation reply not posted");
        }
    }

    async fn notify(&self, job_id: Uuid, owner: i64, text: &str) {
        let policy = self.policy.single_attempt();
        if let Err(e) = self
            .with_retry(&policy, job_id, None, || self.gateway.send_text(owner, text))
            .await
        {
            warn!(job_id = %job_id, owner, error = %e, "Failed to notify owner");
        }
    }

    /// Drive `op` until it succeeds, fails permanently or runs out of attempts.
    async fn with_retry<T, F, Fut>(
        &self,
        policy: &RetryPolicy,
        job_id: Uuid,
        item: Option<usize>,
        mut op: F,
    ) -> Result<T, GatewayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let mut attempts = 0;
        loop {
            let result = match timeout(self.config.call_timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(GatewayError::Transient(format!(
                    "call timed out after {:?}",
                    self.config.call_timeout
                ))),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(GatewayError::RateLimited { retry_after }) => {
                    let wait = policy.rate_limit_wait(retry_after);
                    warn!(
                        job_id = %job_id,
                        item = ?item,
                        wait_ms = wait.as_millis() as u64,
                        "Rate limited, waiting"
                    );
                    sleep(wait).await;
                }
                Err(e @ GatewayError::Transient(_)) => {
                    attempts += 1;
                    if !policy.should_retry(attempts) {
                        return Err(e);
                    }
                    let delay = policy.backoff(attempts);
                    warn!(
                        job_id = %job_id,
                        item = ?item,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient failure, backing off"
                    );
                    sleep(delay).await;
                }
                Err(e @ GatewayError::Permanent(_)) => return Err(e),
            }
        }
    }
}
