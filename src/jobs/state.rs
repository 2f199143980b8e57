//! Job lifecycle state machine.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created from a clean parse, no choices made yet.
    Pending,
    /// Waiting for the operator to pick public or anonymous polls.
    AwaitingPrivacyChoice,
    /// Waiting for the operator to pick a destination chat.
    AwaitingTarget,
    /// Ready for the delivery engine.
    Queued,
    /// Items are being posted.
    Running,
    /// Every question was posted.
    Completed,
    /// Delivery finished but at least one question could not be posted.
    Failed,
    /// The circuit breaker stopped delivery.
    Aborted,
    /// The operator cancelled before delivery started.
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 9] = [
        Self::Pending,
        Self::AwaitingPrivacyChoice,
        Self::AwaitingTarget,
        Self::Queued,
        Self::Running,
        Self::Completed,
        Self::Failed,
        Self::Aborted,
        Self::Cancelled,
    ];

    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: JobStatus) -> bool {
        use JobStatus::*;

        matches!(
            (self, target),
            // Operator choices
            (Pending, AwaitingPrivacyChoice) |
            (AwaitingPrivacyChoice, AwaitingTarget) |
            (AwaitingTarget, Queued) |
            // Cancellable until delivery starts
            (Pending, Cancelled) | (AwaitingPrivacyChoice, Cancelled) |
            (AwaitingTarget, Cancelled) | (Queued, Cancelled) |
            // Delivery engine
            (Queued, Running) |
            (Running, Completed) | (Running, Failed) | (Running, Aborted)
        )
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Aborted | Self::Cancelled
        )
    }

    /// Operator actions are still possible.
    pub fn is_pre_running(&self) -> bool {
        matches!(
            self,
            Self::Pending | Self::AwaitingPrivacyChoice | Self::AwaitingTarget | Self::Queued
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::AwaitingPrivacyChoice => "awaiting_privacy_choice",
            Self::AwaitingTarget => "awaiting_target",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown job status: {s}"))
    }
}
