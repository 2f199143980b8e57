//! Job record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::JobError;
use crate::jobs::state::JobStatus;
use crate::parser::ParseResult;
use crate::sequence::Sequence;

/// Whether voters are visible on posted polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivacyMode {
    Public,
    Anonymous,
}

impl PrivacyMode {
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Anonymous => "anonymous",
        }
    }
}

impl std::fmt::Display for PrivacyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PrivacyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Self::Public),
            "anonymous" => Ok(Self::Anonymous),
            other => Err(format!("unknown privacy mode: {other}")),
        }
    }
}

/// A named destination chat.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    pub name: String,
    pub chat_id: i64,
}

impl Target {
    pub fn new(name: impl Into<String>, chat_id: i64) -> Self {
        Self {
            name: name.into(),
            chat_id,
        }
    }
}

/// Outcome of [`Job::transition_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,
    /// The job was already terminal; nothing changed.
    Ignored,
}

/// A delivery job: one parsed sequence bound for one chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    /// Telegram user id of the operator; also the chat notifications go to.
    pub owner: i64,
    pub target: Option<Target>,
    pub privacy_mode: Option<PrivacyMode>,
    pub sequence: Sequence,
    pub status: JobStatus,
    /// Items posted so far.
    pub delivered_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Build a pending job from a clean parse.
    pub fn from_parse(owner: i64, result: &ParseResult) -> Result<Self, JobError> {
        if !result.ok {
            return Err(JobError::NotReady {
                errors: result.error_count(),
            });
        }
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            owner,
            target: None,
            privacy_mode: None,
            sequence: result.sequence.clone(),
            status: JobStatus::Pending,
            delivered_count: 0,
            created_at: now,
            updated_at: now,
        })
    }

    /// Move to `target`, checking the state machine.
    ///
    /// From a terminal state this is a no-op that reports
    /// [`Transition::Ignored`]. Entering `queued` also requires privacy,
    /// target and a deliverable sequence.
    pub fn transition_to(&mut self, target: JobStatus) -> Result<Transition, JobError> {
        if self.status.is_terminal() {
            return Ok(Transition::Ignored);
        }
        if !self.status.can_transition_to(target) {
            return Err(JobError::InvalidTransition {
                id: self.id,
                state: self.status,
                target,
            });
        }
        if target == JobStatus::Queued {
            self.check_ready()?;
        }
        self.status = target;
        self.updated_at = Utc::now();
        Ok(Transition::Applied)
    }

    fn check_ready(&self) -> Result<(), JobError> {
        let what = if self.privacy_mode.is_none() {
            "a privacy choice"
        } else if self.target.is_none() {
            "a target chat"
        } else if !self.sequence.is_deliverable() {
            "a deliverable sequence"
        } else {
            return Ok(());
        };
        Err(JobError::Incomplete {
            id: self.id,
            what: what.into(),
        })
    }

    pub fn total_count(&self) -> usize {
        self.sequence.len()
    }

    /// First eight hex digits of the id, for operator messages.
    pub fn short_id(&self) -> String {
        self.id.simple().to_string()[..8].to_string()
    }
}
