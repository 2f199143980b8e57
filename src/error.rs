//! Error types for quizcast.

use std::time::Duration;

use uuid::Uuid;

use crate::jobs::JobStatus;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Failures reported by the messaging gateway.
///
/// The variant decides the retry path taken by the delivery engine.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    /// The remote side asked us to wait before calling again.
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// Network trouble, timeouts, 5xx responses.
    #[error("Transient failure: {0}")]
    Transient(String),

    /// The request itself was rejected; retrying will not help.
    #[error("Permanent failure: {0}")]
    Permanent(String),
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Permanent(_))
    }
}

/// Job-related errors.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Job {id} not found")]
    NotFound { id: Uuid },

    #[error("Job {id} in state {state}, cannot transition to {target}")]
    InvalidTransition {
        id: Uuid,
        state: JobStatus,
        target: JobStatus,
    },

    #[error("Input has {errors} blocking error(s); a job cannot be created from it")]
    NotReady { errors: usize },

    #[error("Job {id} is missing {what} and cannot be queued")]
    Incomplete { id: Uuid, what: String },

    #[error("Job {id} belongs to another operator")]
    NotOwner { id: Uuid },

    #[error("Unknown target chat: {0}")]
    UnknownTarget(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
