//! libSQL backend, the async `JobStore` implementation.
//!
//! Supports local file and in-memory databases. The item sequence is stored
//! as a JSON column; everything the state machine touches has its own column.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::jobs::{Job, JobStatus, PrivacyMode, Target};
use crate::sequence::Sequence;
use crate::store::migrations;
use crate::store::traits::JobStore;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(&self.conn).await
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

const JOB_COLUMNS: &str = "id, owner, target_name, target_chat_id, privacy_mode, sequence, status, delivered_count, created_at, updated_at";

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn opt_integer(i: Option<i64>) -> libsql::Value {
    match i {
        Some(i) => libsql::Value::Integer(i),
        None => libsql::Value::Null,
    }
}

fn row_to_job(row: &libsql::Row) -> Result<Job, DatabaseError> {
    let read = |e: libsql::Error| DatabaseError::Query(format!("job row parse: {e}"));

    let id_str: String = row.get(0).map_err(read)?;
    let owner: i64 = row.get(1).map_err(read)?;
    let target_name: Option<String> = row.get(2).ok();
    let target_chat_id: Option<i64> = row.get(3).ok();
    let privacy_str: Option<String> = row.get(4).ok();
    let sequence_json: String = row.get(5).map_err(read)?;
    let status_str: String = row.get(6).map_err(read)?;
    let delivered: i64 = row.get(7).map_err(read)?;
    let created_str: String = row.get(8).map_err(read)?;
    let updated_str: String = row.get(9).map_err(read)?;

    let id = Uuid::parse_str(&id_str)
        .map_err(|e| DatabaseError::Serialization(format!("job id '{id_str}': {e}")))?;
    let sequence: Sequence = serde_json::from_str(&sequence_json)
        .map_err(|e| DatabaseError::Serialization(format!("job {id} sequence: {e}")))?;
    let status: JobStatus = status_str.parse().map_err(DatabaseError::Serialization)?;
    let privacy_mode = privacy_str
        .map(|s| s.parse::<PrivacyMode>())
        .transpose()
        .map_err(DatabaseError::Serialization)?;
    let target = match (target_name, target_chat_id) {
        (Some(name), Some(chat_id)) => Some(Target::new(name, chat_id)),
        _ => None,
    };

    Ok(Job {
        id,
        owner,
        target,
        privacy_mode,
        sequence,
        status,
        delivered_count: delivered.max(0) as usize,
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl JobStore for LibSqlBackend {
    async fn save(&self, job: &Job) -> Result<(), DatabaseError> {
        let sequence_json = serde_json::to_string(&job.sequence)
            .map_err(|e| DatabaseError::Serialization(format!("save sequence: {e}")))?;

        self.conn()
            .execute(
                &format!(
                    "INSERT OR REPLACE INTO jobs ({JOB_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
                ),
                params![
                    job.id.to_string(),
                    job.owner,
                    opt_text(job.target.as_ref().map(|t| t.name.as_str())),
                    opt_integer(job.target.as_ref().map(|t| t.chat_id)),
                    opt_text(job.privacy_mode.as_ref().map(PrivacyMode::as_str)),
                    sequence_json,
                    job.status.as_str(),
                    job.delivered_count as i64,
                    job.created_at.to_rfc3339(),
                    job.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("save: {e}")))?;

        debug!(job_id = %job.id, status = %job.status, "Job saved to DB");
        Ok(())
    }

    async fn load(&self, id: Uuid) -> Result<Option<Job>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("load: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row_to_job(&row).map(Some),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("load: {e}"))),
        }
    }

    async fn update_status(&self, id: Uuid, status: JobStatus) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let changed = self
            .conn()
            .execute(
                "UPDATE jobs SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), now, id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_status: {e}")))?;

        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity: "job".into(),
                id: id.to_string(),
            });
        }
        debug!(job_id = %id, status = %status, "Job status updated in DB");
        Ok(())
    }

    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM jobs WHERE status = ?1 ORDER BY created_at ASC"
                ),
                params![status.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_by_status: {e}")))?;

        let mut jobs = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_by_status: {e}")))?
        {
            jobs.push(row_to_job(&row)?);
        }
        Ok(jobs)
    }

    async fn transition_status(
        &self,
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
    ) -> Result<bool, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let changed = self
            .conn()
            .execute(
                "UPDATE jobs SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
                params![to.as_str(), now, id.to_string(), from.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("transition_status: {e}")))?;

        debug!(job_id = %id, %from, %to, won = changed > 0, "Job status compare-and-set");
        Ok(changed > 0)
    }

    async fn update_progress(
        &self,
        id: Uuid,
        delivered_count: usize,
    ) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "UPDATE jobs SET delivered_count = ?1, updated_at = ?2 WHERE id = ?3",
                params![delivered_count as i64, now, id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_progress: {e}")))?;
        Ok(())
    }
}
