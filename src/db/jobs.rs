//! Extraction job queue database operations
//!
//! Jobs are claimed with a single `UPDATE ... RETURNING`, so two workers can
//! never hold the same job at once. A claim is a lease: `available_at` of a
//! `running` job is its lease deadline, and a job whose worker never recorded
//! an outcome is claimable again once the lease runs out. Jobs left `running`
//! by a crashed process are also put back to `pending` on startup. Together
//! these give at-least-once delivery.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Sqlite, SqlitePool, Transaction};

use crate::error::Result;

/// Job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting to be claimed
    Pending,
    /// Claimed by a worker
    Running,
    /// Text stored
    Completed,
    /// Gave up; see `last_error`
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown job status: {}", other)),
        }
    }
}

impl TryFrom<String> for JobStatus {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

/// Extraction job record
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ExtractionJob {
    pub id: i64,
    pub document_id: i64,
    pub file_path: String,
    #[sqlx(try_from = "String")]
    pub status: JobStatus,
    pub attempts: i64,
    pub last_error: Option<String>,
    /// Unix millis before which the job is not claimed; for a `running`
    /// job this is the lease deadline
    pub available_at: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const JOB_COLUMNS: &str = "id, document_id, file_path, status, attempts, last_error, \
                           available_at, created_at, updated_at";

/// Extraction job repository
pub struct JobRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> JobRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Queue a new job, immediately claimable
    pub async fn enqueue(&self, document_id: i64, file_path: &str) -> Result<ExtractionJob> {
        let now = Utc::now();

        let job = sqlx::query_as::<_, ExtractionJob>(&format!(
            r#"
            INSERT INTO extraction_jobs (document_id, file_path, status, attempts, available_at, created_at, updated_at)
            VALUES (?, ?, 'pending', 0, ?, ?, ?)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(document_id)
        .bind(file_path)
        .bind(now.timestamp_millis())
        .bind(now)
        .bind(now)
        .fetch_one(self.pool)
        .await?;

        Ok(job)
    }

    pub async fn get(&self, id: i64) -> Result<Option<ExtractionJob>> {
        let job = sqlx::query_as::<_, ExtractionJob>(&format!(
            "SELECT {JOB_COLUMNS} FROM extraction_jobs WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        Ok(job)
    }

    pub async fn list_for_document(&self, document_id: i64) -> Result<Vec<ExtractionJob>> {
        let jobs = sqlx::query_as::<_, ExtractionJob>(&format!(
            "SELECT {JOB_COLUMNS} FROM extraction_jobs WHERE document_id = ? ORDER BY id ASC"
        ))
        .bind(document_id)
        .fetch_all(self.pool)
        .await?;

        Ok(jobs)
    }

    /// Count jobs in each status
    pub async fn count_by_status(&self, status: JobStatus) -> Result<i64> {
        let result: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM extraction_jobs WHERE status = ?")
                .bind(status.as_str())
                .fetch_one(self.pool)
                .await?;

        Ok(result.0)
    }

    /// Claim the oldest due job at `now_ms`, holding it for `lease_ms`
    ///
    /// Due jobs are `pending` ones past their `available_at` and `running`
    /// ones whose lease has expired.
    pub async fn claim_next(&self, now_ms: i64, lease_ms: u64) -> Result<Option<ExtractionJob>> {
        let lease_ms = i64::try_from(lease_ms).unwrap_or(i64::MAX);

        let job = sqlx::query_as::<_, ExtractionJob>(&format!(
            r#"
            UPDATE extraction_jobs
            SET status = 'running', attempts = attempts + 1, available_at = ?, updated_at = ?
            WHERE id = (
                SELECT id FROM extraction_jobs
                WHERE status IN ('pending', 'running') AND available_at <= ?
                ORDER BY available_at ASC, id ASC
                LIMIT 1
            )
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(now_ms.saturating_add(lease_ms))
        .bind(Utc::now())
        .bind(now_ms)
        .fetch_optional(self.pool)
        .await?;

        Ok(job)
    }

    /// Mark a job completed inside the transaction that stored its text
    pub async fn complete_tx(&self, tx: &mut Transaction<'_, Sqlite>, id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE extraction_jobs SET status = 'completed', last_error = NULL, updated_at = ? WHERE id = ?",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Put a job back in the queue after a transient failure
    pub async fn reschedule(&self, id: i64, available_at_ms: i64, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE extraction_jobs
            SET status = 'pending', available_at = ?, last_error = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(available_at_ms)
        .bind(error)
        .bind(Utc::now())
        .bind(id)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Give up on a job
    pub async fn fail(&self, id: i64, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE extraction_jobs SET status = 'failed', last_error = ?, updated_at = ? WHERE id = ?",
        )
        .bind(error)
        .bind(Utc::now())
        .bind(id)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Return jobs stranded in `running` to the queue
    pub async fn recover_running(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE extraction_jobs SET status = 'pending', updated_at = ? WHERE status = 'running'",
        )
        .bind(Utc::now())
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
