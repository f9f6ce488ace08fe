//! Job repository implementation.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use sqlx::{Pool, Postgres, Row};
use tokio::sync::Notify;
use tracing::{debug, info};
use uuid::Uuid;

use lumen_core::{
    defaults, new_v7, Error, Job, JobListQuery, JobPage, JobRepository, JobStatus, JobType,
    QueueStats, Result,
};

use crate::error::map_sqlx_error;

const JOB_COLUMNS: &str = "id, job_type, status, payload, progress, progress_message, result, \
                           error, attempts, max_attempts, created_at, updated_at, started_at, \
                           completed_at";

/// PostgreSQL implementation of JobRepository.
pub struct PgJobRepository {
    pool: Pool<Postgres>,
    /// Signalled whenever a job enters `waiting`, so idle workers wake early.
    notify: Arc<Notify>,
}

impl PgJobRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            pool,
            notify: Arc::new(Notify::new()),
        }
    }

    /// Create a repository sharing an existing notify handle.
    pub fn with_notify(pool: Pool<Postgres>, notify: Arc<Notify>) -> Self {
        Self { pool, notify }
    }

    pub fn job_notify(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    fn parse_job_row(row: sqlx::postgres::PgRow) -> Result<Job> {
        let job_type: String = row.try_get("job_type").map_err(map_sqlx_error)?;
        let status: String = row.try_get("status").map_err(map_sqlx_error)?;
        Ok(Job {
            id: row.try_get("id").map_err(map_sqlx_error)?,
            job_type: job_type.parse()?,
            status: status.parse()?,
            payload: row.try_get("payload").map_err(map_sqlx_error)?,
            progress: row.try_get("progress").map_err(map_sqlx_error)?,
            progress_message: row.try_get("progress_message").map_err(map_sqlx_error)?,
            result: row.try_get("result").map_err(map_sqlx_error)?,
            error: row.try_get("error").map_err(map_sqlx_error)?,
            attempts: row.try_get("attempts").map_err(map_sqlx_error)?,
            max_attempts: row.try_get("max_attempts").map_err(map_sqlx_error)?,
            created_at: row.try_get("created_at").map_err(map_sqlx_error)?,
            updated_at: row.try_get("updated_at").map_err(map_sqlx_error)?,
            started_at: row.try_get("started_at").map_err(map_sqlx_error)?,
            completed_at: row.try_get("completed_at").map_err(map_sqlx_error)?,
        })
    }

    /// Explain why a conditional update on an `active` job touched no row.
    async fn not_active_error(&self, job_id: Uuid) -> Error {
        match self.get_job(job_id).await {
            Ok(Some(job)) => Error::InvalidJobState {
                job_id,
                actual: job.status,
                expected: JobStatus::Active,
            },
            Ok(None) => Error::JobNotFound(job_id),
            Err(e) => e,
        }
    }
}

#[async_trait]
impl JobRepository for PgJobRepository {
    async fn add_with_max_attempts(
        &self,
        job_type: JobType,
        payload: JsonValue,
        max_attempts: i32,
    ) -> Result<Job> {
        if max_attempts < 1 {
            return Err(Error::InvalidInput(format!(
                "max_attempts must be at least 1, got {}",
                max_attempts
            )));
        }

        let now = Utc::now();
        let row = sqlx::query(&format!(
            "INSERT INTO job_queue (id, job_type, status, payload, progress, attempts,
                                    max_attempts, created_at, updated_at)
             VALUES ($1, $2, 'waiting', $3, 0, 0, $4, $5, $5)
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(new_v7())
        .bind(job_type.as_str())
        .bind(&payload)
        .bind(max_attempts)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let job = Self::parse_job_row(row)?;
        debug!(
            subsystem = "db",
            component = "jobs",
            op = "add",
            job_id = %job.id,
            job_type = %job_type,
            "Job queued"
        );
        self.notify.notify_waiters();
        Ok(job)
    }

    async fn acquire_job(&self, job_types: &[JobType]) -> Result<Option<Job>> {
        let now = Utc::now();
        let type_strings: Vec<String> = job_types.iter().map(|t| t.as_str().to_string()).collect();

        // The outer status predicate keeps the claim a compare-and-set even
        // if the row changed between the subselect and the update.
        let row = sqlx::query(&format!(
            "UPDATE job_queue
             SET status = 'active', attempts = attempts + 1, progress = 0,
                 progress_message = NULL, started_at = $1, updated_at = $1
             WHERE id = (
                 SELECT id FROM job_queue
                 WHERE status = 'waiting'
                   AND (cardinality($2::text[]) = 0 OR job_type = ANY($2))
                 ORDER BY created_at ASC, id ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             AND status = 'waiting'
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(now)
        .bind(&type_strings)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(Self::parse_job_row).transpose()
    }

    async fn update_progress(
        &self,
        job_id: Uuid,
        percent: i32,
        message: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE job_queue
             SET progress = GREATEST(progress, $2), progress_message = $3, updated_at = $4
             WHERE id = $1 AND status = 'active'",
        )
        .bind(job_id)
        .bind(percent.clamp(0, 100))
        .bind(message)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(self.not_active_error(job_id).await);
        }
        Ok(())
    }

    async fn heartbeat(&self, job_id: Uuid) -> Result<()> {
        let result =
            sqlx::query("UPDATE job_queue SET updated_at = $2 WHERE id = $1 AND status = 'active'")
                .bind(job_id)
                .bind(Utc::now())
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(self.not_active_error(job_id).await);
        }
        Ok(())
    }

    async fn complete_job(&self, job_id: Uuid, result: Option<JsonValue>) -> Result<Job> {
        let now = Utc::now();
        let row = sqlx::query(&format!(
            "UPDATE job_queue
             SET status = 'completed', progress = 100, result = $2, error = NULL,
                 completed_at = $3, updated_at = $3
             WHERE id = $1 AND status = 'active'
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(job_id)
        .bind(&result)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        match row {
            Some(row) => Self::parse_job_row(row),
            None => Err(self.not_active_error(job_id).await),
        }
    }

    async fn fail_job(&self, job_id: Uuid, error: &str) -> Result<Job> {
        let now = Utc::now();
        let row = sqlx::query(&format!(
            "UPDATE job_queue
             SET status = CASE WHEN attempts < max_attempts THEN 'waiting' ELSE 'failed' END,
                 progress = CASE WHEN attempts < max_attempts THEN 0 ELSE progress END,
                 progress_message = CASE WHEN attempts < max_attempts THEN NULL
                                         ELSE progress_message END,
                 started_at = CASE WHEN attempts < max_attempts THEN NULL ELSE started_at END,
                 completed_at = CASE WHEN attempts < max_attempts THEN NULL ELSE $3 END,
                 error = $2,
                 updated_at = $3
             WHERE id = $1 AND status = 'active'
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(job_id)
        .bind(error)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let job = match row {
            Some(row) => Self::parse_job_row(row)?,
            None => return Err(self.not_active_error(job_id).await),
        };
        if job.status == JobStatus::Waiting {
            self.notify.notify_waiters();
        }
        Ok(job)
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM job_queue WHERE id = $1"))
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(Self::parse_job_row).transpose()
    }

    async fn list_jobs(&self, query: &JobListQuery) -> Result<JobPage> {
        let statuses: Vec<String> = query
            .statuses
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();
        let job_type = query.job_type.map(|t| t.as_str());

        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM job_queue
             WHERE (cardinality($1::text[]) = 0 OR status = ANY($1))
               AND ($2::text IS NULL OR job_type = $2)
             ORDER BY created_at DESC, id DESC
             LIMIT $3 OFFSET $4"
        ))
        .bind(&statuses)
        .bind(job_type)
        .bind(query.limit)
        .bind(query.offset)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM job_queue
             WHERE (cardinality($1::text[]) = 0 OR status = ANY($1))
               AND ($2::text IS NULL OR job_type = $2)",
        )
        .bind(&statuses)
        .bind(job_type)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let jobs = rows
            .into_iter()
            .map(Self::parse_job_row)
            .collect::<Result<Vec<_>>>()?;
        Ok(JobPage { jobs, total })
    }

    async fn queue_stats(&self) -> Result<QueueStats> {
        let row = sqlx::query(
            "SELECT
                COUNT(*) FILTER (WHERE status = 'waiting') AS waiting,
                COUNT(*) FILTER (WHERE status = 'active') AS active,
                COUNT(*) FILTER (WHERE status = 'completed') AS completed,
                COUNT(*) FILTER (WHERE status = 'failed') AS failed,
                COUNT(*) AS total
             FROM job_queue",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(QueueStats {
            waiting: row.try_get("waiting").map_err(map_sqlx_error)?,
            active: row.try_get("active").map_err(map_sqlx_error)?,
            completed: row.try_get("completed").map_err(map_sqlx_error)?,
            failed: row.try_get("failed").map_err(map_sqlx_error)?,
            total: row.try_get("total").map_err(map_sqlx_error)?,
        })
    }

    async fn requeue_stale(&self, older_than: chrono::Duration) -> Result<Vec<Job>> {
        let now = Utc::now();
        let cutoff = now - older_than;
        let rows = sqlx::query(&format!(
            "UPDATE job_queue
             SET status = CASE WHEN attempts < max_attempts THEN 'waiting' ELSE 'failed' END,
                 progress = CASE WHEN attempts < max_attempts THEN 0 ELSE progress END,
                 progress_message = CASE WHEN attempts < max_attempts THEN NULL
                                         ELSE progress_message END,
                 started_at = CASE WHEN attempts < max_attempts THEN NULL ELSE started_at END,
                 completed_at = CASE WHEN attempts < max_attempts THEN NULL ELSE $2 END,
                 error = $3,
                 updated_at = $2
             WHERE status = 'active' AND updated_at <= $1
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(cutoff)
        .bind(now)
        .bind(defaults::JOB_ABANDONED_MESSAGE)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let jobs = rows
            .into_iter()
            .map(Self::parse_job_row)
            .collect::<Result<Vec<_>>>()?;

        if !jobs.is_empty() {
            info!(
                subsystem = "db",
                component = "jobs",
                op = "requeue_stale",
                result_count = jobs.len(),
                "Recovered abandoned jobs"
            );
        }
        if jobs.iter().any(|j| j.status == JobStatus::Waiting) {
            self.notify.notify_waiters();
        }
        Ok(jobs)
    }

    async fn cleanup(&self, keep_count: i64) -> Result<i64> {
        let result = sqlx::query(
            "DELETE FROM job_queue
             WHERE status IN ('completed', 'failed')
               AND id NOT IN (
                   SELECT id FROM job_queue
                   WHERE status IN ('completed', 'failed')
                   ORDER BY COALESCE(completed_at, updated_at) DESC, id DESC
                   LIMIT $1
               )",
        )
        .bind(keep_count.max(0))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() as i64)
    }
}
