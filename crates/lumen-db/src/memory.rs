//! In-process job repository.
//!
//! Jobs live in a mutex-guarded map. Each transition checks the current
//! status and mutates under the same lock, which gives the same
//! compare-and-set guarantee the Postgres repository gets from conditional
//! `UPDATE ... WHERE status = ...` statements.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;

use lumen_core::{
    defaults, new_v7, Error, Job, JobListQuery, JobPage, JobRepository, JobStatus, JobType,
    QueueStats, Result,
};

/// Job repository backed by process memory.
pub struct MemoryJobRepository {
    jobs: Mutex<HashMap<Uuid, Job>>,
    notify: Arc<Notify>,
}

impl Default for MemoryJobRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryJobRepository {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Notify handle signalled whenever a job becomes `waiting`.
    pub fn job_notify(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, Job>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up a job that must currently be `active`.
    fn active_mut<'a>(jobs: &'a mut HashMap<Uuid, Job>, job_id: Uuid) -> Result<&'a mut Job> {
        let job = jobs.get_mut(&job_id).ok_or(Error::JobNotFound(job_id))?;
        if job.status != JobStatus::Active {
            return Err(Error::InvalidJobState {
                job_id,
                actual: job.status,
                expected: JobStatus::Active,
            });
        }
        Ok(job)
    }
}

/// Apply a failed attempt to an `active` job.
fn apply_failure(job: &mut Job, error: &str) {
    let now = Utc::now();
    job.error = Some(error.to_string());
    job.updated_at = now;
    if job.can_retry() {
        job.status = JobStatus::Waiting;
        job.progress = 0;
        job.progress_message = None;
        job.started_at = None;
    } else {
        job.status = JobStatus::Failed;
        job.completed_at = Some(now);
    }
}

#[async_trait]
impl JobRepository for MemoryJobRepository {
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
        let job = Job::new(new_v7(), job_type, payload, max_attempts);
        self.lock().insert(job.id, job.clone());
        debug!(subsystem = "db", component = "memory_jobs", op = "add", job_id = %job.id, job_type = %job_type, "Job queued");
        self.notify.notify_waiters();
        Ok(job)
    }

    async fn acquire_job(&self, job_types: &[JobType]) -> Result<Option<Job>> {
        let mut jobs = self.lock();
        let next = jobs
            .values()
            .filter(|j| j.status == JobStatus::Waiting)
            .filter(|j| job_types.is_empty() || job_types.contains(&j.job_type))
            .min_by_key(|j| (j.created_at, j.id))
            .map(|j| j.id);

        let Some(job_id) = next else {
            return Ok(None);
        };
        let Some(job) = jobs.get_mut(&job_id) else {
            return Ok(None);
        };

        let now = Utc::now();
        job.status = JobStatus::Active;
        job.attempts += 1;
        job.progress = 0;
        job.progress_message = None;
        job.started_at = Some(now);
        job.updated_at = now;
        Ok(Some(job.clone()))
    }

    async fn update_progress(
        &self,
        job_id: Uuid,
        percent: i32,
        message: Option<&str>,
    ) -> Result<()> {
        let mut jobs = self.lock();
        let job = Self::active_mut(&mut jobs, job_id)?;
        job.progress = job.progress.max(percent.clamp(0, 100));
        job.progress_message = message.map(String::from);
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn heartbeat(&self, job_id: Uuid) -> Result<()> {
        let mut jobs = self.lock();
        Self::active_mut(&mut jobs, job_id)?.updated_at = Utc::now();
        Ok(())
    }

    async fn complete_job(&self, job_id: Uuid, result: Option<JsonValue>) -> Result<Job> {
        let mut jobs = self.lock();
        let job = Self::active_mut(&mut jobs, job_id)?;
        let now = Utc::now();
        job.status = JobStatus::Completed;
        job.progress = 100;
        job.result = result;
        job.error = None;
        job.completed_at = Some(now);
        job.updated_at = now;
        Ok(job.clone())
    }

    async fn fail_job(&self, job_id: Uuid, error: &str) -> Result<Job> {
        let job = {
            let mut jobs = self.lock();
            let job = Self::active_mut(&mut jobs, job_id)?;
            apply_failure(job, error);
            job.clone()
        };
        if job.status == JobStatus::Waiting {
            self.notify.notify_waiters();
        }
        Ok(job)
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>> {
        Ok(self.lock().get(&job_id).cloned())
    }

    async fn list_jobs(&self, query: &JobListQuery) -> Result<JobPage> {
        let jobs = self.lock();
        let mut matched: Vec<&Job> = jobs.values().filter(|j| query.matches(j)).collect();
        matched.sort_unstable_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });

        let total = matched.len() as i64;
        let offset = usize::try_from(query.offset.max(0)).unwrap_or(usize::MAX);
        let limit = usize::try_from(query.limit.max(0)).unwrap_or(usize::MAX);
        let page = matched
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();

        Ok(JobPage { jobs: page, total })
    }

    async fn queue_stats(&self) -> Result<QueueStats> {
        let jobs = self.lock();
        let mut stats = QueueStats {
            total: jobs.len() as i64,
            ..QueueStats::default()
        };
        for job in jobs.values() {
            match job.status {
                JobStatus::Waiting => stats.waiting += 1,
                JobStatus::Active => stats.active += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }

    async fn requeue_stale(&self, older_than: chrono::Duration) -> Result<Vec<Job>> {
        let cutoff = Utc::now() - older_than;
        let recovered: Vec<Job> = {
            let mut jobs = self.lock();
            jobs.values_mut()
                .filter(|j| j.status == JobStatus::Active)
                // Progress reports refresh updated_at, so they act as a heartbeat.
                .filter(|j| j.updated_at <= cutoff)
                .map(|job| {
                    apply_failure(job, defaults::JOB_ABANDONED_MESSAGE);
                    job.clone()
                })
                .collect()
        };
        if recovered.iter().any(|j| j.status == JobStatus::Waiting) {
            self.notify.notify_waiters();
        }
        Ok(recovered)
    }

    async fn cleanup(&self, keep_count: i64) -> Result<i64> {
        let mut jobs = self.lock();
        let mut terminal: Vec<(chrono::DateTime<Utc>, Uuid)> = jobs
            .values()
            .filter(|j| j.is_terminal())
            .map(|j| (j.completed_at.unwrap_or(j.updated_at), j.id))
            .collect();
        // Newest first; everything past keep_count goes.
        terminal.sort_unstable_by(|a, b| b.cmp(a));

        let keep = usize::try_from(keep_count.max(0)).unwrap_or(usize::MAX);
        let mut removed = 0i64;
        for (_, id) in terminal.into_iter().skip(keep) {
            jobs.remove(&id);
            removed += 1;
        }
        Ok(removed)
    }
}
