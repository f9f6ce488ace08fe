//! Job dispatcher: worker loops that claim, execute and settle jobs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, watch, Notify, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use lumen_core::{defaults, Error, Job, JobRepository, JobStatus, JobType, Result};

use crate::handler::{panic_message, JobContext, JobHandler, JobResult};
use crate::DEFAULT_POLL_INTERVAL_MS;

/// Backoff after a failed claim, so a broken store is not hammered.
const CLAIM_ERROR_BACKOFF_MS: u64 = 1_000;

/// Configuration for the job worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Polling interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Number of independent worker loops.
    pub max_concurrent_jobs: usize,
    /// Whether to enable job processing.
    pub enabled: bool,
    /// Jobs active for longer than this are failed back into the queue.
    /// Zero disables the sweep.
    pub stale_after_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_concurrent_jobs: defaults::JOB_MAX_CONCURRENT,
            enabled: true,
            stale_after_secs: defaults::JOB_STALE_AFTER_SECS,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `JOB_WORKER_ENABLED` | `true` | Enable/disable job processing |
    /// | `JOB_MAX_CONCURRENT` | `4` | Number of worker loops |
    /// | `JOB_POLL_INTERVAL_MS` | `1000` | Polling interval when queue is empty |
    /// | `JOB_STALE_AFTER_SECS` | `1800` | Stale active job cutoff, `0` disables |
    pub fn from_env() -> Self {
        let enabled = std::env::var("JOB_WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let max_concurrent_jobs = std::env::var("JOB_MAX_CONCURRENT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults::JOB_MAX_CONCURRENT)
            .max(1);

        let poll_interval_ms = std::env::var("JOB_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_POLL_INTERVAL_MS);

        let stale_after_secs = std::env::var("JOB_STALE_AFTER_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::JOB_STALE_AFTER_SECS);

        Self {
            poll_interval_ms,
            max_concurrent_jobs,
            enabled,
            stale_after_secs,
        }
    }

    /// Create a new config with custom poll interval.
    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Set the number of worker loops.
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max.max(1);
        self
    }

    /// Enable or disable job processing.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the stale job cutoff. Zero disables the sweep.
    pub fn with_stale_after(mut self, secs: u64) -> Self {
        self.stale_after_secs = secs;
        self
    }
}

/// Event emitted by the job worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// A job was started.
    JobStarted { job_id: Uuid, job_type: JobType },
    /// Job progress was updated.
    JobProgress {
        job_id: Uuid,
        percent: i32,
        message: Option<String>,
    },
    /// A job completed successfully.
    JobCompleted { job_id: Uuid, job_type: JobType },
    /// An attempt failed. `will_retry` is set when the job went back to waiting.
    JobFailed {
        job_id: Uuid,
        job_type: JobType,
        error: String,
        will_retry: bool,
    },
    /// The sweep failed abandoned attempts.
    StaleJobsRecovered { job_ids: Vec<Uuid> },
    /// Worker started.
    WorkerStarted,
    /// Worker stopped.
    WorkerStopped,
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown_tx: watch::Sender<bool>,
    event_rx: broadcast::Receiver<WorkerEvent>,
    supervisor: JoinHandle<()>,
}

impl WorkerHandle {
    /// Signal the worker to shut down gracefully.
    ///
    /// Loops stop claiming new jobs; jobs already running are finished and
    /// settled first.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Wait for every loop to exit.
    pub async fn join(self) -> Result<()> {
        self.supervisor
            .await
            .map_err(|e| Error::Internal(format!("Worker supervisor failed: {}", e)))
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }
}

/// Job worker that processes jobs from the queue.
pub struct JobWorker {
    jobs: Arc<dyn JobRepository>,
    config: WorkerConfig,
    handlers: Arc<RwLock<HashMap<JobType, Arc<dyn JobHandler>>>>,
    event_tx: broadcast::Sender<WorkerEvent>,
    notify: Option<Arc<Notify>>,
}

impl JobWorker {
    /// Create a new job worker.
    pub fn new(jobs: Arc<dyn JobRepository>, config: WorkerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);
        Self {
            jobs,
            config,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
            notify: None,
        }
    }

    /// Wake idle loops when the repository signals new work.
    pub fn with_notify(mut self, notify: Arc<Notify>) -> Self {
        self.notify = Some(notify);
        self
    }

    /// Register a handler for a job type.
    pub async fn register_handler<H: JobHandler + 'static>(&self, handler: H) {
        let job_type = handler.job_type();
        let mut handlers = self.handlers.write().await;
        handlers.insert(job_type, Arc::new(handler));
        debug!(%job_type, "Registered job handler");
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    /// Start the worker and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let event_rx = self.event_tx.subscribe();

        let worker = Arc::new(self);
        let supervisor = tokio::spawn(worker.supervise(shutdown_rx));

        WorkerHandle {
            shutdown_tx,
            event_rx,
            supervisor,
        }
    }

    #[instrument(skip(self, shutdown_rx), fields(subsystem = "jobs", component = "dispatcher"))]
    async fn supervise(self: Arc<Self>, shutdown_rx: watch::Receiver<bool>) {
        if !self.config.enabled {
            info!("Job worker is disabled, not starting");
            return;
        }

        if self.handlers.read().await.is_empty() {
            warn!("No job handlers registered, worker will fail every job it claims");
        }

        info!(
            poll_interval_ms = self.config.poll_interval_ms,
            loops = self.config.max_concurrent_jobs,
            stale_after_secs = self.config.stale_after_secs,
            "Job worker started"
        );
        let _ = self.event_tx.send(WorkerEvent::WorkerStarted);

        let mut tasks = JoinSet::new();
        for slot in 0..self.config.max_concurrent_jobs.max(1) {
            tasks.spawn(self.clone().run_loop(slot, shutdown_rx.clone()));
        }
        if self.config.stale_after_secs > 0 {
            tasks.spawn(self.clone().sweep_stale(shutdown_rx.clone()));
        }

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!(error = ?e, "Worker task panicked");
            }
        }

        let _ = self.event_tx.send(WorkerEvent::WorkerStopped);
        info!("Job worker stopped");
    }

    /// One worker loop: claim, execute, settle, repeat.
    async fn run_loop(self: Arc<Self>, slot: usize, mut shutdown_rx: watch::Receiver<bool>) {
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let error_backoff =
            Duration::from_millis(CLAIM_ERROR_BACKOFF_MS.max(self.config.poll_interval_ms));

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let idle = match self.claim_job().await {
                Ok(Some(job)) => {
                    self.execute_job(job).await;
                    continue;
                }
                Ok(None) => poll_interval,
                Err(e) => {
                    error!(slot, error = %e, "Failed to claim job");
                    error_backoff
                }
            };

            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = sleep(idle) => {}
                _ = wait_for_signal(self.notify.as_deref()) => {}
            }
        }

        debug!(slot, "Worker loop exited");
    }

    /// Claim the next job of a registered type.
    async fn claim_job(&self) -> Result<Option<Job>> {
        let job_types: Vec<JobType> = {
            let handlers = self.handlers.read().await;
            handlers.keys().copied().collect()
        };
        self.jobs.acquire_job(&job_types).await
    }

    /// Execute a single claimed job and record its outcome.
    async fn execute_job(&self, job: Job) {
        let start = Instant::now();
        let job_id = job.id;
        let job_type = job.job_type;

        info!(%job_id, %job_type, attempt = job.attempts, "Processing job");
        let _ = self
            .event_tx
            .send(WorkerEvent::JobStarted { job_id, job_type });

        let handler = {
            let handlers = self.handlers.read().await;
            handlers.get(&job_type).cloned()
        };

        let result = match handler {
            Some(handler) => self.run_handler(handler, job).await,
            None => {
                warn!(%job_type, "No handler registered for job type");
                JobResult::Failed(format!("No handler registered for job type: {}", job_type))
            }
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        match result {
            JobResult::Success(result_data) => {
                if let Err(e) = self.jobs.complete_job(job_id, result_data).await {
                    error!(error = %e, %job_id, "Failed to mark job as completed");
                } else {
                    info!(%job_id, %job_type, duration_ms, "Job completed successfully");
                    let _ = self
                        .event_tx
                        .send(WorkerEvent::JobCompleted { job_id, job_type });
                }
            }
            JobResult::Failed(error) => {
                match self.jobs.fail_job(job_id, &error).await {
                    Ok(updated) => {
                        let will_retry = updated.status == JobStatus::Waiting;
                        warn!(
                            %job_id,
                            %job_type,
                            %error,
                            attempts = updated.attempts,
                            will_retry,
                            duration_ms,
                            "Job failed"
                        );
                        let _ = self.event_tx.send(WorkerEvent::JobFailed {
                            job_id,
                            job_type,
                            error,
                            will_retry,
                        });
                    }
                    Err(e) => {
                        error!(error = %e, %job_id, "Failed to mark job as failed");
                    }
                }
            }
        }
    }

    /// Run the handler in its own task so a panic fails the attempt instead
    /// of killing the loop. Progress reports are persisted in order by a
    /// writer task that drains before the outcome is recorded.
    async fn run_handler(&self, handler: Arc<dyn JobHandler>, job: Job) -> JobResult {
        let job_id = job.id;
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<(i32, Option<String>)>();

        let jobs = self.jobs.clone();
        let writer = tokio::spawn(async move {
            while let Some((percent, message)) = progress_rx.recv().await {
                if let Err(e) = jobs
                    .update_progress(job_id, percent, message.as_deref())
                    .await
                {
                    warn!(error = %e, %job_id, percent, "Failed to record job progress");
                }
            }
        });

        let event_tx = self.event_tx.clone();
        let ctx = JobContext::new(job).with_progress_callback(move |percent, message| {
            let message = message.map(String::from);
            let _ = progress_tx.send((percent, message.clone()));
            let _ = event_tx.send(WorkerEvent::JobProgress {
                job_id,
                percent,
                message,
            });
        });

        let heartbeat = self.spawn_heartbeat(job_id);
        let outcome = tokio::spawn(async move { handler.execute(ctx).await }).await;
        if let Some(heartbeat) = heartbeat {
            heartbeat.abort();
        }

        if let Err(e) = writer.await {
            warn!(error = %e, %job_id, "Progress writer task failed");
        }

        match outcome {
            Ok(result) => result,
            Err(e) if e.is_panic() => {
                let message = panic_message(e.into_panic());
                error!(%job_id, error = %message, "Job handler panicked");
                JobResult::Failed(message)
            }
            Err(e) => JobResult::Failed(format!("Job task cancelled: {}", e)),
        }
    }

    /// Keep a running job fresh for the stale sweep while its handler is
    /// busy, even if the handler reports no progress. `None` when the sweep
    /// is disabled.
    fn spawn_heartbeat(&self, job_id: Uuid) -> Option<JoinHandle<()>> {
        if self.config.stale_after_secs == 0 {
            return None;
        }
        let every = heartbeat_interval(self.config.stale_after_secs);
        let jobs = self.jobs.clone();
        Some(tokio::spawn(async move {
            loop {
                sleep(every).await;
                if let Err(e) = jobs.heartbeat(job_id).await {
                    warn!(error = %e, %job_id, "Job heartbeat failed");
                }
            }
        }))
    }

    /// Periodically fail attempts whose job has not been claimed, reported
    /// progress or sent a heartbeat within the stale window, which happens
    /// when a previous worker process died mid-job.
    async fn sweep_stale(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        let older_than = chrono::Duration::seconds(self.config.stale_after_secs as i64);
        let interval = Duration::from_secs((self.config.stale_after_secs / 2).max(1));

        loop {
            match self.jobs.requeue_stale(older_than).await {
                Ok(jobs) if !jobs.is_empty() => {
                    let job_ids: Vec<Uuid> = jobs.iter().map(|j| j.id).collect();
                    warn!(count = job_ids.len(), "Recovered stale jobs");
                    let _ = self
                        .event_tx
                        .send(WorkerEvent::StaleJobsRecovered { job_ids });
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "Stale job sweep failed"),
            }

            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = sleep(interval) => {}
            }
        }
    }
}

/// Three heartbeats per stale window, in milliseconds so short windows
/// still get more than one.
fn heartbeat_interval(stale_after_secs: u64) -> Duration {
    Duration::from_millis((stale_after_secs.saturating_mul(1_000) / 3).max(100))
}

async fn wait_for_signal(notify: Option<&Notify>) {
    match notify {
        Some(notify) => notify.notified().await,
        None => std::future::pending().await,
    }
}

/// Builder for creating a job worker with handlers.
pub struct WorkerBuilder {
    jobs: Arc<dyn JobRepository>,
    config: WorkerConfig,
    handlers: Vec<Box<dyn JobHandler>>,
    notify: Option<Arc<Notify>>,
}

impl WorkerBuilder {
    /// Create a new worker builder.
    pub fn new(jobs: Arc<dyn JobRepository>) -> Self {
        Self {
            jobs,
            config: WorkerConfig::default(),
            handlers: Vec::new(),
            notify: None,
        }
    }

    /// Set the worker configuration.
    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    /// Add a handler.
    pub fn with_handler<H: JobHandler + 'static>(mut self, handler: H) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    /// Wake idle loops on this signal instead of waiting out the poll interval.
    pub fn with_notify(mut self, notify: Arc<Notify>) -> Self {
        self.notify = Some(notify);
        self
    }

    /// Build and return the worker.
    pub async fn build(self) -> JobWorker {
        let mut worker = JobWorker::new(self.jobs, self.config);
        if let Some(notify) = self.notify {
            worker = worker.with_notify(notify);
        }

        {
            let mut handlers = worker.handlers.write().await;
            for handler in self.handlers {
                let job_type = handler.job_type();
                handlers.insert(job_type, Arc::from(handler));
            }
        }

        worker
    }
}
