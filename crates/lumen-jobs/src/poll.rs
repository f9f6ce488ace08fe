//! Cancellable status polling for a single job.
//!
//! A [`JobWatcher`] owns a background task that re-reads one job on a fixed
//! interval and publishes each snapshot on a watch channel. The task stops
//! on its own once the job is terminal or gone, and stops early when the
//! watcher is stopped or dropped. Stopping only ends the polling; the job
//! itself keeps running.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use lumen_core::{Job, JobRepository};

pub struct JobWatcher {
    job_id: Uuid,
    snapshot_rx: watch::Receiver<Option<Job>>,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl JobWatcher {
    /// Start polling `job_id` every `interval`.
    pub fn spawn(jobs: Arc<dyn JobRepository>, job_id: Uuid, interval: Duration) -> Self {
        let (snapshot_tx, snapshot_rx) = watch::channel(None);
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            loop {
                match jobs.get_job(job_id).await {
                    Ok(Some(job)) => {
                        let terminal = job.is_terminal();
                        snapshot_tx.send_replace(Some(job));
                        if terminal {
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!(%job_id, "Watched job no longer exists");
                        snapshot_tx.send_replace(None);
                        break;
                    }
                    Err(e) => warn!(%job_id, error = %e, "Job status poll failed"),
                }

                tokio::select! {
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        });

        Self {
            job_id,
            snapshot_rx,
            stop_tx,
            task,
        }
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// A receiver that sees every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Option<Job>> {
        self.snapshot_rx.clone()
    }

    /// Most recent snapshot, if any poll has succeeded.
    pub fn latest(&self) -> Option<Job> {
        self.snapshot_rx.borrow().clone()
    }

    /// Wait until the job reaches a terminal state.
    ///
    /// Returns the final snapshot, or the last one seen if polling ended
    /// first (job deleted or watcher stopped).
    pub async fn wait_for_terminal(&mut self) -> Option<Job> {
        loop {
            {
                let current = self.snapshot_rx.borrow_and_update();
                if current.as_ref().is_some_and(Job::is_terminal) {
                    return current.clone();
                }
            }
            if self.snapshot_rx.changed().await.is_err() {
                return self.snapshot_rx.borrow().clone();
            }
        }
    }

    /// Stop polling.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    /// Whether the polling task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for JobWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
