//! Selective import of entries from an uploaded archive.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{info, instrument, trace, warn};
use uuid::Uuid;

use lumen_core::{ArchiveSession, ArchiveSessions, ImportJobPayload, JobType};

use super::{base_name, batch_success, run_item, ImportPipeline};
use crate::batch::{item_progress, BatchImportResult, BatchItemResult};
use crate::handler::{JobContext, JobHandler, JobResult};

pub struct ArchiveImportHandler {
    sessions: Arc<dyn ArchiveSessions>,
    pipeline: ImportPipeline,
}

impl ArchiveImportHandler {
    pub fn new(sessions: Arc<dyn ArchiveSessions>, pipeline: ImportPipeline) -> Self {
        Self { sessions, pipeline }
    }

    async fn import_entry(&self, session: &ArchiveSession, index: usize) -> Result<Uuid, String> {
        let entry = session
            .entry(index)
            .ok_or_else(|| format!("Entry {} not found in archive", index))?;

        let data = self
            .sessions
            .read_entry(&session.id, entry)
            .await
            .map_err(|e| e.detail())?;

        let file_name = base_name(&entry.name).unwrap_or("image");
        self.pipeline
            .persist(file_name, &data)
            .await
            .map_err(|e| e.detail())
    }
}

#[async_trait]
impl JobHandler for ArchiveImportHandler {
    fn job_type(&self) -> JobType {
        JobType::ArchiveImport
    }

    #[instrument(
        skip(self, ctx),
        fields(subsystem = "jobs", component = "archive_import", op = "execute", session_id)
    )]
    async fn execute(&self, ctx: JobContext) -> JobResult {
        let start = Instant::now();
        let payload: ImportJobPayload = match ctx.parse_payload() {
            Ok(p) => p,
            Err(e) => return JobResult::Failed(e),
        };
        tracing::Span::current().record("session_id", payload.session_id.as_str());

        let session = match self.sessions.find_session(&payload.session_id).await {
            Ok(Some(session)) => session,
            Ok(None) => {
                warn!(session_id = %payload.session_id, "Archive session not found");
                ctx.report_progress(100, Some("Session not found"));
                return batch_success(&BatchImportResult::all_failed(
                    &payload.indices,
                    "Session not found",
                ));
            }
            Err(e) => return JobResult::Failed(format!("Failed to load archive session: {}", e)),
        };

        ctx.report_progress(10, Some("Importing entries..."));

        let total = payload.indices.len();
        let mut results = Vec::with_capacity(total);
        for (done, &index) in payload.indices.iter().enumerate() {
            let item = match run_item(self.import_entry(&session, index)).await {
                Ok(image_id) => {
                    trace!(index, %image_id, "Archive entry imported");
                    BatchItemResult::ok(index, image_id)
                }
                Err(error) => {
                    warn!(index, %error, "Archive entry import failed");
                    BatchItemResult::failed(index, error)
                }
            };
            results.push(item);

            let message = format!("Imported {} of {}", done + 1, total);
            ctx.report_progress(item_progress(done + 1, total), Some(&message));
        }

        let batch = BatchImportResult::from_items(results);
        ctx.report_progress(100, Some("Done"));
        info!(
            total = batch.total_requested,
            succeeded = batch.success_count,
            failed = batch.failed_count,
            duration_ms = start.elapsed().as_millis() as u64,
            "Archive import finished"
        );

        batch_success(&batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use serde_json::json;

    use crate::handlers::fakes::{FakeArchives, FakeImages, FakeStorage, StubProcessor};
    use lumen_core::{new_v7, Job, JobRepository};
    use lumen_db::MemoryJobRepository;

    struct Fixture {
        archives: Arc<FakeArchives>,
        storage: Arc<FakeStorage>,
        images: Arc<FakeImages>,
        jobs: Arc<MemoryJobRepository>,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_storage(FakeStorage::new())
        }

        fn with_storage(storage: FakeStorage) -> Self {
            Self {
                archives: Arc::new(FakeArchives::new()),
                storage: Arc::new(storage),
                images: Arc::new(FakeImages::new()),
                jobs: Arc::new(MemoryJobRepository::new()),
            }
        }

        fn handler(&self) -> ArchiveImportHandler {
            let pipeline = ImportPipeline::new(
                self.storage.clone(),
                Arc::new(StubProcessor::ok()),
                self.images.clone(),
                self.jobs.clone(),
            );
            ArchiveImportHandler::new(self.archives.clone(), pipeline)
        }
    }

    fn job(session_id: &str, indices: &[usize]) -> Job {
        Job::new(
            new_v7(),
            JobType::ArchiveImport,
            json!({ "sessionId": session_id, "indices": indices }),
            3,
        )
    }

    fn batch(result: JobResult) -> BatchImportResult {
        match result {
            JobResult::Success(Some(value)) => serde_json::from_value(value).unwrap(),
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_partial_success() {
        let fx = Fixture::new();
        fx.archives.add_session(
            "s1",
            &[
                ("holiday/beach.png", "beach"),
                ("notes.txt", "junk text"),
                ("holiday/sunset.png", "sunset"),
            ],
        );

        let result = batch(fx.handler().execute(JobContext::new(job("s1", &[0, 1, 2, 9]))).await);

        assert_eq!(result.total_requested, 4);
        assert_eq!(result.success_count, 2);
        assert_eq!(result.failed_count, 2);
        assert_eq!(
            result.results.iter().map(|r| r.index).collect::<Vec<_>>(),
            vec![0, 1, 2, 9]
        );
        assert!(result.results[0].success && result.results[0].image_id.is_some());
        assert!(!result.results[1].success);
        assert_eq!(
            result.results[3].error.as_deref(),
            Some("Entry 9 not found in archive")
        );

        let first = fx.images.get(result.results[0].image_id.unwrap()).unwrap();
        assert_eq!(first.file_name, "beach.png");
        assert_eq!(fx.images.count(), 2);
        // Two stored images, each with an original and a thumbnail.
        assert_eq!(fx.storage.file_count(), 4);
        // Two follow-up jobs per imported image.
        assert_eq!(fx.jobs.queue_stats().await.unwrap().waiting, 4);
    }

    #[tokio::test]
    async fn test_missing_session_fails_every_index() {
        let fx = Fixture::new();

        let result = batch(fx.handler().execute(JobContext::new(job("gone", &[0, 3, 3]))).await);

        assert_eq!(result.total_requested, 3);
        assert_eq!(result.success_count, 0);
        assert_eq!(result.failed_count, 3);
        assert!(result
            .results
            .iter()
            .all(|r| !r.success && r.error.as_deref() == Some("Session not found")));
    }

    #[tokio::test]
    async fn test_storage_failure_is_per_item() {
        let fx = Fixture::with_storage(FakeStorage::new().failing_save());
        fx.archives.add_session("s2", &[("a.png", "a"), ("b.png", "b")]);

        let result = batch(fx.handler().execute(JobContext::new(job("s2", &[0, 1]))).await);

        assert_eq!(result.failed_count, 2);
        assert!(result
            .results
            .iter()
            .all(|r| r.error.as_deref() == Some("disk full")));
        assert_eq!(fx.images.count(), 0);
    }

    #[tokio::test]
    async fn test_progress_milestones() {
        let fx = Fixture::new();
        fx.archives.add_session("s3", &[("a.png", "a"), ("b.png", "b")]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let ctx = JobContext::new(job("s3", &[0, 1]))
            .with_progress_callback(move |p, _| sink.lock().unwrap().push(p));

        fx.handler().execute(ctx).await;

        assert_eq!(*seen.lock().unwrap(), vec![10, 50, 90, 100]);
    }

    #[tokio::test]
    async fn test_invalid_payload_fails_job() {
        let fx = Fixture::new();
        let bad = Job::new(new_v7(), JobType::ArchiveImport, json!({"indices": "all"}), 3);

        let result = fx.handler().execute(JobContext::new(bad)).await;
        assert!(matches!(result, JobResult::Failed(ref msg) if msg.starts_with("Invalid payload")));
    }
}
