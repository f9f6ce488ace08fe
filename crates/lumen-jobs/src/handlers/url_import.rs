//! Selective import of images discovered by a page crawl.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{info, instrument, trace, warn};
use uuid::Uuid;

use lumen_core::{CrawlSession, CrawlSessions, ImageFetcher, ImportJobPayload, JobType};

use super::{base_name, batch_success, run_item, ImportPipeline};
use crate::batch::{item_progress, BatchImportResult, BatchItemResult};
use crate::handler::{JobContext, JobHandler, JobResult};

pub struct UrlImportHandler {
    sessions: Arc<dyn CrawlSessions>,
    fetcher: Arc<dyn ImageFetcher>,
    pipeline: ImportPipeline,
}

impl UrlImportHandler {
    pub fn new(
        sessions: Arc<dyn CrawlSessions>,
        fetcher: Arc<dyn ImageFetcher>,
        pipeline: ImportPipeline,
    ) -> Self {
        Self {
            sessions,
            fetcher,
            pipeline,
        }
    }

    async fn import_image(&self, session: &CrawlSession, index: usize) -> Result<Uuid, String> {
        let image = session
            .image(index)
            .ok_or_else(|| format!("Image {} not found in session", index))?;

        let fetched = self
            .fetcher
            .fetch(&image.url)
            .await
            .map_err(|e| e.detail())?;

        let kind = infer::get(&fetched.bytes)
            .filter(|k| matches!(k.matcher_type(), infer::MatcherType::Image))
            .ok_or_else(|| format!("URL did not return an image: {}", image.url))?;

        let file_name = file_name_for_url(&image.url, kind.extension());
        self.pipeline
            .persist(&file_name, &fetched.bytes)
            .await
            .map_err(|e| e.detail())
    }
}

/// Derive a file name from the last path segment of `url`, adding the
/// sniffed extension when the segment has none.
fn file_name_for_url(url: &str, extension: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    let path = without_query
        .split_once("://")
        .map_or(without_query, |(_, rest)| rest);
    // Drop the host so a bare domain does not become the file name.
    let path = path.split_once('/').map_or("", |(_, p)| p);

    match base_name(path) {
        Some(name) if name.contains('.') => name.to_string(),
        Some(name) => format!("{}.{}", name, extension),
        None => format!("image.{}", extension),
    }
}

#[async_trait]
impl JobHandler for UrlImportHandler {
    fn job_type(&self) -> JobType {
        JobType::UrlImport
    }

    #[instrument(
        skip(self, ctx),
        fields(subsystem = "jobs", component = "url_import", op = "execute", session_id)
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
                warn!(session_id = %payload.session_id, "Crawl session not found");
                ctx.report_progress(100, Some("Session not found"));
                return batch_success(&BatchImportResult::all_failed(
                    &payload.indices,
                    "Session not found",
                ));
            }
            Err(e) => return JobResult::Failed(format!("Failed to load crawl session: {}", e)),
        };

        ctx.report_progress(10, Some("Downloading images..."));

        let total = payload.indices.len();
        let mut results = Vec::with_capacity(total);
        for (done, &index) in payload.indices.iter().enumerate() {
            let item = match run_item(self.import_image(&session, index)).await {
                Ok(image_id) => {
                    trace!(index, %image_id, "Crawled image imported");
                    BatchItemResult::ok(index, image_id)
                }
                Err(error) => {
                    warn!(index, %error, "Crawled image import failed");
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
            "URL import finished"
        );

        batch_success(&batch)
    }
}
