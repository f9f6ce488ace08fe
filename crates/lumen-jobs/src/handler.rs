//! Job handler contract.

use std::any::Any;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use lumen_core::{Job, JobType};

use crate::UNKNOWN_ERROR_MESSAGE;

/// Progress callback type for job handlers.
pub type ProgressCallback = Box<dyn Fn(i32, Option<&str>) + Send + Sync>;

/// Context provided to job handlers.
pub struct JobContext {
    /// The job being processed.
    pub job: Job,
    /// Progress callback for updating job progress.
    progress_callback: Option<ProgressCallback>,
}

impl JobContext {
    pub fn new(job: Job) -> Self {
        Self {
            job,
            progress_callback: None,
        }
    }

    /// Set the progress callback.
    pub fn with_progress_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(i32, Option<&str>) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Box::new(callback));
        self
    }

    /// Report progress to the callback.
    pub fn report_progress(&self, percent: i32, message: Option<&str>) {
        if let Some(ref callback) = self.progress_callback {
            callback(percent, message);
        }
    }

    pub fn job_id(&self) -> Uuid {
        self.job.id
    }

    /// Get the job payload.
    pub fn payload(&self) -> &JsonValue {
        &self.job.payload
    }

    /// Deserialize the payload, producing a failure message on mismatch.
    pub fn parse_payload<T: DeserializeOwned>(&self) -> Result<T, String> {
        serde_json::from_value(self.job.payload.clone())
            .map_err(|e| format!("Invalid payload: {}", e))
    }
}

/// Result of job execution.
#[derive(Debug)]
pub enum JobResult {
    /// Job completed successfully with optional result data.
    Success(Option<JsonValue>),
    /// Job failed with an error message.
    Failed(String),
}

/// Turn a panic payload into a failure message.
///
/// Panics raised with a string keep their message; any other payload maps
/// to [`UNKNOWN_ERROR_MESSAGE`].
pub fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(message) => (*message).to_string(),
            Err(_) => UNKNOWN_ERROR_MESSAGE.to_string(),
        },
    }
}

/// Trait for job handlers.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// The job type this handler processes.
    fn job_type(&self) -> JobType;

    async fn execute(&self, ctx: JobContext) -> JobResult;
}

/// No-op handler for testing.
pub struct NoOpHandler {
    job_type: JobType,
}

impl NoOpHandler {
    pub fn new(job_type: JobType) -> Self {
        Self { job_type }
    }
}

#[async_trait]
impl JobHandler for NoOpHandler {
    fn job_type(&self) -> JobType {
        self.job_type
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        ctx.report_progress(50, Some("Processing..."));
        ctx.report_progress(100, Some("Done"));
        JobResult::Success(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use lumen_core::{new_v7, ImageJobPayload, ImportJobPayload};
    use serde_json::json;

    fn job(job_type: JobType, payload: JsonValue) -> Job {
        Job::new(new_v7(), job_type, payload, 3)
    }

    #[test]
    fn test_job_context_new() {
        let j = job(JobType::EmbeddingGeneration, json!({}));
        let ctx = JobContext::new(j.clone());
        assert_eq!(ctx.job_id(), j.id);
        assert!(ctx.progress_callback.is_none());
        // Reporting without a callback is a no-op.
        ctx.report_progress(10, None);
    }

    #[test]
    fn test_progress_callback_receives_reports() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let ctx = JobContext::new(job(JobType::UrlImport, json!({}))).with_progress_callback(
            move |percent, message| {
                sink.lock()
                    .unwrap()
                    .push((percent, message.map(String::from)));
            },
        );

        ctx.report_progress(10, Some("Loading"));
        ctx.report_progress(100, None);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![(10, Some("Loading".to_string())), (100, None)]
        );
    }

    #[test]
    fn test_parse_payload() {
        let id = new_v7();
        let ctx = JobContext::new(job(
            JobType::CaptionGeneration,
            json!({"imageId": id.to_string()}),
        ));
        let payload: ImageJobPayload = ctx.parse_payload().unwrap();
        assert_eq!(payload.image_id, id);

        let ctx = JobContext::new(job(JobType::ArchiveImport, json!({"sessionId": 7})));
        let err = ctx.parse_payload::<ImportJobPayload>().unwrap_err();
        assert!(err.starts_with("Invalid payload:"));
    }

    #[test]
    fn test_panic_message() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(String::from("bad state"))), "bad state");
        assert_eq!(panic_message(Box::new(42u32)), UNKNOWN_ERROR_MESSAGE);
    }

    #[tokio::test]
    async fn test_noop_handler() {
        let handler = NoOpHandler::new(JobType::EmbeddingGeneration);
        assert_eq!(handler.job_type(), JobType::EmbeddingGeneration);

        let result = handler
            .execute(JobContext::new(job(JobType::EmbeddingGeneration, json!({}))))
            .await;
        assert!(matches!(result, JobResult::Success(None)));
    }
}
