//! Caption generation handler.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use lumen_core::{
    CaptionBackend, FileStorage, ImageJobPayload, ImageRepository, JobType, OcrBackend,
};

use crate::handler::{JobContext, JobHandler, JobResult};

/// Result stored on a finished caption job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptionResult {
    pub description: String,
    pub model: String,
    /// Whether extracted text was fed into the prompt.
    pub used_context: bool,
}

/// Describes an image with the vision model and stores the description.
///
/// When an OCR backend is configured, visible text is extracted first and
/// handed to the caption prompt as context. OCR is best-effort.
pub struct CaptionHandler {
    images: Arc<dyn ImageRepository>,
    storage: Arc<dyn FileStorage>,
    captioner: Arc<dyn CaptionBackend>,
    ocr: Option<Arc<dyn OcrBackend>>,
}

impl CaptionHandler {
    pub fn new(
        images: Arc<dyn ImageRepository>,
        storage: Arc<dyn FileStorage>,
        captioner: Arc<dyn CaptionBackend>,
    ) -> Self {
        Self {
            images,
            storage,
            captioner,
            ocr: None,
        }
    }

    pub fn with_ocr(mut self, ocr: Arc<dyn OcrBackend>) -> Self {
        self.ocr = Some(ocr);
        self
    }

    async fn extract_context(&self, data: &[u8], mime_type: &str) -> Option<String> {
        let ocr = self.ocr.as_ref()?;
        match ocr.extract_text(data, mime_type).await {
            Ok(text) => {
                let text = text.trim();
                (!text.is_empty()).then(|| text.to_string())
            }
            Err(e) => {
                warn!(error = %e, "Text extraction failed, captioning without context");
                None
            }
        }
    }
}

#[async_trait]
impl JobHandler for CaptionHandler {
    fn job_type(&self) -> JobType {
        JobType::CaptionGeneration
    }

    #[instrument(
        skip(self, ctx),
        fields(subsystem = "jobs", component = "caption_handler", op = "execute", image_id)
    )]
    async fn execute(&self, ctx: JobContext) -> JobResult {
        let start = Instant::now();
        let payload: ImageJobPayload = match ctx.parse_payload() {
            Ok(p) => p,
            Err(e) => return JobResult::Failed(e),
        };
        let image_id = payload.image_id;
        tracing::Span::current().record("image_id", tracing::field::display(image_id));

        let image = match self.images.find_by_id(image_id).await {
            Ok(Some(image)) => image,
            Ok(None) => return JobResult::Failed(format!("Image not found: {}", image_id)),
            Err(e) => return JobResult::Failed(format!("Failed to load image: {}", e)),
        };

        ctx.report_progress(10, Some("Reading image..."));

        let data = match self.storage.read_file(&image.storage_path).await {
            Ok(d) => d,
            Err(e) => return JobResult::Failed(format!("Failed to read image file: {}", e)),
        };

        ctx.report_progress(30, Some("Extracting text..."));
        let context = self.extract_context(&data, &image.mime_type).await;
        debug!(has_context = context.is_some(), "Caption context resolved");

        ctx.report_progress(50, Some("Generating description..."));
        let description = match self
            .captioner
            .generate_caption(&data, &image.mime_type, context.as_deref())
            .await
        {
            Ok(d) => d,
            Err(e) => return JobResult::Failed(format!("Caption generation failed: {}", e)),
        };

        ctx.report_progress(90, Some("Saving description..."));
        if let Err(e) = self.images.update_description(image_id, &description).await {
            return JobResult::Failed(format!("Failed to save description: {}", e));
        }

        ctx.report_progress(100, Some("Done"));
        info!(
            %image_id,
            model = self.captioner.model_name(),
            used_context = context.is_some(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Caption generated"
        );

        let result = CaptionResult {
            description,
            model: self.captioner.model_name().to_string(),
            used_context: context.is_some(),
        };
        match serde_json::to_value(&result) {
            Ok(value) => JobResult::Success(Some(value)),
            Err(e) => JobResult::Failed(format!("Failed to serialize result: {}", e)),
        }
    }
}
