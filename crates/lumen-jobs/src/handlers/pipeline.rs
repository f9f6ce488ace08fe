//! Shared persist pipeline for import handlers.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use lumen_core::{
    FileStorage, ImageProcessor, ImageRepository, JobRepository, JobType, NewImage, Result,
};

/// Turns raw image bytes into a stored image record.
///
/// Steps run in order: save original, read metadata, render and save the
/// thumbnail, create the record, enqueue follow-up jobs. Files written
/// before a failing step are deleted again.
#[derive(Clone)]
pub struct ImportPipeline {
    storage: Arc<dyn FileStorage>,
    processor: Arc<dyn ImageProcessor>,
    images: Arc<dyn ImageRepository>,
    jobs: Arc<dyn JobRepository>,
    captions: bool,
}

impl ImportPipeline {
    pub fn new(
        storage: Arc<dyn FileStorage>,
        processor: Arc<dyn ImageProcessor>,
        images: Arc<dyn ImageRepository>,
        jobs: Arc<dyn JobRepository>,
    ) -> Self {
        Self {
            storage,
            processor,
            images,
            jobs,
            captions: true,
        }
    }

    /// Skip the caption follow-up. Used when no caption handler is
    /// registered, so queued caption jobs would never be claimed.
    pub fn without_captions(mut self) -> Self {
        self.captions = false;
        self
    }

    /// Persist one image and return its new id.
    pub async fn persist(&self, file_name: &str, data: &[u8]) -> Result<Uuid> {
        let mut saved: Vec<String> = Vec::with_capacity(2);
        match self.persist_inner(file_name, data, &mut saved).await {
            Ok(image_id) => Ok(image_id),
            Err(e) => {
                self.discard(&saved).await;
                Err(e)
            }
        }
    }

    async fn persist_inner(
        &self,
        file_name: &str,
        data: &[u8],
        saved: &mut Vec<String>,
    ) -> Result<Uuid> {
        let original = self.storage.save_file(file_name, data).await?;
        saved.push(original.path.clone());

        let metadata = self.processor.metadata(data).await?;

        let thumbnail = self.processor.thumbnail(data).await?;
        let thumb_file = self
            .storage
            .save_file(&thumbnail_name(file_name), &thumbnail)
            .await?;
        saved.push(thumb_file.path.clone());

        let image = self
            .images
            .create(NewImage {
                file_name: file_name.to_string(),
                storage_path: original.path,
                thumbnail_path: Some(thumb_file.path),
                mime_type: metadata.mime_type,
                width: metadata.width,
                height: metadata.height,
                size_bytes: original.size_bytes,
                content_hash: Some(original.content_hash),
            })
            .await?;

        debug!(image_id = %image.id, file_name, "Imported image");
        self.enqueue_follow_ups(image.id).await;
        Ok(image.id)
    }

    /// The record exists at this point, so a failed enqueue must not undo it.
    async fn enqueue_follow_ups(&self, image_id: Uuid) {
        let payload = json!({ "imageId": image_id });
        let follow_ups: &[JobType] = if self.captions {
            &[JobType::EmbeddingGeneration, JobType::CaptionGeneration]
        } else {
            &[JobType::EmbeddingGeneration]
        };
        for &job_type in follow_ups {
            if let Err(e) = self.jobs.add(job_type, payload.clone()).await {
                warn!(%image_id, %job_type, error = %e, "Failed to enqueue follow-up job");
            }
        }
    }

    async fn discard(&self, paths: &[String]) {
        for path in paths {
            if let Err(e) = self.storage.delete_file(path).await {
                warn!(path = %path, error = %e, "Failed to clean up file after import error");
            }
        }
    }
}

fn thumbnail_name(file_name: &str) -> String {
    let stem = file_name
        .rsplit_once('.')
        .map_or(file_name, |(stem, _)| stem);
    format!("{}_thumb.jpg", stem)
}
