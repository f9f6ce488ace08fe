//! Embedding generation handler.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info, instrument};

use lumen_core::{FileStorage, ImageEmbeddingBackend, ImageJobPayload, ImageRepository, JobType};
use lumen_vector::{encode_embedding, ensure_finite, EmbeddingStore};

use crate::handler::{JobContext, JobHandler, JobResult};

/// Computes an image embedding, persists the blob and indexes it for
/// similarity search.
pub struct EmbeddingHandler {
    images: Arc<dyn ImageRepository>,
    storage: Arc<dyn FileStorage>,
    backend: Arc<dyn ImageEmbeddingBackend>,
    store: Arc<EmbeddingStore>,
}

impl EmbeddingHandler {
    pub fn new(
        images: Arc<dyn ImageRepository>,
        storage: Arc<dyn FileStorage>,
        backend: Arc<dyn ImageEmbeddingBackend>,
        store: Arc<EmbeddingStore>,
    ) -> Self {
        Self {
            images,
            storage,
            backend,
            store,
        }
    }
}

#[async_trait]
impl JobHandler for EmbeddingHandler {
    fn job_type(&self) -> JobType {
        JobType::EmbeddingGeneration
    }

    #[instrument(
        skip(self, ctx),
        fields(subsystem = "jobs", component = "embedding_handler", op = "execute", image_id)
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

        ctx.report_progress(30, Some("Generating embedding..."));

        let vector = match self
            .backend
            .generate_embedding(&data, &image.mime_type)
            .await
        {
            Ok(v) => v,
            Err(e) => return JobResult::Failed(format!("Embedding generation failed: {}", e)),
        };

        // A vector the index cannot hold would poison every later search.
        let dimension = self.store.dimension();
        if vector.len() != dimension {
            return JobResult::Failed(format!(
                "Embedding dimension mismatch: expected {}, got {}",
                dimension,
                vector.len()
            ));
        }
        if let Err(e) = ensure_finite(&vector) {
            return JobResult::Failed(format!("Invalid embedding: {}", e));
        }

        ctx.report_progress(70, Some("Storing embedding..."));

        let blob = encode_embedding(&vector);
        if let Err(e) = self.images.update_embedding(image_id, &blob).await {
            return JobResult::Failed(format!("Failed to store embedding: {}", e));
        }
        if let Err(e) = self.store.upsert(image_id, vector) {
            return JobResult::Failed(format!("Failed to index embedding: {}", e));
        }
        debug!(%image_id, indexed = self.store.count(), "Embedding indexed");

        ctx.report_progress(100, Some("Done"));
        info!(
            %image_id,
            dimension,
            model = self.backend.model_name(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Embedding generated"
        );

        JobResult::Success(Some(json!({
            "imageId": image_id,
            "dimension": dimension,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::handlers::fakes::{FakeImages, FakeStorage};
    use lumen_core::{new_v7, Job};
    use lumen_inference::mock::{embedding_for, MockInferenceBackend};
    use lumen_vector::decode_embedding_with_dimension;

    const DIM: usize = 16;

    struct Fixture {
        images: Arc<FakeImages>,
        storage: Arc<FakeStorage>,
        store: Arc<EmbeddingStore>,
        backend: MockInferenceBackend,
    }

    impl Fixture {
        fn new(backend: MockInferenceBackend) -> Self {
            Self {
                images: Arc::new(FakeImages::new()),
                storage: Arc::new(FakeStorage::new()),
                store: Arc::new(EmbeddingStore::with_dimension(DIM)),
                backend,
            }
        }

        fn handler(&self) -> EmbeddingHandler {
            EmbeddingHandler::new(
                self.images.clone(),
                self.storage.clone(),
                Arc::new(self.backend.clone()),
                self.store.clone(),
            )
        }
    }

    fn ctx_for(image_id: uuid::Uuid, progress: Arc<Mutex<Vec<i32>>>) -> JobContext {
        let job = Job::new(
            new_v7(),
            JobType::EmbeddingGeneration,
            json!({ "imageId": image_id }),
            3,
        );
        JobContext::new(job).with_progress_callback(move |p, _| progress.lock().unwrap().push(p))
    }

    #[tokio::test]
    async fn test_embeds_persists_and_indexes() {
        let fx = Fixture::new(MockInferenceBackend::new().with_dimension(DIM));
        fx.storage.insert("images/a.png", b"pixels-a");
        let image_id = fx.images.seed("images/a.png", "image/png");
        let progress = Arc::new(Mutex::new(Vec::new()));

        let result = fx.handler().execute(ctx_for(image_id, progress.clone())).await;

        let value = match result {
            JobResult::Success(Some(value)) => value,
            other => panic!("expected success, got {:?}", other),
        };
        assert_eq!(value, json!({"imageId": image_id, "dimension": DIM}));

        let expected = embedding_for(b"pixels-a", DIM);
        let blob = fx.images.embedding(image_id).unwrap();
        assert_eq!(decode_embedding_with_dimension(&blob, DIM).unwrap(), expected);
        assert!(fx.store.has_embedding(image_id));

        let progress = progress.lock().unwrap().clone();
        assert_eq!(progress.first(), Some(&10));
        assert_eq!(progress.last(), Some(&100));
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn test_missing_image() {
        let fx = Fixture::new(MockInferenceBackend::new().with_dimension(DIM));
        let missing = new_v7();

        let result = fx
            .handler()
            .execute(ctx_for(missing, Arc::new(Mutex::new(Vec::new()))))
            .await;
        assert!(
            matches!(result, JobResult::Failed(ref msg) if *msg == format!("Image not found: {}", missing))
        );
        assert_eq!(fx.backend.call_count("embed"), 0);
    }

    #[tokio::test]
    async fn test_wrong_dimension_is_not_indexed() {
        let fx = Fixture::new(MockInferenceBackend::new().with_dimension(DIM + 1));
        fx.storage.insert("images/b.png", b"pixels-b");
        let image_id = fx.images.seed("images/b.png", "image/png");

        let result = fx
            .handler()
            .execute(ctx_for(image_id, Arc::new(Mutex::new(Vec::new()))))
            .await;
        assert!(matches!(result, JobResult::Failed(ref msg) if msg.contains("dimension mismatch")));
        assert!(fx.images.embedding(image_id).is_none());
        assert_eq!(fx.store.count(), 0);
    }

    struct NanBackend;

    #[async_trait]
    impl ImageEmbeddingBackend for NanBackend {
        async fn generate_embedding(
            &self,
            _data: &[u8],
            _mime: &str,
        ) -> lumen_core::Result<Vec<f32>> {
            let mut vector = vec![0.25; DIM];
            vector[3] = f32::NAN;
            Ok(vector)
        }

        fn dimension(&self) -> usize {
            DIM
        }

        fn model_name(&self) -> &str {
            "nan-model"
        }
    }

    #[tokio::test]
    async fn test_non_finite_embedding_is_not_stored() {
        let fx = Fixture::new(MockInferenceBackend::new().with_dimension(DIM));
        fx.storage.insert("images/n.png", b"pixels-n");
        let image_id = fx.images.seed("images/n.png", "image/png");
        let handler = EmbeddingHandler::new(
            fx.images.clone(),
            fx.storage.clone(),
            Arc::new(NanBackend),
            fx.store.clone(),
        );

        let result = handler
            .execute(ctx_for(image_id, Arc::new(Mutex::new(Vec::new()))))
            .await;
        match result {
            JobResult::Failed(msg) => {
                assert!(msg.starts_with("Invalid embedding"), "{}", msg);
                assert!(msg.contains("component 3"), "{}", msg);
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(fx.images.embedding(image_id).is_none());
        assert_eq!(fx.store.count(), 0);
    }

    #[tokio::test]
    async fn test_backend_failure() {
        let fx = Fixture::new(
            MockInferenceBackend::new()
                .with_dimension(DIM)
                .with_failure("model offline"),
        );
        fx.storage.insert("images/c.png", b"pixels-c");
        let image_id = fx.images.seed("images/c.png", "image/png");

        let result = fx
            .handler()
            .execute(ctx_for(image_id, Arc::new(Mutex::new(Vec::new()))))
            .await;
        assert!(matches!(result, JobResult::Failed(ref msg) if msg.contains("model offline")));
    }

    #[tokio::test]
    async fn test_invalid_payload() {
        let fx = Fixture::new(MockInferenceBackend::new().with_dimension(DIM));
        let job = Job::new(new_v7(), JobType::EmbeddingGeneration, json!({"image": 1}), 3);

        let result = fx.handler().execute(JobContext::new(job)).await;
        assert!(matches!(result, JobResult::Failed(ref msg) if msg.starts_with("Invalid payload")));
    }
}
