//! Job handlers for the image library.

mod archive_import;
mod caption;
mod embedding;
mod pipeline;
mod url_import;

#[cfg(test)]
pub(crate) mod fakes;

use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use uuid::Uuid;

pub use archive_import::ArchiveImportHandler;
pub use caption::{CaptionHandler, CaptionResult};
pub use embedding::EmbeddingHandler;
pub use pipeline::ImportPipeline;
pub use url_import::UrlImportHandler;

use crate::batch::BatchImportResult;
use crate::handler::{panic_message, JobResult};

/// Run one batch item so that neither an error nor a panic escapes it.
async fn run_item<F>(item: F) -> Result<Uuid, String>
where
    F: Future<Output = Result<Uuid, String>>,
{
    match AssertUnwindSafe(item).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(payload) => Err(panic_message(payload)),
    }
}

fn batch_success(batch: &BatchImportResult) -> JobResult {
    match serde_json::to_value(batch) {
        Ok(value) => JobResult::Success(Some(value)),
        Err(e) => JobResult::Failed(format!("Failed to serialize result: {}", e)),
    }
}

/// Base name of a path or URL path, without directories.
fn base_name(path: &str) -> Option<&str> {
    path.rsplit(['/', '\\'])
        .next()
        .map(str::trim)
        .filter(|name| !name.is_empty() && *name != "." && *name != "..")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::UNKNOWN_ERROR_MESSAGE;

    #[tokio::test]
    async fn test_run_item_passes_outcomes_through() {
        let id = Uuid::nil();
        assert_eq!(run_item(async move { Ok(id) }).await, Ok(id));
        assert_eq!(
            run_item(async { Err("Session not found".to_string()) }).await,
            Err("Session not found".to_string())
        );
    }

    #[tokio::test]
    async fn test_run_item_catches_panics() {
        let err = run_item(async {
            if true {
                panic!("decoder blew up");
            }
            Ok(Uuid::nil())
        })
        .await
        .unwrap_err();
        assert_eq!(err, "decoder blew up");

        let err = run_item(async {
            if true {
                std::panic::panic_any(7u8);
            }
            Ok(Uuid::nil())
        })
        .await
        .unwrap_err();
        assert_eq!(err, UNKNOWN_ERROR_MESSAGE);
    }

    #[test]
    fn test_base_name() {
        assert_eq!(base_name("photos/2024/cat.png"), Some("cat.png"));
        assert_eq!(base_name("C:\\pics\\dog.jpg"), Some("dog.jpg"));
        assert_eq!(base_name("plain.gif"), Some("plain.gif"));
        assert_eq!(base_name("dir/"), None);
        assert_eq!(base_name(".."), None);
    }
}
