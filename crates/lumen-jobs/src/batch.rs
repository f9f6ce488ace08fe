//! Per-item outcome reporting for batch import jobs.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of importing one selected item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemResult {
    /// Index of the item within its session, as requested.
    pub index: usize,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchItemResult {
    pub fn ok(index: usize, image_id: Uuid) -> Self {
        Self {
            index,
            success: true,
            image_id: Some(image_id),
            error: None,
        }
    }

    pub fn failed(index: usize, error: impl Into<String>) -> Self {
        Self {
            index,
            success: false,
            image_id: None,
            error: Some(error.into()),
        }
    }
}

/// Result document stored on a finished import job.
///
/// `results` follows the order of the requested indices and
/// `success_count + failed_count == total_requested` always holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchImportResult {
    pub total_requested: usize,
    pub success_count: usize,
    pub failed_count: usize,
    pub results: Vec<BatchItemResult>,
}

impl BatchImportResult {
    pub fn from_items(results: Vec<BatchItemResult>) -> Self {
        let success_count = results.iter().filter(|r| r.success).count();
        Self {
            total_requested: results.len(),
            success_count,
            failed_count: results.len() - success_count,
            results,
        }
    }

    /// Every requested index failed with the same message.
    pub fn all_failed(indices: &[usize], error: &str) -> Self {
        Self::from_items(
            indices
                .iter()
                .map(|&index| BatchItemResult::failed(index, error))
                .collect(),
        )
    }
}

/// Progress to report after finishing `done` of `total` items.
///
/// Setup reports 10 and completion reports 100; items share the range
/// in between.
pub fn item_progress(done: usize, total: usize) -> i32 {
    if total == 0 {
        return 90;
    }
    10 + ((done.min(total) * 80) / total) as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_counts_add_up() {
        let id = Uuid::nil();
        let result = BatchImportResult::from_items(vec![
            BatchItemResult::ok(0, id),
            BatchItemResult::failed(3, "Entry 3 not found in archive"),
            BatchItemResult::ok(5, id),
        ]);
        assert_eq!(result.total_requested, 3);
        assert_eq!(result.success_count, 2);
        assert_eq!(result.failed_count, 1);
        assert_eq!(
            result.results.iter().map(|r| r.index).collect::<Vec<_>>(),
            vec![0, 3, 5]
        );
    }

    #[test]
    fn test_wire_shape() {
        let id = Uuid::nil();
        let result = BatchImportResult::from_items(vec![
            BatchItemResult::ok(0, id),
            BatchItemResult::failed(1, "Session not found"),
        ]);
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({
                "totalRequested": 2,
                "successCount": 1,
                "failedCount": 1,
                "results": [
                    {"index": 0, "success": true, "imageId": id.to_string()},
                    {"index": 1, "success": false, "error": "Session not found"}
                ]
            })
        );
    }

    #[test]
    fn test_all_failed_keeps_duplicates() {
        let result = BatchImportResult::all_failed(&[2, 2, 7], "Session not found");
        assert_eq!(result.total_requested, 3);
        assert_eq!(result.failed_count, 3);
        assert!(result
            .results
            .iter()
            .all(|r| r.error.as_deref() == Some("Session not found")));
    }

    #[test]
    fn test_empty_batch() {
        let result = BatchImportResult::from_items(Vec::new());
        assert_eq!(result.total_requested, 0);
        assert_eq!(result.success_count + result.failed_count, 0);
    }

    #[test]
    fn test_item_progress() {
        assert_eq!(item_progress(0, 4), 10);
        assert_eq!(item_progress(1, 4), 30);
        assert_eq!(item_progress(4, 4), 90);
        assert_eq!(item_progress(0, 0), 90);
        assert_eq!(item_progress(9, 4), 90);
    }
}
