// src/workers/highlights.rs
use async_trait::async_trait;
use serde_json::{json, Value};

use super::{ok_envelope, Worker, WorkerError};
use crate::store::SharedStore;

/// In-process worker exposing a run's stored highlights to a graph.
///
/// Request `{ uuid }`; response `{ statusCode: 200, highlights: [...] }`
/// ordered by highlight index.
pub struct HighlightsWorker {
    store: SharedStore,
}

impl HighlightsWorker {
    pub const NAME: &'static str = "LoadHighlights";

    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Worker for HighlightsWorker {
    async fn invoke(&self, worker: &str, request: Value) -> Result<Value, WorkerError> {
        let Some(run_id) = request.get("uuid").and_then(Value::as_str) else {
            return Ok(json!({"statusCode": 400, "body": "missing uuid"}));
        };

        let highlights = self
            .store
            .list_highlights(run_id)
            .await
            .map_err(|e| WorkerError::Transport {
                worker: worker.to_string(),
                message: e.to_string(),
            })?;
        tracing::debug!(run_id, count = highlights.len(), "📚 Loaded stored highlights");

        let highlights = serde_json::to_value(highlights).map_err(|e| WorkerError::InvalidEnvelope {
            worker: worker.to_string(),
            message: e.to_string(),
        })?;
        Ok(ok_envelope(json!({ "highlights": highlights })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HighlightRecord;
    use crate::store::{MemoryStore, RecordStore};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_returns_highlights_in_index_order() {
        let store = Arc::new(MemoryStore::new());
        for index in [1, 0] {
            let mut highlight = HighlightRecord::new("r1", index);
            highlight.text = Some(format!("segment {}", index));
            store.upsert_highlight(highlight).await.unwrap();
        }
        store.upsert_highlight(HighlightRecord::new("r2", 0)).await.unwrap();

        let worker = HighlightsWorker::new(store);
        let response = worker
            .invoke(HighlightsWorker::NAME, json!({"uuid": "r1"}))
            .await
            .unwrap();

        assert_eq!(response["statusCode"], 200);
        let highlights = response["highlights"].as_array().unwrap();
        assert_eq!(highlights.len(), 2);
        assert_eq!(highlights[0]["index"], 0);
        assert_eq!(highlights[1]["text"], "segment 1");
    }

    #[tokio::test]
    async fn test_missing_run_id_is_a_client_error() {
        let worker = HighlightsWorker::new(Arc::new(MemoryStore::new()));
        let response = worker.invoke(HighlightsWorker::NAME, json!({})).await.unwrap();
        assert_eq!(response["statusCode"], 400);
    }
}
