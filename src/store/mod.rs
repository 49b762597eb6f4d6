// src/store/mod.rs
//! Persisted ExecutionRecords and HighlightRecords.
//! Fields are last-write-wins except the stage, which only moves forward.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::models::{ExecutionRecord, HighlightRecord, HighlightUpdate, Stage};

pub mod postgres;

pub use postgres::PgRecordStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("run '{0}' not found")]
    RunNotFound(String),

    #[error("run '{0}' already exists")]
    DuplicateRun(String),

    #[error("highlight {index} of run '{run_id}' not found")]
    HighlightNotFound { run_id: String, index: i32 },
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn create_run(&self, record: ExecutionRecord) -> Result<ExecutionRecord, StoreError>;

    async fn get_run(&self, id: &str) -> Result<Option<ExecutionRecord>, StoreError>;

    /// Raise the stage integer. A stage at or below the stored one is ignored.
    /// Returns whether the stored stage changed.
    async fn advance_stage(&self, id: &str, stage: Stage) -> Result<bool, StoreError>;

    /// Record a terminal failure without touching the stage
    async fn mark_failed(&self, id: &str, code: &str, cause: &str) -> Result<(), StoreError>;

    /// Drop the failure marker left by an earlier execution
    async fn clear_failure(&self, id: &str) -> Result<(), StoreError>;

    /// Delete a run and its highlights. Returns whether the run existed.
    async fn delete_run(&self, id: &str) -> Result<bool, StoreError>;

    async fn upsert_highlight(&self, highlight: HighlightRecord) -> Result<(), StoreError>;

    /// Highlights of a run ordered by index
    async fn list_highlights(&self, run_id: &str) -> Result<Vec<HighlightRecord>, StoreError>;

    async fn update_highlight(
        &self,
        run_id: &str,
        index: i32,
        update: HighlightUpdate,
    ) -> Result<HighlightRecord, StoreError>;
}

pub type SharedStore = Arc<dyn RecordStore>;

/// In-process store used without a database and in tests
#[derive(Default)]
pub struct MemoryStore {
    runs: RwLock<HashMap<String, ExecutionRecord>>,
    highlights: RwLock<BTreeMap<(String, i32), HighlightRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn create_run(&self, record: ExecutionRecord) -> Result<ExecutionRecord, StoreError> {
        let mut runs = self.runs.write().await;
        if runs.contains_key(&record.id) {
            return Err(StoreError::DuplicateRun(record.id));
        }
        runs.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn get_run(&self, id: &str) -> Result<Option<ExecutionRecord>, StoreError> {
        Ok(self.runs.read().await.get(id).cloned())
    }

    async fn advance_stage(&self, id: &str, stage: Stage) -> Result<bool, StoreError> {
        let mut runs = self.runs.write().await;
        let record = runs
            .get_mut(id)
            .ok_or_else(|| StoreError::RunNotFound(id.to_string()))?;
        if record.stage >= stage.as_i32() {
            return Ok(false);
        }
        record.stage = stage.as_i32();
        record.updated_at = Utc::now();
        Ok(true)
    }

    async fn mark_failed(&self, id: &str, code: &str, cause: &str) -> Result<(), StoreError> {
        let mut runs = self.runs.write().await;
        let record = runs
            .get_mut(id)
            .ok_or_else(|| StoreError::RunNotFound(id.to_string()))?;
        record.failure_code = Some(code.to_string());
        record.failure_cause = Some(cause.to_string());
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn clear_failure(&self, id: &str) -> Result<(), StoreError> {
        let mut runs = self.runs.write().await;
        let record = runs
            .get_mut(id)
            .ok_or_else(|| StoreError::RunNotFound(id.to_string()))?;
        record.failure_code = None;
        record.failure_cause = None;
        Ok(())
    }

    async fn delete_run(&self, id: &str) -> Result<bool, StoreError> {
        let existed = self.runs.write().await.remove(id).is_some();
        self.highlights
            .write()
            .await
            .retain(|(run_id, _), _| run_id != id);
        Ok(existed)
    }

    async fn upsert_highlight(&self, highlight: HighlightRecord) -> Result<(), StoreError> {
        self.highlights
            .write()
            .await
            .insert((highlight.run_id.clone(), highlight.index), highlight);
        Ok(())
    }

    async fn list_highlights(&self, run_id: &str) -> Result<Vec<HighlightRecord>, StoreError> {
        Ok(self
            .highlights
            .read()
            .await
            .values()
            .filter(|h| h.run_id == run_id)
            .cloned()
            .collect())
    }

    async fn update_highlight(
        &self,
        run_id: &str,
        index: i32,
        update: HighlightUpdate,
    ) -> Result<HighlightRecord, StoreError> {
        let mut highlights = self.highlights.write().await;
        let highlight = highlights
            .get_mut(&(run_id.to_string(), index))
            .ok_or_else(|| StoreError::HighlightNotFound {
                run_id: run_id.to_string(),
                index,
            })?;
        highlight.apply(update);
        Ok(highlight.clone())
    }
}
