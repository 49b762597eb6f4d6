// src/tracking/mod.rs
//! Checkpoint writes for pipeline runs

use std::sync::Arc;

use crate::models::Stage;
use crate::store::{SharedStore, StoreError};

pub mod events;

pub use events::{EventHub, EventPublisher, FanoutPublisher, StageChanged, WebhookPublisher};

/// Persists the stage of a run and notifies subscribers.
///
/// The recorded stage never decreases, across executions of the same run: the
/// store only raises it, and a checkpoint that does not raise it is not published.
pub struct StageTracker {
    store: SharedStore,
    publisher: Arc<dyn EventPublisher>,
}

impl StageTracker {
    pub fn new(store: SharedStore, publisher: Arc<dyn EventPublisher>) -> Self {
        Self { store, publisher }
    }

    /// Write `stage` for the run, then publish. Store failures are returned;
    /// publish failures are logged only.
    pub async fn advance(&self, run_id: &str, stage: Stage) -> Result<(), StoreError> {
        if !self.store.advance_stage(run_id, stage).await? {
            tracing::warn!(run_id, "⚠️ Ignoring stage {} for run, already at or past it", stage.as_i32());
            return Ok(());
        }

        tracing::info!(run_id, stage = stage.as_i32(), "🏁 Checkpoint reached");
        self.notify(StageChanged::new(run_id, stage.as_i32())).await;
        Ok(())
    }

    /// Record a terminal failure without bumping the stage
    pub async fn mark_failed(&self, run_id: &str, code: &str, cause: &str) -> Result<(), StoreError> {
        self.store.mark_failed(run_id, code, cause).await?;
        let stage = self
            .store
            .get_run(run_id)
            .await?
            .map_or(Stage::Created.as_i32(), |record| record.stage);

        tracing::error!(run_id, code, "❌ Run failed: {}", cause);
        self.notify(StageChanged::new(run_id, stage).with_error(code, cause)).await;
        Ok(())
    }

    async fn notify(&self, event: StageChanged) {
        if let Err(e) = self.publisher.publish(&event).await {
            tracing::warn!(run_id = %event.video_id, "⚠️ Stage notification not delivered: {}", e);
        }
    }
}
