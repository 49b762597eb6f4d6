// src/runner.rs
//! Starts pipeline runs in background tasks.
//! Seeds each execution context from the trigger and the run's ExecutionRecord.

use std::sync::Arc;

use serde_json::{json, Value};
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::models::api::{run_id_from_key, RunStarted, ShortRequest, UploadEvent};
use crate::models::{ExecutionRecord, NewExecution};
use crate::store::{SharedStore, StoreError};
use crate::workflow::{ExecutionEngine, ExecutionOutcome, PipelineGraph, PipelineSet};

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("object key '{0}' is not of the form <runId>/RAW.<ext>")]
    InvalidKey(String),

    #[error("run '{0}' not found")]
    RunNotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("request could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A started execution
pub struct RunHandle {
    pub started: RunStarted,
    pub task: JoinHandle<ExecutionOutcome>,
}

pub struct PipelineRunner {
    engine: ExecutionEngine,
    pipelines: PipelineSet,
    store: SharedStore,
}

impl PipelineRunner {
    pub fn new(engine: ExecutionEngine, pipelines: PipelineSet, store: SharedStore) -> Self {
        Self {
            engine,
            pipelines,
            store,
        }
    }

    /// Upload-completion trigger. A run without a record gets one with defaults.
    pub async fn on_upload(&self, event: UploadEvent) -> Result<RunHandle, RunnerError> {
        let (bucket_name, object_key) = event.into_parts();
        let run_id = run_id_from_key(&object_key)
            .ok_or_else(|| RunnerError::InvalidKey(object_key.clone()))?
            .to_string();

        let file_name = object_key.rsplit('/').next().unwrap_or_default();
        let record = self.load_or_create(&run_id, file_name).await?;
        self.store.clear_failure(&run_id).await?;

        let input = seed_context(&record, &bucket_name, &object_key);
        Ok(self.spawn(self.pipelines.for_upload(), input, run_id))
    }

    /// Existing record, or a default one. Concurrent triggers for the same run
    /// both end up with the record that won the insert.
    async fn load_or_create(&self, run_id: &str, file_name: &str) -> Result<ExecutionRecord, RunnerError> {
        if let Some(record) = self.store.get_run(run_id).await? {
            return Ok(record);
        }

        tracing::info!(run_id = %run_id, "🆕 No record for uploaded run, creating one");
        match self
            .store
            .create_run(NewExecution::for_upload(run_id, file_name).into_record())
            .await
        {
            Ok(record) => Ok(record),
            Err(StoreError::DuplicateRun(_)) => {
                tracing::debug!(run_id = %run_id, "Record created concurrently, reading it back");
                self.store
                    .get_run(run_id)
                    .await?
                    .ok_or_else(|| RunnerError::RunNotFound(run_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Direct API start of the unified pipeline for an existing record
    pub async fn start_run(&self, run_id: &str, bucket_name: &str) -> Result<RunHandle, RunnerError> {
        let record = self
            .store
            .get_run(run_id)
            .await?
            .ok_or_else(|| RunnerError::RunNotFound(run_id.to_string()))?;
        self.store.clear_failure(run_id).await?;

        let object_key = format!("{}/RAW.{}", run_id, extension(&record.video_name));
        let input = seed_context(&record, bucket_name, &object_key);
        Ok(self.spawn(self.pipelines.unified.clone(), input, run_id.to_string()))
    }

    pub fn generate_short(&self, request: ShortRequest) -> Result<RunHandle, RunnerError> {
        let run_id = request.video_id.clone();
        let input = serde_json::to_value(request)?;
        Ok(self.spawn(self.pipelines.short.clone(), input, run_id))
    }

    fn spawn(&self, graph: Arc<PipelineGraph>, input: Value, run_id: String) -> RunHandle {
        let engine = self.engine.clone();
        let pipeline = graph.name().to_string();
        let task_run_id = run_id.clone();

        let task = tokio::spawn(async move {
            let outcome = engine.run(&graph, input).await;
            if outcome.status.is_success() {
                tracing::info!(run_id = %task_run_id, "✅ Run finished: {}", graph.name());
            } else {
                tracing::error!(run_id = %task_run_id, "❌ Run ended in failure: {:?}", outcome.status);
            }
            outcome
        });

        tracing::info!(run_id = %run_id, "🚀 Spawned pipeline '{}'", pipeline);
        RunHandle {
            started: RunStarted { run_id, pipeline },
            task,
        }
    }
}

/// Trigger fields plus the record fields the graphs route on
pub fn seed_context(record: &ExecutionRecord, bucket_name: &str, object_key: &str) -> Value {
    json!({
        "bucketName": bucket_name,
        "objectKey": object_key,
        "modelId": record.model_id,
        "theme": record.theme,
        "numberOfVideos": record.number_of_videos,
        "videoLength": record.video_length,
        "detectShots": record.detect_shots,
    })
}

fn extension(video_name: &str) -> &str {
    match video_name.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => ext,
        _ => "mp4",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PipelineConfig, UploadPipeline};
    use crate::models::{HighlightRecord, HighlightUpdate, Stage};
    use crate::store::{MemoryStore, RecordStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use crate::testing::{self, ScriptedJobService, ScriptedWorker};
    use crate::workflow::TerminalStatus;

    fn runner(store: Arc<MemoryStore>, worker: Arc<ScriptedWorker>, jobs: Arc<ScriptedJobService>) -> PipelineRunner {
        let pipelines = PipelineSet::build(&PipelineConfig::default(), UploadPipeline::Classic).unwrap();
        PipelineRunner::new(testing::engine(worker, jobs), pipelines, store)
    }

    #[test]
    fn test_seed_context_carries_routing_fields() {
        let record = testing::new_run("r1").into_record();
        let ctx = seed_context(&record, "b", "r1/RAW.mp4");
        assert_eq!(ctx["objectKey"], "r1/RAW.mp4");
        assert_eq!(ctx["modelId"], record.model_id);
        assert_eq!(ctx["detectShots"], false);
        assert_eq!(extension("talk.final.mov"), "mov");
        assert_eq!(extension("talk"), "mp4");
    }

    #[tokio::test]
    async fn test_upload_with_a_bad_key_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let runner = runner(store, Arc::new(ScriptedWorker::new()), Arc::new(ScriptedJobService::new()));

        let event = UploadEvent::Flat {
            bucket_name: "b".into(),
            object_key: "r1/clip.mp4".into(),
        };
        assert!(matches!(runner.on_upload(event).await, Err(RunnerError::InvalidKey(_))));
    }

    #[tokio::test]
    async fn test_upload_creates_missing_record_and_runs() {
        let store = Arc::new(MemoryStore::new());
        let jobs = Arc::new(ScriptedJobService::new());
        let worker = Arc::new(ScriptedWorker::new().on("ExtractTopics", |_| Ok(json!({"statusCode": 500}))));
        let runner = runner(store.clone(), worker, jobs.clone());

        let handle = runner
            .on_upload(UploadEvent::Flat {
                bucket_name: "b".into(),
                object_key: "uploads/r9/RAW.mov".into(),
            })
            .await
            .unwrap();
        assert_eq!(handle.started.run_id, "r9");
        assert_eq!(handle.started.pipeline, "video-upload");

        let outcome = handle.task.await.unwrap();
        assert!(matches!(outcome.status, TerminalStatus::Failed { ref error, .. } if error == "ExtractTopicsFailed"));
        assert_eq!(jobs.submit_count("r9_stepFunction"), 1);

        let record = store.get_run("r9").await.unwrap().unwrap();
        assert_eq!(record.video_name, "RAW.mov");
    }

    #[tokio::test(start_paused = true)]
    async fn test_rerunning_a_run_never_lowers_its_stage() {
        let (store, _hub, tracker) = testing::tracking_for("r1").await;
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let worker = Arc::new(
            ScriptedWorker::new()
                .on("ExtractTopics", move |_| {
                    let status = if counter.fetch_add(1, Ordering::SeqCst) == 1 { 200 } else { 500 };
                    Ok(json!({"statusCode": status, "topics": ["t0"]}))
                })
                .on("ProcessTopic", |_| Ok(json!({"statusCode": 200})))
                .on("LoadHighlights", |_| Ok(json!({"statusCode": 200, "highlights": []}))),
        );
        let pipelines = PipelineSet::build(&PipelineConfig::default(), UploadPipeline::Classic).unwrap();
        let engine = testing::engine(worker, Arc::new(ScriptedJobService::new())).with_tracker(tracker);
        let runner = PipelineRunner::new(engine, pipelines, store.clone());
        let upload = || UploadEvent::Flat {
            bucket_name: "b".into(),
            object_key: "r1/RAW.mp4".into(),
        };

        let first = runner.on_upload(upload()).await.unwrap().task.await.unwrap();
        assert!(matches!(first.status, TerminalStatus::Failed { ref error, .. } if error == "ExtractTopicsFailed"));
        let record = store.get_run("r1").await.unwrap().unwrap();
        assert_eq!((record.stage, record.failure_code.as_deref()), (1, Some("ExtractTopicsFailed")));

        let second = runner.on_upload(upload()).await.unwrap().task.await.unwrap();
        assert_eq!(second.status, TerminalStatus::Succeeded);
        let record = store.get_run("r1").await.unwrap().unwrap();
        assert_eq!((record.stage, record.failure_code), (3, None));

        let third = runner.on_upload(upload()).await.unwrap().task.await.unwrap();
        assert!(matches!(third.status, TerminalStatus::Failed { .. }));
        let record = store.get_run("r1").await.unwrap().unwrap();
        assert_eq!((record.stage, record.failure_code.as_deref()), (3, Some("ExtractTopicsFailed")));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    /// Hides the record from the first read, as when another trigger inserts it
    /// between this trigger's read and insert
    struct RacingStore {
        inner: MemoryStore,
        hidden: AtomicBool,
    }

    #[async_trait]
    impl RecordStore for RacingStore {
        async fn create_run(&self, record: ExecutionRecord) -> Result<ExecutionRecord, StoreError> {
            self.inner.create_run(record).await
        }

        async fn get_run(&self, id: &str) -> Result<Option<ExecutionRecord>, StoreError> {
            if self.hidden.swap(false, Ordering::SeqCst) {
                return Ok(None);
            }
            self.inner.get_run(id).await
        }

        async fn advance_stage(&self, id: &str, stage: Stage) -> Result<bool, StoreError> {
            self.inner.advance_stage(id, stage).await
        }

        async fn mark_failed(&self, id: &str, code: &str, cause: &str) -> Result<(), StoreError> {
            self.inner.mark_failed(id, code, cause).await
        }

        async fn clear_failure(&self, id: &str) -> Result<(), StoreError> {
            self.inner.clear_failure(id).await
        }

        async fn delete_run(&self, id: &str) -> Result<bool, StoreError> {
            self.inner.delete_run(id).await
        }

        async fn upsert_highlight(&self, highlight: HighlightRecord) -> Result<(), StoreError> {
            self.inner.upsert_highlight(highlight).await
        }

        async fn list_highlights(&self, run_id: &str) -> Result<Vec<HighlightRecord>, StoreError> {
            self.inner.list_highlights(run_id).await
        }

        async fn update_highlight(
            &self,
            run_id: &str,
            index: i32,
            update: HighlightUpdate,
        ) -> Result<HighlightRecord, StoreError> {
            self.inner.update_highlight(run_id, index, update).await
        }
    }

    #[tokio::test]
    async fn test_concurrent_trigger_reuses_the_winning_record() {
        let inner = MemoryStore::new();
        inner.create_run(testing::new_run("r1").into_record()).await.unwrap();
        let store = Arc::new(RacingStore {
            inner,
            hidden: AtomicBool::new(true),
        });
        let pipelines = PipelineSet::build(&PipelineConfig::default(), UploadPipeline::Classic).unwrap();
        let runner = PipelineRunner::new(
            testing::engine(Arc::new(ScriptedWorker::new()), Arc::new(ScriptedJobService::new())),
            pipelines,
            store.clone(),
        );

        let handle = runner
            .on_upload(UploadEvent::Flat {
                bucket_name: "b".into(),
                object_key: "r1/RAW.mp4".into(),
            })
            .await
            .unwrap();
        handle.task.abort();

        assert_eq!(handle.started.run_id, "r1");
        let record = store.get_run("r1").await.unwrap().unwrap();
        assert_eq!(record.video_name, "talk.mp4");
    }

    #[tokio::test]
    async fn test_start_requires_an_existing_record() {
        let store = Arc::new(MemoryStore::new());
        let runner = runner(store, Arc::new(ScriptedWorker::new()), Arc::new(ScriptedJobService::new()));
        assert!(matches!(runner.start_run("ghost", "b").await, Err(RunnerError::RunNotFound(_))));
    }
}
