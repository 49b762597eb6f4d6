// Scripted workers and job services for tests
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use backoff::ExponentialBackoff;
use serde_json::{json, Value};
use tower::ServiceExt;

use crate::config::{PipelineConfig, UploadPipeline};
use crate::jobs::poller::JobPoller;
use crate::jobs::{JobRequest, JobService, JobServiceError, SubmitAck};
use crate::models::NewExecution;
use crate::runner::PipelineRunner;
use crate::store::{MemoryStore, RecordStore};
use crate::tracking::{EventHub, StageTracker};
use crate::workers::{Worker, WorkerError, WorkerRegistry};
use crate::workflow::executor::ExecutionEngine;
use crate::workflow::PipelineSet;
use crate::AppState;

type Handler = Box<dyn Fn(&Value) -> Result<Value, WorkerError> + Send + Sync>;

/// Worker answering from per-name closures and recording every request
#[derive(Default)]
pub struct ScriptedWorker {
    handlers: HashMap<String, Handler>,
    requests: Mutex<Vec<(String, Value)>>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedWorker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(mut self, worker: &str, handler: F) -> Self
    where
        F: Fn(&Value) -> Result<Value, WorkerError> + Send + Sync + 'static,
    {
        self.handlers.insert(worker.to_string(), Box::new(handler));
        self
    }

    /// Simulated latency per call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self, worker: &str) -> usize {
        self.requests(worker).len()
    }

    pub fn requests(&self, worker: &str) -> Vec<Value> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == worker)
            .map(|(_, request)| request.clone())
            .collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Worker for ScriptedWorker {
    async fn invoke(&self, worker: &str, request: Value) -> Result<Value, WorkerError> {
        self.requests
            .lock()
            .unwrap()
            .push((worker.to_string(), request.clone()));

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.handlers.get(worker) {
            Some(handler) => handler(&request),
            None => Err(WorkerError::Unknown(worker.to_string())),
        }
    }
}

/// Job service replaying scripted status documents per job name.
///
/// The last scripted status repeats; unscripted jobs complete on the first poll.
#[derive(Default)]
pub struct ScriptedJobService {
    scripts: Mutex<HashMap<String, VecDeque<Value>>>,
    existing: HashSet<String>,
    submits: Mutex<Vec<JobRequest>>,
    polls: Mutex<HashMap<String, usize>>,
    failing_submits: AtomicUsize,
}

impl ScriptedJobService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, job_name: &str, statuses: Vec<Value>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(job_name.to_string(), statuses.into());
        self
    }

    /// Report this job as already known to the service on submit
    pub fn already_exists(mut self, job_name: &str) -> Self {
        self.existing.insert(job_name.to_string());
        self
    }

    /// Fail the next `count` submissions with a transport error
    pub fn failing_submits(self, count: usize) -> Self {
        self.failing_submits.store(count, Ordering::SeqCst);
        self
    }

    pub fn submit_count(&self, job_name: &str) -> usize {
        self.submits
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.job_name == job_name)
            .count()
    }

    pub fn poll_count(&self, job_name: &str) -> usize {
        self.polls.lock().unwrap().get(job_name).copied().unwrap_or(0)
    }

    pub fn requests(&self) -> Vec<JobRequest> {
        self.submits.lock().unwrap().clone()
    }

    pub fn submitted_names(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.job_name).collect()
    }
}

#[async_trait]
impl JobService for ScriptedJobService {
    async fn submit(&self, request: &JobRequest) -> Result<SubmitAck, JobServiceError> {
        self.submits.lock().unwrap().push(request.clone());

        let remaining = self.failing_submits.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_submits.store(remaining - 1, Ordering::SeqCst);
            return Err(JobServiceError::Transport("connection refused".into()));
        }

        if self.existing.contains(&request.job_name) {
            Ok(SubmitAck::AlreadyExists)
        } else {
            Ok(SubmitAck::Accepted)
        }
    }

    async fn status(&self, job_name: &str) -> Result<Value, JobServiceError> {
        *self.polls.lock().unwrap().entry(job_name.to_string()).or_insert(0) += 1;

        let mut scripts = self.scripts.lock().unwrap();
        let status = match scripts.get_mut(job_name) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        Ok(status.unwrap_or_else(|| json!({"status": "COMPLETED", "result": {"jobName": job_name}})))
    }
}

/// Poller with every job service name used by the pipelines bound to one script
pub fn poller(jobs: Arc<ScriptedJobService>) -> JobPoller {
    let mut poller = JobPoller::new().with_backoff(ExponentialBackoff {
        initial_interval: Duration::from_millis(10),
        max_elapsed_time: Some(Duration::from_secs(1)),
        ..Default::default()
    });
    for service in ["transcription", "render", "shot-detection"] {
        poller = poller.with_service(service, jobs.clone());
    }
    poller
}

pub fn engine(worker: Arc<ScriptedWorker>, jobs: Arc<ScriptedJobService>) -> ExecutionEngine {
    let registry = WorkerRegistry::new().with_fallback(worker);
    ExecutionEngine::new(Arc::new(registry), Arc::new(poller(jobs)))
}

pub fn new_run(run_id: &str) -> NewExecution {
    NewExecution {
        id: Some(run_id.to_string()),
        video_name: "talk.mp4".into(),
        model_id: "us.anthropic.claude-3-7-sonnet-20250219-v1:0".into(),
        theme: "systems programming".into(),
        number_of_videos: 2,
        video_length: 60,
        detect_shots: false,
    }
}

/// Memory store holding one run, plus a tracker publishing to a hub
pub async fn tracking_for(run_id: &str) -> (Arc<MemoryStore>, Arc<EventHub>, Arc<StageTracker>) {
    let store = Arc::new(MemoryStore::new());
    store.create_run(new_run(run_id).into_record()).await.unwrap();
    let hub = Arc::new(EventHub::new());
    let tracker = Arc::new(StageTracker::new(store.clone(), hub.clone()));
    (store, hub, tracker)
}

/// Application state over a memory store; the engine's tracker publishes to the state's hub
pub fn app_state(
    worker: Arc<ScriptedWorker>,
    jobs: Arc<ScriptedJobService>,
) -> (Arc<AppState>, Arc<MemoryStore>, Arc<StageTracker>) {
    let store = Arc::new(MemoryStore::new());
    let events = Arc::new(EventHub::new());
    let tracker = Arc::new(StageTracker::new(store.clone(), events.clone()));
    let pipelines = PipelineSet::build(&PipelineConfig::default(), UploadPipeline::Classic).unwrap();
    let runner = PipelineRunner::new(engine(worker, jobs).with_tracker(tracker.clone()), pipelines, store.clone());
    let state = Arc::new(AppState {
        store: store.clone(),
        runner,
        events,
        bucket_name: "b".into(),
        store_kind: "memory",
    });
    (state, store, tracker)
}

/// One request through the router; an empty body decodes as `Value::Null`
pub async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string())),
        None => request.body(Body::empty()),
    }
    .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

/// Wait for a background run to leave a failure marker
pub async fn wait_for_failure(store: &MemoryStore, run_id: &str) -> Option<String> {
    for _ in 0..600 {
        if let Some(code) = store.get_run(run_id).await.unwrap().and_then(|r| r.failure_code) {
            return Some(code);
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    None
}
