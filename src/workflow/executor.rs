// Executor - Walks a pipeline graph one node at a time per logical thread
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use super::error::NodeError;
use super::graph::{Catcher, InvokeNode, Node, PassNode, PipelineGraph, PollJobNode, RetryPolicy};
use super::map::{self, MapReport};
use super::path::ResultPath;
use crate::jobs::poller::JobPoller;
use crate::jobs::JobRequest;
use crate::tracking::StageTracker;
use crate::workers::WorkerRegistry;

/// Engine limits
#[derive(Debug, Clone, Copy)]
pub struct ExecutorConfig {
    /// Node transitions allowed per logical thread
    pub max_transitions: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_transitions: 10_000,
        }
    }
}

/// State of one logical thread of execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Ready,
    Running,
    /// Suspended in a Wait node or a job poll loop
    WaitingOnExternal,
    Terminal,
}

/// How a logical thread ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalStatus {
    Succeeded,
    Failed { error: String, cause: String },
}

impl TerminalStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, TerminalStatus::Succeeded)
    }

    fn from_error(err: &NodeError) -> Self {
        TerminalStatus::Failed {
            error: err.code().to_string(),
            cause: err.cause(),
        }
    }
}

/// Result of `ExecutionEngine::run`
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub status: TerminalStatus,
    pub context: Value,
    /// Nodes executed by the root thread, in order
    pub visited: Vec<String>,
    /// Per-item outcomes of each Map run by the root thread
    pub branches: Vec<MapReport>,
}

/// What a node hands back to the thread loop
enum Step {
    Next(String),
    Succeed,
    Fail(TerminalStatus),
}

impl Step {
    fn fail(err: &NodeError) -> Self {
        Step::Fail(TerminalStatus::from_error(err))
    }
}

/// Bookkeeping for one logical thread
struct LogicalThread<'a> {
    label: &'a str,
    state: ThreadState,
    current: String,
    transitions: usize,
    visited: Vec<String>,
    branches: Vec<MapReport>,
}

impl<'a> LogicalThread<'a> {
    fn new(label: &'a str, start: &str) -> Self {
        Self {
            label,
            state: ThreadState::Ready,
            current: start.to_string(),
            transitions: 0,
            visited: Vec::new(),
            branches: Vec::new(),
        }
    }

    fn set_state(&mut self, next: ThreadState) {
        if self.state != next {
            debug!(thread = self.label, "{:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }
}

/// Interprets pipeline graphs against an execution context.
///
/// Cheap to clone; Map branches run on clones of the engine.
#[derive(Clone)]
pub struct ExecutionEngine {
    workers: Arc<WorkerRegistry>,
    poller: Arc<JobPoller>,
    tracker: Option<Arc<StageTracker>>,
    config: ExecutorConfig,
}

impl ExecutionEngine {
    pub fn new(workers: Arc<WorkerRegistry>, poller: Arc<JobPoller>) -> Self {
        Self {
            workers,
            poller,
            tracker: None,
            config: ExecutorConfig::default(),
        }
    }

    pub fn with_tracker(mut self, tracker: Arc<StageTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Run a graph to a terminal node on the root thread
    pub async fn run(&self, graph: &PipelineGraph, input: Value) -> ExecutionOutcome {
        info!("🚀 Starting pipeline execution: {}", graph.name());
        let outcome = self.drive(graph, input, graph.name(), true).await;

        let run_id = graph.run_id(&outcome.context);
        if let (Some(tracker), Some(run_id)) = (&self.tracker, &run_id) {
            if let TerminalStatus::Failed { error, cause } = &outcome.status {
                if let Err(e) = tracker.mark_failed(run_id, error, cause).await {
                    warn!(run_id = %run_id, "⚠️ Failed to record failure marker: {}", e);
                }
            }
        }

        match &outcome.status {
            TerminalStatus::Succeeded => {
                info!("🎬 Pipeline '{}' succeeded after {} nodes", graph.name(), outcome.visited.len())
            }
            TerminalStatus::Failed { error, cause } => {
                error!("❌ Pipeline '{}' failed with {}: {}", graph.name(), error, cause)
            }
        }
        outcome
    }

    /// Owned entry point for a Map branch spawned on its own task
    pub(crate) fn run_branch(self, graph: Arc<PipelineGraph>, input: Value, label: String) -> BoxFuture<'static, ExecutionOutcome> {
        async move { self.drive(&graph, input, &label, false).await }.boxed()
    }

    fn drive<'a>(
        &'a self,
        graph: &'a PipelineGraph,
        mut ctx: Value,
        label: &'a str,
        root: bool,
    ) -> BoxFuture<'a, ExecutionOutcome> {
        async move {
            let mut thread = LogicalThread::new(label, graph.start());

            let status = loop {
                thread.transitions += 1;
                if thread.transitions > self.config.max_transitions {
                    warn!(thread = label, "⚠️ Hit transition limit: {}", self.config.max_transitions);
                    break TerminalStatus::from_error(&NodeError::IterationLimit(self.config.max_transitions));
                }

                let id = thread.current.clone();
                let Some(node) = graph.node(&id) else {
                    break TerminalStatus::from_error(&NodeError::Runtime(format!("unknown node '{}'", id)));
                };

                thread.set_state(match node {
                    Node::Wait(_) | Node::PollJob(_) => ThreadState::WaitingOnExternal,
                    _ => ThreadState::Running,
                });
                thread.visited.push(id.clone());
                if root {
                    info!(thread = label, node = %id, "📍 Step {}: {}", thread.transitions, node.kind());
                } else {
                    debug!(thread = label, node = %id, "📍 Step {}: {}", thread.transitions, node.kind());
                }

                match self.step(graph, &id, node, &mut ctx, &mut thread.branches).await {
                    Step::Next(next) => thread.current = next,
                    Step::Succeed => break TerminalStatus::Succeeded,
                    Step::Fail(status) => break status,
                }
            };

            thread.set_state(ThreadState::Terminal);
            ExecutionOutcome {
                status,
                context: ctx,
                visited: thread.visited,
                branches: thread.branches,
            }
        }
        .boxed()
    }

    async fn step(
        &self,
        graph: &PipelineGraph,
        id: &str,
        node: &Node,
        ctx: &mut Value,
        branches: &mut Vec<MapReport>,
    ) -> Step {
        match node {
            Node::Pass(pass) => match apply_pass(pass, ctx) {
                Ok(()) => Step::Next(pass.next.clone()),
                Err(e) => Step::fail(&e),
            },
            Node::Invoke(invoke) => {
                let view: &Value = ctx;
                let result = with_retry(id, invoke.retry.as_ref(), || self.invoke_once(invoke, view)).await;
                settle(id, result, ctx, &invoke.result_path, &invoke.catch, &invoke.next)
            }
            Node::PollJob(poll) => {
                let view: &Value = ctx;
                let result = with_retry(id, poll.retry.as_ref(), || self.poll_job_once(poll, view)).await;
                settle(id, result, ctx, &poll.result_path, &poll.catch, &poll.next)
            }
            Node::Wait(wait) => {
                debug!(node = id, "⏳ Waiting {:?}", wait.duration);
                tokio::time::sleep(wait.duration).await;
                Step::Next(wait.next.clone())
            }
            Node::Choice(choice) => match choice.select(ctx) {
                Some(next) => Step::Next(next.to_string()),
                None => Step::fail(&NodeError::Runtime(format!("no branch of '{}' matched", id))),
            },
            Node::Map(map_node) => {
                let (report, result) = map::run_map(self, id, map_node, ctx).await;
                if let Some(report) = report {
                    branches.push(report);
                }
                settle(id, result, ctx, &map_node.result_path, &map_node.catch, &map_node.next)
            }
            Node::Checkpoint(checkpoint) => {
                let Some(tracker) = &self.tracker else {
                    debug!(node = id, "No stage tracker configured, checkpoint skipped");
                    return Step::Next(checkpoint.next.clone());
                };
                let Some(run_id) = graph.run_id(ctx) else {
                    return Step::fail(&NodeError::Runtime(format!(
                        "checkpoint '{}' found no run id in the context",
                        id
                    )));
                };
                match tracker.advance(&run_id, checkpoint.stage).await {
                    Ok(()) => Step::Next(checkpoint.next.clone()),
                    Err(e) => Step::fail(&NodeError::Runtime(format!("checkpoint '{}' not recorded: {}", id, e))),
                }
            }
            Node::Succeed => Step::Succeed,
            Node::Fail(fail) => Step::Fail(TerminalStatus::Failed {
                error: fail.error.clone(),
                cause: fail.cause.clone(),
            }),
        }
    }

    async fn invoke_once(&self, node: &InvokeNode, ctx: &Value) -> Result<Value, NodeError> {
        let request = match &node.payload {
            Some(payload) => payload.resolve(ctx)?,
            None => ctx.clone(),
        };
        let response = self.workers.invoke(&node.worker, request).await?;
        match &node.result_selector {
            Some(selector) => selector.resolve(&response),
            None => Ok(response),
        }
    }

    async fn poll_job_once(&self, node: &PollJobNode, ctx: &Value) -> Result<Value, NodeError> {
        let job_name = match node.job_name.resolve(ctx, None)? {
            Value::String(name) => name,
            other => {
                return Err(NodeError::Runtime(format!("job name resolved to a non-string: {}", other)));
            }
        };
        let request = JobRequest {
            job_name,
            media_uri: node.media_uri.resolve(ctx, None)?,
            output_location: node.output_location.resolve(ctx, None)?,
            options: if node.options.is_empty() {
                Value::Null
            } else {
                node.options.resolve(ctx)?
            },
        };

        let handle = self
            .poller
            .run(&node.service, request, &node.interpreter, &node.settings)
            .await?;

        Ok(json!({
            "jobName": handle.job_name,
            "status": "COMPLETED",
            "result": handle.result.unwrap_or(Value::Null),
        }))
    }
}

fn apply_pass(pass: &PassNode, ctx: &mut Value) -> Result<(), NodeError> {
    let output = match &pass.parameters {
        Some(parameters) => parameters.resolve(ctx)?,
        None => ctx.clone(),
    };
    pass.result_path.apply(ctx, output).map_err(NodeError::Runtime)
}

/// Run `attempt` until it succeeds or the retry policy gives up
async fn with_retry<F, Fut>(node: &str, policy: Option<&RetryPolicy>, mut attempt: F) -> Result<Value, NodeError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Value, NodeError>>,
{
    let mut retries = 0;
    loop {
        match attempt().await {
            Ok(output) => return Ok(output),
            Err(err) => match policy {
                Some(policy) if retries < policy.max_retries && policy.matches(&err) => {
                    retries += 1;
                    let delay: Duration = policy.delay_for(retries);
                    warn!(
                        node,
                        attempt = retries,
                        "🔄 Retrying after {:?} ({}/{}): {}",
                        delay,
                        retries,
                        policy.max_retries,
                        err
                    );
                    tokio::time::sleep(delay).await;
                }
                _ => return Err(err),
            },
        }
    }
}

/// Merge a node's output, or route its error through the catch policy
fn settle(
    node: &str,
    result: Result<Value, NodeError>,
    ctx: &mut Value,
    result_path: &ResultPath,
    catch: &[Catcher],
    next: &str,
) -> Step {
    let err = match result {
        Ok(output) => match result_path.apply(ctx, output) {
            Ok(()) => return Step::Next(next.to_string()),
            Err(reason) => NodeError::Runtime(format!("cannot store result of '{}': {}", node, reason)),
        },
        Err(err) => err,
    };

    let Some(catcher) = catch.iter().find(|c| c.matches(&err)) else {
        warn!(node, code = err.code(), "Node failed without a matching catch: {}", err);
        return Step::fail(&err);
    };

    let info = json!({"Error": err.code(), "Cause": err.cause()});
    if let Err(reason) = catcher.result_path.apply(ctx, info) {
        return Step::fail(&NodeError::Runtime(format!(
            "cannot store caught error of '{}': {}",
            node, reason
        )));
    }
    warn!(node, code = err.code(), "↪️ Caught error, routing to '{}'", catcher.next);
    Step::Next(catcher.next.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::poller::PollSettings;
    use crate::models::Stage;
    use crate::store::RecordStore;
    use crate::testing::{self, ScriptedJobService, ScriptedWorker};
    use crate::workers::WorkerError;
    use crate::workflow::error::codes;
    use crate::workflow::graph::{PipelineGraphBuilder, RetryPolicy};
    use crate::workflow::router::{conditions, ChoiceBuilder};
    use crate::workflow::state::{Parameters, ValueSource};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn transport_error(worker: &str) -> WorkerError {
        WorkerError::Transport {
            worker: worker.to_string(),
            message: "connection reset".to_string(),
        }
    }

    #[tokio::test]
    async fn test_pass_nodes_and_trace() {
        let graph = PipelineGraphBuilder::new("prepare")
            .node(
                "PrepareParameters",
                PassNode::new("Done").with_parameters(
                    Parameters::new()
                        .field("uuid", ValueSource::split_part("$.objectKey", "/", -2))
                        .copy("bucket_name", "$.bucketName"),
                ),
            )
            .node("Done", Node::Succeed)
            .start_at("PrepareParameters")
            .build()
            .unwrap();

        let engine = testing::engine(Arc::new(ScriptedWorker::new()), Arc::new(ScriptedJobService::new()));
        let outcome = engine
            .run(&graph, json!({"bucketName": "b", "objectKey": "r1/RAW.mp4"}))
            .await;

        assert!(outcome.status.is_success());
        assert_eq!(outcome.visited, vec!["PrepareParameters", "Done"]);
        assert_eq!(outcome.context["uuid"], "r1");
        assert_eq!(outcome.context["objectKey"], "r1/RAW.mp4");
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_invoke_errors_are_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let worker = Arc::new(ScriptedWorker::new().on("ExtractTopics", move |_| {
            if seen.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(transport_error("ExtractTopics"))
            } else {
                Ok(json!({"statusCode": 200, "topics": ["t0"]}))
            }
        }));

        let graph = PipelineGraphBuilder::new("retry")
            .node(
                "ExtractTopics",
                InvokeNode::new("ExtractTopics", "Done")
                    .with_retry(RetryPolicy::fixed(3, Duration::from_secs(5)))
                    .with_result_path(ResultPath::at("$.TopicsResult")),
            )
            .node("Done", Node::Succeed)
            .start_at("ExtractTopics")
            .build()
            .unwrap();

        let engine = testing::engine(worker.clone(), Arc::new(ScriptedJobService::new()));
        let started = tokio::time::Instant::now();
        let outcome = engine.run(&graph, json!({})).await;

        assert!(outcome.status.is_success());
        assert_eq!(worker.call_count("ExtractTopics"), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(10));
        assert_eq!(outcome.context["TopicsResult"]["topics"], json!(["t0"]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_route_to_catch() {
        let worker = Arc::new(ScriptedWorker::new().on("CheckSubtitles", |_| Err(transport_error("CheckSubtitles"))));
        let graph = PipelineGraphBuilder::new("catch")
            .node(
                "CheckSubtitles",
                InvokeNode::new("CheckSubtitles", "Done")
                    .with_retry(RetryPolicy::exponential(2, Duration::from_secs(1), 2.0))
                    .catching(&[codes::ALL], "Fallback", ResultPath::at("$.subtitleError")),
            )
            .node("Fallback", PassNode::new("Done"))
            .node("Done", Node::Succeed)
            .start_at("CheckSubtitles")
            .build()
            .unwrap();

        let engine = testing::engine(worker.clone(), Arc::new(ScriptedJobService::new()));
        let outcome = engine.run(&graph, json!({})).await;

        assert!(outcome.status.is_success());
        assert_eq!(worker.call_count("CheckSubtitles"), 3);
        assert_eq!(outcome.visited, vec!["CheckSubtitles", "Fallback", "Done"]);
        assert_eq!(outcome.context["subtitleError"]["Error"], codes::WORKER_TRANSIENT);
    }

    #[tokio::test]
    async fn test_uncaught_error_fails_the_execution() {
        let worker = Arc::new(ScriptedWorker::new().on("ExtractTopics", |_| Err(transport_error("ExtractTopics"))));
        let graph = PipelineGraphBuilder::new("uncaught")
            .node("ExtractTopics", InvokeNode::new("ExtractTopics", "Done"))
            .node("Done", Node::Succeed)
            .start_at("ExtractTopics")
            .build()
            .unwrap();

        let engine = testing::engine(worker, Arc::new(ScriptedJobService::new()));
        let outcome = engine.run(&graph, json!({})).await;

        match outcome.status {
            TerminalStatus::Failed { error, cause } => {
                assert_eq!(error, codes::WORKER_TRANSIENT);
                assert!(cause.contains("connection reset"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    fn transcription_graph(settings: PollSettings) -> PipelineGraph {
        PipelineGraphBuilder::new("transcribe")
            .node(
                "Transcribe",
                PollJobNode::new(
                    "transcription",
                    ValueSource::job_name("$.uuid", "stepFunction", None),
                    "Done",
                )
                .with_media(ValueSource::path("$.raw_file_uri"), ValueSource::path("$.bucket_name"))
                .with_settings(settings)
                .with_retry(RetryPolicy::fixed(3, Duration::from_secs(1)))
                .with_result_path(ResultPath::at("$.transcription")),
            )
            .node("Done", Node::Succeed)
            .start_at("Transcribe")
            .build()
            .unwrap()
    }

    fn transcription_input() -> Value {
        json!({"uuid": "r1", "raw_file_uri": "s3://b/r1/RAW.mp4", "bucket_name": "b"})
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_job_succeeds_after_three_polls() {
        let jobs = Arc::new(ScriptedJobService::new().script(
            "r1_stepFunction",
            vec![
                json!({"status": "IN_PROGRESS"}),
                json!({"status": "IN_PROGRESS"}),
                json!({"status": "COMPLETED", "result": {"transcript": "r1.json"}}),
            ],
        ));
        let engine = testing::engine(Arc::new(ScriptedWorker::new()), jobs.clone());
        let graph = transcription_graph(PollSettings::new(Duration::from_secs(5), 10));

        let started = tokio::time::Instant::now();
        let outcome = engine.run(&graph, transcription_input()).await;

        assert!(outcome.status.is_success());
        assert_eq!(jobs.poll_count("r1_stepFunction"), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(10));
        assert_eq!(outcome.context["transcription"]["jobName"], "r1_stepFunction");
        assert_eq!(outcome.context["transcription"]["result"]["transcript"], "r1.json");
        assert_eq!(jobs.requests()[0].media_uri, json!("s3://b/r1/RAW.mp4"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_job_timeout_is_distinct_and_not_retried() {
        let jobs = Arc::new(
            ScriptedJobService::new().script("r1_stepFunction", vec![json!({"status": "IN_PROGRESS"})]),
        );
        let engine = testing::engine(Arc::new(ScriptedWorker::new()), jobs.clone());
        let outcome = engine
            .run(&transcription_graph(PollSettings::new(Duration::from_secs(5), 3)), transcription_input())
            .await;

        assert!(matches!(outcome.status, TerminalStatus::Failed { ref error, .. } if error == codes::JOB_TIMEOUT));
        assert_eq!(jobs.poll_count("r1_stepFunction"), 3);
        assert_eq!(jobs.submit_count("r1_stepFunction"), 1);
    }

    #[tokio::test]
    async fn test_failed_job_is_not_retried() {
        let jobs = Arc::new(
            ScriptedJobService::new().script("r1_stepFunction", vec![json!({"status": "FAILED", "reason": "no audio"})]),
        );
        let engine = testing::engine(Arc::new(ScriptedWorker::new()), jobs.clone());
        let outcome = engine
            .run(&transcription_graph(PollSettings::default()), transcription_input())
            .await;

        match outcome.status {
            TerminalStatus::Failed { error, cause } => {
                assert_eq!(error, codes::JOB_FAILED);
                assert!(cause.contains("no audio"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(jobs.poll_count("r1_stepFunction"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_choice_status_loop() {
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = polls.clone();
        let worker = Arc::new(ScriptedWorker::new().on("GetTranscriptionJob", move |_| {
            let status = if counter.fetch_add(1, Ordering::SeqCst) < 2 { "IN_PROGRESS" } else { "COMPLETED" };
            Ok(json!({"statusCode": 200, "TranscriptionJobStatus": status}))
        }));

        let graph = PipelineGraphBuilder::new("loop")
            .node("Wait", Node::wait(Duration::from_secs(5), "GetTranscriptionJob"))
            .node(
                "GetTranscriptionJob",
                InvokeNode::new("GetTranscriptionJob", "CheckStatus").with_result_path(ResultPath::at("$.job")),
            )
            .node(
                "CheckStatus",
                ChoiceBuilder::new()
                    .when(conditions::status_is("$.job.TranscriptionJobStatus", "COMPLETED"), "Done")
                    .when(conditions::status_is("$.job.TranscriptionJobStatus", "FAILED"), "Failed")
                    .otherwise("Wait")
                    .build(),
            )
            .node("Failed", Node::fail("TranscriptionJobFailed", "transcription failed"))
            .node("Done", Node::Succeed)
            .start_at("Wait")
            .build()
            .unwrap();

        let engine = testing::engine(worker.clone(), Arc::new(ScriptedJobService::new()));
        let started = tokio::time::Instant::now();
        let outcome = engine.run(&graph, json!({})).await;

        assert!(outcome.status.is_success());
        assert_eq!(worker.call_count("GetTranscriptionJob"), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(15));
        assert_eq!(outcome.visited.len(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transition_limit() {
        let graph = PipelineGraphBuilder::new("forever")
            .node("Wait", Node::wait(Duration::from_secs(1), "Wait"))
            .node("Done", Node::Succeed)
            .start_at("Wait")
            .build()
            .unwrap();

        let engine = testing::engine(Arc::new(ScriptedWorker::new()), Arc::new(ScriptedJobService::new()))
            .with_config(ExecutorConfig { max_transitions: 5 });
        let outcome = engine.run(&graph, json!({})).await;

        assert!(matches!(outcome.status, TerminalStatus::Failed { ref error, .. } if error == codes::ITERATION_LIMIT));
        assert_eq!(outcome.visited.len(), 5);
    }

    #[tokio::test]
    async fn test_checkpoints_and_failure_marker() {
        let (store, hub, tracker) = testing::tracking_for("r1").await;
        let mut events = hub.subscribe("r1").await;

        let graph = PipelineGraphBuilder::new("tracked")
            .node("Transcribed", Node::checkpoint(Stage::Transcribed, "CheckModelId"))
            .node(
                "CheckModelId",
                ChoiceBuilder::new()
                    .when(crate::workflow::router::Condition::string_matches("$.modelID", "*anthropic*"), "Done")
                    .otherwise("UnsupportedModel")
                    .build(),
            )
            .node("UnsupportedModel", Node::fail("UnsupportedModel", "no reasoning route for model"))
            .node("Done", Node::Succeed)
            .start_at("Transcribed")
            .tracks_run("$.uuid")
            .build()
            .unwrap();

        let engine = testing::engine(Arc::new(ScriptedWorker::new()), Arc::new(ScriptedJobService::new()))
            .with_tracker(tracker);
        let outcome = engine.run(&graph, json!({"uuid": "r1", "modelID": "mistral.large"})).await;

        assert_eq!(
            outcome.status,
            TerminalStatus::Failed {
                error: "UnsupportedModel".into(),
                cause: "no reasoning route for model".into()
            }
        );

        let record = store.get_run("r1").await.unwrap().unwrap();
        assert_eq!(record.stage, 1);
        assert_eq!(record.failure_code.as_deref(), Some("UnsupportedModel"));

        assert_eq!(events.receiver.recv().await.map(|e| (e.stage, e.error.is_none())), Some((1, true)));
        let failed = events.receiver.recv().await.unwrap();
        assert_eq!(failed.stage, 1);
        assert!(failed.error.is_some());
    }

    #[tokio::test]
    async fn test_checkpoint_without_run_id_fails() {
        let (_store, _hub, tracker) = testing::tracking_for("r1").await;
        let graph = PipelineGraphBuilder::new("tracked")
            .node("Transcribed", Node::checkpoint(Stage::Transcribed, "Done"))
            .node("Done", Node::Succeed)
            .start_at("Transcribed")
            .tracks_run("$.uuid")
            .build()
            .unwrap();

        let engine = testing::engine(Arc::new(ScriptedWorker::new()), Arc::new(ScriptedJobService::new()))
            .with_tracker(tracker);
        let outcome = engine.run(&graph, json!({})).await;
        assert!(matches!(outcome.status, TerminalStatus::Failed { ref error, .. } if error == codes::RUNTIME));
    }
}
