// PipelineGraph - Declarative node arena with build-time validation
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use super::error::{codes, GraphError, NodeError};
use super::path::{JsonPath, ResultPath};
use super::router::Choice;
use super::state::{Parameters, ValueSource};
use crate::jobs::poller::PollSettings;
use crate::jobs::StatusField;
use crate::models::Stage;

/// Upper bound on a single retry delay
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(3600);

/// Retry policy for Invoke and PollJob nodes
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Error codes this policy applies to (`States.ALL` for any)
    pub errors: Vec<String>,
    /// Retries after the first attempt
    pub max_retries: u32,
    pub interval: Duration,
    /// 1.0 keeps the interval fixed, >1.0 grows it per retry
    pub backoff_rate: f64,
}

impl RetryPolicy {
    /// Fixed-interval retry of transient worker errors
    pub fn fixed(max_retries: u32, interval: Duration) -> Self {
        Self {
            errors: vec![codes::WORKER_TRANSIENT.to_string()],
            max_retries,
            interval,
            backoff_rate: 1.0,
        }
    }

    pub fn exponential(max_retries: u32, interval: Duration, backoff_rate: f64) -> Self {
        Self {
            backoff_rate,
            ..Self::fixed(max_retries, interval)
        }
    }

    pub fn on(mut self, errors: &[&str]) -> Self {
        self.errors = errors.iter().map(|e| e.to_string()).collect();
        self
    }

    pub fn matches(&self, err: &NodeError) -> bool {
        matches_code(&self.errors, err.code())
    }

    /// Delay before retry number `retry` (1-based), capped at `MAX_RETRY_DELAY`
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.backoff_rate.max(1.0).powi(exponent);
        Duration::try_from_secs_f64(self.interval.as_secs_f64() * factor)
            .map_or(MAX_RETRY_DELAY, |delay| delay.min(MAX_RETRY_DELAY))
    }
}

/// Routes matching errors to an alternate next node
#[derive(Debug, Clone, PartialEq)]
pub struct Catcher {
    pub errors: Vec<String>,
    pub next: String,
    /// Where `{Error, Cause}` is written before moving on
    pub result_path: ResultPath,
}

impl Catcher {
    pub fn matches(&self, err: &NodeError) -> bool {
        matches_code(&self.errors, err.code())
    }
}

fn matches_code(errors: &[String], code: &str) -> bool {
    errors.iter().any(|e| e == codes::ALL || e == code)
}

fn catcher(errors: &[&str], next: &str, result_path: ResultPath) -> Catcher {
    Catcher {
        errors: errors.iter().map(|e| e.to_string()).collect(),
        next: next.to_string(),
        result_path,
    }
}

/// Pure data transform
#[derive(Debug, Clone, PartialEq)]
pub struct PassNode {
    /// `None` passes the context through untouched
    pub parameters: Option<Parameters>,
    pub result_path: ResultPath,
    pub next: String,
}

impl PassNode {
    pub fn new(next: &str) -> Self {
        Self {
            parameters: None,
            result_path: ResultPath::at("$"),
            next: next.to_string(),
        }
    }

    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = Some(parameters);
        self
    }

    pub fn with_result_path(mut self, result_path: ResultPath) -> Self {
        self.result_path = result_path;
        self
    }
}

/// Synchronous call to an external worker
#[derive(Debug, Clone, PartialEq)]
pub struct InvokeNode {
    pub worker: String,
    /// Request projection; `None` sends the whole context
    pub payload: Option<Parameters>,
    /// Projection applied to the worker response before it is stored
    pub result_selector: Option<Parameters>,
    pub result_path: ResultPath,
    pub retry: Option<RetryPolicy>,
    pub catch: Vec<Catcher>,
    pub next: String,
}

impl InvokeNode {
    pub fn new(worker: &str, next: &str) -> Self {
        Self {
            worker: worker.to_string(),
            payload: None,
            result_selector: None,
            result_path: ResultPath::Discard,
            retry: None,
            catch: Vec::new(),
            next: next.to_string(),
        }
    }

    pub fn with_payload(mut self, payload: Parameters) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_result_selector(mut self, selector: Parameters) -> Self {
        self.result_selector = Some(selector);
        self
    }

    pub fn with_result_path(mut self, result_path: ResultPath) -> Self {
        self.result_path = result_path;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn catching(mut self, errors: &[&str], next: &str, result_path: ResultPath) -> Self {
        self.catch.push(catcher(errors, next, result_path));
        self
    }
}

/// Submit an async external job and block this logical thread until it is terminal
#[derive(Debug, Clone, PartialEq)]
pub struct PollJobNode {
    pub service: String,
    pub job_name: ValueSource,
    pub media_uri: ValueSource,
    pub output_location: ValueSource,
    pub options: Parameters,
    pub interpreter: StatusField,
    pub settings: PollSettings,
    pub result_path: ResultPath,
    pub retry: Option<RetryPolicy>,
    pub catch: Vec<Catcher>,
    pub next: String,
}

impl PollJobNode {
    pub fn new(service: &str, job_name: ValueSource, next: &str) -> Self {
        Self {
            service: service.to_string(),
            job_name,
            media_uri: ValueSource::Literal(serde_json::Value::Null),
            output_location: ValueSource::Literal(serde_json::Value::Null),
            options: Parameters::new(),
            interpreter: StatusField::envelope(),
            settings: PollSettings::default(),
            result_path: ResultPath::Discard,
            retry: None,
            catch: Vec::new(),
            next: next.to_string(),
        }
    }

    pub fn with_media(mut self, media_uri: ValueSource, output_location: ValueSource) -> Self {
        self.media_uri = media_uri;
        self.output_location = output_location;
        self
    }

    pub fn with_options(mut self, options: Parameters) -> Self {
        self.options = options;
        self
    }

    pub fn with_interpreter(mut self, interpreter: StatusField) -> Self {
        self.interpreter = interpreter;
        self
    }

    pub fn with_settings(mut self, settings: PollSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_result_path(mut self, result_path: ResultPath) -> Self {
        self.result_path = result_path;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn catching(mut self, errors: &[&str], next: &str, result_path: ResultPath) -> Self {
        self.catch.push(catcher(errors, next, result_path));
        self
    }
}

/// Fixed delay; the loop-back target of polling Choice nodes
#[derive(Debug, Clone, PartialEq)]
pub struct WaitNode {
    pub duration: Duration,
    pub next: String,
}

/// Run a sub-graph once per item of a context collection
#[derive(Debug, Clone)]
pub struct MapNode {
    pub items_path: JsonPath,
    /// Extra fields for each branch context, resolved with the item in scope
    pub item_selector: Option<Parameters>,
    pub branch: Arc<PipelineGraph>,
    /// 0 means unbounded
    pub max_concurrency: usize,
    /// Abort siblings and fail the node on the first failed branch
    pub fail_fast: bool,
    /// Part of each branch's final context reported in its item outcome
    pub branch_output: Option<JsonPath>,
    pub result_path: ResultPath,
    pub catch: Vec<Catcher>,
    pub next: String,
}

impl MapNode {
    pub fn new(items_path: &str, branch: PipelineGraph, next: &str) -> Self {
        Self {
            items_path: JsonPath::new(items_path),
            item_selector: None,
            branch: Arc::new(branch),
            max_concurrency: 0,
            fail_fast: false,
            branch_output: None,
            result_path: ResultPath::Discard,
            catch: Vec::new(),
            next: next.to_string(),
        }
    }

    pub fn with_item_selector(mut self, selector: Parameters) -> Self {
        self.item_selector = Some(selector);
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn fail_fast(mut self) -> Self {
        self.fail_fast = true;
        self
    }

    pub fn with_branch_output(mut self, path: &str) -> Self {
        self.branch_output = Some(JsonPath::new(path));
        self
    }

    pub fn with_result_path(mut self, result_path: ResultPath) -> Self {
        self.result_path = result_path;
        self
    }

    pub fn catching(mut self, errors: &[&str], next: &str, result_path: ResultPath) -> Self {
        self.catch.push(catcher(errors, next, result_path));
        self
    }
}

/// Record a stage for the run and notify subscribers
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointNode {
    pub stage: Stage,
    pub next: String,
}

/// Terminal failure
#[derive(Debug, Clone, PartialEq)]
pub struct FailNode {
    pub error: String,
    pub cause: String,
}

/// Graph node
#[derive(Debug, Clone)]
pub enum Node {
    Pass(PassNode),
    Invoke(InvokeNode),
    PollJob(PollJobNode),
    Wait(WaitNode),
    Choice(Choice),
    Map(MapNode),
    Checkpoint(CheckpointNode),
    Succeed,
    Fail(FailNode),
}

impl Node {
    pub fn wait(duration: Duration, next: &str) -> Self {
        Node::Wait(WaitNode {
            duration,
            next: next.to_string(),
        })
    }

    pub fn checkpoint(stage: Stage, next: &str) -> Self {
        Node::Checkpoint(CheckpointNode {
            stage,
            next: next.to_string(),
        })
    }

    pub fn fail(error: &str, cause: &str) -> Self {
        Node::Fail(FailNode {
            error: error.to_string(),
            cause: cause.to_string(),
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Node::Pass(_) => "Pass",
            Node::Invoke(_) => "Invoke",
            Node::PollJob(_) => "PollJob",
            Node::Wait(_) => "Wait",
            Node::Choice(_) => "Choice",
            Node::Map(_) => "Map",
            Node::Checkpoint(_) => "Checkpoint",
            Node::Succeed => "Succeed",
            Node::Fail(_) => "Fail",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Node::Succeed | Node::Fail(_))
    }

    /// Every node this one can hand control to, including catch edges
    pub fn successors(&self) -> Vec<&str> {
        match self {
            Node::Pass(n) => vec![n.next.as_str()],
            Node::Wait(n) => vec![n.next.as_str()],
            Node::Checkpoint(n) => vec![n.next.as_str()],
            Node::Invoke(n) => with_catch_targets(&n.next, &n.catch),
            Node::PollJob(n) => with_catch_targets(&n.next, &n.catch),
            Node::Map(n) => with_catch_targets(&n.next, &n.catch),
            Node::Choice(choice) => {
                let mut targets: Vec<&str> = choice.rules.iter().map(|r| r.next.as_str()).collect();
                targets.extend(choice.default.as_deref());
                targets
            }
            Node::Succeed | Node::Fail(_) => Vec::new(),
        }
    }

    fn validate_fields(&self) -> Result<(), String> {
        match self {
            Node::Pass(n) => {
                if let Some(parameters) = &n.parameters {
                    parameters.validate(false)?;
                }
                n.result_path.validate()
            }
            Node::Invoke(n) => {
                if let Some(payload) = &n.payload {
                    payload.validate(false)?;
                }
                if let Some(selector) = &n.result_selector {
                    selector.validate(false)?;
                }
                n.result_path.validate()?;
                n.catch.iter().try_for_each(|c| c.result_path.validate())
            }
            Node::PollJob(n) => {
                Parameters::new()
                    .field("jobName", n.job_name.clone())
                    .field("mediaUri", n.media_uri.clone())
                    .field("outputLocation", n.output_location.clone())
                    .validate(false)?;
                n.options.validate(false)?;
                n.interpreter.validate()?;
                if n.settings.max_attempts == 0 {
                    return Err("poll attempt ceiling must be at least 1".to_string());
                }
                n.result_path.validate()?;
                n.catch.iter().try_for_each(|c| c.result_path.validate())
            }
            Node::Choice(choice) => choice.rules.iter().try_for_each(|r| r.condition.validate()),
            Node::Map(n) => {
                n.items_path.validate()?;
                if let Some(selector) = &n.item_selector {
                    selector.validate(true)?;
                }
                if let Some(output) = &n.branch_output {
                    output.validate()?;
                }
                n.result_path.validate()?;
                n.catch.iter().try_for_each(|c| c.result_path.validate())
            }
            Node::Wait(_) | Node::Checkpoint(_) | Node::Succeed | Node::Fail(_) => Ok(()),
        }
    }
}

fn with_catch_targets<'a>(next: &'a str, catch: &'a [Catcher]) -> Vec<&'a str> {
    std::iter::once(next)
        .chain(catch.iter().map(|c| c.next.as_str()))
        .collect()
}

impl From<PassNode> for Node {
    fn from(node: PassNode) -> Self {
        Node::Pass(node)
    }
}

impl From<InvokeNode> for Node {
    fn from(node: InvokeNode) -> Self {
        Node::Invoke(node)
    }
}

impl From<PollJobNode> for Node {
    fn from(node: PollJobNode) -> Self {
        Node::PollJob(node)
    }
}

impl From<Choice> for Node {
    fn from(choice: Choice) -> Self {
        Node::Choice(choice)
    }
}

impl From<MapNode> for Node {
    fn from(node: MapNode) -> Self {
        Node::Map(node)
    }
}

/// Immutable pipeline definition. Built once per variant, never mutated at runtime.
#[derive(Debug)]
pub struct PipelineGraph {
    name: String,
    nodes: HashMap<String, Node>,
    /// Declaration order, for stable listings
    order: Vec<String>,
    start: String,
    /// Where the run id lives in the context (checkpoints and failure markers)
    run_id_path: Option<JsonPath>,
}

impl PipelineGraph {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn start(&self) -> &str {
        &self.start
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node_ids(&self) -> &[String] {
        &self.order
    }

    pub fn run_id_path(&self) -> Option<&JsonPath> {
        self.run_id_path.as_ref()
    }

    /// Run id of an execution context, if this graph tracks one
    pub fn run_id(&self, ctx: &serde_json::Value) -> Option<String> {
        self.run_id_path
            .as_ref()?
            .get(ctx)?
            .as_str()
            .map(str::to_string)
    }

    fn contains_checkpoints(&self) -> bool {
        self.nodes.values().any(|node| match node {
            Node::Checkpoint(_) => true,
            Node::Map(map) => map.branch.contains_checkpoints(),
            _ => false,
        })
    }

    /// Nodes reachable from the start node (DFS)
    fn reachable(&self) -> HashSet<&str> {
        let mut seen = HashSet::new();
        let mut stack = vec![self.start.as_str()];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            if let Some(node) = self.nodes.get(id) {
                stack.extend(node.successors());
            }
        }
        seen
    }
}

/// Builder for PipelineGraph
pub struct PipelineGraphBuilder {
    name: String,
    nodes: Vec<(String, Node)>,
    start: Option<String>,
    run_id_path: Option<JsonPath>,
}

impl PipelineGraphBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            nodes: Vec::new(),
            start: None,
            run_id_path: None,
        }
    }

    pub fn node(mut self, id: &str, node: impl Into<Node>) -> Self {
        self.nodes.push((id.to_string(), node.into()));
        self
    }

    pub fn start_at(mut self, id: &str) -> Self {
        self.start = Some(id.to_string());
        self
    }

    pub fn tracks_run(mut self, path: &str) -> Self {
        self.run_id_path = Some(JsonPath::new(path));
        self
    }

    /// Validate and freeze the graph
    pub fn build(self) -> Result<PipelineGraph, GraphError> {
        let start = self
            .start
            .ok_or_else(|| GraphError::MissingStart(self.name.clone()))?;

        let mut nodes = HashMap::with_capacity(self.nodes.len());
        let mut order = Vec::with_capacity(self.nodes.len());
        for (id, node) in self.nodes {
            if nodes.contains_key(&id) {
                return Err(GraphError::DuplicateNode(id));
            }
            order.push(id.clone());
            nodes.insert(id, node);
        }

        if !nodes.contains_key(&start) {
            return Err(GraphError::UnknownStart {
                graph: self.name,
                start,
            });
        }

        if let Some(path) = &self.run_id_path {
            path.validate().map_err(|reason| GraphError::InvalidNode {
                node: format!("{} (run id path)", self.name),
                reason,
            })?;
        }

        for id in &order {
            let node = &nodes[id];

            for target in node.successors() {
                if !nodes.contains_key(target) {
                    return Err(GraphError::DanglingEdge {
                        from: id.clone(),
                        to: target.to_string(),
                    });
                }
            }

            match node {
                Node::Choice(choice) if choice.default.is_none() => {
                    return Err(GraphError::MissingChoiceDefault(id.clone()));
                }
                Node::Map(map) if map.branch.contains_checkpoints() => {
                    return Err(GraphError::InvalidMapSubgraph {
                        node: id.clone(),
                        reason: "checkpoints are only allowed on the root graph".to_string(),
                    });
                }
                Node::Checkpoint(_) if self.run_id_path.is_none() => {
                    return Err(GraphError::MissingRunIdPath(self.name.clone()));
                }
                _ => {}
            }

            node.validate_fields().map_err(|reason| GraphError::InvalidNode {
                node: id.clone(),
                reason,
            })?;
        }

        if !nodes.values().any(Node::is_terminal) {
            return Err(GraphError::NoTerminal(self.name));
        }

        let graph = PipelineGraph {
            name: self.name,
            nodes,
            order,
            start,
            run_id_path: self.run_id_path,
        };

        let reachable = graph.reachable();
        for id in &graph.order {
            if !reachable.contains(id.as_str()) {
                tracing::warn!(graph = %graph.name, node = %id, "node is unreachable from the start node");
            }
        }

        tracing::debug!("✅ Pipeline graph '{}' built: {} nodes", graph.name, graph.nodes.len());
        Ok(graph)
    }
}
