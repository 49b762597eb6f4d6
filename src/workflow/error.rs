// Graph configuration and node runtime errors
use thiserror::Error;

use crate::jobs::poller::PollError;
use crate::workers::WorkerError;

/// Error codes surfaced on a `Fail` terminal and matched by retry/catch policies
pub mod codes {
    /// Matches every error in retry and catch policies
    pub const ALL: &str = "States.ALL";
    pub const WORKER_TRANSIENT: &str = "Worker.Transient";
    pub const JOB_FAILED: &str = "Job.Failed";
    pub const JOB_TIMEOUT: &str = "Job.Timeout";
    pub const BRANCH_FAILED: &str = "Map.BranchFailed";
    pub const RUNTIME: &str = "States.Runtime";
    pub const ITERATION_LIMIT: &str = "States.IterationLimit";
}

/// Build-time graph validation failure (GraphConfigurationError)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("graph '{0}' has no start node")]
    MissingStart(String),

    #[error("start node '{start}' does not exist in graph '{graph}'")]
    UnknownStart { graph: String, start: String },

    #[error("node '{0}' is declared twice")]
    DuplicateNode(String),

    #[error("node '{from}' points at unknown node '{to}'")]
    DanglingEdge { from: String, to: String },

    #[error("choice node '{0}' has no default edge")]
    MissingChoiceDefault(String),

    #[error("map node '{node}' has an invalid sub-graph: {reason}")]
    InvalidMapSubgraph { node: String, reason: String },

    #[error("graph '{0}' declares checkpoints but no run id path")]
    MissingRunIdPath(String),

    #[error("graph '{0}' has no Succeed or Fail node")]
    NoTerminal(String),

    #[error("node '{node}' has an invalid path or parameter: {reason}")]
    InvalidNode { node: String, reason: String },
}

/// A node failed at runtime. Carries the error code and cause that end up on
/// a `Fail` terminal when no catch edge handles it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeError {
    #[error("worker call failed: {0}")]
    Transient(String),

    #[error("job '{job_name}' failed: {reason}")]
    JobFailed { job_name: String, reason: String },

    #[error("job '{job_name}' did not reach a terminal status after {attempts} polls")]
    JobTimeout { job_name: String, attempts: u32 },

    #[error("{failed} of {total} branches failed in map '{node}'")]
    BranchFailed { node: String, failed: usize, total: usize },

    #[error("{0}")]
    Runtime(String),

    #[error("exceeded {0} node transitions")]
    IterationLimit(usize),
}

impl NodeError {
    pub fn code(&self) -> &'static str {
        match self {
            NodeError::Transient(_) => codes::WORKER_TRANSIENT,
            NodeError::JobFailed { .. } => codes::JOB_FAILED,
            NodeError::JobTimeout { .. } => codes::JOB_TIMEOUT,
            NodeError::BranchFailed { .. } => codes::BRANCH_FAILED,
            NodeError::Runtime(_) => codes::RUNTIME,
            NodeError::IterationLimit(_) => codes::ITERATION_LIMIT,
        }
    }

    pub fn cause(&self) -> String {
        self.to_string()
    }
}

impl From<PollError> for NodeError {
    fn from(err: PollError) -> Self {
        match err {
            PollError::Transient { job_name, message } => {
                NodeError::Transient(format!("job '{}': {}", job_name, message))
            }
            PollError::Failed { job_name, reason } => NodeError::JobFailed { job_name, reason },
            PollError::Timeout { job_name, attempts } => NodeError::JobTimeout { job_name, attempts },
            PollError::UnknownService(service) => {
                NodeError::Runtime(format!("no job service registered as '{}'", service))
            }
        }
    }
}

impl From<WorkerError> for NodeError {
    fn from(err: WorkerError) -> Self {
        match err {
            WorkerError::Unknown(_) => NodeError::Runtime(err.to_string()),
            WorkerError::Transport { .. } | WorkerError::InvalidEnvelope { .. } => {
                NodeError::Transient(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_and_failure_have_distinct_codes() {
        let failed: NodeError = PollError::Failed {
            job_name: "r1_stepFunction".into(),
            reason: "bad media".into(),
        }
        .into();
        let timed_out: NodeError = PollError::Timeout {
            job_name: "r1_stepFunction".into(),
            attempts: 3,
        }
        .into();

        assert_eq!(failed.code(), codes::JOB_FAILED);
        assert_eq!(timed_out.code(), codes::JOB_TIMEOUT);
        assert!(timed_out.cause().contains("3 polls"));
    }

    #[test]
    fn test_worker_transport_errors_are_transient() {
        let err: NodeError = WorkerError::Transport {
            worker: "ExtractTopics".into(),
            message: "connection reset".into(),
        }
        .into();
        assert_eq!(err.code(), codes::WORKER_TRANSIENT);

        let unknown: NodeError = WorkerError::Unknown("Nope".into()).into();
        assert_eq!(unknown.code(), codes::RUNTIME);
    }
}
