// src/jobs/mod.rs
//! Async external jobs (transcription, shot detection, rendering).
//! Jobs are named deterministically so a restarted run re-attaches to the
//! job it already started instead of paying for a second one.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::workflow::path::JsonPath;

pub mod http;
pub mod poller;

/// Lifecycle of an async job. Transitions only move forward.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Submitted,
    InProgress,
    Completed,
    Failed,
}

impl JobState {
    fn rank(self) -> u8 {
        match self {
            JobState::Submitted => 0,
            JobState::InProgress => 1,
            JobState::Completed | JobState::Failed => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.rank() == 2
    }
}

/// A submitted job as seen by the node that owns it
#[derive(Debug, Clone, PartialEq)]
pub struct JobHandle {
    pub job_name: String,
    pub state: JobState,
    /// Opaque payload reported with COMPLETED
    pub result: Option<Value>,
}

impl JobHandle {
    pub fn new(job_name: &str) -> Self {
        Self {
            job_name: job_name.to_string(),
            state: JobState::Submitted,
            result: None,
        }
    }

    /// Move to `next` if that is a forward transition. Returns whether the state changed.
    pub fn advance(&mut self, next: JobState) -> bool {
        if next.rank() > self.state.rank() {
            self.state = next;
            true
        } else {
            false
        }
    }
}

/// Deterministic job name for (run id, stage tag, optional item index).
///
/// `r1` + `stepFunction` gives `r1_stepFunction`; `r1` + `render` + 2 gives `r1_render_2`.
pub fn derive_job_name(run_id: &str, tag: &str, index: Option<usize>) -> String {
    match index {
        Some(index) => format!("{}_{}_{}", run_id, tag, index),
        None => format!("{}_{}", run_id, tag),
    }
}

/// Submission payload sent to a job service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    pub job_name: String,
    pub media_uri: Value,
    pub output_location: Value,
    #[serde(default)]
    pub options: Value,
}

/// How a job service answered a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitAck {
    Accepted,
    /// A job with this name already exists; it is polled instead
    AlreadyExists,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobServiceError {
    #[error("job service unreachable: {0}")]
    Transport(String),

    #[error("job service rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("job '{0}' not found")]
    NotFound(String),
}

impl JobServiceError {
    /// Whether retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            JobServiceError::Transport(_) => true,
            JobServiceError::Rejected { status, .. } => *status == 429 || *status >= 500,
            JobServiceError::NotFound(_) => false,
        }
    }
}

/// External async job backend
#[async_trait]
pub trait JobService: Send + Sync {
    async fn submit(&self, request: &JobRequest) -> Result<SubmitAck, JobServiceError>;

    /// Raw status document for a job; classified by a `StatusInterpreter`
    async fn status(&self, job_name: &str) -> Result<Value, JobServiceError>;
}

/// Classification of one raw status document
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub state: JobState,
    pub result: Option<Value>,
    pub reason: Option<String>,
}

/// Maps a service-specific status document onto `JobState`.
/// Anything unrecognised must come back as `InProgress`.
pub trait StatusInterpreter: Send + Sync {
    fn classify(&self, raw: &Value) -> StatusReport;
}

/// Reads the status string at a path and compares it against the service's
/// terminal values
#[derive(Debug, Clone, PartialEq)]
pub struct StatusField {
    pub path: JsonPath,
    pub completed: Vec<String>,
    pub failed: Vec<String>,
    /// Result payload on COMPLETED (`$` for the whole document)
    pub result_path: JsonPath,
    pub reason_path: Option<JsonPath>,
}

impl StatusField {
    /// `{ status: "IN_PROGRESS"|"COMPLETED"|"FAILED", result?, reason? }`
    pub fn envelope() -> Self {
        Self {
            path: JsonPath::new("$.status"),
            completed: vec!["COMPLETED".to_string()],
            failed: vec!["FAILED".to_string()],
            result_path: JsonPath::new("$.result"),
            reason_path: Some(JsonPath::new("$.reason")),
        }
    }

    /// Custom status field, reporting the whole document as the result
    pub fn at(path: &str, completed: &[&str], failed: &[&str]) -> Self {
        Self {
            path: JsonPath::new(path),
            completed: completed.iter().map(|s| s.to_string()).collect(),
            failed: failed.iter().map(|s| s.to_string()).collect(),
            result_path: JsonPath::root(),
            reason_path: None,
        }
    }

    pub fn with_reason(mut self, path: &str) -> Self {
        self.reason_path = Some(JsonPath::new(path));
        self
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        self.path.validate()?;
        self.result_path.validate()?;
        if let Some(reason) = &self.reason_path {
            reason.validate()?;
        }
        if self.completed.is_empty() {
            return Err("status interpreter has no completed value".to_string());
        }
        Ok(())
    }
}

impl StatusInterpreter for StatusField {
    fn classify(&self, raw: &Value) -> StatusReport {
        let status = self.path.get(raw).and_then(Value::as_str).unwrap_or_default();

        if self.completed.iter().any(|s| s == status) {
            return StatusReport {
                state: JobState::Completed,
                result: self.result_path.get(raw).cloned(),
                reason: None,
            };
        }

        if self.failed.iter().any(|s| s == status) {
            let reason = self
                .reason_path
                .as_ref()
                .and_then(|p| p.get(raw))
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .unwrap_or_else(|| format!("job reported {}", status));
            return StatusReport {
                state: JobState::Failed,
                result: None,
                reason: Some(reason),
            };
        }

        StatusReport {
            state: JobState::InProgress,
            result: None,
            reason: None,
        }
    }
}
