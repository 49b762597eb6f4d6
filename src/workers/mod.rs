// src/workers/mod.rs
//! Synchronous workers called by Invoke nodes.
//! A worker takes a JSON request and answers with a `{ statusCode, ...payload }` envelope.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub mod highlights;
pub mod http;

pub use highlights::HighlightsWorker;
pub use http::HttpWorker;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkerError {
    #[error("no worker registered as '{0}'")]
    Unknown(String),

    #[error("worker '{worker}' call failed: {message}")]
    Transport { worker: String, message: String },

    #[error("worker '{worker}' returned an invalid envelope: {message}")]
    InvalidEnvelope { worker: String, message: String },
}

#[async_trait]
pub trait Worker: Send + Sync {
    /// Call `worker` with `request` and return its response envelope
    async fn invoke(&self, worker: &str, request: Value) -> Result<Value, WorkerError>;
}

/// Worker lookup by name, with an optional catch-all for remote workers
#[derive(Clone, Default)]
pub struct WorkerRegistry {
    named: HashMap<String, Arc<dyn Worker>>,
    fallback: Option<Arc<dyn Worker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, name: &str, worker: Arc<dyn Worker>) -> Self {
        self.named.insert(name.to_string(), worker);
        self
    }

    /// Worker used for every name without its own registration
    pub fn with_fallback(mut self, worker: Arc<dyn Worker>) -> Self {
        self.fallback = Some(worker);
        self
    }

    pub async fn invoke(&self, name: &str, request: Value) -> Result<Value, WorkerError> {
        let worker = self
            .named
            .get(name)
            .or(self.fallback.as_ref())
            .ok_or_else(|| WorkerError::Unknown(name.to_string()))?;

        let response = worker.invoke(name, request).await?;
        check_envelope(name, response)
    }
}

/// Responses must be JSON objects; `statusCode` itself is routed on by the graph
fn check_envelope(worker: &str, response: Value) -> Result<Value, WorkerError> {
    match &response {
        Value::Object(fields) if fields.get("statusCode").map_or(true, Value::is_i64) => Ok(response),
        Value::Object(_) => Err(WorkerError::InvalidEnvelope {
            worker: worker.to_string(),
            message: "statusCode is not an integer".to_string(),
        }),
        other => Err(WorkerError::InvalidEnvelope {
            worker: worker.to_string(),
            message: format!("expected a JSON object, got {}", other),
        }),
    }
}

/// Success envelope helper for in-process workers
pub fn ok_envelope(payload: Value) -> Value {
    let mut envelope = match payload {
        Value::Object(fields) => fields,
        other => {
            let mut fields = serde_json::Map::new();
            fields.insert("body".to_string(), other);
            fields
        }
    };
    envelope.insert("statusCode".to_string(), Value::from(200));
    Value::Object(envelope)
}
