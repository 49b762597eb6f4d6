// src/workers/http.rs
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use super::{Worker, WorkerError};

/// Remote worker reached at `POST {base_url}/workers/{name}`
pub struct HttpWorker {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpWorker {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(900),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn url(&self, worker: &str) -> String {
        format!("{}/workers/{}", self.base_url, worker)
    }
}

#[async_trait]
impl Worker for HttpWorker {
    async fn invoke(&self, worker: &str, request: Value) -> Result<Value, WorkerError> {
        tracing::debug!(worker, "📤 Invoking remote worker");

        let response = self
            .client
            .post(self.url(worker))
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| WorkerError::Transport {
                worker: worker.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| WorkerError::Transport {
            worker: worker.to_string(),
            message: format!("failed to read response: {}", e),
        })?;

        if status.is_server_error() {
            return Err(WorkerError::Transport {
                worker: worker.to_string(),
                message: format!("HTTP {}: {}", status, body),
            });
        }

        let mut envelope: Value = serde_json::from_str(&body).map_err(|e| WorkerError::InvalidEnvelope {
            worker: worker.to_string(),
            message: format!("{} (body: {})", e, body),
        })?;

        // Bare payloads inherit the HTTP status as their statusCode
        if let Value::Object(fields) = &mut envelope {
            fields
                .entry("statusCode")
                .or_insert_with(|| Value::from(status.as_u16()));
        }

        Ok(envelope)
    }
}
