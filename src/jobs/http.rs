// src/jobs/http.rs
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;

use super::{JobRequest, JobService, JobServiceError, SubmitAck};

/// Job backend exposed as `POST {base}/jobs` and `GET {base}/jobs/{name}`.
/// A 409 on submit means a job with that name already exists.
pub struct HttpJobService {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpJobService {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

fn transport(e: reqwest::Error) -> JobServiceError {
    JobServiceError::Transport(e.to_string())
}

#[async_trait]
impl JobService for HttpJobService {
    async fn submit(&self, request: &JobRequest) -> Result<SubmitAck, JobServiceError> {
        let response = self
            .client
            .post(format!("{}/jobs", self.base_url))
            .timeout(self.timeout)
            .json(request)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if status == StatusCode::CONFLICT {
            return Ok(SubmitAck::AlreadyExists);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(JobServiceError::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        Ok(SubmitAck::Accepted)
    }

    async fn status(&self, job_name: &str) -> Result<Value, JobServiceError> {
        let response = self
            .client
            .get(format!("{}/jobs/{}", self.base_url, job_name))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(JobServiceError::NotFound(job_name.to_string()));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(JobServiceError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| JobServiceError::Transport(format!("unreadable status document: {}", e)))
    }
}
