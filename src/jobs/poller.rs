// src/jobs/poller.rs
//! Submit once, poll until terminal.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use backoff::{future::retry, ExponentialBackoff};
use thiserror::Error;
use tokio::sync::Mutex;

use super::{JobHandle, JobRequest, JobService, JobServiceError, JobState, StatusInterpreter, SubmitAck};

/// Observed default between polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Poll cadence and attempt ceiling for one PollJob node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    /// Total status calls before giving up with a timeout
    pub max_attempts: u32,
}

impl PollSettings {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL, 720)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PollError {
    /// The job service could not be reached after retries
    #[error("job '{job_name}': {message}")]
    Transient { job_name: String, message: String },

    /// The job (or its submission) was explicitly rejected
    #[error("job '{job_name}' failed: {reason}")]
    Failed { job_name: String, reason: String },

    /// No terminal status within the attempt ceiling
    #[error("job '{job_name}' still running after {attempts} polls")]
    Timeout { job_name: String, attempts: u32 },

    #[error("no job service registered as '{0}'")]
    UnknownService(String),
}

/// Generic adapter over the registered job services
pub struct JobPoller {
    services: HashMap<String, Arc<dyn JobService>>,
    /// `service/job_name` keys submitted by this process and not yet terminal
    submitted: Mutex<HashSet<String>>,
    backoff: ExponentialBackoff,
}

impl JobPoller {
    pub fn new() -> Self {
        Self {
            services: HashMap::new(),
            submitted: Mutex::new(HashSet::new()),
            backoff: ExponentialBackoff {
                initial_interval: Duration::from_secs(1),
                max_interval: Duration::from_secs(30),
                multiplier: 2.0,
                max_elapsed_time: Some(Duration::from_secs(120)),
                ..Default::default()
            },
        }
    }

    pub fn with_service(mut self, name: &str, service: Arc<dyn JobService>) -> Self {
        self.services.insert(name.to_string(), service);
        self
    }

    /// Override the retry schedule for transport failures
    pub fn with_backoff(mut self, backoff: ExponentialBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    fn service(&self, name: &str) -> Result<&Arc<dyn JobService>, PollError> {
        self.services
            .get(name)
            .ok_or_else(|| PollError::UnknownService(name.to_string()))
    }

    /// Submit then poll to a terminal state
    pub async fn run(
        &self,
        service: &str,
        request: JobRequest,
        interpreter: &dyn StatusInterpreter,
        settings: &PollSettings,
    ) -> Result<JobHandle, PollError> {
        let job_name = request.job_name.clone();
        self.submit(service, request).await?;
        let outcome = self.poll(service, &job_name, interpreter, settings).await;

        // Later submits of this name go to the service, which answers AlreadyExists
        self.submitted.lock().await.remove(&reservation(service, &job_name));
        outcome
    }

    /// Number of jobs submitted by this process that are still being polled
    pub async fn in_flight(&self) -> usize {
        self.submitted.lock().await.len()
    }

    /// Idempotent submission. A name this process already submitted is a
    /// no-op, and a name the service already knows is treated as in flight.
    pub async fn submit(&self, service: &str, request: JobRequest) -> Result<(), PollError> {
        let backend = self.service(service)?;
        let key = reservation(service, &request.job_name);

        if !self.submitted.lock().await.insert(key.clone()) {
            tracing::debug!(job_name = %request.job_name, "job already submitted, re-attaching");
            return Ok(());
        }

        let operation = || async {
            backend.submit(&request).await.map_err(|e| {
                if e.is_transient() {
                    tracing::warn!(job_name = %request.job_name, "⚠️ Job submit failed (retrying): {}", e);
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })
        };

        match retry(self.backoff.clone(), operation).await {
            Ok(SubmitAck::Accepted) => {
                tracing::info!(job_name = %request.job_name, service, "🚀 Submitted job");
                Ok(())
            }
            Ok(SubmitAck::AlreadyExists) => {
                tracing::info!(job_name = %request.job_name, service, "♻️ Job already exists, polling it");
                Ok(())
            }
            Err(e) => {
                // Release the reservation so a later attempt may submit again
                self.submitted.lock().await.remove(&key);
                Err(match e {
                    JobServiceError::Rejected { status, message } if status < 500 => PollError::Failed {
                        job_name: request.job_name.clone(),
                        reason: format!("submission rejected ({}): {}", status, message),
                    },
                    other => PollError::Transient {
                        job_name: request.job_name.clone(),
                        message: other.to_string(),
                    },
                })
            }
        }
    }

    /// Poll until COMPLETED, FAILED, or the attempt ceiling.
    /// The first poll is immediate; `interval` is slept between polls.
    pub async fn poll(
        &self,
        service: &str,
        job_name: &str,
        interpreter: &dyn StatusInterpreter,
        settings: &PollSettings,
    ) -> Result<JobHandle, PollError> {
        let backend = self.service(service)?;
        let mut handle = JobHandle::new(job_name);

        for attempt in 1..=settings.max_attempts {
            if attempt > 1 {
                tokio::time::sleep(settings.interval).await;
            }

            let operation = || async {
                backend.status(job_name).await.map_err(|e| {
                    if e.is_transient() {
                        tracing::warn!(job_name, "⚠️ Job status failed (retrying): {}", e);
                        backoff::Error::transient(e)
                    } else {
                        backoff::Error::permanent(e)
                    }
                })
            };
            let raw = retry(self.backoff.clone(), operation)
                .await
                .map_err(|e| PollError::Transient {
                    job_name: job_name.to_string(),
                    message: e.to_string(),
                })?;

            let report = interpreter.classify(&raw);
            handle.advance(report.state);
            tracing::debug!(job_name, attempt, state = ?report.state, "polled job");

            match report.state {
                JobState::Completed => {
                    handle.result = report.result;
                    tracing::info!(job_name, attempt, "✅ Job completed");
                    return Ok(handle);
                }
                JobState::Failed => {
                    tracing::warn!(job_name, attempt, "❌ Job failed");
                    return Err(PollError::Failed {
                        job_name: job_name.to_string(),
                        reason: report.reason.unwrap_or_else(|| "job reported FAILED".to_string()),
                    });
                }
                JobState::Submitted | JobState::InProgress => {}
            }
        }

        tracing::warn!(job_name, attempts = settings.max_attempts, "⏰ Job poll ceiling reached");
        Err(PollError::Timeout {
            job_name: job_name.to_string(),
            attempts: settings.max_attempts,
        })
    }
}

fn reservation(service: &str, job_name: &str) -> String {
    format!("{}/{}", service, job_name)
}

impl Default for JobPoller {
    fn default() -> Self {
        Self::new()
    }
}
