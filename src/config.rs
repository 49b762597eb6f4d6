// src/config.rs
//! Process configuration read from the environment (after `.env` is loaded).

use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::jobs::poller::DEFAULT_POLL_INTERVAL;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has an invalid value '{value}'")]
    Invalid { name: &'static str, value: String },
}

/// Which graph handles upload-completion events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPipeline {
    Classic,
    Unified,
}

impl FromStr for UploadPipeline {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "classic" => Ok(UploadPipeline::Classic),
            "unified" => Ok(UploadPipeline::Unified),
            _ => Err(()),
        }
    }
}

/// Cross-pipeline references handed to every graph builder
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub bucket_name: String,
    pub transcription_service: String,
    pub render_service: String,
    pub shot_detection_service: String,
    pub poll_interval: Duration,
    pub transcription_max_polls: u32,
    pub render_max_polls: u32,
    pub map_max_concurrency: usize,
    /// Delay inside the explicit transcription status loop
    pub transcription_wait: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            bucket_name: "video-shorts".to_string(),
            transcription_service: "transcription".to_string(),
            render_service: "render".to_string(),
            shot_detection_service: "shot-detection".to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            transcription_max_polls: 720,
            render_max_polls: 360,
            map_max_concurrency: 5,
            transcription_wait: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Absent means the in-memory store
    pub database_url: Option<String>,
    pub bind_addr: String,
    pub worker_base_url: String,
    pub job_service_url: String,
    pub event_webhook_url: Option<String>,
    pub upload_pipeline: UploadPipeline,
    pub pipeline: PipelineConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from any variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let defaults = PipelineConfig::default();

        let poll_interval = parse_or(&get, "POLL_INTERVAL_SECS", defaults.poll_interval.as_secs())?;
        let upload_pipeline = match get("UPLOAD_PIPELINE") {
            None => UploadPipeline::Unified,
            Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
                name: "UPLOAD_PIPELINE",
                value,
            })?,
        };

        Ok(Self {
            database_url: get("DATABASE_URL"),
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:3000".to_string()),
            worker_base_url: get("WORKER_BASE_URL").ok_or(ConfigError::Missing("WORKER_BASE_URL"))?,
            job_service_url: get("JOB_SERVICE_URL").ok_or(ConfigError::Missing("JOB_SERVICE_URL"))?,
            event_webhook_url: get("EVENT_WEBHOOK_URL"),
            upload_pipeline,
            pipeline: PipelineConfig {
                bucket_name: get("BUCKET_NAME").unwrap_or(defaults.bucket_name),
                poll_interval: Duration::from_secs(poll_interval),
                transcription_max_polls: parse_or(&get, "TRANSCRIPTION_MAX_POLLS", defaults.transcription_max_polls)?,
                render_max_polls: parse_or(&get, "RENDER_MAX_POLLS", defaults.render_max_polls)?,
                map_max_concurrency: parse_or(&get, "MAP_MAX_CONCURRENCY", defaults.map_max_concurrency)?,
                ..defaults
            },
        })
    }
}

fn parse_or<T, G>(get: &G, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}
