use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Coarse-grained milestone of a run, persisted as an integer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Created = 0,
    Transcribed = 1,
    HighlightsExtracted = 2,
    Complete = 3,
}

impl Stage {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Stage::Created),
            1 => Some(Stage::Transcribed),
            2 => Some(Stage::HighlightsExtracted),
            3 => Some(Stage::Complete),
            _ => None,
        }
    }
}

impl Serialize for Stage {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.as_i32())
    }
}

impl<'de> Deserialize<'de> for Stage {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = i32::deserialize(deserializer)?;
        Stage::from_i32(value).ok_or_else(|| serde::de::Error::custom(format!("unknown stage {}", value)))
    }
}

/// One pipeline run (the "history" entry shown to the user)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct ExecutionRecord {
    pub id: String,
    pub video_name: String,
    pub model_id: String,
    /// Highest checkpoint reached; never decreases
    pub stage: i32,
    pub theme: String,
    pub number_of_videos: i32,
    pub video_length: i32,
    pub detect_shots: bool,
    /// Set when the run ended in a Fail terminal
    pub failure_code: Option<String>,
    pub failure_cause: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExecutionRecord {
    pub fn stage(&self) -> Option<Stage> {
        Stage::from_i32(self.stage)
    }
}

/// Request body for creating a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewExecution {
    /// Generated when absent
    pub id: Option<String>,
    pub video_name: String,
    pub model_id: String,
    #[serde(default)]
    pub theme: String,
    #[serde(default = "default_number_of_videos")]
    pub number_of_videos: i32,
    #[serde(default = "default_video_length")]
    pub video_length: i32,
    #[serde(default)]
    pub detect_shots: bool,
}

fn default_number_of_videos() -> i32 {
    3
}

fn default_video_length() -> i32 {
    60
}

impl NewExecution {
    /// Defaults for a run first seen through an upload event
    pub fn for_upload(run_id: &str, video_name: &str) -> Self {
        Self {
            id: Some(run_id.to_string()),
            video_name: video_name.to_string(),
            model_id: String::new(),
            theme: String::new(),
            number_of_videos: default_number_of_videos(),
            video_length: default_video_length(),
            detect_shots: false,
        }
    }

    pub fn into_record(self) -> ExecutionRecord {
        let now = Utc::now();
        ExecutionRecord {
            id: self.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            video_name: self.video_name,
            model_id: self.model_id,
            stage: Stage::Created.as_i32(),
            theme: self.theme,
            number_of_videos: self.number_of_videos,
            video_length: self.video_length,
            detect_shots: self.detect_shots,
            failure_code: None,
            failure_cause: None,
            created_at: now,
            updated_at: now,
        }
    }
}
