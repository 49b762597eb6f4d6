use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One extracted segment of a run, keyed by (run_id, index)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct HighlightRecord {
    pub run_id: String,
    #[sqlx(rename = "highlight_index")]
    pub index: i32,
    pub start_time: Option<f64>,
    pub end_time: Option<f64>,
    pub duration: Option<i32>,
    pub text: Option<String>,
    pub question: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl HighlightRecord {
    pub fn new(run_id: &str, index: i32) -> Self {
        Self {
            run_id: run_id.to_string(),
            index,
            start_time: None,
            end_time: None,
            duration: None,
            text: None,
            question: None,
            updated_at: Utc::now(),
        }
    }

    pub fn apply(&mut self, update: HighlightUpdate) {
        if let Some(start) = update.start_time {
            self.start_time = Some(start);
        }
        if let Some(end) = update.end_time {
            self.end_time = Some(end);
        }
        if update.text.is_some() {
            self.text = update.text;
        }
        if update.question.is_some() {
            self.question = update.question;
        }
        if let (Some(start), Some(end)) = (self.start_time, self.end_time) {
            self.duration = Some((end - start).max(0.0).round() as i32);
        }
        self.updated_at = Utc::now();
    }
}

/// Edit from the highlight editing surface; absent fields are left alone
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HighlightUpdate {
    pub start_time: Option<f64>,
    pub end_time: Option<f64>,
    pub text: Option<String>,
    pub question: Option<String>,
}
