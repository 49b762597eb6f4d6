// Postgres-backed RecordStore
use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use tracing::info;

use super::{RecordStore, StoreError};
use crate::models::{ExecutionRecord, HighlightRecord, HighlightUpdate, Stage};

pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create tables if they do not exist
    pub async fn setup(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS execution_records (
                id VARCHAR(255) PRIMARY KEY,
                video_name TEXT NOT NULL,
                model_id TEXT NOT NULL,
                stage INTEGER NOT NULL DEFAULT 0,
                theme TEXT NOT NULL DEFAULT '',
                number_of_videos INTEGER NOT NULL,
                video_length INTEGER NOT NULL,
                detect_shots BOOLEAN NOT NULL DEFAULT FALSE,
                failure_code TEXT,
                failure_cause TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS highlight_records (
                run_id VARCHAR(255) NOT NULL,
                highlight_index INTEGER NOT NULL,
                start_time DOUBLE PRECISION,
                end_time DOUBLE PRECISION,
                duration INTEGER,
                text TEXT,
                question TEXT,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                PRIMARY KEY (run_id, highlight_index)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("✅ Record store tables setup complete");
        Ok(())
    }

    async fn ensure_exists(&self, id: &str) -> Result<(), StoreError> {
        sqlx::query("SELECT 1 FROM execution_records WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(|_| ())
            .ok_or_else(|| StoreError::RunNotFound(id.to_string()))
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn create_run(&self, record: ExecutionRecord) -> Result<ExecutionRecord, StoreError> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO execution_records
            (id, video_name, model_id, stage, theme, number_of_videos, video_length,
             detect_shots, failure_code, failure_cause, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&record.id)
        .bind(&record.video_name)
        .bind(&record.model_id)
        .bind(record.stage)
        .bind(&record.theme)
        .bind(record.number_of_videos)
        .bind(record.video_length)
        .bind(record.detect_shots)
        .bind(&record.failure_code)
        .bind(&record.failure_cause)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 0 {
            return Err(StoreError::DuplicateRun(record.id));
        }
        Ok(record)
    }

    async fn get_run(&self, id: &str) -> Result<Option<ExecutionRecord>, StoreError> {
        let record = sqlx::query_as::<_, ExecutionRecord>("SELECT * FROM execution_records WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn advance_stage(&self, id: &str, stage: Stage) -> Result<bool, StoreError> {
        let updated = sqlx::query(
            "UPDATE execution_records SET stage = $2, updated_at = $3 WHERE id = $1 AND stage < $2",
        )
        .bind(id)
        .bind(stage.as_i32())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() > 0 {
            return Ok(true);
        }
        self.ensure_exists(id).await?;
        Ok(false)
    }

    async fn mark_failed(&self, id: &str, code: &str, cause: &str) -> Result<(), StoreError> {
        let updated = sqlx::query(
            "UPDATE execution_records SET failure_code = $2, failure_cause = $3, updated_at = $4 WHERE id = $1",
        )
        .bind(id)
        .bind(code)
        .bind(cause)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::RunNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn clear_failure(&self, id: &str) -> Result<(), StoreError> {
        let updated = sqlx::query(
            "UPDATE execution_records SET failure_code = NULL, failure_cause = NULL WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::RunNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn delete_run(&self, id: &str) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM highlight_records WHERE run_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM execution_records WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(deleted.rows_affected() > 0)
    }

    async fn upsert_highlight(&self, highlight: HighlightRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO highlight_records
            (run_id, highlight_index, start_time, end_time, duration, text, question, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (run_id, highlight_index) DO UPDATE SET
                start_time = EXCLUDED.start_time,
                end_time = EXCLUDED.end_time,
                duration = EXCLUDED.duration,
                text = EXCLUDED.text,
                question = EXCLUDED.question,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&highlight.run_id)
        .bind(highlight.index)
        .bind(highlight.start_time)
        .bind(highlight.end_time)
        .bind(highlight.duration)
        .bind(&highlight.text)
        .bind(&highlight.question)
        .bind(highlight.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_highlights(&self, run_id: &str) -> Result<Vec<HighlightRecord>, StoreError> {
        let highlights = sqlx::query_as::<_, HighlightRecord>(
            "SELECT * FROM highlight_records WHERE run_id = $1 ORDER BY highlight_index",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(highlights)
    }

    async fn update_highlight(
        &self,
        run_id: &str,
        index: i32,
        update: HighlightUpdate,
    ) -> Result<HighlightRecord, StoreError> {
        let mut highlight = sqlx::query_as::<_, HighlightRecord>(
            "SELECT * FROM highlight_records WHERE run_id = $1 AND highlight_index = $2",
        )
        .bind(run_id)
        .bind(index)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::HighlightNotFound {
            run_id: run_id.to_string(),
            index,
        })?;

        highlight.apply(update);
        self.upsert_highlight(highlight.clone()).await?;
        Ok(highlight)
    }
}
