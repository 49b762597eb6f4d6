// src/db.rs
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

use crate::store::PgRecordStore;

/// Connect and make sure the record tables exist
pub async fn create_store(db_url: &str) -> Result<PgRecordStore, sqlx::Error> {
    let pool = create_pool(db_url).await?;
    let store = PgRecordStore::new(pool);

    tracing::info!("Preparing record tables...");
    store.setup().await?;
    tracing::info!("Record tables ready");

    Ok(store)
}

pub async fn create_pool(db_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(30))
        .connect(db_url)
        .await
}
