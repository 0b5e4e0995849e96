use anyhow::{Context, Result};

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    // Record store: one JSON value per key
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS records (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await
    .context("creating records table")?;

    // Blob store: binary payloads with retention bookkeeping
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS blobs (
            id TEXT PRIMARY KEY,
            data BLOB NOT NULL,
            byte_size INTEGER NOT NULL,
            stored_at INTEGER NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}'
        )
        "#,
    )
    .execute(&pool)
    .await
    .context("creating blobs table")?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_blobs_stored_at ON blobs(stored_at)")
        .execute(&pool)
        .await?;

    // Export bundles that overflow the record store; outside payload retention
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS export_blobs (
            id TEXT PRIMARY KEY,
            data BLOB NOT NULL,
            byte_size INTEGER NOT NULL,
            stored_at INTEGER NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}'
        )
        "#,
    )
    .execute(&pool)
    .await
    .context("creating export_blobs table")?;

    pool.close().await;
    Ok(())
}
