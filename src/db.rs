use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use snap_journal_core::tiering::TieredPersistence;

use crate::config::Config;
use crate::sqlite_store::{SqliteBlobStore, SqliteRecordStore};

/// Both storage tiers, backed by one SQLite file.
pub type Journal = TieredPersistence<SqliteRecordStore, SqliteBlobStore>;

pub async fn connect(config: &Config) -> Result<SqlitePool> {
    let db_path = &config.db.path;

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Open the journal described by `config`. The schema must already exist
/// (`snap init`).
pub async fn open_journal(config: &Config) -> Result<Journal> {
    let pool = connect(config).await?;
    Ok(TieredPersistence::new(
        SqliteRecordStore::new(pool.clone(), config.storage.record_quota_bytes),
        SqliteBlobStore::new(pool.clone()),
        SqliteBlobStore::for_exports(pool),
        config.tiering(),
    ))
}
