//! SQLite implementations of the record and blob stores.
//!
//! Both share the pool opened by [`crate::db::connect`]. The record store
//! enforces its byte quota inside a transaction so a rejected `set` writes
//! nothing. A blob store owns one table: `blobs` for screenshot payloads,
//! `export_blobs` for transient export bundles.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use std::sync::Mutex;
use tracing::warn;

use snap_journal_core::error::{SnapError, SnapResult};
use snap_journal_core::store::{
    entry_size, Blob, BlobInfo, BlobMetadata, BlobStore, ChangeListener, RecordStore,
    StorageChange, StoredBlob,
};

/// Connection-level failures mean the engine cannot be used at all.
fn map_sqlx(e: sqlx::Error) -> SnapError {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            SnapError::StorageUnavailable(e.to_string())
        }
        other => SnapError::backend(other),
    }
}

const ENTRY_BYTES: &str = "LENGTH(CAST(key AS BLOB)) + LENGTH(CAST(value AS BLOB))";

pub struct SqliteRecordStore {
    pool: SqlitePool,
    quota: u64,
    listeners: Mutex<Vec<ChangeListener>>,
}

impl SqliteRecordStore {
    pub fn new(pool: SqlitePool, quota: u64) -> Self {
        Self {
            pool,
            quota,
            listeners: Mutex::new(Vec::new()),
        }
    }

    fn notify(&self, change: StorageChange) {
        let listeners = match self.listeners.lock() {
            Ok(l) => l.clone(),
            Err(_) => {
                warn!("record store listener list poisoned; change not delivered");
                return;
            }
        };
        for listener in listeners {
            listener(&change);
        }
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn get(&self, key: &str) -> SnapResult<Option<serde_json::Value>> {
        let row: Option<String> = sqlx::query_scalar("SELECT value FROM records WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        match row {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &serde_json::Value) -> SnapResult<()> {
        let text = serde_json::to_string(value)?;
        let needed = entry_size(key, &text);

        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        let others: i64 = sqlx::query_scalar(&format!(
            "SELECT COALESCE(SUM({}), 0) FROM records WHERE key != ?",
            ENTRY_BYTES
        ))
        .bind(key)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx)?;
        let others = others.max(0) as u64;

        if others + needed > self.quota {
            return Err(SnapError::QuotaExceeded {
                needed,
                available: self.quota.saturating_sub(others),
            });
        }

        sqlx::query(
            "INSERT INTO records (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(&text)
        .bind(Utc::now().timestamp())
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;
        tx.commit().await.map_err(map_sqlx)?;

        self.notify(StorageChange::Set {
            key: key.to_string(),
        });
        Ok(())
    }

    async fn remove(&self, key: &str) -> SnapResult<bool> {
        let result = sqlx::query("DELETE FROM records WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        let existed = result.rows_affected() > 0;
        if existed {
            self.notify(StorageChange::Removed {
                key: key.to_string(),
            });
        }
        Ok(existed)
    }

    async fn keys(&self) -> SnapResult<Vec<String>> {
        sqlx::query_scalar("SELECT key FROM records ORDER BY key")
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)
    }

    async fn bytes_in_use(&self) -> SnapResult<u64> {
        let total: i64 =
            sqlx::query_scalar(&format!("SELECT COALESCE(SUM({}), 0) FROM records", ENTRY_BYTES))
                .fetch_one(&self.pool)
                .await
                .map_err(map_sqlx)?;
        Ok(total.max(0) as u64)
    }

    fn quota_bytes(&self) -> u64 {
        self.quota
    }

    fn subscribe(&self, listener: ChangeListener) {
        match self.listeners.lock() {
            Ok(mut l) => l.push(listener),
            Err(_) => warn!("record store listener list poisoned; subscription dropped"),
        }
    }
}

pub struct SqliteBlobStore {
    pool: SqlitePool,
    table: &'static str,
}

impl SqliteBlobStore {
    /// Screenshot payloads.
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            table: "blobs",
        }
    }

    /// Export bundles that overflow the record store.
    pub fn for_exports(pool: SqlitePool) -> Self {
        Self {
            pool,
            table: "export_blobs",
        }
    }
}

fn millis_to_utc(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

#[async_trait]
impl BlobStore for SqliteBlobStore {
    async fn put(&self, id: &str, data: &[u8], metadata: &BlobMetadata) -> SnapResult<StoredBlob> {
        let metadata_json = serde_json::to_string(metadata)?;
        // REPLACE assigns a fresh rowid, which breaks stored_at ties in list order.
        let sql = format!(
            "INSERT OR REPLACE INTO {} (id, data, byte_size, stored_at, metadata_json)
             VALUES (?, ?, ?, ?, ?)",
            self.table
        );
        sqlx::query(&sql)
            .bind(id)
            .bind(data)
            .bind(data.len() as i64)
            .bind(Utc::now().timestamp_millis())
            .bind(&metadata_json)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(StoredBlob {
            stored_id: id.to_string(),
            byte_size: data.len() as u64,
        })
    }

    async fn get(&self, id: &str) -> SnapResult<Option<Blob>> {
        let sql = format!("SELECT data, metadata_json FROM {} WHERE id = ?", self.table);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        let Some(row) = row else {
            return Ok(None);
        };
        let metadata_json: String = row.get("metadata_json");
        Ok(Some(Blob {
            data: row.get("data"),
            metadata: serde_json::from_str(&metadata_json)?,
        }))
    }

    async fn delete(&self, id: &str) -> SnapResult<bool> {
        let sql = format!("DELETE FROM {} WHERE id = ?", self.table);
        let result = sqlx::query(&sql)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self) -> SnapResult<Vec<BlobInfo>> {
        let sql = format!(
            "SELECT id, byte_size, stored_at FROM {} ORDER BY stored_at DESC, rowid DESC",
            self.table
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(rows
            .iter()
            .map(|row| BlobInfo {
                id: row.get("id"),
                byte_size: row.get::<i64, _>("byte_size").max(0) as u64,
                stored_at: millis_to_utc(row.get("stored_at")),
            })
            .collect())
    }

    async fn clear(&self) -> SnapResult<()> {
        sqlx::query(&format!("DELETE FROM {}", self.table))
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }

    async fn enforce_retention_limit(&self, max_entries: usize) -> SnapResult<usize> {
        let sql = format!(
            "DELETE FROM {table} WHERE id IN (
                SELECT id FROM {table} ORDER BY stored_at DESC, rowid DESC LIMIT -1 OFFSET ?
             )",
            table = self.table
        );
        let result = sqlx::query(&sql)
            .bind(max_entries as i64)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(result.rows_affected() as usize)
    }
}
