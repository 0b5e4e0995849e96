//! Storage abstractions for the two persistence tiers.
//!
//! - [`RecordStore`]: small-quota, JSON-oriented key/value store holding
//!   lightweight metadata. Writes can fail with
//!   [`SnapError::QuotaExceeded`](crate::error::SnapError::QuotaExceeded).
//! - [`BlobStore`]: larger-quota store for binary payloads with a bounded
//!   retention policy.
//!
//! Both are injected into [`TieredPersistence`](crate::tiering::TieredPersistence)
//! so tests can substitute the in-memory fakes from [`memory`].
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::SnapResult;

/// SHA-256 of `bytes`, hex encoded.
pub fn checksum(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Descriptive metadata stored next to a blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobMetadata {
    /// Record (or export) the payload belongs to.
    pub owner_id: String,
    pub content_type: String,
    pub checksum: String,
}

impl BlobMetadata {
    pub fn for_payload(owner_id: &str, content_type: &str, bytes: &[u8]) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            content_type: content_type.to_string(),
            checksum: checksum(bytes),
        }
    }

    pub fn verifies(&self, bytes: &[u8]) -> bool {
        self.checksum == checksum(bytes)
    }
}

/// Result of a successful [`BlobStore::put`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub stored_id: String,
    pub byte_size: u64,
}

/// Listing entry used for eviction bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct BlobInfo {
    pub id: String,
    pub byte_size: u64,
    pub stored_at: DateTime<Utc>,
}

/// A blob and its metadata.
#[derive(Debug, Clone)]
pub struct Blob {
    pub data: Vec<u8>,
    pub metadata: BlobMetadata,
}

/// Larger-quota binary store.
///
/// Any `put` may evict unrelated older entries, so callers must treat a
/// missing entry as recoverable rather than fatal.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`put`](BlobStore::put) | Store (or silently overwrite) a payload |
/// | [`get`](BlobStore::get) | Fetch a payload, `None` if absent |
/// | [`delete`](BlobStore::delete) | Idempotent removal |
/// | [`list`](BlobStore::list) | Entries with size and store time |
/// | [`clear`](BlobStore::clear) | Remove everything |
/// | [`enforce_retention_limit`](BlobStore::enforce_retention_limit) | Evict oldest beyond a cap |
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fails with `StorageUnavailable` if the engine cannot be opened.
    async fn put(&self, id: &str, data: &[u8], metadata: &BlobMetadata) -> SnapResult<StoredBlob>;

    async fn get(&self, id: &str) -> SnapResult<Option<Blob>>;

    /// Returns whether an entry existed.
    async fn delete(&self, id: &str) -> SnapResult<bool>;

    /// Entries ordered most recently stored first.
    async fn list(&self) -> SnapResult<Vec<BlobInfo>>;

    async fn clear(&self) -> SnapResult<()>;

    /// Delete the oldest entries until at most `max_entries` remain.
    ///
    /// Returns the number of entries evicted.
    async fn enforce_retention_limit(&self, max_entries: usize) -> SnapResult<usize> {
        let entries = self.list().await?;
        let mut evicted = 0;
        for info in entries.iter().skip(max_entries) {
            if self.delete(&info.id).await? {
                evicted += 1;
            }
        }
        Ok(evicted)
    }
}

/// Change notification emitted by a [`RecordStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageChange {
    Set { key: String },
    Removed { key: String },
    Cleared,
}

pub type ChangeListener = Arc<dyn Fn(&StorageChange) + Send + Sync>;

/// Small-quota JSON key/value store.
///
/// Usage is measured as `len(key) + len(serialized value)` per entry.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get(&self, key: &str) -> SnapResult<Option<serde_json::Value>>;

    /// Write `value` under `key`.
    ///
    /// Rejects with `QuotaExceeded` (and writes nothing) if the store would
    /// grow past its quota.
    async fn set(&self, key: &str, value: &serde_json::Value) -> SnapResult<()>;

    /// Returns whether the key existed.
    async fn remove(&self, key: &str) -> SnapResult<bool>;

    async fn keys(&self) -> SnapResult<Vec<String>>;

    async fn bytes_in_use(&self) -> SnapResult<u64>;

    fn quota_bytes(&self) -> u64;

    /// Register a listener called after every successful mutation.
    fn subscribe(&self, listener: ChangeListener);
}

/// Bytes an entry occupies against the record store quota.
pub fn entry_size(key: &str, serialized_value: &str) -> u64 {
    (key.len() + serialized_value.len()) as u64
}
