//! In-memory [`RecordStore`] and [`BlobStore`] implementations for tests.
//!
//! Both use `HashMap`s behind `std::sync::RwLock`. The blob store can be
//! switched to "unavailable" to exercise the storage-exhaustion path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{
    entry_size, Blob, BlobInfo, BlobMetadata, BlobStore, ChangeListener, RecordStore,
    StorageChange, StoredBlob,
};
use crate::error::{SnapError, SnapResult};

fn poisoned<T>(_: PoisonError<T>) -> SnapError {
    SnapError::Backend("in-memory store lock poisoned".to_string())
}

/// Quota-enforcing JSON store.
pub struct InMemoryRecordStore {
    entries: RwLock<HashMap<String, String>>,
    quota: u64,
    listeners: RwLock<Vec<ChangeListener>>,
}

impl InMemoryRecordStore {
    pub fn with_quota(quota: u64) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            quota,
            listeners: RwLock::new(Vec::new()),
        }
    }

    fn notify(&self, change: StorageChange) {
        let listeners = match self.listeners.read() {
            Ok(l) => l.clone(),
            Err(_) => return,
        };
        for listener in listeners {
            listener(&change);
        }
    }
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::with_quota(u64::MAX)
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn get(&self, key: &str) -> SnapResult<Option<serde_json::Value>> {
        let entries = self.entries.read().map_err(poisoned)?;
        match entries.get(key) {
            Some(raw) => Ok(Some(serde_json::from_str(raw)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &serde_json::Value) -> SnapResult<()> {
        let serialized = serde_json::to_string(value)?;
        {
            let mut entries = self.entries.write().map_err(poisoned)?;
            let in_use: u64 = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| entry_size(k, v))
                .sum();
            let needed = entry_size(key, &serialized);
            if in_use + needed > self.quota {
                return Err(SnapError::QuotaExceeded {
                    needed,
                    available: self.quota.saturating_sub(in_use),
                });
            }
            entries.insert(key.to_string(), serialized);
        }
        self.notify(StorageChange::Set {
            key: key.to_string(),
        });
        Ok(())
    }

    async fn remove(&self, key: &str) -> SnapResult<bool> {
        let existed = self
            .entries
            .write()
            .map_err(poisoned)?
            .remove(key)
            .is_some();
        if existed {
            self.notify(StorageChange::Removed {
                key: key.to_string(),
            });
        }
        Ok(existed)
    }

    async fn keys(&self) -> SnapResult<Vec<String>> {
        let entries = self.entries.read().map_err(poisoned)?;
        let mut keys: Vec<String> = entries.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    async fn bytes_in_use(&self) -> SnapResult<u64> {
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(entries.iter().map(|(k, v)| entry_size(k, v)).sum())
    }

    fn quota_bytes(&self) -> u64 {
        self.quota
    }

    fn subscribe(&self, listener: ChangeListener) {
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.push(listener);
        }
    }
}

struct StoredEntry {
    data: Vec<u8>,
    metadata: BlobMetadata,
    stored_at: DateTime<Utc>,
    sequence: u64,
}

/// Blob store with insertion-ordered retention.
pub struct InMemoryBlobStore {
    entries: RwLock<HashMap<String, StoredEntry>>,
    sequence: AtomicU64,
    available: AtomicBool,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            sequence: AtomicU64::new(0),
            available: AtomicBool::new(true),
        }
    }

    /// A store whose every operation fails with `StorageUnavailable`.
    pub fn unavailable() -> Self {
        let store = Self::new();
        store.set_available(false);
        store
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> SnapResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SnapError::StorageUnavailable(
                "in-memory blob store disabled".to_string(),
            ))
        }
    }

    /// Entries sorted newest first (by insertion sequence).
    fn sorted_infos(entries: &HashMap<String, StoredEntry>) -> Vec<(u64, BlobInfo)> {
        let mut infos: Vec<(u64, BlobInfo)> = entries
            .iter()
            .map(|(id, e)| {
                (
                    e.sequence,
                    BlobInfo {
                        id: id.clone(),
                        byte_size: e.data.len() as u64,
                        stored_at: e.stored_at,
                    },
                )
            })
            .collect();
        infos.sort_by(|a, b| b.0.cmp(&a.0));
        infos
    }
}

impl Default for InMemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(&self, id: &str, data: &[u8], metadata: &BlobMetadata) -> SnapResult<StoredBlob> {
        self.check_available()?;
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        self.entries.write().map_err(poisoned)?.insert(
            id.to_string(),
            StoredEntry {
                data: data.to_vec(),
                metadata: metadata.clone(),
                stored_at: Utc::now(),
                sequence,
            },
        );
        Ok(StoredBlob {
            stored_id: id.to_string(),
            byte_size: data.len() as u64,
        })
    }

    async fn get(&self, id: &str) -> SnapResult<Option<Blob>> {
        self.check_available()?;
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(entries.get(id).map(|e| Blob {
            data: e.data.clone(),
            metadata: e.metadata.clone(),
        }))
    }

    async fn delete(&self, id: &str) -> SnapResult<bool> {
        self.check_available()?;
        Ok(self.entries.write().map_err(poisoned)?.remove(id).is_some())
    }

    async fn list(&self) -> SnapResult<Vec<BlobInfo>> {
        self.check_available()?;
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(Self::sorted_infos(&entries)
            .into_iter()
            .map(|(_, info)| info)
            .collect())
    }

    async fn clear(&self) -> SnapResult<()> {
        self.check_available()?;
        self.entries.write().map_err(poisoned)?.clear();
        Ok(())
    }

    async fn enforce_retention_limit(&self, max_entries: usize) -> SnapResult<usize> {
        self.check_available()?;
        let mut entries = self.entries.write().map_err(poisoned)?;
        let doomed: Vec<String> = Self::sorted_infos(&entries)
            .into_iter()
            .skip(max_entries)
            .map(|(_, info)| info.id)
            .collect();
        for id in &doomed {
            entries.remove(id);
        }
        Ok(doomed.len())
    }
}
