//! Tiered persistence manager.
//!
//! Composes a small-quota [`RecordStore`] with a larger [`BlobStore`] and
//! gives callers one save/load contract over both:
//!
//! 1. `save_record` writes the record (payload inline) into the record
//!    store's record list.
//! 2. If that write fails with `QuotaExceeded`, the payload is moved to the
//!    blob store, the record's payload becomes [`Payload::External`], and the
//!    now metadata-only record is written again. This recovery happens at
//!    most once per save.
//! 3. If the blob write (or the retry) fails, the save fails with
//!    `StorageExhausted` and nothing the caller holds is modified.
//!
//! Loads resolve external payloads through the blob store. A blob that was
//! evicted, fails its checksum, or cannot be read yields
//! [`ResolvedPayload::Missing`], never an error, so callers can tell
//! "payload unavailable" apart from "record not found".
//!
//! Transient export bundles that overflow the record store go to a second,
//! separate blob store. Payload retention never counts or evicts them, and
//! they are removed when their export completes.
//!
//! Once the blob store reports `StorageUnavailable`, the tier is disabled for
//! the lifetime of this manager and all saves rely on the record store alone.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{SnapError, SnapResult};
use crate::models::{
    BlobRef, ExportBundle, HydratedRecord, Payload, RecordSummary, ResolvedPayload,
    ScreenshotRecord,
};
use crate::store::{BlobMetadata, BlobStore, RecordStore};

/// Record store key holding the list of screenshot records.
pub const RECORDS_KEY: &str = "screenshots";

/// Prefix shared by export ids and their record store keys.
pub const EXPORT_KEY_PREFIX: &str = "export_";

pub fn payload_blob_id(record_id: &str) -> String {
    format!("payload_{}", record_id)
}

pub fn bundle_blob_id(export_id: &str) -> String {
    format!("bundle_{}", export_id)
}

/// Tunables for the manager.
#[derive(Debug, Clone)]
pub struct TieringConfig {
    /// Payload blob store retention cap, enforced after every payload put.
    pub max_blob_entries: usize,
    /// Content type recorded for screenshot payloads.
    pub payload_content_type: String,
}

impl Default for TieringConfig {
    fn default() -> Self {
        Self {
            max_blob_entries: 100,
            payload_content_type: "image/png".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Inline,
    External,
}

impl Tier {
    pub fn of(record: &ScreenshotRecord) -> Self {
        if record.is_external_payload() {
            Tier::External
        } else {
            Tier::Inline
        }
    }
}

/// What `save_record` actually persisted.
#[derive(Debug, Clone)]
pub struct SaveOutcome {
    /// The record as stored (payload possibly replaced by a reference).
    pub record: ScreenshotRecord,
    pub tier: Tier,
    /// True if quota recovery moved the payload during this save.
    pub demoted: bool,
}

/// A record together with its resolved payload.
#[derive(Debug, Clone)]
pub struct LoadedRecord {
    pub record: ScreenshotRecord,
    pub payload: ResolvedPayload,
}

/// Point-in-time storage usage across both tiers.
#[derive(Debug, Clone, Serialize)]
pub struct StorageStats {
    pub records: usize,
    pub annotations: usize,
    pub inline_records: usize,
    pub external_records: usize,
    pub bytes_in_use: u64,
    pub quota_bytes: u64,
    pub blob_entries: usize,
    pub blob_bytes: u64,
    pub blob_tier_enabled: bool,
}

impl StorageStats {
    pub fn usage_percent(&self) -> u64 {
        if self.quota_bytes == 0 {
            return 0;
        }
        ((self.bytes_in_use as u128 * 100) / self.quota_bytes as u128) as u64
    }
}

/// Record store entry for a transient export bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "location", rename_all = "snake_case")]
enum ExportEntry {
    Inline {
        stored_at: DateTime<Utc>,
        bundle: ExportBundle,
    },
    External {
        stored_at: DateTime<Utc>,
        blob: BlobRef,
    },
}

impl ExportEntry {
    fn stored_at(&self) -> DateTime<Utc> {
        match self {
            ExportEntry::Inline { stored_at, .. } | ExportEntry::External { stored_at, .. } => {
                *stored_at
            }
        }
    }
}

/// Single logical record store over two physical tiers.
pub struct TieredPersistence<R: RecordStore, B: BlobStore> {
    records: R,
    blobs: B,
    /// Overflow for export bundles, outside payload retention.
    exports: B,
    config: TieringConfig,
    blob_tier_enabled: AtomicBool,
}

impl<R: RecordStore, B: BlobStore> TieredPersistence<R, B> {
    pub fn new(records: R, blobs: B, exports: B, config: TieringConfig) -> Self {
        Self {
            records,
            blobs,
            exports,
            config,
            blob_tier_enabled: AtomicBool::new(true),
        }
    }

    pub fn record_store(&self) -> &R {
        &self.records
    }

    pub fn blob_store(&self) -> &B {
        &self.blobs
    }

    pub fn export_store(&self) -> &B {
        &self.exports
    }

    pub fn blob_tier_enabled(&self) -> bool {
        self.blob_tier_enabled.load(Ordering::SeqCst)
    }

    /// Disable the blob tier for the rest of this session.
    pub fn disable_blob_tier(&self, reason: &str) {
        if self.blob_tier_enabled.swap(false, Ordering::SeqCst) {
            error!(reason, "blob store unavailable; falling back to record store only");
        }
    }

    // ── record list ────────────────────────────────────────────────

    async fn read_records(&self) -> SnapResult<Vec<ScreenshotRecord>> {
        match self.records.get(RECORDS_KEY).await? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(Vec::new()),
        }
    }

    async fn write_records(&self, list: &[ScreenshotRecord]) -> SnapResult<()> {
        let value = serde_json::to_value(list)?;
        self.records.set(RECORDS_KEY, &value).await
    }

    fn upsert(list: &mut Vec<ScreenshotRecord>, record: ScreenshotRecord) {
        match list.iter_mut().find(|r| r.id == record.id) {
            Some(slot) => *slot = record,
            None => list.push(record),
        }
    }

    /// All records in capture order.
    pub async fn all_records(&self) -> SnapResult<Vec<ScreenshotRecord>> {
        self.read_records().await
    }

    /// Metadata-only summaries, newest first.
    pub async fn list_records(&self) -> SnapResult<Vec<RecordSummary>> {
        let mut summaries: Vec<RecordSummary> =
            self.read_records().await?.iter().map(|r| r.summary()).collect();
        summaries.sort_by(|a, b| b.captured_at.cmp(&a.captured_at));
        Ok(summaries)
    }

    // ── blob tier ──────────────────────────────────────────────────

    async fn put_blob(&self, blob_id: &str, owner_id: &str, content_type: &str, data: &[u8]) -> SnapResult<BlobRef> {
        if !self.blob_tier_enabled() {
            return Err(SnapError::StorageUnavailable(
                "blob tier disabled for this session".to_string(),
            ));
        }
        let metadata = BlobMetadata::for_payload(owner_id, content_type, data);
        let stored = match self.blobs.put(blob_id, data, &metadata).await {
            Ok(stored) => stored,
            Err(SnapError::StorageUnavailable(reason)) => {
                self.disable_blob_tier(&reason);
                return Err(SnapError::StorageUnavailable(reason));
            }
            Err(e) => return Err(e),
        };
        debug!(blob_id, owner_id, byte_size = stored.byte_size, "blob stored");

        match self
            .blobs
            .enforce_retention_limit(self.config.max_blob_entries)
            .await
        {
            Ok(0) => {}
            Ok(evicted) => info!(evicted, cap = self.config.max_blob_entries, "blob retention enforced"),
            Err(e) => warn!(error = %e, operation = "enforce_retention_limit", "retention pass failed"),
        }

        Ok(BlobRef {
            blob_id: stored.stored_id,
        })
    }

    async fn resolve_payload(&self, record: &ScreenshotRecord) -> SnapResult<ResolvedPayload> {
        let blob_ref = match &record.payload {
            Payload::Inline(data) => return Ok(ResolvedPayload::Available(data.clone())),
            Payload::External(r) => r,
        };

        let blob = match self.blobs.get(&blob_ref.blob_id).await {
            Ok(blob) => blob,
            Err(SnapError::StorageUnavailable(reason)) => {
                warn!(record_id = %record.id, blob_id = %blob_ref.blob_id, reason = %reason, "blob store unavailable; payload missing");
                return Ok(ResolvedPayload::Missing);
            }
            Err(e) => {
                warn!(record_id = %record.id, blob_id = %blob_ref.blob_id, operation = "resolve_payload", error = %e, "blob read failed; payload missing");
                return Ok(ResolvedPayload::Missing);
            }
        };

        match blob {
            Some(blob) if blob.metadata.verifies(&blob.data) => {
                Ok(ResolvedPayload::Available(blob.data))
            }
            Some(_) => {
                warn!(record_id = %record.id, blob_id = %blob_ref.blob_id, "blob checksum mismatch; payload missing");
                Ok(ResolvedPayload::Missing)
            }
            None => {
                warn!(record_id = %record.id, blob_id = %blob_ref.blob_id, "blob evicted; payload missing");
                Ok(ResolvedPayload::Missing)
            }
        }
    }

    // ── save / load ────────────────────────────────────────────────

    /// Persist `record`, tiering its payload out under quota pressure.
    pub async fn save_record(&self, record: &ScreenshotRecord) -> SnapResult<SaveOutcome> {
        let mut list = self.read_records().await?;
        let mut stored = record.clone();
        stored.touch();
        Self::upsert(&mut list, stored.clone());

        let quota_err = match self.write_records(&list).await {
            Ok(()) => {
                debug!(record_id = %stored.id, tier = ?Tier::of(&stored), "record saved");
                return Ok(SaveOutcome {
                    tier: Tier::of(&stored),
                    record: stored,
                    demoted: false,
                });
            }
            Err(e @ SnapError::QuotaExceeded { .. }) => e,
            Err(e) => return Err(e),
        };

        let data = match &stored.payload {
            Payload::Inline(data) => data.clone(),
            Payload::External(_) => {
                error!(record_id = %stored.id, operation = "save_record", "quota exceeded for metadata-only record");
                return Err(SnapError::StorageExhausted {
                    record_id: stored.id,
                    reason: quota_err.to_string(),
                });
            }
        };

        warn!(record_id = %stored.id, bytes = data.len(), error = %quota_err, "record store full; moving payload to blob store");
        let blob_id = payload_blob_id(&stored.id);
        let blob_ref = self
            .put_blob(&blob_id, &stored.id, &self.config.payload_content_type, &data)
            .await
            .map_err(|e| {
                error!(record_id = %stored.id, operation = "save_record", error = %e, "payload demotion failed");
                SnapError::StorageExhausted {
                    record_id: stored.id.clone(),
                    reason: e.to_string(),
                }
            })?;

        stored.payload = Payload::External(blob_ref);
        Self::upsert(&mut list, stored.clone());

        if let Err(e) = self.write_records(&list).await {
            error!(record_id = %stored.id, operation = "save_record", error = %e, "retry after demotion failed");
            if let Err(cleanup) = self.blobs.delete(&blob_id).await {
                warn!(blob_id = %blob_id, error = %cleanup, "failed to remove orphaned blob");
            }
            return Err(match e {
                SnapError::QuotaExceeded { .. } => SnapError::StorageExhausted {
                    record_id: stored.id,
                    reason: e.to_string(),
                },
                other => other,
            });
        }

        info!(record_id = %stored.id, blob_id = %blob_id, "record saved with external payload");
        Ok(SaveOutcome {
            record: stored,
            tier: Tier::External,
            demoted: true,
        })
    }

    /// Load a record and resolve its payload.
    ///
    /// Fails with `NotFound` only when the record itself is absent.
    pub async fn load_record(&self, id: &str) -> SnapResult<LoadedRecord> {
        let record = self
            .read_records()
            .await?
            .into_iter()
            .find(|r| r.id == id)
            .ok_or_else(|| SnapError::NotFound(format!("screenshot {}", id)))?;
        let payload = self.resolve_payload(&record).await?;
        Ok(LoadedRecord { record, payload })
    }

    /// Resolve every record's payload, keeping records whose blob is gone.
    pub async fn hydrate(&self, records: Vec<ScreenshotRecord>) -> SnapResult<Vec<HydratedRecord>> {
        let mut hydrated = Vec::with_capacity(records.len());
        for record in records {
            let payload = self.resolve_payload(&record).await?;
            hydrated.push(HydratedRecord::new(record, payload));
        }
        Ok(hydrated)
    }

    /// Hydrate every stored record into a fresh export bundle.
    pub async fn build_export_bundle(&self) -> SnapResult<ExportBundle> {
        let records = self.read_records().await?;
        let bundle = ExportBundle::new(self.hydrate(records).await?);
        info!(
            export_id = %bundle.export_id,
            screenshots = bundle.total_screenshots,
            missing = bundle.missing_payloads,
            "export bundle built"
        );
        Ok(bundle)
    }

    // ── deletion ───────────────────────────────────────────────────

    async fn drop_payload(&self, record: &ScreenshotRecord) {
        if let Payload::External(r) = &record.payload {
            if let Err(e) = self.blobs.delete(&r.blob_id).await {
                warn!(record_id = %record.id, blob_id = %r.blob_id, error = %e, "failed to delete blob");
            }
        }
    }

    /// Remove one record and its external payload.
    pub async fn delete_record(&self, id: &str) -> SnapResult<bool> {
        let mut list = self.read_records().await?;
        let Some(pos) = list.iter().position(|r| r.id == id) else {
            return Ok(false);
        };
        let removed = list.remove(pos);
        self.write_records(&list).await?;
        self.drop_payload(&removed).await;
        info!(record_id = id, "record deleted");
        Ok(true)
    }

    /// Remove every record and clear the blob store.
    pub async fn clear_all(&self) -> SnapResult<usize> {
        let count = self.read_records().await?.len();
        self.write_records(&[]).await?;
        if let Err(e) = self.blobs.clear().await {
            warn!(error = %e, operation = "clear_all", "failed to clear blob store");
        }
        info!(count, "all records cleared");
        Ok(count)
    }

    /// Keep only the `keep` most recently captured records.
    pub async fn prune_to(&self, keep: usize) -> SnapResult<usize> {
        let mut list = self.read_records().await?;
        if list.len() <= keep {
            return Ok(0);
        }
        list.sort_by(|a, b| b.captured_at.cmp(&a.captured_at));
        let removed = list.split_off(keep);
        list.reverse();
        self.write_records(&list).await?;
        for record in &removed {
            self.drop_payload(record).await;
        }
        info!(removed = removed.len(), kept = list.len(), "records pruned");
        Ok(removed.len())
    }

    // ── export bundles ─────────────────────────────────────────────

    /// Persist a transient export bundle, spilling it to the export blob
    /// store under quota pressure.
    pub async fn store_export_bundle(&self, bundle: &ExportBundle) -> SnapResult<String> {
        let key = bundle.export_id.clone();
        let entry = ExportEntry::Inline {
            stored_at: Utc::now(),
            bundle: bundle.clone(),
        };
        match self.records.set(&key, &serde_json::to_value(&entry)?).await {
            Ok(()) => return Ok(key),
            Err(SnapError::QuotaExceeded { .. }) => {}
            Err(e) => return Err(e),
        }

        warn!(export_id = %key, "record store full; moving export bundle to export blob store");
        let bytes = serde_json::to_vec(bundle)?;
        let exhausted = |e: SnapError| SnapError::StorageExhausted {
            record_id: key.clone(),
            reason: e.to_string(),
        };
        let blob_id = bundle_blob_id(&key);
        let metadata = BlobMetadata::for_payload(&key, "application/json", &bytes);
        let stored = self
            .exports
            .put(&blob_id, &bytes, &metadata)
            .await
            .map_err(exhausted)?;
        let entry = ExportEntry::External {
            stored_at: Utc::now(),
            blob: BlobRef {
                blob_id: stored.stored_id,
            },
        };
        if let Err(e) = self.records.set(&key, &serde_json::to_value(&entry)?).await {
            if let Err(cleanup) = self.exports.delete(&blob_id).await {
                warn!(blob_id = %blob_id, error = %cleanup, "failed to remove orphaned export blob");
            }
            return Err(exhausted(e));
        }
        Ok(key)
    }

    pub async fn load_export_bundle(&self, export_id: &str) -> SnapResult<ExportBundle> {
        let value = self
            .records
            .get(export_id)
            .await?
            .ok_or_else(|| SnapError::NotFound(format!("export {}", export_id)))?;
        match serde_json::from_value::<ExportEntry>(value)? {
            ExportEntry::Inline { bundle, .. } => Ok(bundle),
            ExportEntry::External { blob, .. } => {
                match self.exports.get(&blob.blob_id).await? {
                    Some(b) => Ok(serde_json::from_slice(&b.data)?),
                    None => Err(SnapError::PayloadMissing {
                        record_id: export_id.to_string(),
                    }),
                }
            }
        }
    }

    /// Drop a transient export bundle once its surface has completed.
    pub async fn remove_export_bundle(&self, export_id: &str) -> SnapResult<bool> {
        let existed = self.records.remove(export_id).await?;
        match self.exports.delete(&bundle_blob_id(export_id)).await {
            Ok(_) | Err(SnapError::StorageUnavailable(_)) => {}
            Err(e) => warn!(export_id, error = %e, "failed to delete export blob"),
        }
        Ok(existed)
    }

    /// Remove export entries older than `max_age`.
    pub async fn cleanup_stale_exports(&self, max_age: Duration) -> SnapResult<usize> {
        let cutoff = Utc::now() - max_age;
        let mut removed = 0;
        for key in self.records.keys().await? {
            if !key.starts_with(EXPORT_KEY_PREFIX) {
                continue;
            }
            let Some(value) = self.records.get(&key).await? else {
                continue;
            };
            let stale = match serde_json::from_value::<ExportEntry>(value) {
                Ok(entry) => entry.stored_at() < cutoff,
                Err(e) => {
                    warn!(export_id = %key, error = %e, "unreadable export entry; removing");
                    true
                }
            };
            if stale && self.remove_export_bundle(&key).await? {
                removed += 1;
            }
        }

        // Bundle blobs whose pointer entry never got written.
        match self.exports.list().await {
            Ok(infos) => {
                for info in infos.iter().filter(|i| i.stored_at < cutoff) {
                    if let Err(e) = self.exports.delete(&info.id).await {
                        warn!(blob_id = %info.id, error = %e, "failed to delete stale export blob");
                    }
                }
            }
            Err(e) => warn!(error = %e, operation = "cleanup_stale_exports", "export blob listing failed"),
        }

        if removed > 0 {
            info!(removed, "stale exports cleaned up");
        }
        Ok(removed)
    }

    // ── stats ──────────────────────────────────────────────────────

    pub async fn stats(&self) -> SnapResult<StorageStats> {
        let list = self.read_records().await?;
        let external_records = list.iter().filter(|r| r.is_external_payload()).count();
        let (blob_entries, blob_bytes) = match self.blobs.list().await {
            Ok(infos) => (infos.len(), infos.iter().map(|i| i.byte_size).sum()),
            Err(e) => {
                warn!(error = %e, operation = "stats", "blob store listing failed");
                (0, 0)
            }
        };
        Ok(StorageStats {
            records: list.len(),
            annotations: list.iter().map(|r| r.annotations.len()).sum(),
            inline_records: list.len() - external_records,
            external_records,
            bytes_in_use: self.records.bytes_in_use().await?,
            quota_bytes: self.records.quota_bytes(),
            blob_entries,
            blob_bytes,
            blob_tier_enabled: self.blob_tier_enabled(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Capture;
    use crate::store::memory::{InMemoryBlobStore, InMemoryRecordStore};

    fn record(bytes: usize) -> ScreenshotRecord {
        ScreenshotRecord::from_capture(Capture {
            image: (0..bytes).map(|i| (i % 251) as u8).collect(),
            natural_width: 1920,
            natural_height: 1080,
            source_title: "Dashboard".into(),
            source_url: "https://example.com/dash".into(),
        })
    }

    fn manager(quota: u64, blobs: InMemoryBlobStore) -> TieredPersistence<InMemoryRecordStore, InMemoryBlobStore> {
        TieredPersistence::new(
            InMemoryRecordStore::with_quota(quota),
            blobs,
            InMemoryBlobStore::new(),
            TieringConfig::default(),
        )
    }

    /// Payload store whose reads always fail, as with a corrupt row.
    struct UnreadableBlobs(InMemoryBlobStore);

    #[async_trait::async_trait]
    impl BlobStore for UnreadableBlobs {
        async fn put(&self, id: &str, data: &[u8], metadata: &BlobMetadata) -> SnapResult<crate::store::StoredBlob> {
            self.0.put(id, data, metadata).await
        }
        async fn get(&self, _id: &str) -> SnapResult<Option<crate::store::Blob>> {
            Err(SnapError::Backend("corrupt row".into()))
        }
        async fn delete(&self, id: &str) -> SnapResult<bool> {
            self.0.delete(id).await
        }
        async fn list(&self) -> SnapResult<Vec<crate::store::BlobInfo>> {
            self.0.list().await
        }
        async fn clear(&self) -> SnapResult<()> {
            self.0.clear().await
        }
    }

    fn payload_of(r: &ScreenshotRecord) -> Vec<u8> {
        match &r.payload {
            Payload::Inline(b) => b.clone(),
            Payload::External(_) => panic!("expected inline payload"),
        }
    }

    #[tokio::test]
    async fn small_record_stays_inline_and_round_trips() {
        let m = manager(1 << 20, InMemoryBlobStore::new());
        let r = record(256);
        let outcome = m.save_record(&r).await.unwrap();
        assert_eq!(outcome.tier, Tier::Inline);
        assert!(!outcome.demoted);

        let loaded = m.load_record(&r.id).await.unwrap();
        assert_eq!(loaded.payload.bytes().unwrap(), payload_of(&r).as_slice());
        assert!(m.blob_store().is_empty());
    }

    #[tokio::test]
    async fn oversized_payload_is_demoted_and_round_trips() {
        let m = manager(2_000, InMemoryBlobStore::new());
        let r = record(10_000);
        let outcome = m.save_record(&r).await.unwrap();
        assert!(outcome.demoted);
        assert_eq!(outcome.tier, Tier::External);
        assert!(outcome.record.is_external_payload());
        assert!(!r.is_external_payload());

        let loaded = m.load_record(&r.id).await.unwrap();
        assert!(loaded.record.is_external_payload());
        assert_eq!(loaded.payload.bytes().unwrap(), payload_of(&r).as_slice());
    }

    #[tokio::test]
    async fn resave_of_external_record_keeps_reference() {
        let m = manager(2_000, InMemoryBlobStore::new());
        let saved = m.save_record(&record(10_000)).await.unwrap().record;
        let mut edited = saved.clone();
        edited.source_title = "Renamed".into();
        let outcome = m.save_record(&edited).await.unwrap();
        assert!(!outcome.demoted);
        assert_eq!(outcome.record.payload, saved.payload);
        assert_eq!(m.all_records().await.unwrap()[0].source_title, "Renamed");
    }

    #[tokio::test]
    async fn blob_store_down_surfaces_storage_exhausted() {
        let m = manager(2_000, InMemoryBlobStore::unavailable());
        let r = record(10_000);
        let before = r.clone();
        let err = m.save_record(&r).await.unwrap_err();
        assert!(matches!(err, SnapError::StorageExhausted { .. }), "{err:?}");
        assert_eq!(r, before);
        assert!(m.all_records().await.unwrap().is_empty());
        assert!(!m.blob_tier_enabled());
    }

    #[tokio::test]
    async fn evicted_blob_loads_as_missing_not_error() {
        let m = manager(2_000, InMemoryBlobStore::new());
        let saved = m.save_record(&record(10_000)).await.unwrap().record;
        m.blob_store().clear().await.unwrap();

        let loaded = m.load_record(&saved.id).await.unwrap();
        assert!(loaded.payload.is_missing());

        let err = m.load_record("screenshot_nope").await.unwrap_err();
        assert!(matches!(err, SnapError::NotFound(_)));
    }

    #[tokio::test]
    async fn hydrate_keeps_records_with_missing_payloads() {
        let m = manager(2_000, InMemoryBlobStore::new());
        let a = m.save_record(&record(10)).await.unwrap().record;
        let b = m.save_record(&record(10_000)).await.unwrap().record;
        m.blob_store().clear().await.unwrap();

        let bundle = m.build_export_bundle().await.unwrap();
        assert_eq!(bundle.total_screenshots, 2);
        assert_eq!(bundle.missing_payloads, 1);
        assert_eq!(bundle.records[0].id, a.id);
        assert!(bundle.records[1].payload.is_missing());
        assert_eq!(bundle.records[1].id, b.id);
    }

    #[tokio::test]
    async fn delete_removes_external_blob() {
        let m = manager(2_000, InMemoryBlobStore::new());
        let saved = m.save_record(&record(10_000)).await.unwrap().record;
        assert_eq!(m.blob_store().len(), 1);
        assert!(m.delete_record(&saved.id).await.unwrap());
        assert!(!m.delete_record(&saved.id).await.unwrap());
        assert!(m.blob_store().is_empty());
    }

    #[tokio::test]
    async fn prune_keeps_most_recent_captures() {
        let m = manager(1 << 20, InMemoryBlobStore::new());
        let mut ids = Vec::new();
        for i in 0..5 {
            let mut r = record(8);
            r.captured_at = Utc::now() - Duration::minutes(10 - i);
            ids.push(r.id.clone());
            m.save_record(&r).await.unwrap();
        }
        assert_eq!(m.prune_to(2).await.unwrap(), 3);
        let kept: Vec<String> = m.all_records().await.unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(kept, vec![ids[3].clone(), ids[4].clone()]);
    }

    #[tokio::test]
    async fn export_bundle_spills_to_blob_store_and_cleans_up() {
        let m = manager(1 << 20, InMemoryBlobStore::new());
        m.save_record(&record(64)).await.unwrap();
        let bundle = m.build_export_bundle().await.unwrap();
        let id = m.store_export_bundle(&bundle).await.unwrap();
        assert_eq!(m.load_export_bundle(&id).await.unwrap(), bundle);
        assert!(m.remove_export_bundle(&id).await.unwrap());

        let tight = manager(600, InMemoryBlobStore::new());
        let big = ExportBundle::new(vec![HydratedRecord::new(
            record(4_000),
            ResolvedPayload::Available(vec![9; 4_000]),
        )]);
        let id = tight.store_export_bundle(&big).await.unwrap();
        assert_eq!(tight.export_store().len(), 1);
        assert!(tight.blob_store().is_empty());
        assert_eq!(tight.load_export_bundle(&id).await.unwrap(), big);
        assert_eq!(tight.cleanup_stale_exports(Duration::seconds(-1)).await.unwrap(), 1);
        assert!(tight.export_store().is_empty());
    }

    #[tokio::test]
    async fn spilled_export_bundle_never_evicts_payloads() {
        let m = TieredPersistence::new(
            InMemoryRecordStore::with_quota(2_000),
            InMemoryBlobStore::new(),
            InMemoryBlobStore::new(),
            TieringConfig {
                max_blob_entries: 2,
                ..TieringConfig::default()
            },
        );
        let a = m.save_record(&record(10_000)).await.unwrap().record;
        let b = m.save_record(&record(10_000)).await.unwrap().record;
        assert!(a.is_external_payload() && b.is_external_payload());

        let before = m.hydrate(m.all_records().await.unwrap()).await.unwrap();
        let bundle = m.build_export_bundle().await.unwrap();
        let id = m.store_export_bundle(&bundle).await.unwrap();
        assert_eq!(m.export_store().len(), 1);
        assert!(m.remove_export_bundle(&id).await.unwrap());

        let after = m.hydrate(m.all_records().await.unwrap()).await.unwrap();
        assert_eq!(after, before);
        assert!(after.iter().all(|r| !r.payload.is_missing()));
        assert_eq!(m.blob_store().len(), 2);
        assert!(m.export_store().is_empty());
    }

    #[tokio::test]
    async fn unreadable_blob_resolves_to_missing_and_export_continues() {
        let m = TieredPersistence::new(
            InMemoryRecordStore::with_quota(2_000),
            UnreadableBlobs(InMemoryBlobStore::new()),
            UnreadableBlobs(InMemoryBlobStore::new()),
            TieringConfig::default(),
        );
        let inline = m.save_record(&record(10)).await.unwrap().record;
        let external = m.save_record(&record(10_000)).await.unwrap().record;
        assert!(external.is_external_payload());

        let loaded = m.load_record(&external.id).await.unwrap();
        assert!(loaded.payload.is_missing());

        let bundle = m.build_export_bundle().await.unwrap();
        assert_eq!(bundle.total_screenshots, 2);
        assert_eq!(bundle.missing_payloads, 1);
        assert_eq!(bundle.records[0].id, inline.id);
        assert!(!bundle.records[0].payload.is_missing());
        assert!(bundle.records[1].payload.is_missing());
    }

    #[tokio::test]
    async fn stats_report_tiers_and_usage() {
        let m = manager(4_000, InMemoryBlobStore::new());
        m.save_record(&record(16)).await.unwrap();
        m.save_record(&record(10_000)).await.unwrap();
        let stats = m.stats().await.unwrap();
        assert_eq!(stats.records, 2);
        assert_eq!(stats.inline_records, 1);
        assert_eq!(stats.external_records, 1);
        assert_eq!(stats.blob_entries, 1);
        assert_eq!(stats.blob_bytes, 10_000);
        assert!(stats.usage_percent() <= 100);
    }
}
