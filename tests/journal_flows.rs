//! Library-level flows against a real SQLite journal.

use image::{ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::sync::Arc;
use tempfile::TempDir;

use snap_journal::config::Config;
use snap_journal::db::{self, Journal};
use snap_journal::export::{export_journal, render_bundle};
use snap_journal::migrate;
use snap_journal::progress::NoProgress;
use snap_journal::records::capture_into;
use snap_journal_core::collab::CaptureSource;
use snap_journal_core::coords::{Point, Size};
use snap_journal_core::error::{SnapError, SnapResult};
use snap_journal_core::models::{Capture, ResolvedPayload};
use snap_journal_core::session::AnnotationSession;
use snap_journal_core::store::{BlobStore, RecordStore};
use snap_journal_core::tiering::Tier;

/// Hands out a fixed noisy PNG so payloads are too large to stay inline.
struct NoisyCapture {
    width: u32,
    height: u32,
}

fn noisy_png(width: u32, height: u32) -> Vec<u8> {
    let mut state: u32 = 0x9e37_79b9;
    let img = RgbImage::from_fn(width, height, |_, _| {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        let [r, g, b, _] = state.to_le_bytes();
        Rgb([r, g, b])
    });
    let mut out = Vec::new();
    img.write_to(&mut Cursor::new(&mut out), ImageFormat::Png).unwrap();
    out
}

#[async_trait::async_trait]
impl CaptureSource for NoisyCapture {
    async fn capture_visible_surface(&self) -> SnapResult<Capture> {
        Ok(Capture {
            image: noisy_png(self.width, self.height),
            natural_width: self.width,
            natural_height: self.height,
            source_title: "Checkout".to_string(),
            source_url: "https://shop.example/checkout".to_string(),
        })
    }
}

async fn setup(quota: u64, max_blobs: usize) -> (TempDir, Arc<Config>, Journal) {
    let tmp = TempDir::new().unwrap();
    let mut config = Config::minimal();
    config.db.path = tmp.path().join("data/snap.sqlite");
    config.storage.record_quota_bytes = quota;
    config.storage.max_blob_entries = max_blobs;
    migrate::run_migrations(&config).await.unwrap();
    let journal = db::open_journal(&config).await.unwrap();
    (tmp, Arc::new(config), journal)
}

#[tokio::test]
async fn test_payload_demoted_under_quota_pressure() {
    let (_tmp, _config, journal) = setup(8 * 1024, 10).await;
    let source = NoisyCapture { width: 64, height: 64 };

    let outcome = capture_into(&journal, &source).await.unwrap();
    assert!(outcome.demoted);
    assert_eq!(outcome.tier, Tier::External);

    let loaded = journal.load_record(&outcome.record.id).await.unwrap();
    let expected = noisy_png(64, 64);
    assert_eq!(loaded.payload.bytes(), Some(expected.as_slice()));
    assert!(journal.record_store().bytes_in_use().await.unwrap() <= 8 * 1024);
}

#[tokio::test]
async fn test_small_payload_stays_inline() {
    let (_tmp, _config, journal) = setup(10 * 1024 * 1024, 10).await;
    let source = NoisyCapture { width: 8, height: 8 };

    let outcome = capture_into(&journal, &source).await.unwrap();
    assert!(!outcome.demoted);
    assert_eq!(outcome.tier, Tier::Inline);
    assert_eq!(journal.stats().await.unwrap().blob_entries, 0);
}

#[tokio::test]
async fn test_storage_exhausted_when_metadata_alone_does_not_fit() {
    let (_tmp, _config, journal) = setup(64, 10).await;
    let source = NoisyCapture { width: 16, height: 16 };

    let err = capture_into(&journal, &source).await.unwrap_err();
    assert!(err.to_string().contains("Storage is full"));
    let snap = err.downcast_ref::<SnapError>().unwrap();
    assert!(matches!(snap, SnapError::StorageExhausted { .. }));

    // The orphaned blob from the failed retry is gone.
    assert_eq!(journal.stats().await.unwrap().blob_entries, 0);
    assert!(journal.list_records().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_retention_evicts_oldest_payload_and_export_uses_placeholder() {
    let (tmp, config, journal) = setup(8 * 1024, 2).await;
    let source = NoisyCapture { width: 48, height: 48 };

    let first = capture_into(&journal, &source).await.unwrap().record;
    let second = capture_into(&journal, &source).await.unwrap().record;
    capture_into(&journal, &source).await.unwrap();

    let evicted = journal.load_record(&first.id).await.unwrap();
    assert_eq!(evicted.payload, ResolvedPayload::Missing);
    assert!(!journal.load_record(&second.id).await.unwrap().payload.is_missing());

    // Annotating a record whose image is gone still works.
    let mut session = AnnotationSession::open(&journal, &first.id).await.unwrap();
    session
        .place(Point::new(10.0, 10.0), Size::new(48.0, 48.0), "Gone")
        .await
        .unwrap();

    let bundle = journal.build_export_bundle().await.unwrap();
    assert_eq!(bundle.total_screenshots, 3);
    assert_eq!(bundle.missing_payloads, 1);
    assert_eq!(bundle.total_annotations, 1);

    let (pdf, report) = render_bundle(&bundle, &config, &NoProgress).await.unwrap();
    assert_eq!(report.pages, 4);
    assert_eq!(report.placeholders, 1);
    let doc = lopdf::Document::load_mem(&pdf).unwrap();
    assert_eq!(doc.get_pages().len(), 4);

    let out = tmp.path().join("exports");
    let outcome = export_journal(Arc::new(journal), config, &out, Arc::new(NoProgress))
        .await
        .unwrap();
    assert_eq!(outcome.screenshots, 3);
    assert_eq!(outcome.missing_payloads, 1);
    assert!(outcome.path.exists());
}

#[tokio::test]
async fn test_export_bundle_removed_after_export() {
    let (tmp, config, journal) = setup(10 * 1024 * 1024, 10).await;
    capture_into(&journal, &NoisyCapture { width: 8, height: 8 })
        .await
        .unwrap();
    let journal = Arc::new(journal);

    let out = tmp.path().join("exports");
    let outcome = export_journal(Arc::clone(&journal), config, &out, Arc::new(NoProgress))
        .await
        .unwrap();

    let keys = journal.record_store().keys().await.unwrap();
    assert!(!keys.iter().any(|k| k.starts_with("export_")), "keys: {:?}", keys);
    assert!(matches!(
        journal.load_export_bundle(&outcome.export_id).await,
        Err(SnapError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_export_keeps_every_payload_at_retention_cap() {
    let (tmp, config, journal) = setup(8 * 1024, 2).await;
    let source = NoisyCapture { width: 48, height: 48 };
    let a = capture_into(&journal, &source).await.unwrap().record;
    let b = capture_into(&journal, &source).await.unwrap().record;
    assert!(a.is_external_payload() && b.is_external_payload());
    let journal = Arc::new(journal);

    let before = journal.hydrate(journal.all_records().await.unwrap()).await.unwrap();
    assert!(before.iter().all(|r| !r.payload.is_missing()));

    // Two payloads inline would exceed the quota, so the bundle spills.
    let out = tmp.path().join("exports");
    let outcome = export_journal(Arc::clone(&journal), config, &out, Arc::new(NoProgress))
        .await
        .unwrap();
    assert_eq!(outcome.missing_payloads, 0);

    let after = journal.hydrate(journal.all_records().await.unwrap()).await.unwrap();
    assert_eq!(after, before);
    assert_eq!(journal.stats().await.unwrap().blob_entries, 2);
    assert!(journal.export_store().list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_corrupt_blob_row_becomes_placeholder_page() {
    let (_tmp, config, journal) = setup(8 * 1024, 10).await;
    capture_into(&journal, &NoisyCapture { width: 8, height: 8 }).await.unwrap();
    let external = capture_into(&journal, &NoisyCapture { width: 48, height: 48 })
        .await
        .unwrap()
        .record;
    assert!(external.is_external_payload());

    let pool = db::connect(&config).await.unwrap();
    sqlx::query("UPDATE blobs SET metadata_json = 'not json'")
        .execute(&pool)
        .await
        .unwrap();

    let bundle = journal.build_export_bundle().await.unwrap();
    assert_eq!(bundle.total_screenshots, 2);
    assert_eq!(bundle.missing_payloads, 1);

    let (pdf, report) = render_bundle(&bundle, &config, &NoProgress).await.unwrap();
    assert_eq!(report.pages, 3);
    assert_eq!(report.placeholders, 1);
    assert_eq!(lopdf::Document::load_mem(&pdf).unwrap().get_pages().len(), 3);
}
