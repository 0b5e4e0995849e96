//! Record commands: capture, list, show, delete, clear, prune.

use anyhow::{bail, Result};
use std::path::PathBuf;

use snap_journal_core::collab::CaptureSource;
use snap_journal_core::error::SnapError;
use snap_journal_core::models::ScreenshotRecord;
use snap_journal_core::tiering::{SaveOutcome, Tier};

use crate::capture::{image_dimensions, FileCapture};
use crate::config::Config;
use crate::db::{self, Journal};

/// Capture through `source` and persist the new record.
pub async fn capture_into(journal: &Journal, source: &dyn CaptureSource) -> Result<SaveOutcome> {
    let capture = source.capture_visible_surface().await?;
    let record = ScreenshotRecord::from_capture(capture);
    match journal.save_record(&record).await {
        Ok(outcome) => Ok(outcome),
        Err(e @ SnapError::StorageExhausted { .. }) => Err(anyhow::Error::new(e)
            .context("Storage is full. Please delete some screenshots (`snap delete`, `snap prune`).")),
        Err(e) => Err(e.into()),
    }
}

/// `snap capture`.
pub async fn run_capture(
    config: &Config,
    image: PathBuf,
    title: Option<String>,
    url: Option<String>,
) -> Result<()> {
    let journal = db::open_journal(config).await?;
    let source = FileCapture::new(image).with_title(title).with_url(url);
    let outcome = capture_into(&journal, &source).await?;

    println!("{}", outcome.record.id);
    if outcome.tier == Tier::External {
        println!("  (image stored in blob store; record store is near its quota)");
    }
    Ok(())
}

/// `snap list`.
pub async fn run_list(config: &Config) -> Result<()> {
    let journal = db::open_journal(config).await?;
    let summaries = journal.list_records().await?;
    if summaries.is_empty() {
        println!("No screenshots.");
        return Ok(());
    }

    println!(
        "{:<48} {:<17} {:>5} {:>8}  TITLE",
        "ID", "CAPTURED", "NOTES", "TIER"
    );
    for s in &summaries {
        println!(
            "{:<48} {:<17} {:>5} {:>8}  {}",
            s.id,
            s.captured_at.format("%Y-%m-%d %H:%M"),
            s.annotation_count,
            if s.external { "external" } else { "inline" },
            s.source_title
        );
    }
    Ok(())
}

/// `snap show`.
pub async fn run_show(config: &Config, id: &str) -> Result<()> {
    let journal = db::open_journal(config).await?;
    let loaded = match journal.load_record(id).await {
        Ok(l) => l,
        Err(SnapError::NotFound(_)) => bail!("screenshot not found: {}", id),
        Err(e) => return Err(e.into()),
    };
    let r = &loaded.record;

    println!("--- Screenshot ---");
    println!("id:          {}", r.id);
    println!("title:       {}", r.source_title);
    println!("url:         {}", r.source_url);
    println!("captured:    {}", r.captured_at.to_rfc3339());
    println!("modified:    {}", r.last_modified.to_rfc3339());
    println!("size:        {}x{}", r.natural_width, r.natural_height);
    println!("tier:        {}", if r.is_external_payload() { "external" } else { "inline" });
    match loaded.payload.bytes() {
        Some(bytes) => {
            let actual = image_dimensions(bytes).ok();
            println!("payload:     {} bytes", bytes.len());
            if let Some((w, h)) = actual.filter(|&d| d != (r.natural_width, r.natural_height)) {
                println!("warning:     image is {}x{}; annotations will be rescaled", w, h);
            }
        }
        None => println!("payload:     missing (image data was evicted)"),
    }
    println!();
    println!("--- Annotations ({}) ---", r.annotations.len());
    for a in &r.annotations {
        println!(
            "{}  anchor=({:.1}, {:.1})  label=({:.1}, {:.1})  {}",
            a.id, a.anchor.x, a.anchor.y, a.label_offset.x, a.label_offset.y, a.text
        );
    }
    Ok(())
}

/// `snap delete`.
pub async fn run_delete(config: &Config, id: &str) -> Result<()> {
    let journal = db::open_journal(config).await?;
    if !journal.delete_record(id).await? {
        bail!("screenshot not found: {}", id);
    }
    println!("Deleted {}", id);
    Ok(())
}

/// `snap clear`.
pub async fn run_clear(config: &Config) -> Result<()> {
    let journal = db::open_journal(config).await?;
    let removed = journal.clear_all().await?;
    println!("Removed {} screenshot(s).", removed);
    Ok(())
}

/// `snap prune`.
pub async fn run_prune(config: &Config, keep: usize) -> Result<()> {
    let journal = db::open_journal(config).await?;
    let removed = journal.prune_to(keep).await?;
    println!("Pruned {} screenshot(s); kept the {} most recent.", removed, keep);
    Ok(())
}
