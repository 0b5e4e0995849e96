//! Storage statistics.
//!
//! Summarises how full each tier is: record counts split by where their
//! payload lives, record store usage against its quota, and blob store
//! occupancy. Used by `snap stats` to warn before the record store fills up.

use anyhow::Result;

use snap_journal_core::tiering::StorageStats;

use crate::config::Config;
use crate::db;

/// Usage above this percentage of the record store quota triggers a warning.
pub const QUOTA_WARNING_PERCENT: u64 = 80;

/// Run the stats command: query both tiers and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let journal = db::open_journal(config).await?;
    let stats = journal.stats().await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Snap Journal Storage Stats");
    println!("==========================");
    println!();
    println!("  Database:     {}", config.db.path.display());
    println!("  Size:         {}", format_bytes(db_size));
    println!();
    println!("  Screenshots:  {}", stats.records);
    println!("    inline:     {}", stats.inline_records);
    println!("    external:   {}", stats.external_records);
    println!("  Annotations:  {}", stats.annotations);
    println!();
    println!(
        "  Record store: {} / {} ({}%)",
        format_bytes(stats.bytes_in_use),
        format_bytes(stats.quota_bytes),
        stats.usage_percent()
    );
    println!(
        "  Blob store:   {} entries, {} (max {} entries){}",
        stats.blob_entries,
        format_bytes(stats.blob_bytes),
        config.storage.max_blob_entries,
        if stats.blob_tier_enabled { "" } else { " [disabled]" }
    );

    if let Some(warning) = quota_warning(&stats) {
        println!();
        println!("  {}", warning);
    }
    println!();
    Ok(())
}

pub fn quota_warning(stats: &StorageStats) -> Option<String> {
    let percent = stats.usage_percent();
    (percent > QUOTA_WARNING_PERCENT).then(|| {
        format!(
            "Warning: record store is {}% full. Delete or prune old screenshots (`snap prune --keep N`).",
            percent
        )
    })
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(bytes_in_use: u64) -> StorageStats {
        StorageStats {
            records: 3,
            annotations: 5,
            inline_records: 2,
            external_records: 1,
            bytes_in_use,
            quota_bytes: 1000,
            blob_entries: 1,
            blob_bytes: 4096,
            blob_tier_enabled: true,
        }
    }

    #[test]
    fn warns_only_above_threshold() {
        assert!(quota_warning(&stats(800)).is_none());
        assert!(quota_warning(&stats(810)).unwrap().contains("81%"));
    }

    #[test]
    fn bytes_are_human_readable() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(10_485_760), "10.0 MB");
        assert_eq!(format_bytes(1536), "1.5 KB");
    }
}
