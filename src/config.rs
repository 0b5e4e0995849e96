//! TOML configuration.
//!
//! ```toml
//! [db]
//! path = "./data/snap.sqlite"
//!
//! [storage]
//! record_quota_bytes = 10485760
//! max_blob_entries = 100
//! export_max_age_hours = 24
//!
//! [render]
//! page_width_mm = 230
//! page_height_mm = 317
//!
//! [render.correction]
//! enabled = true
//! reference_dpi = 96.0
//! offset_inches = 0.38
//!
//! [style]
//! annotation_color = "#ff4444"
//! ```
//!
//! Every section except `[db]` is optional and falls back to the defaults
//! shown above.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use snap_journal_core::coords::{RenderCorrection, Size};
use snap_journal_core::render::PageSpec;
use snap_journal_core::tiering::TieringConfig;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub style: StyleConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Hard limit of the record store, in bytes.
    #[serde(default = "default_record_quota")]
    pub record_quota_bytes: u64,
    #[serde(default = "default_max_blob_entries")]
    pub max_blob_entries: usize,
    #[serde(default = "default_export_max_age")]
    pub export_max_age_hours: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            record_quota_bytes: default_record_quota(),
            max_blob_entries: default_max_blob_entries(),
            export_max_age_hours: default_export_max_age(),
        }
    }
}

fn default_record_quota() -> u64 {
    10_485_760
}
fn default_max_blob_entries() -> usize {
    100
}
fn default_export_max_age() -> u64 {
    24
}

#[derive(Debug, Deserialize, Clone)]
pub struct RenderConfig {
    #[serde(default = "default_page_width")]
    pub page_width_mm: f64,
    #[serde(default = "default_page_height")]
    pub page_height_mm: f64,
    #[serde(default = "default_margin")]
    pub margin_mm: f64,
    #[serde(default = "default_header_height")]
    pub header_height_mm: f64,
    #[serde(default)]
    pub correction: CorrectionConfig,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            page_width_mm: default_page_width(),
            page_height_mm: default_page_height(),
            margin_mm: default_margin(),
            header_height_mm: default_header_height(),
            correction: CorrectionConfig::default(),
        }
    }
}

fn default_page_width() -> f64 {
    230.0
}
fn default_page_height() -> f64 {
    317.0
}
fn default_margin() -> f64 {
    10.0
}
fn default_header_height() -> f64 {
    20.0
}

/// Offset subtracted from annotation positions when they are burned into
/// the exported image.
#[derive(Debug, Deserialize, Clone)]
pub struct CorrectionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_reference_dpi")]
    pub reference_dpi: f64,
    #[serde(default = "default_offset_inches")]
    pub offset_inches: f64,
    #[serde(default = "default_reference_width")]
    pub reference_width: u32,
    #[serde(default = "default_reference_height")]
    pub reference_height: u32,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            reference_dpi: default_reference_dpi(),
            offset_inches: default_offset_inches(),
            reference_width: default_reference_width(),
            reference_height: default_reference_height(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_reference_dpi() -> f64 {
    96.0
}
fn default_offset_inches() -> f64 {
    0.38
}
fn default_reference_width() -> u32 {
    1920
}
fn default_reference_height() -> u32 {
    1080
}

#[derive(Debug, Deserialize, Clone)]
pub struct StyleConfig {
    #[serde(default = "default_annotation_color")]
    pub annotation_color: String,
    #[serde(default = "default_text_color")]
    pub text_color: String,
    #[serde(default = "default_text_bg_color")]
    pub text_bg_color: String,
    /// Label background opacity, percent.
    #[serde(default = "default_text_bg_opacity")]
    pub text_bg_opacity: u8,
    /// Label text height in pixels.
    #[serde(default = "default_font_size")]
    pub font_size: u32,
}

impl Default for StyleConfig {
    fn default() -> Self {
        Self {
            annotation_color: default_annotation_color(),
            text_color: default_text_color(),
            text_bg_color: default_text_bg_color(),
            text_bg_opacity: default_text_bg_opacity(),
            font_size: default_font_size(),
        }
    }
}

fn default_annotation_color() -> String {
    "#ff4444".to_string()
}
fn default_text_color() -> String {
    "#333333".to_string()
}
fn default_text_bg_color() -> String {
    "#ffffff".to_string()
}
fn default_text_bg_opacity() -> u8 {
    95
}
fn default_font_size() -> u32 {
    14
}

impl Config {
    /// Defaults for commands run without a config file.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig {
                path: PathBuf::from("./data/snap.sqlite"),
            },
            storage: StorageConfig::default(),
            render: RenderConfig::default(),
            style: StyleConfig::default(),
        }
    }

    pub fn tiering(&self) -> TieringConfig {
        TieringConfig {
            max_blob_entries: self.storage.max_blob_entries,
            ..TieringConfig::default()
        }
    }

    pub fn page_spec(&self) -> PageSpec {
        PageSpec {
            width_mm: self.render.page_width_mm,
            height_mm: self.render.page_height_mm,
            margin_mm: self.render.margin_mm,
            header_height_mm: self.render.header_height_mm,
        }
    }

    pub fn correction(&self) -> RenderCorrection {
        let c = &self.render.correction;
        RenderCorrection {
            enabled: c.enabled,
            reference_dpi: c.reference_dpi,
            offset_inches: c.offset_inches,
            reference_size: Size::from((c.reference_width, c.reference_height)),
        }
    }

    pub fn export_max_age(&self) -> chrono::Duration {
        chrono::Duration::hours(self.storage.export_max_age_hours as i64)
    }
}

/// Parse a `#rrggbb` colour.
pub fn parse_hex_color(s: &str) -> Option<[u8; 3]> {
    let hex = s.strip_prefix('#')?;
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    Some([channel(0)?, channel(2)?, channel(4)?])
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Validate storage
    if config.storage.record_quota_bytes == 0 {
        anyhow::bail!("storage.record_quota_bytes must be > 0");
    }
    if config.storage.max_blob_entries < 1 {
        anyhow::bail!("storage.max_blob_entries must be >= 1");
    }

    // Validate render geometry
    let area = config.page_spec().content_area();
    if area.width <= 0.0 || area.height <= 0.0 {
        anyhow::bail!(
            "render page {}x{} mm leaves no content area after margins and header",
            config.render.page_width_mm,
            config.render.page_height_mm
        );
    }
    if config.render.correction.reference_dpi <= 0.0 {
        anyhow::bail!("render.correction.reference_dpi must be > 0");
    }

    // Validate style
    for (name, value) in [
        ("style.annotation_color", &config.style.annotation_color),
        ("style.text_color", &config.style.text_color),
        ("style.text_bg_color", &config.style.text_bg_color),
    ] {
        if parse_hex_color(value).is_none() {
            anyhow::bail!("{} must be a #rrggbb colour, got '{}'", name, value);
        }
    }
    if config.style.text_bg_opacity > 100 {
        anyhow::bail!("style.text_bg_opacity must be in [0, 100]");
    }
    if config.style.font_size == 0 {
        anyhow::bail!("style.font_size must be > 0");
    }

    Ok(())
}
