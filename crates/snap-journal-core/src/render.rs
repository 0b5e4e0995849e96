//! Document rendering: export bundle → ordered page descriptors.
//!
//! The renderer never draws annotations as document primitives. Each record's
//! annotations are burned into its raster by a [`Flattener`] first, so a
//! content page is one placed image plus static header text.
//!
//! # Page order
//!
//! | Index | Page |
//! |-------|------|
//! | 0 | Summary (title, export timestamp, totals) |
//! | 1..=N | One per record in bundle order; a placeholder when the payload is missing |
//!
//! # Failure handling
//!
//! A flattening failure downgrades that page to the unannotated original
//! image. A missing payload downgrades it to a placeholder. Neither aborts
//! the document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::coords::Size;
use crate::error::{SnapError, SnapResult};
use crate::models::{Annotation, ExportBundle, HydratedRecord, ResolvedPayload};

pub const SUMMARY_TITLE: &str = "Screenshot Journal";
pub const SUMMARY_SUBTITLE: &str = "Annotated screenshots with notes";
pub const PLACEHOLDER_TEXT: &str = "Screenshot unavailable: the image data for this capture could not be loaded.";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

/// Download name for a document generated at `at`.
pub fn export_filename(at: DateTime<Utc>) -> String {
    format!("Screenshot-Journal-{}.pdf", at.format("%Y-%m-%dT%H-%M-%S"))
}

/// Page geometry in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageSpec {
    pub width_mm: f64,
    pub height_mm: f64,
    pub margin_mm: f64,
    pub header_height_mm: f64,
}

impl Default for PageSpec {
    fn default() -> Self {
        Self {
            width_mm: 230.0,
            height_mm: 317.0,
            margin_mm: 10.0,
            header_height_mm: 20.0,
        }
    }
}

impl PageSpec {
    /// Area available to the image: page minus margins and header.
    pub fn content_area(&self) -> Rect {
        Rect {
            x: self.margin_mm,
            y: self.margin_mm + self.header_height_mm,
            width: self.width_mm - 2.0 * self.margin_mm,
            height: self.height_mm - 2.0 * self.margin_mm - self.header_height_mm,
        }
    }
}

/// Rectangle in millimetres, origin at the page's top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Scale an image into `area` preserving aspect ratio, centred
/// horizontally and top-aligned.
pub fn fit_image(natural: Size, area: Rect) -> Option<Rect> {
    if natural.is_degenerate() || area.width <= 0.0 || area.height <= 0.0 {
        return None;
    }
    let scale = (area.width / natural.width).min(area.height / natural.height);
    let width = natural.width * scale;
    let height = natural.height * scale;
    Some(Rect {
        x: area.x + (area.width - width) / 2.0,
        y: area.y,
        width,
        height,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextStyle {
    Title,
    Heading,
    Body,
    Caption,
}

impl TextStyle {
    /// Font size in points.
    pub fn size_pt(self) -> f64 {
        match self {
            TextStyle::Title => 24.0,
            TextStyle::Heading => 14.0,
            TextStyle::Body => 12.0,
            TextStyle::Caption => 9.0,
        }
    }
}

/// A line of static text. `y_mm` is the baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    pub text: String,
    pub x_mm: f64,
    pub y_mm: f64,
    pub style: TextStyle,
}

impl TextBlock {
    fn new(text: impl Into<String>, x_mm: f64, y_mm: f64, style: TextStyle) -> Self {
        Self {
            text: text.into(),
            x_mm,
            y_mm,
            style,
        }
    }
}

/// Raster ready for placement, in any format the sink can decode.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterImage {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PageContent {
    Summary,
    Image {
        image: RasterImage,
        placement: Rect,
        /// False when flattening failed and the original was used.
        annotated: bool,
    },
    Placeholder {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageDescriptor {
    pub index: usize,
    pub record_id: Option<String>,
    pub text: Vec<TextBlock>,
    pub content: PageContent,
}

impl PageDescriptor {
    pub fn is_placeholder(&self) -> bool {
        matches!(self.content, PageContent::Placeholder { .. })
    }
}

/// Burns annotations into a payload image.
pub trait Flattener {
    /// `natural` is the size the annotation positions are expressed in.
    fn flatten(&self, payload: &[u8], natural: Size, annotations: &[Annotation]) -> SnapResult<RasterImage>;

    /// Pixel dimensions of a payload without drawing on it.
    fn probe(&self, payload: &[u8]) -> SnapResult<(u32, u32)>;
}

/// Document-generation collaborator: receives pages in order, then
/// produces the finished document.
pub trait DocumentSink {
    fn add_page(&mut self, page: &PageDescriptor) -> SnapResult<()>;

    fn finish(&mut self) -> SnapResult<Vec<u8>>;
}

/// Counts from one render pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RenderReport {
    pub pages: usize,
    pub placeholders: usize,
    pub unannotated_fallbacks: usize,
}

impl RenderReport {
    pub fn record(&mut self, page: &PageDescriptor) {
        self.pages += 1;
        match &page.content {
            PageContent::Placeholder { .. } => self.placeholders += 1,
            PageContent::Image { annotated: false, .. } => self.unannotated_fallbacks += 1,
            _ => {}
        }
    }
}

pub struct DocumentRenderer<'a, F: Flattener> {
    flattener: &'a F,
    page: PageSpec,
}

impl<'a, F: Flattener> DocumentRenderer<'a, F> {
    pub fn new(flattener: &'a F, page: PageSpec) -> Self {
        Self { flattener, page }
    }

    pub fn page_spec(&self) -> &PageSpec {
        &self.page
    }

    /// Number of pages `bundle` will produce.
    pub fn page_count(bundle: &ExportBundle) -> usize {
        bundle.records.len() + 1
    }

    pub fn summary_page(&self, bundle: &ExportBundle) -> PageDescriptor {
        let x = self.page.margin_mm;
        let top = self.page.margin_mm;
        let lines = [
            (SUMMARY_TITLE.to_string(), 15.0, TextStyle::Title),
            (SUMMARY_SUBTITLE.to_string(), 25.0, TextStyle::Heading),
            (format!("Generated: {}", bundle.exported_at.format(TIMESTAMP_FORMAT)), 40.0, TextStyle::Body),
            (format!("Total screenshots: {}", bundle.total_screenshots), 50.0, TextStyle::Body),
            (format!("Total annotations: {}", bundle.total_annotations), 60.0, TextStyle::Body),
            (format!("Unavailable screenshots: {}", bundle.missing_payloads), 70.0, TextStyle::Body),
        ];
        PageDescriptor {
            index: 0,
            record_id: None,
            text: lines
                .into_iter()
                .map(|(text, dy, style)| TextBlock::new(text, x, top + dy, style))
                .collect(),
            content: PageContent::Summary,
        }
    }

    fn header(&self, record: &HydratedRecord) -> Vec<TextBlock> {
        let x = self.page.margin_mm;
        let top = self.page.margin_mm;
        let mut text = vec![TextBlock::new(
            format!("Captured: {}", record.captured_at.format(TIMESTAMP_FORMAT)),
            x,
            top + 7.0,
            TextStyle::Heading,
        )];
        if !record.source_title.is_empty() {
            text.push(TextBlock::new(record.source_title.clone(), x, top + 14.0, TextStyle::Caption));
        }
        text
    }

    /// Build page `index` (1-based among content pages) for `record`.
    pub fn content_page(&self, index: usize, record: &HydratedRecord) -> PageDescriptor {
        let mut text = self.header(record);
        let content = match &record.payload {
            ResolvedPayload::Missing => self.placeholder(record, &mut text, "payload missing"),
            ResolvedPayload::Available(bytes) => match self.place_image(record, bytes) {
                Ok(content) => content,
                Err(e) => {
                    warn!(record_id = %record.id, operation = "render", error = %e, "image unusable; placeholder page");
                    self.placeholder(record, &mut text, &e.to_string())
                }
            },
        };
        PageDescriptor {
            index,
            record_id: Some(record.id.clone()),
            text,
            content,
        }
    }

    fn placeholder(&self, record: &HydratedRecord, text: &mut Vec<TextBlock>, reason: &str) -> PageContent {
        let area = self.page.content_area();
        text.push(TextBlock::new(PLACEHOLDER_TEXT, area.x, area.y + 10.0, TextStyle::Body));
        text.push(TextBlock::new(format!("Record: {}", record.id), area.x, area.y + 18.0, TextStyle::Caption));
        PageContent::Placeholder {
            reason: reason.to_string(),
        }
    }

    fn place_image(&self, record: &HydratedRecord, bytes: &[u8]) -> SnapResult<PageContent> {
        let (image, annotated) =
            match self.flattener.flatten(bytes, record.natural_size(), &record.annotations) {
                Ok(image) => (image, true),
                Err(e) => {
                    warn!(record_id = %record.id, operation = "flatten", error = %e, "falling back to unannotated image");
                    let (width, height) = self.flattener.probe(bytes)?;
                    (
                        RasterImage {
                            data: bytes.to_vec(),
                            width,
                            height,
                        },
                        false,
                    )
                }
            };
        let placement = fit_image(
            Size::from((image.width, image.height)),
            self.page.content_area(),
        )
        .ok_or_else(|| SnapError::RenderFailure {
            record_id: record.id.clone(),
            reason: format!("cannot place {}x{} image", image.width, image.height),
        })?;
        Ok(PageContent::Image {
            image,
            placement,
            annotated,
        })
    }

    /// Every page of `bundle`, in order.
    pub fn pages(&self, bundle: &ExportBundle) -> Vec<PageDescriptor> {
        let mut pages = Vec::with_capacity(Self::page_count(bundle));
        pages.push(self.summary_page(bundle));
        for (i, record) in bundle.records.iter().enumerate() {
            pages.push(self.content_page(i + 1, record));
        }
        pages
    }

    /// Render `bundle` into `sink` and return the finished document.
    pub fn render<S: DocumentSink>(&self, bundle: &ExportBundle, sink: &mut S) -> SnapResult<(Vec<u8>, RenderReport)> {
        let mut report = RenderReport::default();
        for page in self.pages(bundle) {
            sink.add_page(&page)?;
            report.record(&page);
        }
        Ok((sink.finish()?, report))
    }
}
