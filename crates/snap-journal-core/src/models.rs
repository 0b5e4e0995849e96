//! Data types that flow through capture, annotation, persistence, and export.
//!
//! All annotation positions are in the authoritative pixel space of the
//! owning record (`natural_width` × `natural_height`); see [`crate::coords`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::coords::{Point, Size};

/// Offset of a freshly placed label from its anchor, in surface pixels.
pub const DEFAULT_LABEL_OFFSET: (f64, f64) = (60.0, -30.0);

/// Text substituted for an annotation edited down to nothing.
pub const EMPTY_ANNOTATION_TEXT: &str = "No text";

pub fn new_screenshot_id() -> String {
    format!("screenshot_{}", uuid::Uuid::new_v4())
}

pub fn new_annotation_id() -> String {
    format!("annotation_{}", uuid::Uuid::new_v4())
}

pub fn new_export_id() -> String {
    format!("export_{}", uuid::Uuid::new_v4())
}

/// Base64 encoding for binary fields inside JSON records.
pub(crate) mod b64 {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// A point-of-interest label on a screenshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: String,
    /// Pinpoint location.
    pub anchor: Point,
    /// Where the text box currently sits. Moves independently of `anchor`.
    pub label_offset: Point,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl Annotation {
    pub fn new(anchor: Point, label_offset: Point, text: impl Into<String>) -> Self {
        Self {
            id: new_annotation_id(),
            anchor,
            label_offset,
            text: normalize_text(&text.into()),
            created_at: Utc::now(),
        }
    }
}

pub(crate) fn normalize_text(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        EMPTY_ANNOTATION_TEXT.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Reference to a payload held in the blob store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobRef {
    pub blob_id: String,
}

/// Where a record's image bytes live. Exactly one form at a time.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Payload {
    Inline(#[serde(with = "b64")] Vec<u8>),
    External(BlobRef),
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Inline(bytes) => write!(f, "Inline({} bytes)", bytes.len()),
            Payload::External(r) => write!(f, "External({})", r.blob_id),
        }
    }
}

impl Payload {
    pub fn is_external(&self) -> bool {
        matches!(self, Payload::External(_))
    }
}

/// A payload after blob resolution.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ResolvedPayload {
    Available(#[serde(with = "b64")] Vec<u8>),
    /// The external blob was evicted or never written.
    Missing,
}

impl fmt::Debug for ResolvedPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvedPayload::Available(bytes) => write!(f, "Available({} bytes)", bytes.len()),
            ResolvedPayload::Missing => write!(f, "Missing"),
        }
    }
}

impl ResolvedPayload {
    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            ResolvedPayload::Available(b) => Some(b),
            ResolvedPayload::Missing => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, ResolvedPayload::Missing)
    }
}

/// Output of the capture collaborator.
#[derive(Debug, Clone)]
pub struct Capture {
    pub image: Vec<u8>,
    pub natural_width: u32,
    pub natural_height: u32,
    pub source_title: String,
    pub source_url: String,
}

/// One captured page image plus its annotations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenshotRecord {
    pub id: String,
    pub payload: Payload,
    pub natural_width: u32,
    pub natural_height: u32,
    /// Display / z-order.
    pub annotations: Vec<Annotation>,
    pub source_title: String,
    pub source_url: String,
    pub captured_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

impl ScreenshotRecord {
    pub fn from_capture(capture: Capture) -> Self {
        let now = Utc::now();
        Self {
            id: new_screenshot_id(),
            payload: Payload::Inline(capture.image),
            natural_width: capture.natural_width,
            natural_height: capture.natural_height,
            annotations: Vec::new(),
            source_title: capture.source_title,
            source_url: capture.source_url,
            captured_at: now,
            last_modified: now,
        }
    }

    pub fn natural_size(&self) -> Size {
        Size::from((self.natural_width, self.natural_height))
    }

    pub fn is_external_payload(&self) -> bool {
        self.payload.is_external()
    }

    pub fn annotation(&self, id: &str) -> Option<&Annotation> {
        self.annotations.iter().find(|a| a.id == id)
    }

    pub fn annotation_mut(&mut self, id: &str) -> Option<&mut Annotation> {
        self.annotations.iter_mut().find(|a| a.id == id)
    }

    pub fn touch(&mut self) {
        self.last_modified = Utc::now();
    }

    /// Rescale stored annotation positions when the payload's true pixel
    /// size differs from the recorded one.
    ///
    /// Returns `true` if anything changed.
    pub fn reconcile_natural_size(&mut self, actual_width: u32, actual_height: u32) -> bool {
        if actual_width == self.natural_width && actual_height == self.natural_height {
            return false;
        }
        if self.natural_width == 0 || self.natural_height == 0 {
            self.natural_width = actual_width;
            self.natural_height = actual_height;
            return true;
        }

        let sx = f64::from(actual_width) / f64::from(self.natural_width);
        let sy = f64::from(actual_height) / f64::from(self.natural_height);
        tracing::warn!(
            record_id = %self.id,
            recorded_width = self.natural_width,
            recorded_height = self.natural_height,
            actual_width,
            actual_height,
            "natural size mismatch; rescaling annotations"
        );
        for a in &mut self.annotations {
            a.anchor = Point::new(a.anchor.x * sx, a.anchor.y * sy);
            a.label_offset = Point::new(a.label_offset.x * sx, a.label_offset.y * sy);
        }
        self.natural_width = actual_width;
        self.natural_height = actual_height;
        self.touch();
        true
    }

    pub fn summary(&self) -> RecordSummary {
        RecordSummary {
            id: self.id.clone(),
            source_title: self.source_title.clone(),
            source_url: self.source_url.clone(),
            captured_at: self.captured_at,
            annotation_count: self.annotations.len(),
            external: self.is_external_payload(),
            inline_bytes: match &self.payload {
                Payload::Inline(b) => Some(b.len()),
                Payload::External(_) => None,
            },
        }
    }
}

/// Metadata-only view of a record for listings.
#[derive(Debug, Clone, Serialize)]
pub struct RecordSummary {
    pub id: String,
    pub source_title: String,
    pub source_url: String,
    pub captured_at: DateTime<Utc>,
    pub annotation_count: usize,
    pub external: bool,
    pub inline_bytes: Option<usize>,
}

/// A record whose payload has been resolved for export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HydratedRecord {
    pub id: String,
    pub payload: ResolvedPayload,
    pub natural_width: u32,
    pub natural_height: u32,
    pub annotations: Vec<Annotation>,
    pub source_title: String,
    pub source_url: String,
    pub captured_at: DateTime<Utc>,
}

impl HydratedRecord {
    pub fn new(record: ScreenshotRecord, payload: ResolvedPayload) -> Self {
        Self {
            id: record.id,
            payload,
            natural_width: record.natural_width,
            natural_height: record.natural_height,
            annotations: record.annotations,
            source_title: record.source_title,
            source_url: record.source_url,
            captured_at: record.captured_at,
        }
    }

    pub fn natural_size(&self) -> Size {
        Size::from((self.natural_width, self.natural_height))
    }
}

/// Transient, fully-hydrated collection that drives one export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportBundle {
    pub export_id: String,
    pub exported_at: DateTime<Utc>,
    pub total_screenshots: usize,
    pub total_annotations: usize,
    pub missing_payloads: usize,
    pub records: Vec<HydratedRecord>,
}

impl ExportBundle {
    pub fn new(records: Vec<HydratedRecord>) -> Self {
        Self {
            export_id: new_export_id(),
            exported_at: Utc::now(),
            total_screenshots: records.len(),
            total_annotations: records.iter().map(|r| r.annotations.len()).sum(),
            missing_payloads: records.iter().filter(|r| r.payload.is_missing()).count(),
            records,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capture(w: u32, h: u32) -> Capture {
        Capture {
            image: vec![1, 2, 3],
            natural_width: w,
            natural_height: h,
            source_title: "Example".into(),
            source_url: "https://example.com".into(),
        }
    }

    #[test]
    fn payload_json_encodes_inline_bytes_as_base64() {
        let p = Payload::Inline(vec![0, 255, 7]);
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["kind"], "inline");
        assert_eq!(json["value"], "AP8H");
        let back: Payload = serde_json::from_value(json).unwrap();
        assert_eq!(back, p);

        let ext = Payload::External(BlobRef {
            blob_id: "payload_x".into(),
        });
        let json = serde_json::to_value(&ext).unwrap();
        assert_eq!(json["kind"], "external");
        assert_eq!(json["value"]["blob_id"], "payload_x");
    }

    #[test]
    fn empty_text_is_normalized() {
        let a = Annotation::new(Point::ORIGIN, Point::ORIGIN, "   ");
        assert_eq!(a.text, EMPTY_ANNOTATION_TEXT);
        let b = Annotation::new(Point::ORIGIN, Point::ORIGIN, "  login button ");
        assert_eq!(b.text, "login button");
    }

    #[test]
    fn reconcile_rescales_annotations_per_axis() {
        let mut r = ScreenshotRecord::from_capture(capture(1000, 500));
        r.annotations.push(Annotation::new(
            Point::new(100.0, 100.0),
            Point::new(160.0, 70.0),
            "x",
        ));
        assert!(!r.reconcile_natural_size(1000, 500));
        assert!(r.reconcile_natural_size(2000, 1500));
        let a = &r.annotations[0];
        assert!(a.anchor.approx_eq(Point::new(200.0, 300.0), 1e-9));
        assert!(a.label_offset.approx_eq(Point::new(320.0, 210.0), 1e-9));
        assert_eq!((r.natural_width, r.natural_height), (2000, 1500));
    }

    #[test]
    fn bundle_totals_count_missing_payloads() {
        let mut a = ScreenshotRecord::from_capture(capture(10, 10));
        a.annotations
            .push(Annotation::new(Point::ORIGIN, Point::ORIGIN, "one"));
        let b = ScreenshotRecord::from_capture(capture(10, 10));
        let bundle = ExportBundle::new(vec![
            HydratedRecord::new(a, ResolvedPayload::Available(vec![1])),
            HydratedRecord::new(b, ResolvedPayload::Missing),
        ]);
        assert_eq!(bundle.total_screenshots, 2);
        assert_eq!(bundle.total_annotations, 1);
        assert_eq!(bundle.missing_payloads, 1);
        assert!(bundle.export_id.starts_with("export_"));
    }
}
