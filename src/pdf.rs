//! PDF document sink built on `lopdf`.
//!
//! One PDF page per descriptor. Raster content becomes an RGB image
//! XObject scaled into its placement rectangle; text blocks use the
//! built-in Helvetica font. Page geometry arrives in millimetres with a
//! top-left origin and is converted to PDF points (bottom-left origin).

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};

use snap_journal_core::error::{SnapError, SnapResult};
use snap_journal_core::render::{DocumentSink, PageContent, PageDescriptor, PageSpec, Rect, TextBlock};

const PT_PER_MM: f64 = 72.0 / 25.4;

fn pt(mm: f64) -> f32 {
    (mm * PT_PER_MM) as f32
}

/// Helvetica here uses WinAnsi; anything outside printable ASCII becomes '?'.
fn pdf_text(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| if c.is_ascii() && !c.is_ascii_control() { c as u8 } else { b'?' })
        .collect()
}

pub struct PdfSink {
    doc: Document,
    pages_id: ObjectId,
    font_id: ObjectId,
    page_ids: Vec<ObjectId>,
    spec: PageSpec,
}

impl PdfSink {
    pub fn new(spec: PageSpec) -> Self {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        Self {
            doc,
            pages_id,
            font_id,
            page_ids: Vec::new(),
            spec,
        }
    }

    pub fn page_count(&self) -> usize {
        self.page_ids.len()
    }

    fn text_ops(&self, block: &TextBlock, ops: &mut Vec<Operation>) {
        let height = pt(self.spec.height_mm);
        ops.push(Operation::new("BT", vec![]));
        ops.push(Operation::new(
            "Tf",
            vec!["F1".into(), Object::Real(block.style.size_pt() as f32)],
        ));
        ops.push(Operation::new(
            "Td",
            vec![Object::Real(pt(block.x_mm)), Object::Real(height - pt(block.y_mm))],
        ));
        ops.push(Operation::new("Tj", vec![Object::string_literal(pdf_text(&block.text))]));
        ops.push(Operation::new("ET", vec![]));
    }

    fn add_image(&mut self, data: &[u8], record_id: &str) -> SnapResult<(ObjectId, u32, u32)> {
        let rgb = image::load_from_memory(data)
            .map_err(|e| SnapError::RenderFailure {
                record_id: record_id.to_string(),
                reason: e.to_string(),
            })?
            .to_rgb8();
        let (w, h) = rgb.dimensions();
        let mut stream = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => i64::from(w),
                "Height" => i64::from(h),
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
            },
            rgb.into_raw(),
        );
        // Uncompressed if deflate fails; the page is still valid.
        let _ = stream.compress();
        Ok((self.doc.add_object(stream), w, h))
    }

    fn image_ops(&self, placement: &Rect, ops: &mut Vec<Operation>) {
        let height = pt(self.spec.height_mm);
        let w = pt(placement.width);
        let h = pt(placement.height);
        let x = pt(placement.x);
        let y = height - pt(placement.y) - h;
        ops.push(Operation::new("q", vec![]));
        ops.push(Operation::new(
            "cm",
            vec![
                Object::Real(w),
                0.into(),
                0.into(),
                Object::Real(h),
                Object::Real(x),
                Object::Real(y),
            ],
        ));
        ops.push(Operation::new("Do", vec!["Im1".into()]));
        ops.push(Operation::new("Q", vec![]));
    }
}

impl DocumentSink for PdfSink {
    fn add_page(&mut self, page: &PageDescriptor) -> SnapResult<()> {
        let mut ops = Vec::new();
        let mut xobjects = lopdf::Dictionary::new();

        if let PageContent::Image { image, placement, .. } = &page.content {
            let record_id = page.record_id.as_deref().unwrap_or("unknown");
            let (image_id, _, _) = self.add_image(&image.data, record_id)?;
            xobjects.set("Im1", image_id);
            self.image_ops(placement, &mut ops);
        }
        for block in &page.text {
            self.text_ops(block, &mut ops);
        }

        let content = Content { operations: ops }
            .encode()
            .map_err(SnapError::backend)?;
        let content_id = self.doc.add_object(Stream::new(dictionary! {}, content));
        let page_id = self.doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => self.pages_id,
            "MediaBox" => vec![
                0.into(),
                0.into(),
                Object::Real(pt(self.spec.width_mm)),
                Object::Real(pt(self.spec.height_mm)),
            ],
            "Contents" => content_id,
            "Resources" => dictionary! {
                "Font" => dictionary! { "F1" => self.font_id },
                "XObject" => xobjects,
            },
        });
        self.page_ids.push(page_id);
        Ok(())
    }

    fn finish(&mut self) -> SnapResult<Vec<u8>> {
        let kids: Vec<Object> = self.page_ids.iter().map(|id| (*id).into()).collect();
        self.doc.objects.insert(
            self.pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => self.page_ids.len() as i64,
            }),
        );
        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        });
        self.doc.trailer.set("Root", catalog_id);

        let mut out = Vec::new();
        self.doc.save_to(&mut out).map_err(SnapError::backend)?;
        Ok(out)
    }
}
