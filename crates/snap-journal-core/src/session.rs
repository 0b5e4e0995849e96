//! Annotation edit session over one screenshot record.
//!
//! ```text
//!   place ──▶ Placed ──begin_drag──▶ Dragging{anchor|label} ──end_drag──▶ Placed
//!                │                        │ drag_to (every tick)
//!                └── delete ──▶ Deleted   ▼
//!                                   stored position overwritten
//! ```
//!
//! Every committed mutation is persisted immediately through the
//! [`TieredPersistence`] manager. Drag ticks update the authoritative
//! position in memory; the save happens on release.
//!
//! A mutation whose save fails is rolled back, so the session's record
//! always matches what is stored. A failed drag release restores the
//! positions from before `begin_drag`.
//!
//! Surface positions must be finite and the surface non-empty; anything
//! else is rejected with `InvalidInput` before the record is touched.

use tracing::{debug, warn};

use crate::coords::{from_surface, Point, Size};
use crate::error::{SnapError, SnapResult};
use crate::models::{normalize_text, Annotation, ResolvedPayload, ScreenshotRecord, DEFAULT_LABEL_OFFSET};
use crate::store::{BlobStore, RecordStore};
use crate::tiering::TieredPersistence;

/// Which part of an annotation a drag moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DragHandle {
    Anchor,
    Label,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Dragging {
        annotation_id: String,
        handle: DragHandle,
    },
}

pub struct AnnotationSession<'a, R: RecordStore, B: BlobStore> {
    store: &'a TieredPersistence<R, B>,
    record: ScreenshotRecord,
    payload: ResolvedPayload,
    state: SessionState,
    /// Record as it was when the current drag began.
    drag_origin: Option<ScreenshotRecord>,
}

impl<'a, R: RecordStore, B: BlobStore> AnnotationSession<'a, R, B> {
    /// Open a session on a stored record.
    pub async fn open(store: &'a TieredPersistence<R, B>, record_id: &str) -> SnapResult<Self> {
        let loaded = store.load_record(record_id).await?;
        if loaded.payload.is_missing() {
            warn!(record_id, "opening annotation session without a payload");
        }
        Ok(Self {
            store,
            record: loaded.record,
            payload: loaded.payload,
            state: SessionState::Idle,
            drag_origin: None,
        })
    }

    pub fn record(&self) -> &ScreenshotRecord {
        &self.record
    }

    pub fn payload(&self) -> &ResolvedPayload {
        &self.payload
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Save the mutated record, or restore `previous` if the save fails.
    async fn commit(&mut self, previous: ScreenshotRecord) -> SnapResult<()> {
        self.record.touch();
        match self.store.save_record(&self.record).await {
            Ok(outcome) => {
                self.record = outcome.record;
                Ok(())
            }
            Err(e) => {
                warn!(record_id = %self.record.id, error = %e, "save failed; mutation rolled back");
                self.record = previous;
                Err(e)
            }
        }
    }

    /// Convert a surface position to authoritative space, rejecting input
    /// that cannot be stored.
    fn stored_position(&self, at: Point, surface: Size) -> SnapResult<Point> {
        if !at.is_finite() {
            return Err(SnapError::InvalidInput(format!(
                "position ({}, {}) is not finite",
                at.x, at.y
            )));
        }
        if !surface.is_finite() || surface.is_degenerate() {
            return Err(SnapError::InvalidInput(format!(
                "surface {}x{} is not a drawable size",
                surface.width, surface.height
            )));
        }
        let position = from_surface(at, self.record.natural_size(), surface);
        if !position.is_finite() {
            return Err(SnapError::InvalidInput(format!(
                "position ({}, {}) overflows on a {}x{} surface",
                at.x, at.y, surface.width, surface.height
            )));
        }
        Ok(position)
    }

    fn require_idle(&self, operation: &str) -> SnapResult<()> {
        match &self.state {
            SessionState::Idle => Ok(()),
            SessionState::Dragging { annotation_id, .. } => Err(SnapError::InvalidInput(format!(
                "{} while dragging {}",
                operation, annotation_id
            ))),
        }
    }

    fn require_annotation(&self, id: &str) -> SnapResult<()> {
        if self.record.annotation(id).is_some() {
            Ok(())
        } else {
            Err(SnapError::InvalidInput(format!(
                "no annotation {} on {}",
                id, self.record.id
            )))
        }
    }

    /// Create an annotation at a click on `surface`.
    ///
    /// The label starts at a fixed surface-pixel offset from the anchor.
    pub async fn place(&mut self, at: Point, surface: Size, text: &str) -> SnapResult<Annotation> {
        self.require_idle("place")?;
        let anchor = self.stored_position(at, surface)?;
        let label = self.stored_position(
            at.offset(DEFAULT_LABEL_OFFSET.0, DEFAULT_LABEL_OFFSET.1),
            surface,
        )?;
        let annotation = Annotation::new(anchor, label, text);
        let previous = self.record.clone();
        self.record.annotations.push(annotation.clone());
        self.commit(previous).await?;
        debug!(record_id = %self.record.id, annotation_id = %annotation.id, "annotation placed");
        Ok(annotation)
    }

    pub fn begin_drag(&mut self, annotation_id: &str, handle: DragHandle) -> SnapResult<()> {
        self.require_idle("begin_drag")?;
        self.require_annotation(annotation_id)?;
        self.drag_origin = Some(self.record.clone());
        self.state = SessionState::Dragging {
            annotation_id: annotation_id.to_string(),
            handle,
        };
        Ok(())
    }

    /// Move the dragged handle to a position on `surface`.
    pub fn drag_to(&mut self, at: Point, surface: Size) -> SnapResult<Point> {
        let SessionState::Dragging { annotation_id, handle } = &self.state else {
            return Err(SnapError::InvalidInput("drag_to without begin_drag".into()));
        };
        let (annotation_id, handle) = (annotation_id.clone(), *handle);
        let position = self.stored_position(at, surface)?;
        let annotation = self
            .record
            .annotation_mut(&annotation_id)
            .ok_or_else(|| SnapError::InvalidInput(format!("annotation {} vanished", annotation_id)))?;
        match handle {
            DragHandle::Anchor => annotation.anchor = position,
            DragHandle::Label => annotation.label_offset = position,
        }
        self.record.touch();
        Ok(position)
    }

    /// Release the drag and persist the final position.
    pub async fn end_drag(&mut self) -> SnapResult<()> {
        if self.state == SessionState::Idle {
            return Err(SnapError::InvalidInput("end_drag without begin_drag".into()));
        }
        self.state = SessionState::Idle;
        let previous = self.drag_origin.take().unwrap_or_else(|| self.record.clone());
        self.commit(previous).await
    }

    pub async fn edit_text(&mut self, annotation_id: &str, text: &str) -> SnapResult<()> {
        self.require_idle("edit_text")?;
        let previous = self.record.clone();
        let annotation = self.record.annotation_mut(annotation_id).ok_or_else(|| {
            SnapError::InvalidInput(format!("no annotation {}", annotation_id))
        })?;
        annotation.text = normalize_text(text);
        self.commit(previous).await
    }

    pub async fn delete(&mut self, annotation_id: &str) -> SnapResult<()> {
        self.require_idle("delete")?;
        self.require_annotation(annotation_id)?;
        let previous = self.record.clone();
        self.record.annotations.retain(|a| a.id != annotation_id);
        self.commit(previous).await?;
        debug!(record_id = %self.record.id, annotation_id, "annotation deleted");
        Ok(())
    }

    /// Rescale stored positions if the payload's true size differs from the
    /// recorded one, persisting any change.
    pub async fn reconcile_natural_size(&mut self, actual_width: u32, actual_height: u32) -> SnapResult<bool> {
        let previous = self.record.clone();
        if !self.record.reconcile_natural_size(actual_width, actual_height) {
            return Ok(false);
        }
        self.commit(previous).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Capture, EMPTY_ANNOTATION_TEXT};
    use crate::store::memory::{InMemoryBlobStore, InMemoryRecordStore};
    use crate::tiering::TieringConfig;

    type Manager = TieredPersistence<InMemoryRecordStore, InMemoryBlobStore>;

    async fn setup() -> (Manager, String) {
        let m = TieredPersistence::new(
            InMemoryRecordStore::default(),
            InMemoryBlobStore::new(),
            InMemoryBlobStore::new(),
            TieringConfig::default(),
        );
        let record = ScreenshotRecord::from_capture(Capture {
            image: vec![7; 32],
            natural_width: 1920,
            natural_height: 1080,
            source_title: "Docs".into(),
            source_url: "https://example.com/docs".into(),
        });
        let id = record.id.clone();
        m.save_record(&record).await.unwrap();
        (m, id)
    }

    const HALF: Size = Size { width: 960.0, height: 540.0 };

    #[tokio::test]
    async fn place_stores_authoritative_positions() {
        let (m, id) = setup().await;
        let mut s = AnnotationSession::open(&m, &id).await.unwrap();
        let a = s.place(Point::new(100.0, 50.0), HALF, "Login button").await.unwrap();
        assert!(a.anchor.approx_eq(Point::new(200.0, 100.0), 1e-9));
        assert!(a.label_offset.approx_eq(Point::new(320.0, 40.0), 1e-9));

        let stored = m.load_record(&id).await.unwrap().record;
        assert_eq!(stored.annotations.len(), 1);
        assert_eq!(stored.annotations[0].text, "Login button");
    }

    #[tokio::test]
    async fn drag_updates_every_tick_and_persists_on_release() {
        let (m, id) = setup().await;
        let mut s = AnnotationSession::open(&m, &id).await.unwrap();
        let a = s.place(Point::new(10.0, 10.0), HALF, "x").await.unwrap();

        s.begin_drag(&a.id, DragHandle::Label).unwrap();
        s.drag_to(Point::new(40.0, 40.0), HALF).unwrap();
        s.drag_to(Point::new(50.0, 60.0), HALF).unwrap();
        assert!(s.record().annotations[0].label_offset.approx_eq(Point::new(100.0, 120.0), 1e-9));
        assert_eq!(m.load_record(&id).await.unwrap().record.annotations[0].label_offset, a.label_offset);

        s.end_drag().await.unwrap();
        assert_eq!(*s.state(), SessionState::Idle);
        let stored = m.load_record(&id).await.unwrap().record;
        assert!(stored.annotations[0].label_offset.approx_eq(Point::new(100.0, 120.0), 1e-9));
        assert_eq!(stored.annotations[0].anchor, a.anchor);
    }

    #[tokio::test]
    async fn illegal_transitions_are_rejected() {
        let (m, id) = setup().await;
        let mut s = AnnotationSession::open(&m, &id).await.unwrap();
        assert!(matches!(s.drag_to(Point::ORIGIN, HALF), Err(SnapError::InvalidInput(_))));
        assert!(matches!(s.end_drag().await, Err(SnapError::InvalidInput(_))));
        assert!(matches!(s.begin_drag("annotation_missing", DragHandle::Anchor), Err(SnapError::InvalidInput(_))));

        let a = s.place(Point::new(1.0, 1.0), HALF, "gone").await.unwrap();
        s.delete(&a.id).await.unwrap();
        assert!(matches!(s.begin_drag(&a.id, DragHandle::Anchor), Err(SnapError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn empty_text_becomes_placeholder() {
        let (m, id) = setup().await;
        let mut s = AnnotationSession::open(&m, &id).await.unwrap();
        let a = s.place(Point::new(1.0, 1.0), HALF, "first").await.unwrap();
        s.edit_text(&a.id, "   ").await.unwrap();
        let stored = m.load_record(&id).await.unwrap().record;
        assert_eq!(stored.annotations[0].text, EMPTY_ANNOTATION_TEXT);
    }

    #[tokio::test]
    async fn reconcile_rescales_and_persists() {
        let (m, id) = setup().await;
        let mut s = AnnotationSession::open(&m, &id).await.unwrap();
        s.place(Point::new(100.0, 100.0), HALF, "a").await.unwrap();
        assert!(s.reconcile_natural_size(960, 540).await.unwrap());
        assert!(!s.reconcile_natural_size(960, 540).await.unwrap());
        let stored = m.load_record(&id).await.unwrap().record;
        assert_eq!((stored.natural_width, stored.natural_height), (960, 540));
        assert!(stored.annotations[0].anchor.approx_eq(Point::new(100.0, 100.0), 1e-9));
    }

    #[tokio::test]
    async fn non_finite_positions_are_rejected_before_mutation() {
        let (m, id) = setup().await;
        let mut s = AnnotationSession::open(&m, &id).await.unwrap();
        for bad in [Point::new(f64::NAN, 5.0), Point::new(5.0, f64::INFINITY)] {
            assert!(matches!(s.place(bad, HALF, "x").await, Err(SnapError::InvalidInput(_))));
        }
        assert!(matches!(
            s.place(Point::new(1.0, 1.0), Size::new(0.0, 540.0), "x").await,
            Err(SnapError::InvalidInput(_))
        ));
        assert!(matches!(
            s.place(Point::new(f64::MAX, 1.0), Size::new(1e-300, 540.0), "x").await,
            Err(SnapError::InvalidInput(_))
        ));
        assert!(s.record().annotations.is_empty());

        let a = s.place(Point::new(10.0, 10.0), HALF, "ok").await.unwrap();
        s.begin_drag(&a.id, DragHandle::Anchor).unwrap();
        assert!(matches!(
            s.drag_to(Point::new(f64::NEG_INFINITY, 0.0), HALF),
            Err(SnapError::InvalidInput(_))
        ));
        assert_eq!(s.record().annotations[0].anchor, a.anchor);
        s.end_drag().await.unwrap();

        // The record list is still readable, for this record and any other.
        let other = ScreenshotRecord::from_capture(Capture {
            image: vec![1; 8],
            natural_width: 10,
            natural_height: 10,
            source_title: "Other".into(),
            source_url: String::new(),
        });
        m.save_record(&other).await.unwrap();
        assert_eq!(m.list_records().await.unwrap().len(), 2);
        assert_eq!(m.load_record(&id).await.unwrap().record.annotations.len(), 1);
        assert!(m.load_record(&other.id).await.is_ok());
    }

    #[tokio::test]
    async fn failed_save_rolls_back_the_mutation() {
        let record = ScreenshotRecord::from_capture(Capture {
            image: vec![7; 32],
            natural_width: 1920,
            natural_height: 1080,
            source_title: "Docs".into(),
            source_url: String::new(),
        });
        let serialized = serde_json::to_string(&vec![&record]).unwrap();
        let quota = crate::store::entry_size(crate::tiering::RECORDS_KEY, &serialized) + 60;
        let m = TieredPersistence::new(
            InMemoryRecordStore::with_quota(quota),
            InMemoryBlobStore::unavailable(),
            InMemoryBlobStore::new(),
            TieringConfig::default(),
        );
        m.save_record(&record).await.unwrap();

        let mut s = AnnotationSession::open(&m, &record.id).await.unwrap();
        let long = "a note far too long to fit in what is left of the record quota";
        let err = s.place(Point::new(10.0, 10.0), HALF, long).await.unwrap_err();
        assert!(matches!(err, SnapError::StorageExhausted { .. }), "{err:?}");
        assert!(s.record().annotations.is_empty());

        // A later save of the session's record must not carry the failed
        // annotation along.
        m.save_record(s.record()).await.unwrap();
        assert!(m.load_record(&record.id).await.unwrap().record.annotations.is_empty());
    }
}
