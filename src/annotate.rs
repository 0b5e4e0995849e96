//! Annotation commands.
//!
//! Positions on the command line are surface pixels. Without `--surface`
//! the surface is the image itself, so positions are image pixels.

use anyhow::{bail, Result};

use snap_journal_core::coords::{Point, Size};
use snap_journal_core::session::{AnnotationSession, DragHandle};

use crate::capture::image_dimensions;
use crate::config::Config;
use crate::db::{self, Journal};
use crate::sqlite_store::{SqliteBlobStore, SqliteRecordStore};

/// A finite number; `f64::from_str` also accepts `NaN` and `inf`.
fn parse_coordinate(value: &str, what: &str, whole: &str) -> Result<f64, String> {
    match value.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(format!("invalid {} in '{}': expected a finite number", what, whole)),
    }
}

/// Parse `X,Y` for `--at`, `--anchor`, and `--label`.
pub fn parse_point(s: &str) -> Result<Point, String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("invalid X,Y: no ',' found in '{}'", s))?;
    let x = parse_coordinate(x, "x", s)?;
    let y = parse_coordinate(y, "y", s)?;
    Ok(Point::new(x, y))
}

/// Parse `WxH` for `--surface`.
pub fn parse_size(s: &str) -> Result<Size, String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("invalid WxH: no 'x' found in '{}'", s))?;
    let w = parse_coordinate(w, "width", s)?;
    let h = parse_coordinate(h, "height", s)?;
    if w <= 0.0 || h <= 0.0 {
        return Err(format!("surface must be non-empty, got '{}'", s));
    }
    Ok(Size::new(w, h))
}

type Session<'a> = AnnotationSession<'a, SqliteRecordStore, SqliteBlobStore>;

/// Open a session, first rescaling stored positions if the payload's true
/// size no longer matches the recorded one.
async fn open_session<'a>(journal: &'a Journal, id: &str) -> Result<Session<'a>> {
    let mut session = AnnotationSession::open(journal, id).await?;
    let actual = session.payload().bytes().and_then(|b| image_dimensions(b).ok());
    if let Some((w, h)) = actual {
        session.reconcile_natural_size(w, h).await?;
    }
    Ok(session)
}

/// `snap annotate`.
pub async fn run_annotate(
    config: &Config,
    id: &str,
    at: Point,
    text: &str,
    surface: Option<Size>,
) -> Result<()> {
    let journal = db::open_journal(config).await?;
    let mut session = open_session(&journal, id).await?;
    let surface = surface.unwrap_or_else(|| session.record().natural_size());
    let annotation = session.place(at, surface, text).await?;
    println!("{}", annotation.id);
    Ok(())
}

/// `snap move`: one drag from start to release.
pub async fn run_move(
    config: &Config,
    id: &str,
    annotation_id: &str,
    anchor: Option<Point>,
    label: Option<Point>,
    surface: Option<Size>,
) -> Result<()> {
    let (handle, to) = match (anchor, label) {
        (Some(p), None) => (DragHandle::Anchor, p),
        (None, Some(p)) => (DragHandle::Label, p),
        _ => bail!("exactly one of --anchor or --label is required"),
    };

    let journal = db::open_journal(config).await?;
    let mut session = open_session(&journal, id).await?;
    let surface = surface.unwrap_or_else(|| session.record().natural_size());
    session.begin_drag(annotation_id, handle)?;
    let stored = session.drag_to(to, surface)?;
    session.end_drag().await?;
    println!(
        "Moved {} {} to ({:.1}, {:.1})",
        annotation_id,
        match handle {
            DragHandle::Anchor => "anchor",
            DragHandle::Label => "label",
        },
        stored.x,
        stored.y
    );
    Ok(())
}

/// `snap edit`.
pub async fn run_edit(config: &Config, id: &str, annotation_id: &str, text: &str) -> Result<()> {
    let journal = db::open_journal(config).await?;
    let mut session = open_session(&journal, id).await?;
    session.edit_text(annotation_id, text).await?;
    println!("Updated {}", annotation_id);
    Ok(())
}

/// `snap unannotate`.
pub async fn run_unannotate(config: &Config, id: &str, annotation_id: &str) -> Result<()> {
    let journal = db::open_journal(config).await?;
    let mut session = open_session(&journal, id).await?;
    session.delete(annotation_id).await?;
    println!("Removed {}", annotation_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_points_and_sizes() {
        assert_eq!(parse_point("12,34.5").unwrap(), Point::new(12.0, 34.5));
        assert_eq!(parse_point(" 1 , 2 ").unwrap(), Point::new(1.0, 2.0));
        assert!(parse_point("12").is_err());
        assert!(parse_point("a,b").is_err());

        assert_eq!(parse_size("960x540").unwrap(), Size::new(960.0, 540.0));
        assert_eq!(parse_size("960X540").unwrap(), Size::new(960.0, 540.0));
        assert!(parse_size("0x540").is_err());
        assert!(parse_size("960").is_err());
    }

    #[test]
    fn rejects_non_finite_values() {
        for bad in ["NaN,5", "5,nan", "inf,0", "0,-infinity", "1e400,1"] {
            assert!(parse_point(bad).is_err(), "accepted {}", bad);
        }
        for bad in ["NaNx540", "960xinf", "1e400x1"] {
            assert!(parse_size(bad).is_err(), "accepted {}", bad);
        }
    }
}
