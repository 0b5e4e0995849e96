//! File-backed capture source: treats an image on disk as the "visible
//! surface" so the CLI can feed screenshots taken by any tool into the
//! journal.

use async_trait::async_trait;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use snap_journal_core::collab::CaptureSource;
use snap_journal_core::error::{SnapError, SnapResult};
use snap_journal_core::models::Capture;

pub struct FileCapture {
    path: PathBuf,
    title: Option<String>,
    url: Option<String>,
}

impl FileCapture {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            title: None,
            url: None,
        }
    }

    pub fn with_title(mut self, title: Option<String>) -> Self {
        self.title = title;
        self
    }

    pub fn with_url(mut self, url: Option<String>) -> Self {
        self.url = url;
        self
    }
}

/// Pixel dimensions of an encoded image, read from its header.
pub fn image_dimensions(bytes: &[u8]) -> SnapResult<(u32, u32)> {
    image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(SnapError::backend)?
        .into_dimensions()
        .map_err(SnapError::backend)
}

fn default_title(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[async_trait]
impl CaptureSource for FileCapture {
    async fn capture_visible_surface(&self) -> SnapResult<Capture> {
        let image = tokio::fs::read(&self.path)
            .await
            .map_err(|e| SnapError::CaptureFailed(format!("{}: {}", self.path.display(), e)))?;
        let (natural_width, natural_height) = image_dimensions(&image)
            .map_err(|e| SnapError::CaptureFailed(format!("{}: {}", self.path.display(), e)))?;
        if natural_width == 0 || natural_height == 0 {
            return Err(SnapError::CaptureFailed(format!(
                "{}: image has no pixels",
                self.path.display()
            )));
        }

        let absolute = std::fs::canonicalize(&self.path).unwrap_or_else(|_| self.path.clone());
        Ok(Capture {
            image,
            natural_width,
            natural_height,
            source_title: self.title.clone().unwrap_or_else(|| default_title(&self.path)),
            source_url: self
                .url
                .clone()
                .unwrap_or_else(|| format!("file://{}", absolute.display())),
        })
    }
}
