//! Interfaces to the platform collaborators the core depends on but does
//! not implement: image capture and the surfaces that host annotation and
//! export work.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SnapResult;
use crate::models::Capture;

/// Produces a screenshot of whatever is currently visible.
#[async_trait]
pub trait CaptureSource: Send + Sync {
    /// Fails with `CaptureFailed`; callers surface it without retrying.
    async fn capture_visible_surface(&self) -> SnapResult<Capture>;
}

/// What a newly opened surface is asked to work on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "surface", rename_all = "snake_case")]
pub enum SurfaceRequest {
    Annotate { screenshot_id: String },
    Export { export_id: String },
}

impl SurfaceRequest {
    pub fn target_id(&self) -> &str {
        match self {
            SurfaceRequest::Annotate { screenshot_id } => screenshot_id,
            SurfaceRequest::Export { export_id } => export_id,
        }
    }
}

/// Message a surface sends exactly once when its work ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurfaceCompletion {
    pub success: bool,
    pub error: Option<String>,
    /// Name of the produced document, for export surfaces.
    pub filename: Option<String>,
}

impl SurfaceCompletion {
    pub fn succeeded(filename: Option<String>) -> Self {
        Self {
            success: true,
            error: None,
            filename,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            filename: None,
        }
    }
}

/// Opens annotation and export surfaces.
#[async_trait]
pub trait SurfaceHost: Send + Sync {
    /// Open a surface for `request` and wait for its completion message.
    async fn open(&self, request: SurfaceRequest) -> SnapResult<SurfaceCompletion>;
}
