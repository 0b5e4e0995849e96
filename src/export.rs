//! Export driver.
//!
//! `snap export` runs the full hand-off:
//!
//! 1. Drop export bundles left behind by earlier runs (older than
//!    `storage.export_max_age_hours`).
//! 2. Hydrate every record into a fresh [`ExportBundle`] and persist it
//!    under its `export_<uuid>` key.
//! 3. Ask the [`ExportSurface`] to open an export surface for that id. The
//!    surface loads the bundle, renders pages one at a time (yielding to the
//!    runtime between pages), writes the PDF, and sends exactly one
//!    [`SurfaceCompletion`] back over a oneshot channel.
//! 4. Remove the transient bundle once completion arrives, success or not.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use snap_journal_core::collab::{SurfaceCompletion, SurfaceHost, SurfaceRequest};
use snap_journal_core::error::{SnapError, SnapResult};
use snap_journal_core::models::{ExportBundle, HydratedRecord, ResolvedPayload};
use snap_journal_core::render::{export_filename, DocumentRenderer, DocumentSink, RenderReport};

use crate::config::Config;
use crate::db::{self, Journal};
use crate::flatten::{Palette, RasterFlattener};
use crate::pdf::PdfSink;
use crate::progress::{ExportProgressEvent, ExportProgressReporter};

/// Render `bundle` to a PDF, yielding between pages.
pub async fn render_bundle(
    bundle: &ExportBundle,
    config: &Config,
    progress: &dyn ExportProgressReporter,
) -> SnapResult<(Vec<u8>, RenderReport)> {
    let flattener = RasterFlattener::new(Palette::from_style(&config.style), config.correction());
    let renderer = DocumentRenderer::new(&flattener, config.page_spec());
    let mut sink = PdfSink::new(config.page_spec());
    let mut report = RenderReport::default();
    let total = DocumentRenderer::<RasterFlattener>::page_count(bundle) as u64;

    let summary = renderer.summary_page(bundle);
    sink.add_page(&summary)?;
    report.record(&summary);
    progress.report(ExportProgressEvent::Rendering {
        export_id: bundle.export_id.clone(),
        page: 1,
        total,
    });

    for (i, record) in bundle.records.iter().enumerate() {
        tokio::task::yield_now().await;
        let page = renderer.content_page(i + 1, record);
        if let Err(e) = sink.add_page(&page) {
            // The sink could not embed this image; keep the page as a placeholder.
            warn!(record_id = %record.id, export_id = %bundle.export_id, error = %e, "page failed; using placeholder");
            let missing = HydratedRecord {
                payload: ResolvedPayload::Missing,
                ..record.clone()
            };
            let fallback = renderer.content_page(i + 1, &missing);
            sink.add_page(&fallback)?;
            report.record(&fallback);
        } else {
            report.record(&page);
        }
        progress.report(ExportProgressEvent::Rendering {
            export_id: bundle.export_id.clone(),
            page: i as u64 + 2,
            total,
        });
    }

    Ok((sink.finish()?, report))
}

/// Hosts export surfaces: each `open` spawns a render task and waits for
/// its completion message.
pub struct ExportSurface {
    journal: Arc<Journal>,
    config: Arc<Config>,
    output_dir: PathBuf,
    progress: Arc<dyn ExportProgressReporter>,
}

impl ExportSurface {
    pub fn new(
        journal: Arc<Journal>,
        config: Arc<Config>,
        output_dir: PathBuf,
        progress: Arc<dyn ExportProgressReporter>,
    ) -> Self {
        Self {
            journal,
            config,
            output_dir,
            progress,
        }
    }
}

async fn run_surface(
    journal: &Journal,
    config: &Config,
    export_id: &str,
    output_dir: &Path,
    progress: &dyn ExportProgressReporter,
) -> SnapResult<(String, RenderReport)> {
    let bundle = journal.load_export_bundle(export_id).await?;
    let (document, report) = render_bundle(&bundle, config, progress).await?;

    let filename = export_filename(Utc::now());
    progress.report(ExportProgressEvent::Writing {
        export_id: export_id.to_string(),
        filename: filename.clone(),
    });
    tokio::fs::create_dir_all(output_dir)
        .await
        .map_err(SnapError::backend)?;
    tokio::fs::write(output_dir.join(&filename), document)
        .await
        .map_err(SnapError::backend)?;
    info!(
        export_id,
        filename = %filename,
        pages = report.pages,
        placeholders = report.placeholders,
        unannotated = report.unannotated_fallbacks,
        "export written"
    );
    Ok((filename, report))
}

#[async_trait]
impl SurfaceHost for ExportSurface {
    async fn open(&self, request: SurfaceRequest) -> SnapResult<SurfaceCompletion> {
        let export_id = match request {
            SurfaceRequest::Export { export_id } => export_id,
            other => {
                return Err(SnapError::InvalidInput(format!(
                    "export surface cannot host {:?}",
                    other
                )))
            }
        };

        let (tx, rx) = oneshot::channel();
        let journal = Arc::clone(&self.journal);
        let config = Arc::clone(&self.config);
        let output_dir = self.output_dir.clone();
        let progress = Arc::clone(&self.progress);

        tokio::spawn(async move {
            let completion =
                match run_surface(&journal, &config, &export_id, &output_dir, progress.as_ref()).await {
                    Ok((filename, _)) => SurfaceCompletion::succeeded(Some(filename)),
                    Err(e) => {
                        error!(export_id = %export_id, operation = "export", error = %e, "export failed");
                        SurfaceCompletion::failed(e.to_string())
                    }
                };
            let _ = tx.send(completion);
        });

        rx.await
            .map_err(|_| SnapError::Backend("export surface ended without completing".to_string()))
    }
}

/// What `run_export` produced.
#[derive(Debug)]
pub struct ExportOutcome {
    pub export_id: String,
    pub path: PathBuf,
    pub screenshots: usize,
    pub missing_payloads: usize,
}

/// Build, persist, render, and clean up one export.
pub async fn export_journal(
    journal: Arc<Journal>,
    config: Arc<Config>,
    output_dir: &Path,
    progress: Arc<dyn ExportProgressReporter>,
) -> Result<ExportOutcome> {
    let stale = journal.cleanup_stale_exports(config.export_max_age()).await?;
    if stale > 0 {
        info!(removed = stale, "removed stale export bundles");
    }

    let bundle = journal.build_export_bundle().await?;
    if bundle.total_screenshots == 0 {
        bail!("No screenshots to export");
    }
    let export_id = journal.store_export_bundle(&bundle).await?;

    let surface = ExportSurface::new(
        Arc::clone(&journal),
        Arc::clone(&config),
        output_dir.to_path_buf(),
        progress,
    );
    let completion = surface
        .open(SurfaceRequest::Export {
            export_id: export_id.clone(),
        })
        .await;

    if let Err(e) = journal.remove_export_bundle(&export_id).await {
        warn!(export_id = %export_id, error = %e, "failed to remove export bundle");
    }

    let completion = completion?;
    match (completion.success, completion.filename) {
        (true, Some(filename)) => Ok(ExportOutcome {
            export_id,
            path: output_dir.join(filename),
            screenshots: bundle.total_screenshots,
            missing_payloads: bundle.missing_payloads,
        }),
        _ => bail!(
            "Export failed: {}",
            completion.error.unwrap_or_else(|| "unknown error".to_string())
        ),
    }
}

/// `snap export`.
pub async fn run_export(
    config: &Config,
    output: Option<PathBuf>,
    progress: Arc<dyn ExportProgressReporter>,
) -> Result<()> {
    let journal = Arc::new(db::open_journal(config).await?);
    let output_dir = output.unwrap_or_else(|| PathBuf::from("."));
    let outcome = export_journal(journal, Arc::new(config.clone()), &output_dir, progress).await?;

    println!("Exported {} screenshot(s) to {}", outcome.screenshots, outcome.path.display());
    if outcome.missing_payloads > 0 {
        println!(
            "  {} screenshot(s) had no image data and were exported as placeholder pages.",
            outcome.missing_payloads
        );
    }
    Ok(())
}

/// `snap cleanup-exports`.
pub async fn run_cleanup_exports(config: &Config) -> Result<()> {
    let journal = db::open_journal(config).await?;
    let removed = journal.cleanup_stale_exports(config.export_max_age()).await?;
    println!("Removed {} stale export bundle(s).", removed);
    Ok(())
}
