//! Export progress reporting.
//!
//! Reports which page of an export is being rendered so long exports show
//! visible progress. Progress is emitted on **stderr** so stdout remains
//! parseable for scripts.

use std::io::Write;

/// A single progress event for an export.
#[derive(Clone, Debug)]
pub enum ExportProgressEvent {
    /// Page `page` (1-based) of `total` was added to the document.
    Rendering { export_id: String, page: u64, total: u64 },
    /// All pages rendered; the document is being written.
    Writing { export_id: String, filename: String },
}

/// Reports export progress. Implementations write to stderr (human or JSON).
pub trait ExportProgressReporter: Send + Sync {
    fn report(&self, event: ExportProgressEvent);
}

/// Human-friendly progress on stderr: "export  rendering  3 / 12 pages".
pub struct StderrProgress;

impl ExportProgressReporter for StderrProgress {
    fn report(&self, event: ExportProgressEvent) {
        let line = match &event {
            ExportProgressEvent::Rendering { page, total, .. } => format!(
                "export  rendering  {} / {} pages\n",
                format_number(*page),
                format_number(*total)
            ),
            ExportProgressEvent::Writing { filename, .. } => {
                format!("export  writing  {}\n", filename)
            }
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ExportProgressReporter for JsonProgress {
    fn report(&self, event: ExportProgressEvent) {
        let obj = match &event {
            ExportProgressEvent::Rendering {
                export_id,
                page,
                total,
            } => serde_json::json!({
                "event": "progress",
                "export_id": export_id,
                "phase": "rendering",
                "page": page,
                "total": total
            }),
            ExportProgressEvent::Writing {
                export_id,
                filename,
            } => serde_json::json!({
                "event": "progress",
                "export_id": export_id,
                "phase": "writing",
                "filename": filename
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ExportProgressReporter for NoProgress {
    fn report(&self, _event: ExportProgressEvent) {}
}

pub(crate) fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ExportProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
