//! # Snap Journal CLI (`snap`)
//!
//! The `snap` binary captures screenshots into the journal, manages their
//! annotations, and exports the journal as a PDF.
//!
//! ## Usage
//!
//! ```bash
//! snap --config ./config/snap.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `snap init` | Create the SQLite database and run schema migrations |
//! | `snap capture <image>` | Store an image as a new screenshot |
//! | `snap list` | List screenshots, newest first |
//! | `snap show <id>` | Show a screenshot's metadata and annotations |
//! | `snap annotate <id>` | Pin a note to a point on a screenshot |
//! | `snap move <id> <annotation>` | Drag an annotation's anchor or label |
//! | `snap edit <id> <annotation>` | Replace an annotation's text |
//! | `snap unannotate <id> <annotation>` | Remove an annotation |
//! | `snap delete <id>` | Delete a screenshot |
//! | `snap clear` | Delete every screenshot |
//! | `snap prune --keep N` | Keep only the N most recent screenshots |
//! | `snap stats` | Storage usage across both tiers |
//! | `snap export` | Render all screenshots into a PDF |
//! | `snap cleanup-exports` | Drop stale export bundles |
//!
//! ## Logging
//!
//! Diagnostics go to stderr through `tracing`; set `RUST_LOG` (for example
//! `RUST_LOG=snap_journal_core=debug`) to see more.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use snap_journal::annotate::{self, parse_point, parse_size};
use snap_journal::progress::ProgressMode;
use snap_journal::{config, export, migrate, records, stats};
use snap_journal_core::coords::{Point, Size};

/// Snap Journal CLI: capture, annotate, and export screenshots.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. Without one, defaults are used and the database lives at
/// `./data/snap.sqlite`.
#[derive(Parser)]
#[command(
    name = "snap",
    about = "Snap Journal: capture, annotate, and export screenshots as a PDF journal",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/snap.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file with the record and blob tables.
    /// Running it more than once is safe.
    Init,

    /// Store an image file as a new screenshot.
    Capture {
        /// Image file (PNG or JPEG).
        image: PathBuf,

        /// Source title; defaults to the file name.
        #[arg(long)]
        title: Option<String>,

        /// Source URL; defaults to the file's `file://` URL.
        #[arg(long)]
        url: Option<String>,
    },

    /// List screenshots, newest first.
    List,

    /// Show a screenshot's metadata and annotations.
    Show {
        /// Screenshot id.
        id: String,
    },

    /// Pin a text note to a point on a screenshot.
    Annotate {
        /// Screenshot id.
        id: String,

        /// Anchor position `X,Y` on the surface.
        #[arg(long, value_parser = parse_point)]
        at: Point,

        /// Note text.
        #[arg(long, default_value = "")]
        text: String,

        /// Surface size `WxH` the position refers to; defaults to the image size.
        #[arg(long, value_parser = parse_size)]
        surface: Option<Size>,
    },

    /// Move an annotation's anchor or label.
    Move {
        /// Screenshot id.
        id: String,

        /// Annotation id.
        annotation: String,

        /// New anchor position `X,Y`.
        #[arg(long, value_parser = parse_point, conflicts_with = "label")]
        anchor: Option<Point>,

        /// New label position `X,Y`.
        #[arg(long, value_parser = parse_point)]
        label: Option<Point>,

        /// Surface size `WxH` the position refers to; defaults to the image size.
        #[arg(long, value_parser = parse_size)]
        surface: Option<Size>,
    },

    /// Replace an annotation's text. Empty text becomes "No text".
    Edit {
        id: String,
        annotation: String,
        #[arg(long)]
        text: String,
    },

    /// Remove an annotation.
    Unannotate { id: String, annotation: String },

    /// Delete a screenshot and its stored image.
    Delete { id: String },

    /// Delete every screenshot.
    Clear,

    /// Keep only the most recently captured screenshots.
    Prune {
        /// Number of screenshots to keep.
        #[arg(long)]
        keep: usize,
    },

    /// Show storage usage across the record and blob stores.
    Stats,

    /// Render every screenshot into a PDF journal.
    Export {
        /// Directory to write the PDF into.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Progress output on stderr; defaults to `human` on a terminal.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Drop export bundles older than `storage.export_max_age_hours`.
    CleanupExports,
}

fn init_tracing() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("snap_journal=info".parse()?)
                .add_directive("snap_journal_core=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;
    let cli = Cli::parse();

    // A missing config file is fine; an invalid one is not.
    let cfg = if cli.config.exists() {
        config::load_config(&cli.config)?
    } else {
        config::Config::minimal()
    };

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Capture { image, title, url } => {
            records::run_capture(&cfg, image, title, url).await?;
        }
        Commands::List => {
            records::run_list(&cfg).await?;
        }
        Commands::Show { id } => {
            records::run_show(&cfg, &id).await?;
        }
        Commands::Annotate {
            id,
            at,
            text,
            surface,
        } => {
            annotate::run_annotate(&cfg, &id, at, &text, surface).await?;
        }
        Commands::Move {
            id,
            annotation,
            anchor,
            label,
            surface,
        } => {
            annotate::run_move(&cfg, &id, &annotation, anchor, label, surface).await?;
        }
        Commands::Edit {
            id,
            annotation,
            text,
        } => {
            annotate::run_edit(&cfg, &id, &annotation, &text).await?;
        }
        Commands::Unannotate { id, annotation } => {
            annotate::run_unannotate(&cfg, &id, &annotation).await?;
        }
        Commands::Delete { id } => {
            records::run_delete(&cfg, &id).await?;
        }
        Commands::Clear => {
            records::run_clear(&cfg).await?;
        }
        Commands::Prune { keep } => {
            records::run_prune(&cfg, keep).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Export { output, progress } => {
            let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
            export::run_export(&cfg, output, Arc::from(mode.reporter())).await?;
        }
        Commands::CleanupExports => {
            export::run_cleanup_exports(&cfg).await?;
        }
    }

    Ok(())
}
