//! # Snap Journal
//!
//! Capture screenshots, pin text notes to points of interest, and export
//! the collection as a paginated PDF journal.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────────────┐   ┌──────────────────────┐
//! │ Capture  │──▶│ Annotation session │──▶│ Tiered persistence   │
//! │ (file)   │   │ (authoritative px) │   │ records ⇄ blobs      │
//! └──────────┘   └────────────────────┘   │ (SQLite, one file)   │
//!                                         └──────────┬───────────┘
//!                                                    ▼
//!                         ┌────────────┐   ┌──────────────────────┐
//!                         │ PDF (lopdf)│◀──│ Flatten + page layout│
//!                         └────────────┘   └──────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! snap init
//! snap capture ./shot.png --title "Checkout page"
//! snap annotate <id> --at 420,310 --text "Button misaligned"
//! snap export --output ./exports
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection and journal construction |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite record and blob stores |
//! | [`capture`] | File-backed capture source |
//! | [`records`] | Capture, list, show, delete, prune commands |
//! | [`annotate`] | Annotation commands |
//! | [`flatten`] | Burn annotations into pixels |
//! | [`pdf`] | PDF document sink |
//! | [`export`] | Export driver and export surface |
//! | [`progress`] | Export progress reporting |
//! | [`stats`] | Storage statistics |
//!
//! Platform-independent logic (data model, coordinate model, tiering,
//! session state machine, page layout) lives in the `snap-journal-core`
//! crate.

pub mod annotate;
pub mod capture;
pub mod config;
pub mod db;
pub mod export;
pub mod flatten;
pub mod migrate;
pub mod pdf;
pub mod progress;
pub mod records;
pub mod sqlite_store;
pub mod stats;
