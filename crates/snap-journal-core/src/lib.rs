//! # Snap Journal Core
//!
//! Platform-independent logic for Snap Journal: the screenshot/annotation
//! data model, the coordinate model, storage traits with in-memory fakes,
//! the tiered persistence manager, the annotation edit session, and
//! page-descriptor rendering.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or image decoding.
//! Storage engines, the raster flattener, and the document sink are
//! supplied by the application through the traits defined here.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`coords`] | Authoritative pixel space ↔ surface conversion, render correction |
//! | [`models`] | Records, annotations, payloads, export bundles |
//! | [`store`] | `BlobStore` / `RecordStore` traits and in-memory implementations |
//! | [`tiering`] | Single save/load contract over both stores |
//! | [`session`] | Place / drag / edit / delete state machine |
//! | [`pointer`] | Pointer-line geometry |
//! | [`render`] | Page layout and descriptors |
//! | [`collab`] | Capture and surface collaborator interfaces |

pub mod collab;
pub mod coords;
pub mod error;
pub mod models;
pub mod pointer;
pub mod render;
pub mod session;
pub mod store;
pub mod tiering;

pub use error::{SnapError, SnapResult};
