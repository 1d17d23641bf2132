//! # scriptorium
//!
//! Document ingestion service: heterogeneous text-bearing files (txt, md,
//! pdf, docx) become three layered artifacts in a local SQLite store: a
//! normalized text body, non-overlapping **scenes**, and sliding-window
//! **chunks** within each scene.
//!
//! ## Architecture
//!
//! - **Parsers** (`parser`): extension-keyed registry producing raw bytes +
//!   extracted text
//! - **Normalizer** (`normalize`): encoding detection and offset-stable
//!   CRLF/NUL cleanup
//! - **Segmentation** (`profile`, `segment`, `chunk`): profile-driven scene
//!   boundaries and sliding-window chunks
//! - **Persistence** (`persist`): WAL SQLite, digest dedup, transactional
//!   writes, FTS over chunks
//! - **Orchestrator** (`ingest`): parse → normalize → segment → chunk →
//!   persist, idempotent by content SHA-1
//! - **Watcher** (`watcher`): inbox scanner, bounded queue, worker pool,
//!   retry with backoff, success/fail disposition
//! - **Events** (`events`): best-effort fan-out to stdout/http/redis/nats
//!
//! ## Library usage
//!
//! ```no_run
//! use std::path::Path;
//! use scriptorium::ingest::{IngestOptions, ingest_file};
//!
//! let outcome = ingest_file(
//!     Path::new("./scriptorium.db"),
//!     Path::new("./story.txt"),
//!     &IngestOptions::default(),
//! )
//! .unwrap();
//! println!("{} ({} chunks)", outcome.work_id, outcome.sizes.chunks);
//! ```

pub mod chunk;
pub mod error;
pub mod events;
pub mod hook;
pub mod ingest;
pub mod metrics;
pub mod normalize;
pub mod parser;
pub mod persist;
pub mod profile;
pub mod segment;
pub mod watcher;
