//! Tapstudy Analytics - trial-timing exports for tapping experiments.
//!
//! Subjects reproduce a block's target sequence by tapping keys; the
//! persistence layer records every trial and keypress. This library turns
//! those raw rows into reproducible tabular exports for statistical analysis.
//!
//! # Guarantees
//!
//! - **Deterministic**: identical input produces byte-identical CSV
//! - **No raw identifiers**: block and trial ids are re-keyed into ordinals
//! - **No crashes on degenerate data**: missing keypresses or zero-length
//!   intervals become empty fields, never errors or NaN
//! - **Cached**: an artifact is only regenerated when the experiment's
//!   response count changes
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        Tapstudy Analytics                         │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌───────────┐   ┌─────────────┐   ┌───────────┐   ┌──────────┐  │
//! │  │  Dataset  │──▶│ Normalize / │──▶│ Adjacency │──▶│ Re-key / │  │
//! │  │  Source   │   │  Classify   │   │ + Metrics │   │ Assemble │  │
//! │  └───────────┘   └─────────────┘   └───────────┘   └──────────┘  │
//! │        ▲                                                 │        │
//! │        │                                                 ▼        │
//! │  ┌───────────┐                                    ┌────────────┐  │
//! │  │   Batch   │───────────────────────────────────▶│  Artifact  │  │
//! │  │  Driver   │         (cache check on count)     │   Store    │  │
//! │  └───────────┘                                    └────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use tapstudy_analytics::core::{build_export, ExportKind, ExportOptions};
//! use tapstudy_analytics::dataset::{DatasetSource, JsonDirSource};
//!
//! let source = JsonDirSource::new("./experiments");
//! let dataset = source.load("AB12").unwrap().expect("experiment exists");
//! let table = build_export(&dataset, ExportKind::Processed, &ExportOptions::default()).unwrap();
//! let csv = table.to_csv().unwrap();
//! println!("{}", String::from_utf8_lossy(&csv));
//! ```

pub mod audit;
pub mod batch;
pub mod config;
pub mod core;
pub mod dataset;
pub mod export;

#[cfg(feature = "server")]
pub mod server;

// Re-export key types at crate root for convenience
pub use audit::{ExportAuditLog, SharedAuditLog};
pub use batch::{BatchDriver, BatchOptions, BatchReport, ExperimentStatus};
pub use config::Config;
pub use core::{build_export, ExportKind, ExportOptions, ExportTable, PipelineError};
pub use dataset::{DatasetSource, ExperimentDataset, JsonDirSource};
pub use export::{ArtifactStore, FsStore, MemoryStore};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
