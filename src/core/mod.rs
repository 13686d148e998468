//! Trial-timing analytics pipeline.
//!
//! This module contains:
//! - Interval normalization and per-keypress correctness
//! - Adjacency reconstruction and per-trial metrics
//! - Identifier re-keying, row assembly and ordering

pub mod adjacency;
pub mod assemble;
pub mod classify;
pub mod metrics;
pub mod normalize;
pub mod pipeline;
pub mod rekey;

// Re-export commonly used types
pub use adjacency::{Adjacency, TrialIndex, TrialSummary};
pub use assemble::{ProcessedExportRow, RawExportRow};
pub use classify::{classify_trials, ClassifiedRow};
pub use metrics::{compute_trial_metrics, CorrectnessPredicate, TrialMetrics};
pub use normalize::{elapsed_secs, MIN_KEYPRESS_INTERVAL_SECS};
pub use pipeline::{build_export, ExportKind, ExportOptions, ExportRows, ExportTable, PipelineError};
pub use rekey::{BlockOrder, OrdinalMap, Rekeying};
