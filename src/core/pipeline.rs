//! End-to-end export pipeline for one experiment.
//!
//! ```text
//! RawRow ──▶ TrialRecord ──▶ ClassifiedRow / MetricRow ──▶ ExportRow ──▶ CSV
//!             (group)         (classify, adjacency,         (re-key,
//!                              metrics)                      sort)
//! ```

use crate::core::assemble::{assemble_processed, assemble_raw, ProcessedExportRow, RawExportRow};
use crate::core::metrics::CorrectnessPredicate;
use crate::core::rekey::{BlockOrder, Rekeying};
use crate::dataset::ExperimentDataset;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Kind of tabular artifact produced for an experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportKind {
    /// One row per keypress
    Raw,
    /// One row per trial, metrics gated on full correctness
    Processed,
    /// One row per trial, metrics gated on partial correctness
    Cohen,
}

impl ExportKind {
    pub const ALL: [ExportKind; 3] = [ExportKind::Raw, ExportKind::Processed, ExportKind::Cohen];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExportKind::Raw => "raw",
            ExportKind::Processed => "processed",
            ExportKind::Cohen => "cohen",
        }
    }

    pub fn block_order(&self) -> BlockOrder {
        match self {
            ExportKind::Raw => BlockOrder::Enumeration,
            ExportKind::Processed | ExportKind::Cohen => BlockOrder::Creation,
        }
    }

    pub fn predicate(&self) -> CorrectnessPredicate {
        match self {
            ExportKind::Raw | ExportKind::Processed => CorrectnessPredicate::Correct,
            ExportKind::Cohen => CorrectnessPredicate::PartialCorrect,
        }
    }
}

impl std::fmt::Display for ExportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "raw" => Ok(ExportKind::Raw),
            "processed" => Ok(ExportKind::Processed),
            "cohen" => Ok(ExportKind::Cohen),
            other => Err(format!("unknown export kind '{other}'")),
        }
    }
}

/// Rendering options shared by every export kind.
#[derive(Debug, Clone, Copy)]
pub struct ExportOptions {
    /// Timezone raw keypress timestamps are rendered in
    pub timezone: Tz,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self { timezone: Tz::UTC }
    }
}

/// Rows of an export, by shape.
#[derive(Debug, Clone, PartialEq)]
pub enum ExportRows {
    Raw(Vec<RawExportRow>),
    Processed(Vec<ProcessedExportRow>),
}

/// A fully assembled, ordered export for one experiment.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportTable {
    pub kind: ExportKind,
    pub experiment_code: String,
    pub rows: ExportRows,
}

impl ExportTable {
    pub fn len(&self) -> usize {
        match &self.rows {
            ExportRows::Raw(rows) => rows.len(),
            ExportRows::Processed(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serialize to CSV bytes.
    pub fn to_csv(&self) -> Result<Vec<u8>, PipelineError> {
        crate::export::csv::encode(self)
    }
}

/// Build the export of `kind` for one experiment's official data.
pub fn build_export(
    dataset: &ExperimentDataset,
    kind: ExportKind,
    options: &ExportOptions,
) -> Result<ExportTable, PipelineError> {
    let code = dataset.code();
    let trials = dataset.trials();
    let rekeying = Rekeying::build(
        &trials,
        dataset.official_rows().map(|row| row.block_id),
        kind.block_order(),
    );

    let rows = match kind {
        ExportKind::Raw => ExportRows::Raw(assemble_raw(code, &trials, &rekeying, options.timezone)?),
        ExportKind::Processed | ExportKind::Cohen => ExportRows::Processed(assemble_processed(
            code,
            &trials,
            &rekeying,
            kind.predicate(),
        )?),
    };

    Ok(ExportTable {
        kind,
        experiment_code: code.to_string(),
        rows,
    })
}

/// Errors that abort one experiment's export.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// Trial relationships contradict each other (e.g. a non-final trial with no successor)
    DataConsistency { trial_id: u64, detail: String },
    /// Output could not be encoded
    Serialization(String),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::DataConsistency { trial_id, detail } => {
                write!(f, "Data consistency error at trial {trial_id}: {detail}")
            }
            PipelineError::Serialization(e) => write!(f, "Serialization error: {e}"),
        }
    }
}

impl std::error::Error for PipelineError {}
