//! Input side of the pipeline.
//!
//! The persistence layer owns experiments, blocks, trials and keypresses.
//! This module defines the snapshot shape it hands over and the seam used
//! to fetch those snapshots.

pub mod source;
pub mod types;

pub use source::{DatasetSource, JsonDirSource, SourceError};
pub use types::{ExperimentDataset, ExperimentInfo, Keypress, RawRow, TrialRecord};
