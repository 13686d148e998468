//! Snapshot types handed to the pipeline by the persistence layer.
//!
//! These are read-only views: the pipeline never mutates trials or keypresses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Experiment-level metadata needed to decide which trials are official.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentInfo {
    /// Four-character experiment code
    pub code: String,
    /// Whether the experiment has been published
    #[serde(default)]
    pub published: bool,
    /// Publish instant; trials started before it are excluded once published
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

impl ExperimentInfo {
    /// Whether a trial started at `started_at` counts towards analytics.
    pub fn is_official(&self, started_at: DateTime<Utc>) -> bool {
        match (self.published, self.published_at) {
            (true, Some(cutoff)) => started_at >= cutoff,
            _ => true,
        }
    }
}

/// One flattened Experiment → Block → Trial → Keypress row.
///
/// A trial without keypresses arrives as a single row with the keypress
/// fields set to `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRow {
    pub experiment_code: String,
    pub block_id: u64,
    pub block_sequence: String,
    pub trial_id: u64,
    pub trial_started_at: DateTime<Utc>,
    pub trial_finished_at: DateTime<Utc>,
    pub trial_correct: bool,
    pub trial_partial_correct: bool,
    pub subject_code: String,
    #[serde(default)]
    pub keypress_id: Option<u64>,
    #[serde(default)]
    pub keypress_value: Option<String>,
    #[serde(default)]
    pub keypress_timestamp: Option<DateTime<Utc>>,
}

/// A single keypress belonging to a trial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keypress {
    pub id: u64,
    pub value: String,
    pub timestamp: DateTime<Utc>,
}

/// A trial with its keypresses sorted by (timestamp, id).
#[derive(Debug, Clone, PartialEq)]
pub struct TrialRecord {
    pub trial_id: u64,
    pub subject_code: String,
    pub block_id: u64,
    pub block_sequence: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub correct: bool,
    pub partial_correct: bool,
    pub keypresses: Vec<Keypress>,
}

impl TrialRecord {
    /// Timestamp of the first keypress, if any.
    pub fn first_keypress(&self) -> Option<DateTime<Utc>> {
        self.keypresses.first().map(|k| k.timestamp)
    }

    /// Timestamp of the last keypress, if any.
    pub fn last_keypress(&self) -> Option<DateTime<Utc>> {
        self.keypresses.last().map(|k| k.timestamp)
    }
}

/// Everything the persistence layer knows about one experiment's responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentDataset {
    pub experiment: ExperimentInfo,
    #[serde(default)]
    pub rows: Vec<RawRow>,
}

impl ExperimentDataset {
    pub fn new(experiment: ExperimentInfo, rows: Vec<RawRow>) -> Self {
        Self { experiment, rows }
    }

    pub fn code(&self) -> &str {
        &self.experiment.code
    }

    /// Rows that survive the publish cutoff, in input order.
    pub fn official_rows(&self) -> impl Iterator<Item = &RawRow> {
        self.rows
            .iter()
            .filter(move |row| self.experiment.is_official(row.trial_started_at))
    }

    /// Number of distinct subjects with official trials.
    pub fn response_count(&self) -> u64 {
        self.official_rows()
            .map(|row| row.subject_code.as_str())
            .collect::<HashSet<_>>()
            .len() as u64
    }

    /// Group official rows into trials, ordered by trial id.
    ///
    /// Trial-level columns are taken from the first row seen for each trial.
    pub fn trials(&self) -> Vec<TrialRecord> {
        let mut trials: BTreeMap<u64, TrialRecord> = BTreeMap::new();

        for row in self.official_rows() {
            let trial = trials.entry(row.trial_id).or_insert_with(|| TrialRecord {
                trial_id: row.trial_id,
                subject_code: row.subject_code.clone(),
                block_id: row.block_id,
                block_sequence: row.block_sequence.clone(),
                started_at: row.trial_started_at,
                finished_at: row.trial_finished_at,
                correct: row.trial_correct,
                partial_correct: row.trial_partial_correct,
                keypresses: Vec::new(),
            });

            if let (Some(id), Some(timestamp)) = (row.keypress_id, row.keypress_timestamp) {
                trial.keypresses.push(Keypress {
                    id,
                    value: row.keypress_value.clone().unwrap_or_default(),
                    timestamp,
                });
            }
        }

        trials
            .into_values()
            .map(|mut trial| {
                trial.keypresses.sort_by_key(|k| (k.timestamp, k.id));
                trial
            })
            .collect()
    }
}
