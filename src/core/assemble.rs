//! Row assembly and deterministic ordering for exports.
//!
//! Rows are ordered by subject (earliest trial first), then block ordinal,
//! then trial ordinal and, for raw rows, keypress time.

use crate::core::adjacency::TrialIndex;
use crate::core::classify::classify_trials;
use crate::core::metrics::{compute_trial_metrics, CorrectnessPredicate, TrialMetrics};
use crate::core::pipeline::PipelineError;
use crate::core::rekey::Rekeying;
use crate::dataset::TrialRecord;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::collections::HashMap;

/// Timestamp layout used in raw exports (microsecond precision).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f%:z";

/// One row per keypress.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawExportRow {
    pub experiment_code: String,
    pub subject_code: String,
    pub block_id: u32,
    pub block_sequence: String,
    pub trial_id: u32,
    pub was_trial_correct: bool,
    pub was_partial_trial_correct: bool,
    pub keypress_timestamp: String,
    pub keypress_value: String,
    pub was_keypress_correct: bool,
    pub diff_between_keypresses_ms: Option<f64>,
}

/// One row per trial.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessedExportRow {
    pub experiment_code: String,
    pub subject_code: String,
    pub block_id: u32,
    pub trial_id: u32,
    pub correct_trial: bool,
    pub accumulated_correct_trials: u32,
    pub execution_time_ms: Option<f64>,
    pub tapping_speed_mean: Option<f64>,
    pub tapping_speed_std_dev: Option<f64>,
    pub tapping_speed_extra_keypress_mean: Option<f64>,
    pub tapping_speed_extra_keypress_std_dev: Option<f64>,
}

/// A trial together with its computed metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRow<'a> {
    pub trial: &'a TrialRecord,
    pub metrics: TrialMetrics,
}

/// Re-keyed identifiers of one trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ExportKeys {
    pub subject: u32,
    pub block: u32,
    pub trial: u32,
}

impl ExportKeys {
    pub fn for_trial(rekeying: &Rekeying, trial: &TrialRecord) -> Result<Self, PipelineError> {
        let missing = |what: &str| PipelineError::DataConsistency {
            trial_id: trial.trial_id,
            detail: format!("no {what} ordinal assigned"),
        };

        Ok(Self {
            subject: rekeying
                .subject(&trial.subject_code)
                .ok_or_else(|| missing("subject"))?,
            block: rekeying
                .block(trial.block_id)
                .ok_or_else(|| missing("block"))?,
            trial: rekeying
                .trial(trial.block_id, &trial.subject_code, trial.trial_id)
                .ok_or_else(|| missing("trial"))?,
        })
    }
}

/// Trials in export order, paired with their ordinals.
pub fn order_trials<'a>(
    trials: &'a [TrialRecord],
    rekeying: &Rekeying,
) -> Result<Vec<(ExportKeys, &'a TrialRecord)>, PipelineError> {
    let mut keyed = trials
        .iter()
        .map(|t| ExportKeys::for_trial(rekeying, t).map(|keys| (keys, t)))
        .collect::<Result<Vec<_>, _>>()?;
    keyed.sort_by_key(|(keys, t)| (*keys, t.trial_id));
    Ok(keyed)
}

pub fn format_timestamp(timestamp: DateTime<Utc>, timezone: Tz) -> String {
    timestamp
        .with_timezone(&timezone)
        .format(TIMESTAMP_FORMAT)
        .to_string()
}

/// Build raw (per-keypress) rows.
pub fn assemble_raw(
    experiment_code: &str,
    trials: &[TrialRecord],
    rekeying: &Rekeying,
    timezone: Tz,
) -> Result<Vec<RawExportRow>, PipelineError> {
    let ordered = order_trials(trials, rekeying)?;
    let keys: HashMap<u64, ExportKeys> = ordered
        .iter()
        .map(|(keys, t)| (t.trial_id, *keys))
        .collect();

    let rows = classify_trials(ordered.iter().map(|(_, t)| *t))
        .into_iter()
        .map(|row| {
            let ordinals = keys[&row.trial.trial_id];
            RawExportRow {
                experiment_code: experiment_code.to_string(),
                subject_code: row.trial.subject_code.clone(),
                block_id: ordinals.block,
                block_sequence: row.trial.block_sequence.clone(),
                trial_id: ordinals.trial,
                was_trial_correct: row.trial.correct,
                was_partial_trial_correct: row.trial.partial_correct,
                keypress_timestamp: format_timestamp(row.keypress.timestamp, timezone),
                keypress_value: row.keypress.value.clone(),
                was_keypress_correct: row.was_keypress_correct,
                diff_between_keypresses_ms: row.diff_between_keypresses_ms,
            }
        })
        .collect();

    Ok(rows)
}

/// Compute metrics for every trial, in input order.
pub fn compute_metric_rows<'a>(
    trials: &'a [TrialRecord],
    index: &TrialIndex,
    predicate: CorrectnessPredicate,
) -> Result<Vec<MetricRow<'a>>, PipelineError> {
    trials
        .iter()
        .map(|trial| {
            compute_trial_metrics(trial, index, predicate).map(|metrics| MetricRow { trial, metrics })
        })
        .collect()
}

/// Build processed (per-trial) rows.
pub fn assemble_processed(
    experiment_code: &str,
    trials: &[TrialRecord],
    rekeying: &Rekeying,
    predicate: CorrectnessPredicate,
) -> Result<Vec<ProcessedExportRow>, PipelineError> {
    let index = TrialIndex::build(trials);
    let metrics: HashMap<u64, TrialMetrics> = compute_metric_rows(trials, &index, predicate)?
        .into_iter()
        .map(|row| (row.trial.trial_id, row.metrics))
        .collect();

    let mut accumulated: HashMap<(u32, u32), u32> = HashMap::new();
    let mut rows = Vec::with_capacity(trials.len());

    for (keys, trial) in order_trials(trials, rekeying)? {
        let correct_trial = predicate.accepts(trial);
        let count = accumulated.entry((keys.subject, keys.block)).or_insert(0);
        if correct_trial {
            *count += 1;
        }

        let m = metrics.get(&trial.trial_id).copied().unwrap_or_default();
        rows.push(ProcessedExportRow {
            experiment_code: experiment_code.to_string(),
            subject_code: trial.subject_code.clone(),
            block_id: keys.block,
            trial_id: keys.trial,
            correct_trial,
            accumulated_correct_trials: *count,
            execution_time_ms: m.execution_time_ms,
            tapping_speed_mean: m.tapping_speed_mean,
            tapping_speed_std_dev: m.tapping_speed_std_dev,
            tapping_speed_extra_keypress_mean: m.tapping_speed_extra_keypress_mean,
            tapping_speed_extra_keypress_std_dev: m.tapping_speed_extra_keypress_std_dev,
        });
    }

    Ok(rows)
}
