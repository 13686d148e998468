//! Per-trial timing metrics.
//!
//! Execution time is measured up to the moment the *next* action begins,
//! except at block boundaries where no neighbouring action exists. Tapping
//! speed is the reciprocal of each clamped inter-keypress interval.

use crate::core::adjacency::{Adjacency, TrialIndex};
use crate::core::normalize::{elapsed_secs, raw_elapsed_secs, tap_rate};
use crate::core::pipeline::PipelineError;
use crate::dataset::TrialRecord;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// Derived timing metrics for one trial. `None` means "not computable".
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TrialMetrics {
    pub execution_time_ms: Option<f64>,
    /// Mean taps per second over the trial's own intervals
    pub tapping_speed_mean: Option<f64>,
    /// Sample standard deviation (N-1) of the same rates
    pub tapping_speed_std_dev: Option<f64>,
    /// Mean including the gap from the previous trial's last keypress
    pub tapping_speed_extra_keypress_mean: Option<f64>,
    pub tapping_speed_extra_keypress_std_dev: Option<f64>,
}

/// Which stored trial flag makes a trial eligible for metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectnessPredicate {
    Correct,
    PartialCorrect,
}

impl CorrectnessPredicate {
    pub fn accepts(&self, trial: &TrialRecord) -> bool {
        match self {
            CorrectnessPredicate::Correct => trial.correct,
            CorrectnessPredicate::PartialCorrect => trial.partial_correct,
        }
    }
}

/// Mean and sample standard deviation of a set of rates.
///
/// Empty input gives `(None, None)`; a single sample has no deviation.
pub fn mean_and_std_dev(samples: &[f64]) -> (Option<f64>, Option<f64>) {
    let finite: Vec<f64> = samples.iter().copied().filter(|v| v.is_finite()).collect();

    let mean = if finite.is_empty() {
        None
    } else {
        Some(finite.iter().mean())
    };
    let std_dev = if finite.len() < 2 {
        None
    } else {
        Some(finite.iter().std_dev())
    };

    (mean, std_dev)
}

/// Clamped intervals (seconds) between consecutive keypresses of a trial.
pub fn keypress_intervals(trial: &TrialRecord) -> Vec<f64> {
    trial
        .keypresses
        .windows(2)
        .map(|pair| elapsed_secs(pair[0].timestamp, pair[1].timestamp))
        .collect()
}

/// Boundary-aware execution time in milliseconds.
///
/// - last trial of the group: finish − own first keypress
/// - first trial of the group: next trial's first action − own start
/// - otherwise: next trial's first action − own first keypress
pub fn execution_time_ms(
    trial: &TrialRecord,
    adjacency: &Adjacency<'_>,
) -> Result<Option<f64>, PipelineError> {
    let Some(first_keypress) = trial.first_keypress() else {
        return Ok(None);
    };

    let secs = if adjacency.is_last {
        raw_elapsed_secs(first_keypress, trial.finished_at)
    } else if adjacency.is_first {
        let next = adjacency.require_next()?;
        raw_elapsed_secs(trial.started_at, next.first_action())
    } else {
        let next = adjacency.require_next()?;
        raw_elapsed_secs(first_keypress, next.first_action())
    };

    // Zero or negative spans are degenerate, not errors.
    Ok((secs > 0.0).then_some(secs * 1000.0))
}

/// Compute all metrics for one trial.
pub fn compute_trial_metrics(
    trial: &TrialRecord,
    index: &TrialIndex,
    predicate: CorrectnessPredicate,
) -> Result<TrialMetrics, PipelineError> {
    if trial.keypresses.is_empty() || !predicate.accepts(trial) {
        return Ok(TrialMetrics::default());
    }

    let adjacency = index
        .resolve(trial.trial_id)
        .ok_or_else(|| PipelineError::DataConsistency {
            trial_id: trial.trial_id,
            detail: "trial missing from adjacency index".to_string(),
        })?;

    let execution_time_ms = execution_time_ms(trial, &adjacency)?;

    let intervals = keypress_intervals(trial);
    let rates: Vec<f64> = intervals.iter().filter_map(|&s| tap_rate(s)).collect();
    let (tapping_speed_mean, tapping_speed_std_dev) = mean_and_std_dev(&rates);

    let mut extra_rates = rates;
    if let (Some(previous), Some(first)) = (adjacency.previous, trial.first_keypress()) {
        if let Some(rate) = tap_rate(elapsed_secs(previous.last_action(), first)) {
            extra_rates.insert(0, rate);
        }
    }
    let (tapping_speed_extra_keypress_mean, tapping_speed_extra_keypress_std_dev) =
        mean_and_std_dev(&extra_rates);

    Ok(TrialMetrics {
        execution_time_ms,
        tapping_speed_mean,
        tapping_speed_std_dev,
        tapping_speed_extra_keypress_mean,
        tapping_speed_extra_keypress_std_dev,
    })
}
