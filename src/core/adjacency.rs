//! Chronological neighbours of a trial within its (subject, block) group.
//!
//! Trials carry no "previous"/"next" links and their ids are not contiguous,
//! so neighbours are reconstructed from timestamps alone. The index is built
//! once per experiment; each lookup is a pair of binary searches.

use crate::core::pipeline::PipelineError;
use crate::dataset::TrialRecord;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// (subject code, block id)
pub type GroupKey = (String, u64);

/// The timing facts adjacency and metrics need about one trial.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialSummary {
    pub trial_id: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub first_keypress: Option<DateTime<Utc>>,
    pub last_keypress: Option<DateTime<Utc>>,
}

impl TrialSummary {
    pub fn from_record(trial: &TrialRecord) -> Self {
        Self {
            trial_id: trial.trial_id,
            started_at: trial.started_at,
            finished_at: trial.finished_at,
            first_keypress: trial.first_keypress(),
            last_keypress: trial.last_keypress(),
        }
    }

    /// First keypress, or the trial start when nothing was typed.
    pub fn first_action(&self) -> DateTime<Utc> {
        self.first_keypress.unwrap_or(self.started_at)
    }

    /// Last keypress, or the trial finish when nothing was typed.
    pub fn last_action(&self) -> DateTime<Utc> {
        self.last_keypress.unwrap_or(self.finished_at)
    }
}

#[derive(Debug)]
struct TrialGroup {
    /// Sorted by (started_at, trial_id)
    by_start: Vec<TrialSummary>,
    /// Indices into `by_start`, sorted by (finished_at, trial_id)
    by_finish: Vec<usize>,
    min_start: DateTime<Utc>,
    max_finish: DateTime<Utc>,
}

impl TrialGroup {
    fn new(mut trials: Vec<TrialSummary>) -> Self {
        trials.sort_by_key(|t| (t.started_at, t.trial_id));

        let mut by_finish: Vec<usize> = (0..trials.len()).collect();
        by_finish.sort_by_key(|&i| (trials[i].finished_at, trials[i].trial_id));

        // Groups are only created with at least one trial.
        let min_start = trials[0].started_at;
        let max_finish = trials[by_finish[by_finish.len() - 1]].finished_at;

        Self {
            by_start: trials,
            by_finish,
            min_start,
            max_finish,
        }
    }
}

/// Neighbourhood of one trial.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Adjacency<'a> {
    pub trial: &'a TrialSummary,
    /// Latest trial finishing at or before this one starts
    pub previous: Option<&'a TrialSummary>,
    /// Earliest trial starting at or after this one finishes
    pub next: Option<&'a TrialSummary>,
    /// Starts at the group's earliest start
    pub is_first: bool,
    /// Finishes at the group's latest finish
    pub is_last: bool,
}

impl<'a> Adjacency<'a> {
    /// The next trial, which must exist for any trial that is not last.
    pub fn require_next(&self) -> Result<&'a TrialSummary, PipelineError> {
        self.next.ok_or_else(|| PipelineError::DataConsistency {
            trial_id: self.trial.trial_id,
            detail: "no following trial in (subject, block) group for a non-final trial"
                .to_string(),
        })
    }
}

/// Grouped-map index from (subject, block) to chronologically sorted trials.
#[derive(Debug, Default)]
pub struct TrialIndex {
    groups: HashMap<GroupKey, TrialGroup>,
    locations: HashMap<u64, (GroupKey, usize)>,
}

impl TrialIndex {
    pub fn build(trials: &[TrialRecord]) -> Self {
        let mut grouped: HashMap<GroupKey, Vec<TrialSummary>> = HashMap::new();
        for trial in trials {
            grouped
                .entry((trial.subject_code.clone(), trial.block_id))
                .or_default()
                .push(TrialSummary::from_record(trial));
        }

        let mut index = Self::default();
        for (key, summaries) in grouped {
            let group = TrialGroup::new(summaries);
            for (position, summary) in group.by_start.iter().enumerate() {
                index
                    .locations
                    .insert(summary.trial_id, (key.clone(), position));
            }
            index.groups.insert(key, group);
        }

        index
    }

    /// Number of (subject, block) groups.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Resolve the neighbours of a trial; `None` if the trial is unknown.
    pub fn resolve(&self, trial_id: u64) -> Option<Adjacency<'_>> {
        let (key, position) = self.locations.get(&trial_id)?;
        let group = self.groups.get(key)?;
        let trial = &group.by_start[*position];

        let before = group
            .by_finish
            .partition_point(|&i| group.by_start[i].finished_at <= trial.started_at);
        let previous = group.by_finish[..before]
            .iter()
            .rev()
            .map(|&i| &group.by_start[i])
            .find(|t| t.trial_id != trial_id);

        let after = group
            .by_start
            .partition_point(|t| t.started_at < trial.finished_at);
        let next = group.by_start[after..]
            .iter()
            .find(|t| t.trial_id != trial_id);

        Some(Adjacency {
            trial,
            previous,
            next,
            is_first: trial.started_at == group.min_start,
            is_last: trial.finished_at == group.max_finish,
        })
    }
}
