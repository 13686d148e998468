//! Per-keypress correctness against a block's target sequence.
//!
//! Works on a stream already ordered by (subject, block, trial, timestamp).
//! A cursor walks the target sequence and resets whenever the
//! (subject, block, trial) key changes from the previous row.

use crate::core::normalize::elapsed_secs;
use crate::dataset::{Keypress, TrialRecord};
use chrono::{DateTime, Utc};

/// A keypress annotated with per-keypress diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedRow<'a> {
    pub trial: &'a TrialRecord,
    pub keypress: &'a Keypress,
    /// Whether the keypress matches the sequence at the cursor position
    pub was_keypress_correct: bool,
    /// Clamped gap to the previous keypress of the same trial, in milliseconds
    pub diff_between_keypresses_ms: Option<f64>,
}

/// Grouping key the cursor resets on.
type CursorKey<'a> = (&'a str, u64, u64);

/// Stateful classifier holding the running cursor.
#[derive(Debug, Default)]
pub struct SequenceCursor<'a> {
    key: Option<CursorKey<'a>>,
    position: usize,
    previous_timestamp: Option<DateTime<Utc>>,
}

impl<'a> SequenceCursor<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify the next keypress of the ordered stream.
    pub fn classify(&mut self, trial: &'a TrialRecord, keypress: &'a Keypress) -> ClassifiedRow<'a> {
        let key = (trial.subject_code.as_str(), trial.block_id, trial.trial_id);
        if self.key != Some(key) {
            self.key = Some(key);
            self.position = 0;
            self.previous_timestamp = None;
        }

        let was_keypress_correct = expected_at(&trial.block_sequence, self.position)
            .map(|expected| keypress.value.chars().eq(std::iter::once(expected)))
            .unwrap_or(false);

        let diff_between_keypresses_ms = self
            .previous_timestamp
            .map(|previous| elapsed_secs(previous, keypress.timestamp) * 1000.0);

        self.position += 1;
        self.previous_timestamp = Some(keypress.timestamp);

        ClassifiedRow {
            trial,
            keypress,
            was_keypress_correct,
            diff_between_keypresses_ms,
        }
    }
}

fn expected_at(sequence: &str, position: usize) -> Option<char> {
    sequence.chars().nth(position)
}

/// Classify every keypress of trials given in export order.
pub fn classify_trials<'a, I>(trials: I) -> Vec<ClassifiedRow<'a>>
where
    I: IntoIterator<Item = &'a TrialRecord>,
{
    let mut cursor = SequenceCursor::new();
    let mut rows = Vec::new();

    for trial in trials {
        for keypress in &trial.keypresses {
            rows.push(cursor.classify(trial, keypress));
        }
    }

    rows
}
