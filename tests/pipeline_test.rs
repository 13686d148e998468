//! End-to-end checks of the export pipeline on small hand-built experiments.

use chrono::{DateTime, Duration, TimeZone, Utc};
use tapstudy_analytics::core::{build_export, ExportKind, ExportOptions, ExportRows, PipelineError};
use tapstudy_analytics::dataset::{ExperimentDataset, ExperimentInfo, RawRow};

fn at(ms: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 6, 10, 0, 0).unwrap() + Duration::milliseconds(ms)
}

struct TrialFixture<'a> {
    trial_id: u64,
    subject: &'a str,
    block_id: u64,
    sequence: &'a str,
    start_ms: i64,
    finish_ms: i64,
    correct: bool,
    partial_correct: bool,
    keys: &'a [(&'a str, i64)],
}

impl<'a> TrialFixture<'a> {
    fn new(trial_id: u64, subject: &'a str, start_ms: i64, finish_ms: i64) -> Self {
        Self {
            trial_id,
            subject,
            block_id: 1,
            sequence: "123",
            start_ms,
            finish_ms,
            correct: true,
            partial_correct: true,
            keys: &[],
        }
    }

    fn keys(mut self, keys: &'a [(&'a str, i64)]) -> Self {
        self.keys = keys;
        self
    }

    fn incorrect(mut self) -> Self {
        self.correct = false;
        self.partial_correct = false;
        self
    }

    /// Matched the sequence up to the cutoff without completing it.
    fn partially_correct(mut self) -> Self {
        self.correct = false;
        self.partial_correct = true;
        self
    }

    fn rows(&self) -> Vec<RawRow> {
        let base = RawRow {
            experiment_code: "AB12".to_string(),
            block_id: self.block_id,
            block_sequence: self.sequence.to_string(),
            trial_id: self.trial_id,
            trial_started_at: at(self.start_ms),
            trial_finished_at: at(self.finish_ms),
            trial_correct: self.correct,
            trial_partial_correct: self.partial_correct,
            subject_code: self.subject.to_string(),
            keypress_id: None,
            keypress_value: None,
            keypress_timestamp: None,
        };

        if self.keys.is_empty() {
            return vec![base];
        }

        self.keys
            .iter()
            .enumerate()
            .map(|(i, (value, ms))| RawRow {
                keypress_id: Some(self.trial_id * 100 + i as u64),
                keypress_value: Some(value.to_string()),
                keypress_timestamp: Some(at(*ms)),
                ..base.clone()
            })
            .collect()
    }
}

fn dataset(trials: &[TrialFixture<'_>]) -> ExperimentDataset {
    ExperimentDataset::new(
        ExperimentInfo {
            code: "AB12".to_string(),
            published: true,
            published_at: Some(at(-60_000)),
        },
        trials.iter().flat_map(|t| t.rows()).collect(),
    )
}

fn export(dataset: &ExperimentDataset, kind: ExportKind) -> ExportRows {
    build_export(dataset, kind, &ExportOptions::default())
        .unwrap()
        .rows
}

fn csv_text(dataset: &ExperimentDataset, kind: ExportKind) -> String {
    let table = build_export(dataset, kind, &ExportOptions::default()).unwrap();
    String::from_utf8(table.to_csv().unwrap()).unwrap()
}

#[test]
fn test_single_correct_trial_metrics() {
    let keys = [("1", 0), ("2", 150), ("3", 305)];
    let data = dataset(&[TrialFixture::new(7, "s1", -50, 310).keys(&keys)]);

    let ExportRows::Processed(rows) = export(&data, ExportKind::Processed) else {
        panic!("expected processed rows");
    };
    assert_eq!(rows.len(), 1);

    let row = &rows[0];
    assert_eq!(row.block_id, 1);
    assert_eq!(row.trial_id, 1);
    assert!(row.correct_trial);
    assert_eq!(row.accumulated_correct_trials, 1);

    // Single trial in its group: finish minus first keypress.
    let exec = row.execution_time_ms.unwrap();
    assert!((exec - 310.0).abs() < 1e-6);

    let expected_mean = (1.0 / 0.150 + 1.0 / 0.155) / 2.0;
    let mean = row.tapping_speed_mean.unwrap();
    assert!((mean - expected_mean).abs() < 1e-6);
    assert!((mean - 6.56).abs() < 0.01);
    assert!(row.tapping_speed_std_dev.unwrap() > 0.0);
}

#[test]
fn test_raw_rows_classify_and_diff() {
    let keys = [("1", 0), ("2", 150), ("3", 305)];
    let data = dataset(&[TrialFixture::new(7, "s1", -50, 310).keys(&keys)]);

    let ExportRows::Raw(rows) = export(&data, ExportKind::Raw) else {
        panic!("expected raw rows");
    };
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|r| r.was_keypress_correct));

    let diffs: Vec<Option<f64>> = rows.iter().map(|r| r.diff_between_keypresses_ms).collect();
    assert_eq!(diffs[0], None);
    assert!((diffs[1].unwrap() - 150.0).abs() < 1e-6);
    assert!((diffs[2].unwrap() - 155.0).abs() < 1e-6);
    assert_eq!(rows[0].keypress_timestamp, "2024-05-06 10:00:00.000000+00:00");
}

#[test]
fn test_wrong_key_marks_only_that_keypress() {
    let keys = [("1", 0), ("9", 150), ("3", 305)];
    let data = dataset(&[TrialFixture::new(7, "s1", -50, 310).keys(&keys).incorrect()]);

    let ExportRows::Raw(rows) = export(&data, ExportKind::Raw) else {
        panic!("expected raw rows");
    };
    let flags: Vec<bool> = rows.iter().map(|r| r.was_keypress_correct).collect();
    assert_eq!(flags, vec![true, false, true]);
}

#[test]
fn test_tiny_interval_is_clamped() {
    let keys = [("1", 0), ("2", 3)];
    let data = dataset(&[TrialFixture::new(1, "s1", -50, 500).keys(&keys)]);

    let ExportRows::Raw(rows) = export(&data, ExportKind::Raw) else {
        panic!("expected raw rows");
    };
    assert!((rows[1].diff_between_keypresses_ms.unwrap() - 9.0).abs() < 1e-9);

    let ExportRows::Processed(rows) = export(&data, ExportKind::Processed) else {
        panic!("expected processed rows");
    };
    let mean = rows[0].tapping_speed_mean.unwrap();
    assert!((mean - 1.0 / 0.009).abs() < 1e-6);
    assert_eq!(rows[0].tapping_speed_std_dev, None);
}

#[test]
fn test_subjects_ordered_by_first_start_not_input_order() {
    let keys_a = [("1", 0), ("2", 100)];
    let keys_b = [("1", 5_000), ("2", 5_100)];
    // B listed first, but A started earlier.
    let data = dataset(&[
        TrialFixture::new(2, "B", 4_900, 5_200).keys(&keys_b),
        TrialFixture::new(9, "A", -100, 200).keys(&keys_a),
    ]);

    let ExportRows::Processed(rows) = export(&data, ExportKind::Processed) else {
        panic!("expected processed rows");
    };
    let subjects: Vec<&str> = rows.iter().map(|r| r.subject_code.as_str()).collect();
    assert_eq!(subjects, vec!["A", "B"]);
    assert!(rows.iter().all(|r| r.trial_id == 1));
}

#[test]
fn test_accumulated_correct_trials_runs_per_subject_and_block() {
    let k1 = [("1", 0), ("2", 100)];
    let k2 = [("1", 1_000), ("2", 1_100)];
    let k3 = [("1", 2_000), ("2", 2_100)];
    let data = dataset(&[
        TrialFixture::new(1, "s1", -100, 500).keys(&k1),
        TrialFixture::new(2, "s1", 900, 1_500).keys(&k2).incorrect(),
        TrialFixture::new(3, "s1", 1_900, 2_500).keys(&k3),
    ]);

    let ExportRows::Processed(rows) = export(&data, ExportKind::Processed) else {
        panic!("expected processed rows");
    };
    let accumulated: Vec<u32> = rows.iter().map(|r| r.accumulated_correct_trials).collect();
    assert_eq!(accumulated, vec![1, 1, 2]);

    // Incorrect trials carry no metrics.
    assert_eq!(rows[1].execution_time_ms, None);
    assert_eq!(rows[1].tapping_speed_mean, None);

    // First trial: next trial's first action minus own start.
    assert!((rows[0].execution_time_ms.unwrap() - 1_100.0).abs() < 1e-6);
    // Last trial: finish minus first keypress.
    assert!((rows[2].execution_time_ms.unwrap() - 500.0).abs() < 1e-6);
}

fn three_trial_block(middle: TrialFixture<'static>) -> ExperimentDataset {
    dataset(&[
        TrialFixture::new(1, "s1", 0, 500).keys(&[("1", 100), ("2", 250)]),
        middle,
        TrialFixture::new(3, "s1", 2_000, 2_500).keys(&[("1", 2_200), ("2", 2_350)]),
    ])
}

fn close(actual: Option<f64>, expected: f64) -> bool {
    actual.map(|v| (v - expected).abs() < 1e-9).unwrap_or(false)
}

#[test]
fn test_middle_trial_metrics_through_export() {
    let data = three_trial_block(
        TrialFixture::new(2, "s1", 1_000, 1_500).keys(&[("1", 1_100), ("2", 1_300)]),
    );

    let ExportRows::Processed(rows) = export(&data, ExportKind::Processed) else {
        panic!("expected processed rows");
    };
    let middle = &rows[1];
    assert_eq!(middle.trial_id, 2);

    // Next trial's first keypress minus own first keypress.
    assert!(close(middle.execution_time_ms, 1_100.0));

    // One 200 ms interval.
    assert!(close(middle.tapping_speed_mean, 5.0));
    assert_eq!(middle.tapping_speed_std_dev, None);

    // Extra variant adds the 850 ms gap since the previous trial's last keypress.
    let extra: [f64; 2] = [1.0 / 0.85, 5.0];
    let mean = (extra[0] + extra[1]) / 2.0;
    let std_dev = (extra[1] - extra[0]).abs() / 2f64.sqrt();
    assert!(close(middle.tapping_speed_extra_keypress_mean, mean));
    let actual = middle.tapping_speed_extra_keypress_std_dev.unwrap();
    assert!((actual - std_dev).abs() < 1e-9);

    // First trial has no previous trial, so both variants agree.
    assert_eq!(
        rows[0].tapping_speed_extra_keypress_mean,
        rows[0].tapping_speed_mean
    );
}

#[test]
fn test_partially_correct_trial_counts_only_in_cohen() {
    let data = three_trial_block(
        TrialFixture::new(2, "s1", 1_000, 1_500)
            .keys(&[("1", 1_100), ("9", 1_300)])
            .partially_correct(),
    );

    let ExportRows::Processed(processed) = export(&data, ExportKind::Processed) else {
        panic!("expected processed rows");
    };
    let ExportRows::Processed(cohen) = export(&data, ExportKind::Cohen) else {
        panic!("expected cohen rows");
    };

    assert!(!processed[1].correct_trial);
    assert_eq!(processed[1].execution_time_ms, None);
    assert_eq!(processed[1].tapping_speed_mean, None);
    assert_eq!(
        processed.iter().map(|r| r.accumulated_correct_trials).collect::<Vec<_>>(),
        vec![1, 1, 2]
    );

    assert!(cohen[1].correct_trial);
    assert!(close(cohen[1].execution_time_ms, 1_100.0));
    assert!(close(cohen[1].tapping_speed_mean, 5.0));
    assert_eq!(
        cohen.iter().map(|r| r.accumulated_correct_trials).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );

    assert_ne!(
        csv_text(&data, ExportKind::Processed),
        csv_text(&data, ExportKind::Cohen)
    );
}

#[test]
fn test_trial_without_keypresses_yields_empty_fields() {
    let data = dataset(&[TrialFixture::new(1, "s1", 0, 800)]);

    let ExportRows::Processed(rows) = export(&data, ExportKind::Processed) else {
        panic!("expected processed rows");
    };
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].execution_time_ms, None);
    assert_eq!(rows[0].tapping_speed_mean, None);

    let text = csv_text(&data, ExportKind::Processed);
    assert!(!text.contains("NaN"));
    assert!(text.lines().nth(1).unwrap().ends_with(",,,,,"));

    // Raw export has no keypress rows for it.
    let ExportRows::Raw(rows) = export(&data, ExportKind::Raw) else {
        panic!("expected raw rows");
    };
    assert!(rows.is_empty());
}

#[test]
fn test_empty_dataset_writes_placeholder() {
    let data = dataset(&[]);
    for kind in ExportKind::ALL {
        assert_eq!(csv_text(&data, kind), "no_data\n");
    }
}

#[test]
fn test_processed_header() {
    let keys = [("1", 0), ("2", 100)];
    let data = dataset(&[TrialFixture::new(1, "s1", -50, 300).keys(&keys)]);
    let text = csv_text(&data, ExportKind::Processed);
    assert_eq!(
        text.lines().next().unwrap(),
        "experiment_code,subject_code,block_id,trial_id,correct_trial,\
         accumulated_correct_trials,execution_time_ms,tapping_speed_mean,\
         tapping_speed_std_dev,tapping_speed_extra_keypress_mean,\
         tapping_speed_extra_keypress_std_dev"
    );
}

#[test]
fn test_repeated_runs_are_byte_identical() {
    let k1 = [("1", 0), ("2", 120), ("3", 260)];
    let k2 = [("1", 1_000), ("3", 1_180)];
    let k3 = [("2", 3_000)];
    let data = dataset(&[
        TrialFixture::new(11, "s2", 2_900, 3_400).keys(&k3),
        TrialFixture::new(4, "s1", -40, 400).keys(&k1),
        TrialFixture::new(5, "s1", 950, 1_300).keys(&k2).incorrect(),
    ]);

    for kind in ExportKind::ALL {
        let first = csv_text(&data, kind);
        let second = csv_text(&data, kind);
        assert_eq!(first, second, "{kind} export is not deterministic");
    }
}

#[test]
fn test_trials_before_publish_are_excluded() {
    let early = [("1", -120_000), ("2", -119_900)];
    let late = [("1", 0), ("2", 100)];
    let data = dataset(&[
        TrialFixture::new(1, "early", -120_100, -119_800).keys(&early),
        TrialFixture::new(2, "late", -100, 300).keys(&late),
    ]);

    assert_eq!(data.response_count(), 1);
    let ExportRows::Processed(rows) = export(&data, ExportKind::Processed) else {
        panic!("expected processed rows");
    };
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].subject_code, "late");
}

#[test]
fn test_overlapping_trials_are_a_consistency_error() {
    let k1 = [("1", 100), ("2", 200)];
    let k2 = [("1", 600), ("2", 700)];
    let data = dataset(&[
        TrialFixture::new(1, "s1", 0, 1_000).keys(&k1),
        TrialFixture::new(2, "s1", 500, 2_000).keys(&k2),
    ]);

    let err = build_export(&data, ExportKind::Processed, &ExportOptions::default()).unwrap_err();
    assert!(matches!(err, PipelineError::DataConsistency { trial_id: 1, .. }));

    // Raw export does not need adjacency.
    assert!(build_export(&data, ExportKind::Raw, &ExportOptions::default()).is_ok());
}

#[test]
fn test_raw_timestamps_follow_configured_timezone() {
    let keys = [("1", 0)];
    let data = dataset(&[TrialFixture::new(1, "s1", -50, 300).keys(&keys)]);
    let options = ExportOptions {
        timezone: chrono_tz::America::Santiago,
    };

    let table = build_export(&data, ExportKind::Raw, &options).unwrap();
    let ExportRows::Raw(rows) = table.rows else {
        panic!("expected raw rows");
    };
    // May 2024: Santiago is on UTC-4.
    assert_eq!(rows[0].keypress_timestamp, "2024-05-06 06:00:00.000000-04:00");
}
