//! CSV encoding of export tables.

use crate::core::pipeline::{ExportRows, ExportTable, PipelineError};
use serde::Serialize;

/// Header written when an export has no rows, so the artifact stays parseable.
pub const PLACEHOLDER_HEADER: &str = "no_data";

/// Encode a table as CSV bytes.
pub fn encode(table: &ExportTable) -> Result<Vec<u8>, PipelineError> {
    match &table.rows {
        ExportRows::Raw(rows) => encode_rows(rows),
        ExportRows::Processed(rows) => encode_rows(rows),
    }
}

fn encode_rows<T: Serialize>(rows: &[T]) -> Result<Vec<u8>, PipelineError> {
    let mut writer = ::csv::Writer::from_writer(Vec::new());

    if rows.is_empty() {
        writer
            .write_record([PLACEHOLDER_HEADER])
            .map_err(|e| PipelineError::Serialization(e.to_string()))?;
    }
    for row in rows {
        writer
            .serialize(row)
            .map_err(|e| PipelineError::Serialization(e.to_string()))?;
    }

    writer
        .into_inner()
        .map_err(|e| PipelineError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::assemble::ProcessedExportRow;
    use crate::core::pipeline::ExportKind;

    fn table(rows: Vec<ProcessedExportRow>) -> ExportTable {
        ExportTable {
            kind: ExportKind::Processed,
            experiment_code: "AB12".to_string(),
            rows: ExportRows::Processed(rows),
        }
    }

    #[test]
    fn test_empty_table_has_placeholder_header() {
        let bytes = encode(&table(Vec::new())).unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), "no_data\n");
    }

    #[test]
    fn test_nulls_are_empty_fields() {
        let row = ProcessedExportRow {
            experiment_code: "AB12".to_string(),
            subject_code: "s1".to_string(),
            block_id: 1,
            trial_id: 2,
            correct_trial: false,
            accumulated_correct_trials: 0,
            execution_time_ms: None,
            tapping_speed_mean: None,
            tapping_speed_std_dev: None,
            tapping_speed_extra_keypress_mean: None,
            tapping_speed_extra_keypress_std_dev: None,
        };
        let text = String::from_utf8(encode(&table(vec![row])).unwrap()).unwrap();
        let mut lines = text.lines();

        assert_eq!(
            lines.next().unwrap(),
            "experiment_code,subject_code,block_id,trial_id,correct_trial,\
             accumulated_correct_trials,execution_time_ms,tapping_speed_mean,\
             tapping_speed_std_dev,tapping_speed_extra_keypress_mean,\
             tapping_speed_extra_keypress_std_dev"
        );
        assert_eq!(lines.next().unwrap(), "AB12,s1,1,2,false,0,,,,,");
        assert!(!text.contains("NaN"));
    }
}
