//! Access to experiment snapshots produced by the persistence layer.

use crate::dataset::types::ExperimentDataset;
use std::path::{Path, PathBuf};

/// Supplies experiment snapshots to the batch driver.
pub trait DatasetSource: Send + Sync {
    /// Codes of every experiment the source knows about, sorted.
    fn list_experiments(&self) -> Result<Vec<String>, SourceError>;

    /// Load one experiment. `Ok(None)` means it no longer exists.
    fn load(&self, code: &str) -> Result<Option<ExperimentDataset>, SourceError>;
}

/// Reads `{dir}/{code}.json` files, each holding a serialized [`ExperimentDataset`].
#[derive(Debug, Clone)]
pub struct JsonDirSource {
    dir: PathBuf,
}

impl JsonDirSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, code: &str) -> PathBuf {
        self.dir.join(format!("{code}.json"))
    }
}

impl DatasetSource for JsonDirSource {
    fn list_experiments(&self) -> Result<Vec<String>, SourceError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let entries =
            std::fs::read_dir(&self.dir).map_err(|e| SourceError::Io(e.to_string()))?;

        let mut codes: Vec<String> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map(|e| e == "json").unwrap_or(false))
            .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().to_string()))
            .collect();
        codes.sort();

        Ok(codes)
    }

    fn load(&self, code: &str) -> Result<Option<ExperimentDataset>, SourceError> {
        let path = self.path_for(code);
        if !path.exists() {
            return Ok(None);
        }

        let content =
            std::fs::read_to_string(&path).map_err(|e| SourceError::Io(e.to_string()))?;
        let dataset: ExperimentDataset = serde_json::from_str(&content)
            .map_err(|e| SourceError::Parse(format!("{}: {e}", path.display())))?;

        if dataset.code() != code {
            return Err(SourceError::CodeMismatch {
                expected: code.to_string(),
                found: dataset.code().to_string(),
            });
        }

        Ok(Some(dataset))
    }
}

/// Errors reading experiment snapshots.
#[derive(Debug)]
pub enum SourceError {
    Io(String),
    Parse(String),
    /// The file's embedded experiment code differs from its name
    CodeMismatch { expected: String, found: String },
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::Io(e) => write!(f, "Dataset IO error: {e}"),
            SourceError::Parse(e) => write!(f, "Dataset parse error: {e}"),
            SourceError::CodeMismatch { expected, found } => {
                write!(f, "Dataset {expected}.json holds experiment {found}")
            }
        }
    }
}

impl std::error::Error for SourceError {}
