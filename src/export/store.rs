//! Blob storage for generated artifacts.
//!
//! Artifacts are keyed `{kind}/{experiment_code}.csv` and carry metadata
//! recording the response count they were produced from, which is what the
//! batch driver compares to decide whether a cached artifact is stale.

use crate::core::pipeline::ExportKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

/// Location of one artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactKey {
    pub kind: ExportKind,
    pub experiment_code: String,
}

impl ArtifactKey {
    pub fn new(kind: ExportKind, experiment_code: impl Into<String>) -> Self {
        Self {
            kind,
            experiment_code: experiment_code.into(),
        }
    }

    /// Relative object path, e.g. `processed/AB12.csv`.
    pub fn path(&self) -> String {
        format!("{}/{}.csv", self.kind, self.experiment_code)
    }
}

/// Whether `code` is usable as a path component of an artifact key.
pub fn is_valid_experiment_code(code: &str) -> bool {
    !code.is_empty() && code.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Metadata stored next to every artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMeta {
    /// Distinct-subject response count the artifact was built from
    pub response_count: u64,
    /// Number of data rows (excluding header)
    pub rows: usize,
    pub generated_at: DateTime<Utc>,
    /// Batch run that produced the artifact
    pub run_id: Uuid,
}

/// An artifact read back from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredArtifact {
    pub bytes: Vec<u8>,
    pub meta: ArtifactMeta,
}

/// Where artifacts are persisted.
pub trait ArtifactStore: Send + Sync {
    /// Metadata only; `None` if the artifact does not exist.
    fn head(&self, key: &ArtifactKey) -> Result<Option<ArtifactMeta>, StoreError>;

    fn get(&self, key: &ArtifactKey) -> Result<Option<StoredArtifact>, StoreError>;

    fn put(&self, key: &ArtifactKey, bytes: &[u8], meta: &ArtifactMeta) -> Result<(), StoreError>;
}

/// Artifacts as files under a root directory.
///
/// Metadata lives in a sidecar `{code}.csv.meta.json` and acts as the commit
/// marker: the CSV is renamed into place first, the sidecar last. Every write
/// goes through its own uniquely named temporary file.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn data_path(&self, key: &ArtifactKey) -> PathBuf {
        self.root.join(key.path())
    }

    fn meta_path(&self, key: &ArtifactKey) -> PathBuf {
        self.root.join(format!("{}.meta.json", key.path()))
    }

    fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Io(e.to_string()))?;
        }
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let tmp = path.with_file_name(format!(".{file_name}.{}.tmp", Uuid::new_v4()));

        std::fs::write(&tmp, bytes).map_err(|e| StoreError::Io(e.to_string()))?;
        std::fs::rename(&tmp, path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            StoreError::Io(e.to_string())
        })
    }
}

impl ArtifactStore for FsStore {
    fn head(&self, key: &ArtifactKey) -> Result<Option<ArtifactMeta>, StoreError> {
        let meta_path = self.meta_path(key);
        if !meta_path.exists() || !self.data_path(key).exists() {
            return Ok(None);
        }

        let content =
            std::fs::read_to_string(&meta_path).map_err(|e| StoreError::Io(e.to_string()))?;
        let meta = serde_json::from_str(&content).map_err(|e| StoreError::Metadata(e.to_string()))?;
        Ok(Some(meta))
    }

    fn get(&self, key: &ArtifactKey) -> Result<Option<StoredArtifact>, StoreError> {
        let Some(meta) = self.head(key)? else {
            return Ok(None);
        };
        let bytes = std::fs::read(self.data_path(key)).map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(Some(StoredArtifact { bytes, meta }))
    }

    fn put(&self, key: &ArtifactKey, bytes: &[u8], meta: &ArtifactMeta) -> Result<(), StoreError> {
        let meta_json =
            serde_json::to_vec_pretty(meta).map_err(|e| StoreError::Metadata(e.to_string()))?;
        Self::write_atomic(&self.data_path(key), bytes)?;
        Self::write_atomic(&self.meta_path(key), &meta_json)
    }
}

/// In-process store; counts writes so callers can observe cache behaviour.
#[derive(Debug, Default)]
pub struct MemoryStore {
    artifacts: Mutex<HashMap<ArtifactKey, StoredArtifact>>,
    puts: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of `put` calls.
    pub fn put_count(&self) -> u64 {
        self.puts.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.artifacts.lock().map(|a| a.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ArtifactStore for MemoryStore {
    fn head(&self, key: &ArtifactKey) -> Result<Option<ArtifactMeta>, StoreError> {
        Ok(self.get(key)?.map(|a| a.meta))
    }

    fn get(&self, key: &ArtifactKey) -> Result<Option<StoredArtifact>, StoreError> {
        let artifacts = self
            .artifacts
            .lock()
            .map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(artifacts.get(key).cloned())
    }

    fn put(&self, key: &ArtifactKey, bytes: &[u8], meta: &ArtifactMeta) -> Result<(), StoreError> {
        let mut artifacts = self
            .artifacts
            .lock()
            .map_err(|e| StoreError::Io(e.to_string()))?;
        artifacts.insert(
            key.clone(),
            StoredArtifact {
                bytes: bytes.to_vec(),
                meta: meta.clone(),
            },
        );
        self.puts.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Artifact store errors.
#[derive(Debug)]
pub enum StoreError {
    Io(String),
    Metadata(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "Store IO error: {e}"),
            StoreError::Metadata(e) => write!(f, "Store metadata error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}
