//! Output side of the pipeline: CSV encoding and artifact storage.

pub mod csv;
pub mod store;

pub use store::{
    is_valid_experiment_code, ArtifactKey, ArtifactMeta, ArtifactStore, FsStore, MemoryStore,
    StoreError, StoredArtifact,
};
