//! Persisted statistics about export runs.
//!
//! Counts what the batch driver did across runs so operators can see how
//! often artifacts are regenerated versus served from cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters for export activity.
#[derive(Debug)]
pub struct ExportAuditLog {
    /// Experiments whose data was loaded and examined
    experiments_processed: AtomicU64,
    /// Artifacts (re)generated and written
    artifacts_written: AtomicU64,
    /// Artifacts left untouched because the response count was unchanged
    cache_hits: AtomicU64,
    /// Experiments that no longer exist upstream
    not_found: AtomicU64,
    /// Experiments aborted by an error
    failures: AtomicU64,
    /// Experiments that exceeded their time budget
    timeouts: AtomicU64,
    /// Session start time
    session_start: DateTime<Utc>,
    /// Path for persisting stats
    persist_path: Option<PathBuf>,
}

impl ExportAuditLog {
    pub fn new() -> Self {
        Self {
            experiments_processed: AtomicU64::new(0),
            artifacts_written: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            not_found: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Create an audit log that resumes from, and saves to, `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut log = Self::new();
        log.persist_path = Some(path);

        if let Err(e) = log.load() {
            tracing::warn!("Could not load previous audit stats: {e}");
        }

        log
    }

    pub fn record_experiment_processed(&self) {
        self.experiments_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_artifact_written(&self) {
        self.artifacts_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_not_found(&self) {
        self.not_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> AuditStats {
        AuditStats {
            experiments_processed: self.experiments_processed.load(Ordering::Relaxed),
            artifacts_written: self.artifacts_written.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Human-readable summary.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Export Statistics:\n\
             - Experiments processed: {}\n\
             - Artifacts written: {}\n\
             - Cache hits: {}\n\
             - Not found: {}\n\
             - Failures: {}\n\
             - Timeouts: {}\n\
             - Session duration: {} seconds",
            stats.experiments_processed,
            stats.artifacts_written,
            stats.cache_hits,
            stats.not_found,
            stats.failures,
            stats.timeouts,
            stats.session_duration_secs
        )
    }

    /// Save stats to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.stats();
            let persisted = PersistedStats {
                experiments_processed: stats.experiments_processed,
                artifacts_written: stats.artifacts_written,
                cache_hits: stats.cache_hits,
                not_found: stats.not_found,
                failures: stats.failures,
                timeouts: stats.timeouts,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;
            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                self.experiments_processed
                    .store(persisted.experiments_processed, Ordering::Relaxed);
                self.artifacts_written
                    .store(persisted.artifacts_written, Ordering::Relaxed);
                self.cache_hits.store(persisted.cache_hits, Ordering::Relaxed);
                self.not_found.store(persisted.not_found, Ordering::Relaxed);
                self.failures.store(persisted.failures, Ordering::Relaxed);
                self.timeouts.store(persisted.timeouts, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}

impl Default for ExportAuditLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of audit counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditStats {
    pub experiments_processed: u64,
    pub artifacts_written: u64,
    pub cache_hits: u64,
    pub not_found: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    experiments_processed: u64,
    artifacts_written: u64,
    cache_hits: u64,
    not_found: u64,
    failures: u64,
    timeouts: u64,
    last_updated: DateTime<Utc>,
}

/// Thread-safe shared audit log.
pub type SharedAuditLog = Arc<ExportAuditLog>;

pub fn create_shared_log() -> SharedAuditLog {
    Arc::new(ExportAuditLog::new())
}

pub fn create_shared_log_with_persistence(path: PathBuf) -> SharedAuditLog {
    Arc::new(ExportAuditLog::with_persistence(path))
}
