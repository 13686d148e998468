//! Batch export over every published experiment.
//!
//! Experiments are independent, so each one runs on its own blocking worker
//! with its own time budget. A failing or slow experiment is logged and
//! reported but never stops the rest of the batch.

use crate::audit::{create_shared_log, SharedAuditLog};
use crate::config::{Config, ConfigError};
use crate::core::pipeline::{build_export, ExportKind, ExportOptions, PipelineError};
use crate::dataset::{DatasetSource, SourceError};
use crate::export::{ArtifactKey, ArtifactMeta, ArtifactStore, StoreError};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{self, JoinSet};
use uuid::Uuid;

/// Knobs for one batch run.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Artifact kinds produced per experiment
    pub kinds: Vec<ExportKind>,
    /// Time budget per experiment attempt
    pub timeout: Duration,
    /// Experiments processed concurrently
    pub max_workers: usize,
    /// Attempts before a timeout is reported
    pub attempts: u32,
    pub export: ExportOptions,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            kinds: ExportKind::ALL.to_vec(),
            timeout: Duration::from_secs(120),
            max_workers: 4,
            attempts: 2,
            export: ExportOptions::default(),
        }
    }
}

impl BatchOptions {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self {
            kinds: ExportKind::ALL.to_vec(),
            timeout: config.experiment_timeout,
            max_workers: config.max_workers,
            attempts: config.attempts,
            export: ExportOptions {
                timezone: config.timezone()?,
            },
        })
    }
}

/// What happened to one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactStatus {
    /// Stored artifact matches the current response count
    Cached,
    Written { rows: usize, bytes: usize },
}

/// What happened to one experiment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExperimentStatus {
    Completed {
        response_count: u64,
        artifacts: Vec<(ExportKind, ArtifactStatus)>,
    },
    Unpublished,
    NotFound,
    Failed(String),
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentOutcome {
    pub code: String,
    pub status: ExperimentStatus,
}

/// Result of a batch run, one outcome per experiment sorted by code.
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<ExperimentOutcome>,
}

impl BatchReport {
    pub fn outcome(&self, code: &str) -> Option<&ExperimentOutcome> {
        self.outcomes.iter().find(|o| o.code == code)
    }

    fn count_artifacts(&self, pred: impl Fn(&ArtifactStatus) -> bool) -> usize {
        self.outcomes
            .iter()
            .filter_map(|o| match &o.status {
                ExperimentStatus::Completed { artifacts, .. } => Some(artifacts),
                _ => None,
            })
            .flatten()
            .filter(|(_, status)| pred(status))
            .count()
    }

    pub fn written_count(&self) -> usize {
        self.count_artifacts(|s| matches!(s, ArtifactStatus::Written { .. }))
    }

    pub fn cached_count(&self) -> usize {
        self.count_artifacts(|s| matches!(s, ArtifactStatus::Cached))
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| {
                matches!(
                    o.status,
                    ExperimentStatus::Failed(_) | ExperimentStatus::TimedOut
                )
            })
            .count()
    }
}

/// Errors that abort a single experiment (or the listing step).
#[derive(Debug)]
pub enum BatchError {
    Source(SourceError),
    Store(StoreError),
    Pipeline(PipelineError),
}

impl std::fmt::Display for BatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BatchError::Source(e) => write!(f, "{e}"),
            BatchError::Store(e) => write!(f, "{e}"),
            BatchError::Pipeline(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for BatchError {}

impl From<SourceError> for BatchError {
    fn from(e: SourceError) -> Self {
        BatchError::Source(e)
    }
}

impl From<StoreError> for BatchError {
    fn from(e: StoreError) -> Self {
        BatchError::Store(e)
    }
}

impl From<PipelineError> for BatchError {
    fn from(e: PipelineError) -> Self {
        BatchError::Pipeline(e)
    }
}

/// Export every requested artifact of one experiment, reusing cached ones.
pub fn process_experiment(
    code: &str,
    source: &dyn DatasetSource,
    store: &dyn ArtifactStore,
    kinds: &[ExportKind],
    export: &ExportOptions,
    run_id: Uuid,
) -> Result<ExperimentStatus, BatchError> {
    let Some(dataset) = source.load(code)? else {
        tracing::warn!(experiment = code, "Experiment not found upstream, skipping");
        return Ok(ExperimentStatus::NotFound);
    };

    if !dataset.experiment.published {
        tracing::debug!(experiment = code, "Experiment not published, skipping");
        return Ok(ExperimentStatus::Unpublished);
    }

    let response_count = dataset.response_count();
    let mut artifacts = Vec::with_capacity(kinds.len());

    for &kind in kinds {
        let key = ArtifactKey::new(kind, code);

        if let Some(meta) = store.head(&key)? {
            if meta.response_count == response_count {
                tracing::debug!(experiment = code, %kind, response_count, "Cache hit");
                artifacts.push((kind, ArtifactStatus::Cached));
                continue;
            }
        }

        let table = build_export(&dataset, kind, export)?;
        let bytes = table.to_csv()?;
        let meta = ArtifactMeta {
            response_count,
            rows: table.len(),
            generated_at: Utc::now(),
            run_id,
        };
        store.put(&key, &bytes, &meta)?;

        tracing::info!(
            experiment = code,
            %kind,
            rows = table.len(),
            response_count,
            "Artifact written to {}",
            key.path()
        );
        artifacts.push((
            kind,
            ArtifactStatus::Written {
                rows: table.len(),
                bytes: bytes.len(),
            },
        ));
    }

    Ok(ExperimentStatus::Completed {
        response_count,
        artifacts,
    })
}

/// Drives [`process_experiment`] across all experiments of a source.
pub struct BatchDriver {
    source: Arc<dyn DatasetSource>,
    store: Arc<dyn ArtifactStore>,
    options: Arc<BatchOptions>,
    audit: SharedAuditLog,
}

impl BatchDriver {
    pub fn new(
        source: Arc<dyn DatasetSource>,
        store: Arc<dyn ArtifactStore>,
        options: BatchOptions,
    ) -> Self {
        Self {
            source,
            store,
            options: Arc::new(options),
            audit: create_shared_log(),
        }
    }

    /// Record activity into an existing audit log.
    pub fn with_audit(mut self, audit: SharedAuditLog) -> Self {
        self.audit = audit;
        self
    }

    pub fn audit(&self) -> &SharedAuditLog {
        &self.audit
    }

    /// Run one pass over every experiment.
    ///
    /// Only a failure to list experiments is returned as an error; per-experiment
    /// problems end up in the report.
    pub async fn run(&self) -> Result<BatchReport, BatchError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let codes = self.source.list_experiments()?;

        tracing::info!(%run_id, experiments = codes.len(), "Starting export batch");

        let semaphore = Arc::new(Semaphore::new(self.options.max_workers.max(1)));
        let mut tasks = JoinSet::new();
        let mut codes_by_task = HashMap::new();

        for code in codes {
            let source = Arc::clone(&self.source);
            let store = Arc::clone(&self.store);
            let options = Arc::clone(&self.options);
            let semaphore = Arc::clone(&semaphore);
            let task_code = code.clone();

            let handle = tasks.spawn(async move {
                let status =
                    run_with_budget(&task_code, source, store, options, semaphore, run_id).await;
                ExperimentOutcome {
                    code: task_code,
                    status,
                }
            });
            codes_by_task.insert(handle.id(), code);
        }

        let mut outcomes = collect_outcomes(tasks, codes_by_task).await;
        for outcome in &outcomes {
            self.record(outcome);
        }
        outcomes.sort_by(|a, b| a.code.cmp(&b.code));

        let report = BatchReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            outcomes,
        };
        tracing::info!(
            %run_id,
            written = report.written_count(),
            cached = report.cached_count(),
            failed = report.failed_count(),
            "Export batch finished"
        );

        Ok(report)
    }

    fn record(&self, outcome: &ExperimentOutcome) {
        match &outcome.status {
            ExperimentStatus::Completed { artifacts, .. } => {
                self.audit.record_experiment_processed();
                for (_, status) in artifacts {
                    match status {
                        ArtifactStatus::Cached => self.audit.record_cache_hit(),
                        ArtifactStatus::Written { .. } => self.audit.record_artifact_written(),
                    }
                }
            }
            ExperimentStatus::Unpublished => {}
            ExperimentStatus::NotFound => self.audit.record_not_found(),
            ExperimentStatus::Failed(_) => self.audit.record_failure(),
            ExperimentStatus::TimedOut => self.audit.record_timeout(),
        }
    }
}

/// Drain the batch, turning aborted tasks into `Failed` outcomes.
async fn collect_outcomes(
    mut tasks: JoinSet<ExperimentOutcome>,
    mut codes_by_task: HashMap<task::Id, String>,
) -> Vec<ExperimentOutcome> {
    let mut outcomes = Vec::with_capacity(codes_by_task.len());

    while let Some(joined) = tasks.join_next_with_id().await {
        match joined {
            Ok((id, outcome)) => {
                codes_by_task.remove(&id);
                outcomes.push(outcome);
            }
            Err(e) => {
                let code = codes_by_task.remove(&e.id()).unwrap_or_default();
                tracing::error!(experiment = code, "Batch task aborted: {e}");
                outcomes.push(ExperimentOutcome {
                    code,
                    status: ExperimentStatus::Failed(format!("task aborted: {e}")),
                });
            }
        }
    }

    outcomes
}

/// Run one experiment with a per-attempt time budget.
///
/// The worker permit travels with the blocking job, so a timed-out job keeps
/// counting against `max_workers` until it actually returns. A retry only
/// starts once the previous attempt has exited.
async fn run_with_budget(
    code: &str,
    source: Arc<dyn DatasetSource>,
    store: Arc<dyn ArtifactStore>,
    options: Arc<BatchOptions>,
    semaphore: Arc<Semaphore>,
    run_id: Uuid,
) -> ExperimentStatus {
    let attempts = options.attempts.max(1);

    for attempt in 1..=attempts {
        let permit = match Arc::clone(&semaphore).acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => return ExperimentStatus::Failed(format!("worker pool closed: {e}")),
        };

        let mut work = {
            let code = code.to_string();
            let source = Arc::clone(&source);
            let store = Arc::clone(&store);
            let options = Arc::clone(&options);
            task::spawn_blocking(move || {
                let _permit = permit;
                process_experiment(
                    &code,
                    source.as_ref(),
                    store.as_ref(),
                    &options.kinds,
                    &options.export,
                    run_id,
                )
            })
        };

        match tokio::time::timeout(options.timeout, &mut work).await {
            Ok(Ok(Ok(status))) => return status,
            Ok(Ok(Err(e))) => {
                tracing::error!(experiment = code, "Export failed: {e}");
                return ExperimentStatus::Failed(e.to_string());
            }
            Ok(Err(e)) => {
                tracing::error!(experiment = code, "Export worker panicked: {e}");
                return ExperimentStatus::Failed(format!("worker panicked: {e}"));
            }
            Err(_) => {
                tracing::warn!(
                    experiment = code,
                    attempt,
                    "Experiment exceeded its time budget of {:?}",
                    options.timeout
                );
                if attempt < attempts {
                    // Late result is dropped; the retry sees its writes as cache hits.
                    let _ = work.await;
                }
            }
        }
    }

    ExperimentStatus::TimedOut
}
