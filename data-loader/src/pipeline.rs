//! End-to-end load pipeline
//!
//! Recreates the tables, preprocesses and bulk loads every price file, loads
//! the symbol reference info and finally builds the price index. Every stage
//! is fatal on error and is timed.

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info};

use crate::config::LoaderSettings;
use crate::ingest::{BulkModeGuard, FileOutcome, InsertionOrchestrator, LoadStatus};
use crate::preprocess::{discover_price_files, preprocess_all, WorkerPool};
use crate::reference::{self, ReferenceError};
use crate::storage::{PipelineStore, StorageError};

/// Pipeline errors
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Cannot list price files in {dir:?}: {source}")]
    Discovery {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} of {total} price files failed to load", .failures.len())]
    BatchFailed {
        failures: Vec<FileOutcome>,
        total: usize,
    },

    #[error("Reference info load failed: {0}")]
    Reference(#[from] ReferenceError),

    #[error("Preprocessing task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Inputs and tuning for one pipeline run
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub prices_dir: PathBuf,
    pub metadata_file: PathBuf,
    pub workers: usize,
    pub max_concurrent_loads: usize,
}

impl PipelineOptions {
    pub fn from_settings(settings: &LoaderSettings) -> Self {
        Self {
            prices_dir: settings.prices_dir.clone(),
            metadata_file: settings.metadata_file.clone(),
            workers: settings.worker_count(),
            max_concurrent_loads: settings.max_concurrent_loads,
        }
    }
}

/// Duration of one pipeline stage
#[derive(Debug, Clone)]
pub struct StageTiming {
    pub stage: &'static str,
    pub elapsed: Duration,
}

/// Summary of a successful run
#[derive(Debug)]
pub struct PipelineReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub files_discovered: usize,
    pub files_skipped: usize,
    pub rows_dropped: u64,
    pub files_committed: usize,
    pub files_empty: usize,
    pub price_rows: u64,
    pub symbol_info_rows: u64,
    pub stages: Vec<StageTiming>,
}

impl PipelineReport {
    /// Wall-clock time of the whole run
    pub fn total_elapsed(&self) -> Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or_default()
    }
}

#[derive(Default)]
struct Stopwatch {
    stages: Vec<StageTiming>,
}

impl Stopwatch {
    fn record(&mut self, stage: &'static str, started: Instant) {
        let elapsed = started.elapsed();
        info!("Stage {} finished in {:.2?}", stage, elapsed);
        self.stages.push(StageTiming { stage, elapsed });
    }
}

/// Drives one full load against a store
pub struct Pipeline<S: PipelineStore> {
    store: Arc<S>,
    options: PipelineOptions,
}

impl<S: PipelineStore> Pipeline<S> {
    pub fn new(store: Arc<S>, options: PipelineOptions) -> Self {
        Self { store, options }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Run every stage in order, stopping at the first fatal error
    pub async fn run(&self) -> Result<PipelineReport, PipelineError> {
        let started_at = Utc::now();
        let mut watch = Stopwatch::default();

        info!("Starting load of {:?}", self.options.prices_dir);

        let stage = Instant::now();
        self.store.recreate_tables().await?;
        watch.record("recreate_tables", stage);

        let stage = Instant::now();
        let dir = self.options.prices_dir.clone();
        let workers = self.options.workers;
        let preprocess = tokio::task::spawn_blocking(move || {
            let files = discover_price_files(&dir).map_err(|source| PipelineError::Discovery {
                dir: dir.clone(),
                source,
            })?;
            Ok::<_, PipelineError>(preprocess_all(&WorkerPool::new(workers), files))
        })
        .await??;
        watch.record("preprocess", stage);

        let files_discovered = preprocess.cleaned.len() + preprocess.skipped.len();
        let files_skipped = preprocess.skipped.len();
        let rows_dropped = preprocess.rows_dropped();

        let stage = Instant::now();
        let guard = BulkModeGuard::enter(self.store.as_ref()).await?;
        let orchestrator = InsertionOrchestrator::new(
            Arc::clone(&self.store),
            self.options.max_concurrent_loads,
            workers,
        );
        let batch = orchestrator.load_all(preprocess.cleaned).await;
        let restored = guard.release().await;
        watch.record("insert_prices", stage);

        if let Some(stats) = self.store.pool_stats() {
            info!("Connection pool: {} open, {} idle", stats.size, stats.idle);
        }

        if batch.has_failures() {
            let total = batch.outcomes.len();
            let failures: Vec<FileOutcome> = batch
                .outcomes
                .into_iter()
                .filter(FileOutcome::is_failure)
                .collect();
            for outcome in &failures {
                if let LoadStatus::Failed(e) = &outcome.status {
                    error!("Error inserting file {:?}: {}", outcome.file.path, e);
                }
            }
            if let Err(e) = restored {
                error!("Restoring bulk-load settings failed: {}", e);
            }
            return Err(PipelineError::BatchFailed { failures, total });
        }
        restored?;

        info!(
            "Inserted {} rows from {} files ({} empty)",
            batch.rows_committed(),
            batch.committed(),
            batch.empty()
        );

        let stage = Instant::now();
        let symbol_info_rows =
            reference::load_symbol_info(self.store.as_ref(), &self.options.metadata_file).await?;
        watch.record("load_symbol_info", stage);
        info!("Inserted {} symbol info rows", symbol_info_rows);

        let stage = Instant::now();
        self.store.create_price_index().await?;
        watch.record("create_index", stage);

        let report = PipelineReport {
            started_at,
            finished_at: Utc::now(),
            files_discovered,
            files_skipped,
            rows_dropped,
            files_committed: batch.committed(),
            files_empty: batch.empty(),
            price_rows: batch.rows_committed(),
            symbol_info_rows,
            stages: watch.stages,
        };

        info!("Load completed in {:.2?}", report.total_elapsed());
        Ok(report)
    }
}
