//! Concurrency-bounded insertion of cleaned files
//!
//! One tokio task per cleaned file, gated by a semaphore. Every task reports
//! exactly once into a channel sized to the file count, and the orchestrator
//! drains exactly that many results before returning.

use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, info, warn};

use crate::preprocess::CleanedFile;
use crate::storage::{LoadError, PriceLoader};

/// Default cap on simultaneous bulk loads
pub const DEFAULT_MAX_CONCURRENT_LOADS: usize = 4;

/// Terminal state of one load unit
#[derive(Debug)]
pub enum LoadStatus {
    /// Committed; the cleaned file has been removed
    Committed { rows: u64 },
    /// Header-only cleaned file, nothing to load
    Empty,
    /// Rolled back; the cleaned file is kept on disk
    Failed(LoadError),
}

/// Result for one cleaned file
#[derive(Debug)]
pub struct FileOutcome {
    pub file: CleanedFile,
    pub status: LoadStatus,
}

impl FileOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self.status, LoadStatus::Failed(_))
    }
}

/// Outcomes of one batch, in the order the files were submitted
#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<FileOutcome>,
}

impl BatchReport {
    /// Number of committed loads
    pub fn committed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, LoadStatus::Committed { .. }))
            .count()
    }

    /// Number of header-only files
    pub fn empty(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, LoadStatus::Empty))
            .count()
    }

    /// Failed loads
    pub fn failures(&self) -> impl Iterator<Item = &FileOutcome> {
        self.outcomes.iter().filter(|o| o.is_failure())
    }

    pub fn has_failures(&self) -> bool {
        self.outcomes.iter().any(FileOutcome::is_failure)
    }

    /// Rows committed across the batch
    pub fn rows_committed(&self) -> u64 {
        self.outcomes
            .iter()
            .map(|o| match o.status {
                LoadStatus::Committed { rows } => rows,
                _ => 0,
            })
            .sum()
    }
}

/// Schedules bulk loads under a concurrency cap
pub struct InsertionOrchestrator<L: PriceLoader> {
    loader: Arc<L>,
    max_concurrent: usize,
}

impl<L: PriceLoader> InsertionOrchestrator<L> {
    /// Create an orchestrator whose cap is `max_concurrent_loads` clamped to
    /// `pool_size` (and never below 1).
    pub fn new(loader: Arc<L>, max_concurrent_loads: usize, pool_size: usize) -> Self {
        let max_concurrent = max_concurrent_loads.min(pool_size).max(1);
        Self {
            loader,
            max_concurrent,
        }
    }

    /// Effective concurrency cap
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Load every file and wait for all of them to finish
    pub async fn load_all(&self, files: Vec<CleanedFile>) -> BatchReport {
        let total = files.len();
        if total == 0 {
            return BatchReport::default();
        }

        info!(
            "Loading {} cleaned files with at most {} concurrent loads",
            total, self.max_concurrent
        );

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let (tx, mut rx) = mpsc::channel::<(usize, LoadStatus)>(total);

        // Kept for units that never report
        let submitted = files.clone();

        for (index, file) in files.into_iter().enumerate() {
            let loader = Arc::clone(&self.loader);
            let semaphore = Arc::clone(&semaphore);
            let tx = tx.clone();

            tokio::spawn(async move {
                // The semaphore is never closed, so acquire cannot fail. Should it,
                // the unit goes unreported and is recorded as lost.
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                let status = run_unit(loader.as_ref(), &file).await;
                // Capacity equals the unit count, so this never waits
                let _ = tx.send((index, status)).await;
            });
        }
        drop(tx);

        let mut slots: Vec<Option<LoadStatus>> = (0..total).map(|_| None).collect();
        let mut received = 0;
        while received < total {
            match rx.recv().await {
                Some((index, status)) => {
                    slots[index] = Some(status);
                    received += 1;
                }
                None => break,
            }
        }

        if received < total {
            error!(
                "{} of {} load units ended without reporting",
                total - received,
                total
            );
        }

        let outcomes = submitted
            .into_iter()
            .zip(slots)
            .map(|(file, status)| FileOutcome {
                file,
                status: status.unwrap_or(LoadStatus::Failed(LoadError::TaskLost)),
            })
            .collect();

        BatchReport { outcomes }
    }
}

/// Load one file, then remove its cleaned file after a commit
async fn run_unit<L: PriceLoader + ?Sized>(loader: &L, file: &CleanedFile) -> LoadStatus {
    if file.is_empty() {
        warn!("{}: cleaned file has no data rows, nothing to load", file.symbol);
        return LoadStatus::Empty;
    }

    match loader.load_cleaned_file(file).await {
        Ok(rows) => {
            debug!("{}: committed {} rows", file.symbol, rows);
            if let Err(e) = tokio::fs::remove_file(&file.path).await {
                warn!("Could not remove cleaned file {:?}: {}", file.path, e);
            }
            LoadStatus::Committed { rows }
        }
        Err(e) => {
            error!("{}: load of {:?} failed: {}", file.symbol, file.path, e);
            LoadStatus::Failed(e)
        }
    }
}
