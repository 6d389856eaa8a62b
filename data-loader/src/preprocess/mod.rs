//! Price file preprocessing
//!
//! This module discovers raw `<SYMBOL>.csv` files, cleans each one on a
//! fixed-size worker pool and hands back the cleaned files for bulk loading.

mod audit;
mod cleaner;
mod pool;

pub use audit::*;
pub use cleaner::*;
pub use pool::*;

use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Outcome of cleaning a whole directory of price files
#[derive(Debug, Default)]
pub struct PreprocessReport {
    /// Files ready for loading, in discovery order
    pub cleaned: Vec<CleanedFile>,
    /// Files that could not be cleaned and are excluded from loading
    pub skipped: Vec<(PathBuf, PreprocessError)>,
}

impl PreprocessReport {
    /// Total rows kept across all cleaned files
    pub fn rows_written(&self) -> u64 {
        self.cleaned.iter().map(|f| f.rows_written).sum()
    }

    /// Total rows dropped across all cleaned files
    pub fn rows_dropped(&self) -> u64 {
        self.cleaned.iter().map(|f| f.rows_dropped).sum()
    }
}

/// List the raw price files in `dir`, sorted by name.
///
/// Only regular files ending in `.csv` are returned; cleaned leftovers from a
/// previous run (`*_cleaned.csv`) are ignored.
pub fn discover_price_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.ends_with(".csv") && !name.ends_with(CLEANED_SUFFIX) {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}

/// Clean every file on `pool`, skipping (and logging) files that fail.
///
/// Blocks until the whole queue has drained.
pub fn preprocess_all(pool: &WorkerPool, files: Vec<PathBuf>) -> PreprocessReport {
    info!(
        "Preprocessing {} files with {} workers",
        files.len(),
        pool.size()
    );

    let results = pool.run(files, |path| {
        let outcome = match symbol_from_path(&path) {
            Some(symbol) => preprocess_file(&path, &symbol),
            None => Err(PreprocessError::InvalidFileName(path.clone())),
        };
        (path, outcome)
    });

    let mut report = PreprocessReport::default();
    for (path, outcome) in results {
        match outcome {
            Ok(cleaned) => {
                if cleaned.is_empty() {
                    warn!("{:?}: every row was rejected, cleaned file is header-only", path);
                }
                report.cleaned.push(cleaned);
            }
            Err(e) => {
                error!("Error preprocessing CSV file {:?}: {}", path, e);
                report.skipped.push((path, e));
            }
        }
    }

    info!(
        "Preprocessing completed: {} cleaned, {} skipped, {} rows kept, {} rows dropped",
        report.cleaned.len(),
        report.skipped.len(),
        report.rows_written(),
        report.rows_dropped()
    );

    report
}
