//! Preprocess-only command

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use tracing::info;

use crate::config::Settings;
use crate::preprocess::{discover_price_files, preprocess_all, WorkerPool};

/// Arguments for the preprocess command
#[derive(Args)]
pub struct PreprocessArgs {
    /// Directory holding the `<SYMBOL>.csv` price files
    #[arg(long)]
    pub dir: Option<PathBuf>,

    /// Worker count
    #[arg(long, short)]
    pub workers: Option<usize>,
}

/// Execute the preprocess command
pub async fn execute(args: PreprocessArgs) -> Result<()> {
    let settings = Settings::load().context("Failed to load settings")?;
    let dir = args.dir.unwrap_or_else(|| settings.loader.prices_dir.clone());
    let workers = args.workers.unwrap_or_else(|| settings.loader.worker_count());

    let report = tokio::task::spawn_blocking(move || -> Result<_> {
        let files = discover_price_files(&dir)
            .with_context(|| format!("Cannot list price files in {:?}", dir))?;
        Ok(preprocess_all(&WorkerPool::new(workers), files))
    })
    .await??;

    for file in &report.cleaned {
        info!(
            "  {} -> {:?} ({} rows, {} dropped)",
            file.symbol, file.path, file.rows_written, file.rows_dropped
        );
    }

    Ok(())
}
