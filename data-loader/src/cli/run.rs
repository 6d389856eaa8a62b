//! Full load command

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::config::Settings;
use crate::pipeline::{Pipeline, PipelineOptions};
use crate::storage::{CopySource, PgStore};

/// Arguments for the run command
#[derive(Args)]
pub struct RunArgs {
    /// Directory holding the `<SYMBOL>.csv` price files
    #[arg(long)]
    pub prices_dir: Option<PathBuf>,

    /// Symbol metadata CSV
    #[arg(long)]
    pub metadata_file: Option<PathBuf>,

    /// Database URL (overrides configuration)
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Preprocessing worker count
    #[arg(long, short)]
    pub workers: Option<usize>,

    /// Maximum simultaneous bulk loads
    #[arg(long)]
    pub max_concurrent_loads: Option<usize>,

    /// Where COPY reads the cleaned files from (server, stdin)
    #[arg(long)]
    pub copy_source: Option<CopySource>,
}

impl RunArgs {
    /// Apply command-line overrides on top of loaded settings
    pub fn apply(self, settings: &mut Settings) {
        if let Some(dir) = self.prices_dir {
            settings.loader.prices_dir = dir;
        }
        if let Some(file) = self.metadata_file {
            settings.loader.metadata_file = file;
        }
        if let Some(url) = self.database_url {
            settings.database.url = url;
        }
        if let Some(workers) = self.workers {
            settings.loader.workers = Some(workers);
        }
        if let Some(cap) = self.max_concurrent_loads {
            settings.loader.max_concurrent_loads = cap;
        }
        if let Some(source) = self.copy_source {
            settings.loader.copy_source = source;
        }
    }
}

/// Execute the run command
pub async fn execute(args: RunArgs) -> Result<()> {
    let mut settings = Settings::load().context("Failed to load settings")?;
    args.apply(&mut settings);

    info!("Load request:");
    info!("  Prices: {:?}", settings.loader.prices_dir);
    info!("  Metadata: {:?}", settings.loader.metadata_file);
    info!("  Workers: {}", settings.loader.worker_count());
    info!("  COPY source: {}", settings.loader.copy_source.as_str());

    let store = PgStore::connect(&settings.database, settings.loader.copy_source)
        .await
        .context("Failed to connect to the database")?;
    let store = Arc::new(store);

    let pipeline = Pipeline::new(Arc::clone(&store), PipelineOptions::from_settings(&settings.loader));
    let outcome = pipeline.run().await;
    store.close().await;
    let report = outcome?;

    info!("Load summary:");
    info!("  Files discovered: {}", report.files_discovered);
    info!("  Files skipped: {}", report.files_skipped);
    info!("  Files loaded: {}", report.files_committed);
    info!("  Files empty: {}", report.files_empty);
    info!("  Price rows: {}", report.price_rows);
    info!("  Rows dropped: {}", report.rows_dropped);
    info!("  Symbol info rows: {}", report.symbol_info_rows);
    for stage in &report.stages {
        info!("  {}: {:.2?}", stage.stage, stage.elapsed);
    }
    info!("  Total: {:.2?}", report.total_elapsed());

    Ok(())
}
