//! Store abstractions used by the ingestion pipeline
//!
//! The orchestrator and driver only see these traits, so they can run
//! against PostgreSQL in production and against in-memory doubles in tests.

use async_trait::async_trait;

use super::{LoadError, StorageResult};
use crate::preprocess::CleanedFile;
use crate::reference::{ReferenceError, SymbolInfo};

/// Connection pool occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub size: u32,
    pub idle: usize,
}

/// Loads one cleaned file in its own transaction
#[async_trait]
pub trait PriceLoader: Send + Sync + 'static {
    /// Begin a transaction, bulk copy `file`, then commit on success or roll
    /// back on failure. Returns the number of rows copied.
    async fn load_cleaned_file(&self, file: &CleanedFile) -> Result<u64, LoadError>;
}

/// Everything the pipeline driver needs from the database
#[async_trait]
pub trait PipelineStore: PriceLoader {
    /// Drop and recreate the price and symbol-info tables
    async fn recreate_tables(&self) -> StorageResult<()>;

    /// Switch on the bulk-load session settings
    async fn enable_bulk_mode(&self) -> StorageResult<()>;

    /// Restore the settings changed by [`PipelineStore::enable_bulk_mode`]
    async fn restore_session_settings(&self) -> StorageResult<()>;

    /// Replace the symbol-info table with `rows` in a single transaction
    async fn replace_symbol_info(&self, rows: &[SymbolInfo]) -> Result<u64, ReferenceError>;

    /// Create the composite price index
    async fn create_price_index(&self) -> StorageResult<()>;

    /// Pool occupancy, when the store is backed by a pool
    fn pool_stats(&self) -> Option<PoolStats> {
        None
    }
}
