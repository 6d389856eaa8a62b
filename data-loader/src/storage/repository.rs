//! PostgreSQL price store
//!
//! Owns the shared connection pool and implements the pipeline traits on top
//! of the schema, COPY and session helpers.

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Connection, PgConnection, PgPool};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::copy::{BulkLoader, CopySource};
use super::schema::SchemaOperations;
use super::session::SessionToggle;
use super::traits::{PipelineStore, PoolStats, PriceLoader};
use crate::config::DatabaseSettings;
use crate::preprocess::CleanedFile;
use crate::reference::{self, ReferenceError, SymbolInfo};

/// Storage errors (structural failures: DDL, session settings, connection)
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Failure loading a single cleaned file
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Bulk copy failed: {0}")]
    Copy(#[source] sqlx::Error),

    #[error("Transaction failed: {0}")]
    Transaction(#[source] sqlx::Error),

    #[error("Cannot read cleaned file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Load rejected: {0}")]
    Rejected(String),

    #[error("Load task ended without reporting a result")]
    TaskLost,
}

/// Share of the server's `max_connections` the pool may use
const POOL_SHARE_OF_SERVER: f64 = 0.75;

/// Pool size derived from the server's `max_connections`
pub fn pool_size_for(server_max_connections: u32) -> u32 {
    ((server_max_connections as f64 * POOL_SHARE_OF_SERVER) as u32).max(1)
}

/// Read `max_connections` from the server over a one-off connection
async fn server_max_connections(url: &str) -> StorageResult<u32> {
    let mut conn = PgConnection::connect(url).await?;
    let raw: String = sqlx::query_scalar("SHOW max_connections")
        .fetch_one(&mut conn)
        .await?;
    conn.close().await?;

    raw.trim().parse::<u32>().map_err(|e| {
        StorageError::Configuration(format!("Unexpected max_connections value '{}': {}", raw, e))
    })
}

/// PostgreSQL-backed store for the ingestion pipeline
pub struct PgStore {
    pool: PgPool,
    loader: BulkLoader,
    session: SessionToggle,
}

impl PgStore {
    /// Wrap an already-open pool
    pub fn new(pool: PgPool, copy_source: CopySource) -> Self {
        Self {
            pool,
            loader: BulkLoader::new(copy_source),
            session: SessionToggle::new(),
        }
    }

    /// Open a pool from settings.
    ///
    /// Without an explicit `max_connections` the pool is sized to 75% of the
    /// server limit.
    pub async fn connect(settings: &DatabaseSettings, copy_source: CopySource) -> StorageResult<Self> {
        let max_connections = match settings.max_connections {
            Some(n) if n > 0 => n,
            _ => {
                let server_max = server_max_connections(&settings.url).await?;
                let size = pool_size_for(server_max);
                debug!("Server allows {} connections, using {}", server_max, size);
                size
            }
        };

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(settings.min_connections.min(max_connections))
            .acquire_timeout(Duration::from_secs(settings.acquire_timeout_secs))
            .max_lifetime(Duration::from_secs(180))
            .idle_timeout(Duration::from_secs(60))
            .connect(&settings.url)
            .await?;

        info!(
            "Connected to the database with a pool of {} connections",
            max_connections
        );

        Ok(Self::new(pool, copy_source))
    }

    /// Get the database pool reference
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Number of rows in the price table
    pub async fn count_price_rows(&self) -> StorageResult<i64> {
        SchemaOperations::new(&self.pool).count_price_rows().await
    }

    /// Close the pool
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn copy_in_transaction(&self, tx: &mut PgConnection, file: &CleanedFile) -> Result<u64, LoadError> {
        self.session.apply_to(tx).await.map_err(LoadError::Copy)?;
        self.loader.copy_into(tx, &file.path).await
    }
}

#[async_trait]
impl PriceLoader for PgStore {
    async fn load_cleaned_file(&self, file: &CleanedFile) -> Result<u64, LoadError> {
        let mut tx = self.pool.begin().await.map_err(LoadError::Transaction)?;

        match self.copy_in_transaction(&mut tx, file).await {
            Ok(rows) => {
                tx.commit().await.map_err(LoadError::Transaction)?;
                Ok(rows)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!("Rollback for {:?} failed: {}", file.path, rollback);
                }
                Err(e)
            }
        }
    }
}

#[async_trait]
impl PipelineStore for PgStore {
    async fn recreate_tables(&self) -> StorageResult<()> {
        SchemaOperations::new(&self.pool).recreate_tables().await
    }

    async fn enable_bulk_mode(&self) -> StorageResult<()> {
        self.session.enable(&self.pool).await
    }

    async fn restore_session_settings(&self) -> StorageResult<()> {
        self.session.restore(&self.pool).await
    }

    async fn replace_symbol_info(&self, rows: &[SymbolInfo]) -> Result<u64, ReferenceError> {
        reference::write_symbol_info(&self.pool, rows).await
    }

    async fn create_price_index(&self) -> StorageResult<()> {
        SchemaOperations::new(&self.pool).create_price_index().await
    }

    fn pool_stats(&self) -> Option<PoolStats> {
        Some(PoolStats {
            size: self.pool.size(),
            idle: self.pool.num_idle(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_size_for() {
        assert_eq!(pool_size_for(100), 75);
        assert_eq!(pool_size_for(10), 7);
        assert_eq!(pool_size_for(1), 1);
        assert_eq!(pool_size_for(0), 1);
    }

    #[test]
    fn test_load_error_messages() {
        let err = LoadError::Rejected("constraint violation".into());
        assert_eq!(err.to_string(), "Load rejected: constraint violation");
        assert!(LoadError::TaskLost.to_string().contains("without reporting"));
    }
}
