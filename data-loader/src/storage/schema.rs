//! Fixed price and symbol-info schema
//!
//! The pipeline owns these tables for the duration of a run: both are dropped
//! and recreated at the start, and the composite index is only built once
//! every price file has been loaded.

use sqlx::PgPool;
use tracing::info;

use super::StorageResult;

/// Time-series price table
pub const PRICE_TABLE: &str = "stocks";

/// Symbol reference table
pub const SYMBOL_INFO_TABLE: &str = "stocks_info";

/// Composite lookup index on the price table
pub const PRICE_INDEX: &str = "idx_stocks_symbol_date";

/// Column order of a cleaned file, as mapped by COPY
pub const PRICE_COPY_COLUMNS: &str = "date, open, high, low, close, adj_close, volume, symbol";

pub const CREATE_PRICE_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS stocks (
    id SERIAL PRIMARY KEY,
    symbol VARCHAR NULL,
    date DATE NOT NULL,
    open FLOAT NOT NULL,
    high FLOAT NOT NULL,
    low FLOAT NOT NULL,
    "close" FLOAT NOT NULL,
    adj_close FLOAT NOT NULL,
    volume BIGINT NOT NULL
)
"#;

pub const CREATE_SYMBOL_INFO_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS stocks_info (
    id SERIAL PRIMARY KEY,
    symbol VARCHAR NOT NULL,
    name VARCHAR NOT NULL,
    symbol_uuid VARCHAR NOT NULL
)
"#;

pub const CREATE_PRICE_INDEX_SQL: &str =
    "CREATE INDEX IF NOT EXISTS idx_stocks_symbol_date ON stocks (symbol, date DESC)";

pub const TRUNCATE_SYMBOL_INFO_SQL: &str = "TRUNCATE TABLE stocks_info";

pub const INSERT_SYMBOL_INFO_SQL: &str =
    "INSERT INTO stocks_info (symbol, name, symbol_uuid) VALUES ($1, $2, $3)";

/// Table maintenance on the shared pool
pub struct SchemaOperations<'a> {
    pool: &'a PgPool,
}

impl<'a> SchemaOperations<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Drop both tables (if present) and create them empty
    pub async fn recreate_tables(&self) -> StorageResult<()> {
        info!("Dropping and recreating {} and {}", PRICE_TABLE, SYMBOL_INFO_TABLE);

        sqlx::query(&format!("DROP TABLE IF EXISTS {}", PRICE_TABLE))
            .execute(self.pool)
            .await?;
        sqlx::query(&format!("DROP TABLE IF EXISTS {}", SYMBOL_INFO_TABLE))
            .execute(self.pool)
            .await?;

        sqlx::query(CREATE_PRICE_TABLE_SQL).execute(self.pool).await?;
        sqlx::query(CREATE_SYMBOL_INFO_TABLE_SQL)
            .execute(self.pool)
            .await?;

        Ok(())
    }

    /// Build the (symbol, date DESC) index on the price table
    pub async fn create_price_index(&self) -> StorageResult<()> {
        info!("Creating index {}", PRICE_INDEX);
        sqlx::query(CREATE_PRICE_INDEX_SQL).execute(self.pool).await?;
        Ok(())
    }

    /// Number of rows currently in the price table
    pub async fn count_price_rows(&self) -> StorageResult<i64> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", PRICE_TABLE))
            .fetch_one(self.pool)
            .await?;
        Ok(count)
    }
}
