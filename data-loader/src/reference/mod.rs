//! Symbol reference info loading
//!
//! Reads the symbol metadata CSV, gives every row a fresh UUID and replaces
//! the `stocks_info` table in one transaction. Runs on a single task: the
//! metadata file is small next to the price files.

use csv::{ReaderBuilder, StringRecord};
use sqlx::PgPool;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::storage::{PipelineStore, INSERT_SYMBOL_INFO_SQL, TRUNCATE_SYMBOL_INFO_SQL};

/// Number of columns in a metadata row
pub const METADATA_COLUMNS: usize = 12;

const SYMBOL_COLUMN: usize = 1;
const NAME_COLUMN: usize = 2;

/// Reference loading errors. All of them abort the run.
#[derive(Error, Debug)]
pub enum ReferenceError {
    #[error("Cannot read metadata file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error in metadata file: {0}")]
    Csv(#[from] csv::Error),

    #[error("Metadata line {line}: expected {expected} fields, got {found}")]
    FieldCount {
        line: u64,
        expected: usize,
        found: usize,
    },

    #[error("Metadata file has no header row")]
    MissingHeader,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Insert of row {row} ({symbol}) failed: {source}")]
    Insert {
        row: usize,
        symbol: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Metadata reader task failed: {0}")]
    Task(String),
}

/// One symbol-info row with its generated identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolInfo {
    pub symbol: String,
    pub name: String,
    pub symbol_uuid: Uuid,
}

impl SymbolInfo {
    /// Build a row from a 12-column metadata record
    fn from_record(record: &StringRecord, line: u64) -> Result<Self, ReferenceError> {
        if record.len() != METADATA_COLUMNS {
            return Err(ReferenceError::FieldCount {
                line,
                expected: METADATA_COLUMNS,
                found: record.len(),
            });
        }

        Ok(Self {
            symbol: record[SYMBOL_COLUMN].to_string(),
            name: record[NAME_COLUMN].to_string(),
            symbol_uuid: Uuid::new_v4(),
        })
    }
}

/// Parse every data row of the metadata CSV, stopping at the first bad row
pub fn read_symbol_info(path: &Path) -> Result<Vec<SymbolInfo>, ReferenceError> {
    let file = std::fs::File::open(path).map_err(|e| ReferenceError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(file);

    let mut record = StringRecord::new();
    if !reader.read_record(&mut record)? {
        return Err(ReferenceError::MissingHeader);
    }
    if record.len() != METADATA_COLUMNS {
        return Err(ReferenceError::FieldCount {
            line: 1,
            expected: METADATA_COLUMNS,
            found: record.len(),
        });
    }

    let mut rows = Vec::new();
    while reader.read_record(&mut record)? {
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        rows.push(SymbolInfo::from_record(&record, line)?);
    }

    Ok(rows)
}

/// Truncate `stocks_info` and insert `rows` in one transaction.
///
/// Uses a single parameterized insert (prepared once per connection). Any
/// failing row rolls back the whole transaction.
pub async fn write_symbol_info(pool: &PgPool, rows: &[SymbolInfo]) -> Result<u64, ReferenceError> {
    sqlx::query(TRUNCATE_SYMBOL_INFO_SQL).execute(pool).await?;
    info!("Deleted existing symbol info records");

    let mut tx = pool.begin().await?;

    for (row, info) in rows.iter().enumerate() {
        let result = sqlx::query(INSERT_SYMBOL_INFO_SQL)
            .bind(&info.symbol)
            .bind(&info.name)
            .bind(info.symbol_uuid.to_string())
            .execute(&mut *tx)
            .await;

        if let Err(source) = result {
            if let Err(rollback) = tx.rollback().await {
                warn!("Rollback of symbol info failed: {}", rollback);
            }
            return Err(ReferenceError::Insert {
                row: row + 1,
                symbol: info.symbol.clone(),
                source,
            });
        }
    }

    tx.commit().await?;
    Ok(rows.len() as u64)
}

/// Read the metadata file off the async runtime and replace the table
pub async fn load_symbol_info<S: PipelineStore + ?Sized>(
    store: &S,
    path: &Path,
) -> Result<u64, ReferenceError> {
    let owned = path.to_path_buf();
    let rows = tokio::task::spawn_blocking(move || read_symbol_info(&owned))
        .await
        .map_err(|e| ReferenceError::Task(e.to_string()))??;

    info!("Read {} symbol info rows from {:?}", rows.len(), path);
    store.replace_symbol_info(&rows).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::fs;
    use tempfile::TempDir;

    const HEADER: &str = "Nasdaq Traded,Symbol,Security Name,Listing Exchange,Market Category,ETF,Round Lot Size,Test Issue,Financial Status,CQS Symbol,NASDAQ Symbol,NextShares";

    fn write_metadata(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("symbols_valid_meta.csv");
        fs::write(&path, format!("{}\n{}", HEADER, body)).unwrap();
        path
    }

    #[test]
    fn test_read_symbol_info_generates_unique_ids() {
        let dir = TempDir::new().unwrap();
        let body = [
            "Y,A,Agilent Technologies Inc. Common Stock,N, ,N,100.0,N,,A,A,N",
            "Y,AA,Alcoa Corporation Common Stock ,N, ,N,100.0,N,,AA,AA,N",
            "Y,AAAU,Perth Mint Physical Gold Shares,P, ,Y,100.0,N,,AAAU,AAAU,N",
            "Y,AACG,ATA Creativity Global - American Depositary Shares,Q,G,N,100.0,N,N,,AACG,N",
            "Y,AADR,\"AdvisorShares Dorsey Wright ADR ETF\",P, ,Y,100.0,N,,AADR,AADR,N",
        ]
        .join("\n");
        let path = write_metadata(&dir, &body);

        let rows = read_symbol_info(&path).unwrap();

        assert_eq!(rows.len(), 5);
        assert_eq!(rows[0].symbol, "A");
        assert_eq!(rows[0].name, "Agilent Technologies Inc. Common Stock");
        assert_eq!(rows[4].name, "AdvisorShares Dorsey Wright ADR ETF");

        let ids: HashSet<_> = rows.iter().map(|r| r.symbol_uuid).collect();
        assert_eq!(ids.len(), 5);
        assert!(rows.iter().all(|r| !r.symbol_uuid.is_nil()));
    }

    #[test]
    fn test_read_symbol_info_tolerates_stray_quotes() {
        let dir = TempDir::new().unwrap();
        let path = write_metadata(&dir, "Y,BRK,Berkshire 6\" Class,N, ,N,100.0,N,,BRK,BRK,N\n");

        let rows = read_symbol_info(&path).unwrap();
        assert_eq!(rows[0].name, "Berkshire 6\" Class");
    }

    #[test]
    fn test_read_symbol_info_rejects_short_row() {
        let dir = TempDir::new().unwrap();
        let path = write_metadata(&dir, "Y,A,Agilent,N\n");

        let err = read_symbol_info(&path).unwrap_err();
        assert!(matches!(
            err,
            ReferenceError::FieldCount {
                line: 2,
                expected: 12,
                found: 4
            }
        ));
    }

    #[test]
    fn test_read_symbol_info_rejects_short_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("symbols_valid_meta.csv");
        fs::write(
            &path,
            "Nasdaq Traded,Symbol,Security Name\nY,A,Agilent,N, ,N,100.0,N,,A,A,N\n",
        )
        .unwrap();

        let err = read_symbol_info(&path).unwrap_err();
        assert!(matches!(
            err,
            ReferenceError::FieldCount {
                line: 1,
                found: 3,
                ..
            }
        ));
    }

    #[test]
    fn test_read_symbol_info_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = read_symbol_info(&dir.path().join("missing.csv")).unwrap_err();
        assert!(matches!(err, ReferenceError::Io { .. }));
    }
}
