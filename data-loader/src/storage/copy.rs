//! Bulk COPY of cleaned price files
//!
//! Each cleaned file is loaded with a single `COPY` statement inside the
//! transaction supplied by the caller. Nothing here commits or retries.

use serde::{Deserialize, Serialize};
use sqlx::PgConnection;
use std::path::Path;
use tokio::io::AsyncReadExt;
use tracing::debug;

use super::schema::{PRICE_COPY_COLUMNS, PRICE_TABLE};
use super::LoadError;

/// Chunk size used when streaming a file over `COPY ... FROM STDIN`
const STDIN_CHUNK_BYTES: usize = 64 * 1024;

/// CSV options shared by both copy sources
const COPY_OPTIONS: &str =
    r#"WITH (FORMAT csv, HEADER TRUE, DELIMITER ',', QUOTE '"', ESCAPE '\', NULL '')"#;

/// Where the COPY statement reads the cleaned file from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CopySource {
    /// The database server opens the file itself (`COPY ... FROM '<path>'`)
    #[default]
    Server,
    /// The loader streams the file to the server (`COPY ... FROM STDIN`)
    Stdin,
}

impl CopySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CopySource::Server => "server",
            CopySource::Stdin => "stdin",
        }
    }
}

impl std::str::FromStr for CopySource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "server" => Ok(CopySource::Server),
            "stdin" => Ok(CopySource::Stdin),
            other => Err(format!("Unknown copy source: {}", other)),
        }
    }
}

/// Quote a filesystem path as a SQL string literal
fn quote_literal(path: &Path) -> String {
    format!("'{}'", path.to_string_lossy().replace('\'', "''"))
}

/// Issues the COPY statement for one cleaned file
#[derive(Debug, Clone, Copy)]
pub struct BulkLoader {
    source: CopySource,
}

impl BulkLoader {
    pub fn new(source: CopySource) -> Self {
        Self { source }
    }

    pub fn source(&self) -> CopySource {
        self.source
    }

    /// Build the COPY statement; `path` must already be absolute for server copies
    pub fn copy_statement(&self, path: &Path) -> String {
        let from = match self.source {
            CopySource::Server => quote_literal(path),
            CopySource::Stdin => "STDIN".to_string(),
        };
        format!(
            "COPY {} ({}) FROM {} {}",
            PRICE_TABLE, PRICE_COPY_COLUMNS, from, COPY_OPTIONS
        )
    }

    /// Copy `path` into the price table using `conn` (an open transaction).
    ///
    /// Returns the number of rows copied.
    pub async fn copy_into(&self, conn: &mut PgConnection, path: &Path) -> Result<u64, LoadError> {
        match self.source {
            CopySource::Server => self.copy_from_server(conn, path).await,
            CopySource::Stdin => self.copy_from_stdin(conn, path).await,
        }
    }

    async fn copy_from_server(&self, conn: &mut PgConnection, path: &Path) -> Result<u64, LoadError> {
        // The server resolves relative paths against its own data directory
        let absolute = tokio::fs::canonicalize(path).await?;
        let statement = self.copy_statement(&absolute);
        debug!("{}", statement);

        let result = sqlx::query(&statement)
            .execute(&mut *conn)
            .await
            .map_err(LoadError::Copy)?;
        Ok(result.rows_affected())
    }

    async fn copy_from_stdin(&self, conn: &mut PgConnection, path: &Path) -> Result<u64, LoadError> {
        let mut file = tokio::fs::File::open(path).await?;
        let statement = self.copy_statement(path);

        let mut copy = conn.copy_in_raw(&statement).await.map_err(LoadError::Copy)?;
        let mut buf = vec![0u8; STDIN_CHUNK_BYTES];

        loop {
            let n = match file.read(&mut buf).await {
                Ok(n) => n,
                Err(e) => {
                    let _ = copy.abort(format!("reading {:?} failed: {}", path, e)).await;
                    return Err(LoadError::Io(e));
                }
            };
            if n == 0 {
                break;
            }
            copy.send(&buf[..n]).await.map_err(LoadError::Copy)?;
        }

        copy.finish().await.map_err(LoadError::Copy)
    }
}
