//! Raw price CSV cleaning
//!
//! Turns one `<SYMBOL>.csv` file into a `<SYMBOL>.csv_cleaned.csv` file that
//! the bulk COPY can ingest without tripping over incomplete rows.

use csv::{ByteRecord, ReaderBuilder, StringRecord, WriterBuilder};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Number of columns in a raw price row
pub const RAW_COLUMNS: usize = 7;

/// Index of the "open" column
const OPEN_COLUMN: usize = 1;

/// Index of the "volume" column
const VOLUME_COLUMN: usize = 6;

/// Suffix appended to the source path to name the cleaned file
pub const CLEANED_SUFFIX: &str = "_cleaned.csv";

/// Errors that make a whole file unusable
#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("Cannot open source file {path:?}: {source}")]
    OpenSource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot create cleaned file {path:?}: {source}")]
    CreateDestination {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Source file {0:?} has no header row")]
    MissingHeader(PathBuf),

    #[error("Cannot derive a symbol from file name {0:?}")]
    InvalidFileName(PathBuf),

    #[error("CSV error in {path:?}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("IO error writing {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type PreprocessResult<T> = Result<T, PreprocessError>;

/// A cleaned intermediate file ready for bulk loading
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanedFile {
    /// Raw file the cleaned file was produced from
    pub source: PathBuf,
    /// Path of the cleaned file
    pub path: PathBuf,
    /// Symbol appended to every row
    pub symbol: String,
    /// Data rows written (header excluded)
    pub rows_written: u64,
    /// Rows rejected as incomplete or malformed
    pub rows_dropped: u64,
}

impl CleanedFile {
    /// Whether the file holds nothing but its header
    pub fn is_empty(&self) -> bool {
        self.rows_written == 0
    }
}

/// Derive the symbol from a price file name (`AAPL.csv` -> `AAPL`)
pub fn symbol_from_path(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let symbol = name.strip_suffix(".csv").unwrap_or(name);
    if symbol.is_empty() {
        None
    } else {
        Some(symbol.to_string())
    }
}

/// Path of the cleaned file produced for `source`
pub fn cleaned_path_for(source: &Path) -> PathBuf {
    let mut name = source.as_os_str().to_owned();
    name.push(CLEANED_SUFFIX);
    PathBuf::from(name)
}

/// Whether a row is kept: exactly 7 columns with non-empty open and volume
pub fn is_loadable(record: &StringRecord) -> bool {
    record.len() == RAW_COLUMNS
        && record.get(OPEN_COLUMN).is_some_and(|open| !open.is_empty())
        && record.get(VOLUME_COLUMN).is_some_and(|volume| !volume.is_empty())
}

/// Truncate a volume like `123.0` to `123`. String-level, never rounds.
pub fn truncate_volume(volume: &str) -> &str {
    match volume.split_once('.') {
        Some((integer, _)) => integer,
        None => volume,
    }
}

/// Clean a single raw record, returning `None` when the row must be dropped
pub fn clean_record(record: &StringRecord, symbol: &str) -> Option<StringRecord> {
    if !is_loadable(record) {
        return None;
    }

    let mut cleaned = StringRecord::with_capacity(record.as_slice().len() + symbol.len(), RAW_COLUMNS + 1);
    for (i, field) in record.iter().enumerate() {
        if i == VOLUME_COLUMN {
            cleaned.push_field(truncate_volume(field));
        } else {
            cleaned.push_field(field);
        }
    }
    cleaned.push_field(symbol);
    Some(cleaned)
}

/// Clean `source` into `<source>_cleaned.csv`, appending `symbol` to each row.
///
/// The header is copied verbatim. Rows failing [`is_loadable`] or holding
/// invalid UTF-8 are dropped and counted; they are not errors. On any error
/// the partial cleaned file is removed.
pub fn preprocess_file(source: &Path, symbol: &str) -> PreprocessResult<CleanedFile> {
    let destination = cleaned_path_for(source);

    let input = File::open(source).map_err(|e| PreprocessError::OpenSource {
        path: source.to_path_buf(),
        source: e,
    })?;
    let output = File::create(&destination).map_err(|e| PreprocessError::CreateDestination {
        path: destination.clone(),
        source: e,
    })?;

    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(input);
    let mut writer = WriterBuilder::new()
        .flexible(true)
        .from_writer(BufWriter::new(output));

    let copied = copy_rows(&mut reader, &mut writer, source, symbol);
    let flushed = writer.flush().map_err(|e| PreprocessError::Io {
        path: destination.clone(),
        source: e,
    });
    drop(writer);

    let (rows_written, rows_dropped) = match copied.and_then(|counts| flushed.map(|_| counts)) {
        Ok(counts) => counts,
        Err(e) => {
            if let Err(remove) = std::fs::remove_file(&destination) {
                warn!("Could not remove partial cleaned file {:?}: {}", destination, remove);
            }
            return Err(e);
        }
    };

    debug!(
        "Cleaned {:?}: {} rows kept, {} dropped",
        source, rows_written, rows_dropped
    );

    Ok(CleanedFile {
        source: source.to_path_buf(),
        path: destination,
        symbol: symbol.to_string(),
        rows_written,
        rows_dropped,
    })
}

fn copy_rows<R: std::io::Read, W: std::io::Write>(
    reader: &mut csv::Reader<R>,
    writer: &mut csv::Writer<W>,
    source: &Path,
    symbol: &str,
) -> PreprocessResult<(u64, u64)> {
    let csv_err = |e: csv::Error| PreprocessError::Csv {
        path: source.to_path_buf(),
        source: e,
    };

    // Byte records, so one badly encoded row cannot fail the whole file
    let mut raw = ByteRecord::new();
    if !reader.read_byte_record(&mut raw).map_err(csv_err)? {
        return Err(PreprocessError::MissingHeader(source.to_path_buf()));
    }
    writer.write_byte_record(&raw).map_err(csv_err)?;

    let mut written = 0u64;
    let mut dropped = 0u64;

    while reader.read_byte_record(&mut raw).map_err(csv_err)? {
        let line = raw.position().map(|p| p.line()).unwrap_or(0);
        let cleaned = match StringRecord::from_byte_record(raw.clone()) {
            Ok(record) => clean_record(&record, symbol),
            Err(e) => {
                debug!("{:?} line {}: dropping row with invalid UTF-8: {}", source, line, e);
                None
            }
        };
        match cleaned {
            Some(cleaned) => {
                writer.write_record(&cleaned).map_err(csv_err)?;
                written += 1;
            }
            None => dropped += 1,
        }
    }

    Ok((written, dropped))
}
