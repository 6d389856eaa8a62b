//! Open-price audit for raw price files
//!
//! Reports rows that have the right shape but no usable "open" value, which
//! are the rows the cleaner silently discards.

use csv::ReaderBuilder;
use std::path::Path;

use super::cleaner::{PreprocessError, PreprocessResult, RAW_COLUMNS};

/// A row with an empty or `null` open price
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenFieldFinding {
    /// 1-based line number (the header is line 1)
    pub line: u64,
    /// Raw fields of the offending row
    pub fields: Vec<String>,
}

/// Scan `path` for 7-column rows whose open field is blank or `null`
pub fn audit_open_field(path: &Path) -> PreprocessResult<Vec<OpenFieldFinding>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|e| PreprocessError::Csv {
            path: path.to_path_buf(),
            source: e,
        })?;

    let mut findings = Vec::new();

    for (index, record) in reader.records().enumerate() {
        let record = record.map_err(|e| PreprocessError::Csv {
            path: path.to_path_buf(),
            source: e,
        })?;
        let line = record
            .position()
            .map(|p| p.line())
            .unwrap_or(index as u64 + 1);
        if index == 0 || record.len() != RAW_COLUMNS {
            continue;
        }

        let open = record.get(1).unwrap_or_default().trim();
        if open.is_empty() || open.eq_ignore_ascii_case("null") {
            findings.push(OpenFieldFinding {
                line,
                fields: record.iter().map(str::to_string).collect(),
            });
        }
    }

    Ok(findings)
}
