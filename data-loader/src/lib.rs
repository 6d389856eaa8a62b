//! # Data Loader
//!
//! Bulk loader for daily stock price CSV files into PostgreSQL.
//!
//! ## Features
//!
//! - **Preprocessing**: Raw `<SYMBOL>.csv` files are cleaned in parallel on a fixed worker pool
//! - **Bulk loading**: Each cleaned file is loaded with `COPY` in its own transaction
//! - **Bounded concurrency**: Simultaneous loads are capped by a semaphore
//! - **Reference info**: Symbol metadata is loaded with a generated UUID per symbol
//!
//! ## Architecture
//!
//! The pipeline driver recreates the tables, preprocesses every price file, bulk loads the
//! cleaned files while autovacuum and triggers are switched off, loads the symbol metadata and
//! finally builds the `(symbol, date DESC)` index. The database is reached only through the
//! [`storage::PipelineStore`] trait, implemented for PostgreSQL by [`storage::PgStore`].

pub mod cli;
pub mod config;
pub mod ingest;
pub mod pipeline;
pub mod preprocess;
pub mod reference;
pub mod storage;

// Re-export commonly used types
pub use config::Settings;
pub use ingest::{BatchReport, FileOutcome, InsertionOrchestrator, LoadStatus};
pub use pipeline::{Pipeline, PipelineError, PipelineOptions, PipelineReport};
pub use preprocess::{CleanedFile, PreprocessError, WorkerPool};
pub use reference::{ReferenceError, SymbolInfo};
pub use storage::{LoadError, PgStore, PipelineStore, PriceLoader, StorageError};
