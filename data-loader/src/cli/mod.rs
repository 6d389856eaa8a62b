//! Command-line interface
//!
//! Provides CLI commands for the data loader.

pub mod audit;
pub mod preprocess;
pub mod run;

use clap::{Parser, Subcommand};

/// Data Loader CLI
#[derive(Parser)]
#[command(name = "data-loader")]
#[command(about = "Bulk loader for daily stock price CSV files")]
#[command(version)]
pub struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Recreate the tables and load every price file and the symbol info
    Run(run::RunArgs),
    /// Clean price files without touching the database
    Preprocess(preprocess::PreprocessArgs),
    /// Report rows whose open field is empty or null
    Audit(audit::AuditArgs),
}
