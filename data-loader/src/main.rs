//! Data Loader CLI
//!
//! Provides commands for:
//! - `run`: Recreate the tables and load all price files and symbol info
//! - `preprocess`: Clean price files without loading them
//! - `audit`: Report rows with an empty or null open value

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use data_loader::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("data_loader=info".parse()?))
        .init();

    // Load environment variables from .env file
    if std::env::var("RUN_MODE").as_deref() != Ok("production") {
        dotenv::dotenv().ok();
    }

    // Parse CLI arguments
    let cli = Cli::parse();

    // Execute command
    match cli.command {
        Commands::Run(args) => {
            data_loader::cli::run::execute(args).await?;
        }
        Commands::Preprocess(args) => {
            data_loader::cli::preprocess::execute(args).await?;
        }
        Commands::Audit(args) => {
            data_loader::cli::audit::execute(args).await?;
        }
    }

    Ok(())
}
