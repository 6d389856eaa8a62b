//! Open-field audit command

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use tracing::info;

use crate::preprocess::audit_open_field;

/// Arguments for the audit command
#[derive(Args)]
pub struct AuditArgs {
    /// Raw price file to scan
    pub file: PathBuf,
}

/// Execute the audit command
pub async fn execute(args: AuditArgs) -> Result<()> {
    let path = args.file.clone();
    let findings = tokio::task::spawn_blocking(move || audit_open_field(&path))
        .await?
        .with_context(|| format!("Cannot audit {:?}", args.file))?;

    for finding in &findings {
        info!("Line {}: {}", finding.line, finding.fields.join(","));
    }
    info!(
        "{:?}: {} rows with an empty or null open field",
        args.file,
        findings.len()
    );

    Ok(())
}
