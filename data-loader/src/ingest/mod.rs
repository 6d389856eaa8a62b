//! Parallel price ingestion
//!
//! Bulk loads cleaned files under a concurrency cap while the bulk-load
//! session settings are held.

mod guard;
mod orchestrator;

pub use guard::*;
pub use orchestrator::*;
