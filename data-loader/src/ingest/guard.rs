//! Scoped bulk-load settings

use tracing::warn;

use crate::storage::{PipelineStore, StorageResult};

/// Holds the bulk-load session settings for the duration of the insertion
/// phase. Call [`BulkModeGuard::release`] on every exit path; `Drop` cannot
/// run async code, so an unreleased guard only logs.
#[must_use = "the bulk-load settings stay in force until `release` is awaited"]
pub struct BulkModeGuard<'a, S: PipelineStore + ?Sized> {
    store: &'a S,
    released: bool,
}

impl<'a, S: PipelineStore + ?Sized> BulkModeGuard<'a, S> {
    /// Switch the bulk-load settings on
    pub async fn enter(store: &'a S) -> StorageResult<Self> {
        store.enable_bulk_mode().await?;
        Ok(Self {
            store,
            released: false,
        })
    }

    /// Restore the normal settings
    pub async fn release(mut self) -> StorageResult<()> {
        self.released = true;
        self.store.restore_session_settings().await
    }
}

impl<S: PipelineStore + ?Sized> Drop for BulkModeGuard<'_, S> {
    fn drop(&mut self) {
        if !self.released {
            warn!("Bulk-load settings were not restored; autovacuum may still be disabled");
        }
    }
}
