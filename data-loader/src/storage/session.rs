//! Bulk-load session settings
//!
//! While the insertion phase runs, autovacuum is switched off on the price
//! table and load transactions run with `session_replication_role = replica`
//! so triggers do not fire. Both are restored when the phase ends.
//!
//! Autovacuum is a table option and is changed once through the pool. The
//! replication role is per connection, and every load unit borrows its own
//! pooled connection, so it is applied with `SET LOCAL` at the start of each
//! load transaction while the toggle is active. A connection can therefore
//! never return to the pool still in replica mode.

use sqlx::{PgConnection, PgPool};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

use super::schema::PRICE_TABLE;
use super::StorageResult;

/// Tracks and applies the bulk-load session settings
#[derive(Debug, Default)]
pub struct SessionToggle {
    active: AtomicBool,
}

impl SessionToggle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the bulk-load settings are currently in force
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Disable autovacuum on the price table and start applying replica role
    pub async fn enable(&self, pool: &PgPool) -> StorageResult<()> {
        info!("Disabling autovacuum and triggers on {}", PRICE_TABLE);
        sqlx::query(&format!(
            "ALTER TABLE {} SET (autovacuum_enabled = false)",
            PRICE_TABLE
        ))
        .execute(pool)
        .await?;
        self.active.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Restore autovacuum and stop applying replica role
    pub async fn restore(&self, pool: &PgPool) -> StorageResult<()> {
        self.active.store(false, Ordering::SeqCst);
        info!("Restoring autovacuum and triggers on {}", PRICE_TABLE);
        sqlx::query(&format!(
            "ALTER TABLE {} SET (autovacuum_enabled = true)",
            PRICE_TABLE
        ))
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Apply the replication role to an open transaction, if active
    pub async fn apply_to(&self, tx: &mut PgConnection) -> sqlx::Result<()> {
        if self.is_active() {
            sqlx::query("SET LOCAL session_replication_role = replica")
                .execute(&mut *tx)
                .await?;
        }
        Ok(())
    }
}
