//! Run mutual exclusion
//!
//! **[RI-BATCH-040]** The engine holds no long-lived store locks; safety
//! comes from idempotent mutations plus this lease, which keeps two
//! reconciliation runs from executing concurrently and double-counting
//! statistics or racing on canonical selection. Leases expire so a crashed
//! run cannot wedge the next one.

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::{ReconcileError, ReconcileResult};

#[derive(Debug)]
pub struct ReconcilerLease {
    pool: SqlitePool,
    name: String,
    holder: String,
}

impl ReconcilerLease {
    /// Try to acquire the named lease. Fails with [`ReconcileError::LeaseHeld`]
    /// when another live holder owns it; expired leases are reclaimed.
    pub async fn acquire(
        pool: SqlitePool,
        name: &str,
        ttl_ms: i64,
    ) -> ReconcileResult<Self> {
        let holder = Uuid::new_v4().to_string();
        let now = opine_common::time::now_millis();

        // Reclaim an expired lease before contending
        sqlx::query("DELETE FROM integrity_leases WHERE name = ? AND expires_at <= ?")
            .bind(name)
            .bind(now)
            .execute(&pool)
            .await
            .map_err(ReconcileError::from_store)?;

        sqlx::query(
            "INSERT OR IGNORE INTO integrity_leases (name, holder, expires_at) VALUES (?, ?, ?)",
        )
        .bind(name)
        .bind(&holder)
        .bind(now + ttl_ms)
        .execute(&pool)
        .await
        .map_err(ReconcileError::from_store)?;

        let (current_holder, expires_at): (String, i64) =
            sqlx::query_as("SELECT holder, expires_at FROM integrity_leases WHERE name = ?")
                .bind(name)
                .fetch_one(&pool)
                .await
                .map_err(ReconcileError::from_store)?;

        if current_holder != holder {
            return Err(ReconcileError::LeaseHeld {
                holder: current_holder,
                expires_at,
            });
        }

        tracing::debug!(lease = name, holder = %holder, "Acquired reconciliation lease");

        Ok(Self {
            pool,
            name: name.to_string(),
            holder,
        })
    }

    /// Push the expiry forward; called between batches so a long sweep
    /// outlives its initial TTL
    pub async fn renew(&self, ttl_ms: i64) -> ReconcileResult<()> {
        sqlx::query("UPDATE integrity_leases SET expires_at = ? WHERE name = ? AND holder = ?")
            .bind(opine_common::time::now_millis() + ttl_ms)
            .bind(&self.name)
            .bind(&self.holder)
            .execute(&self.pool)
            .await
            .map_err(ReconcileError::from_store)?;
        Ok(())
    }

    /// Release the lease. Best-effort on shutdown paths; an unreleased
    /// lease simply expires.
    pub async fn release(&self) -> ReconcileResult<()> {
        sqlx::query("DELETE FROM integrity_leases WHERE name = ? AND holder = ?")
            .bind(&self.name)
            .bind(&self.holder)
            .execute(&self.pool)
            .await
            .map_err(ReconcileError::from_store)?;

        tracing::debug!(lease = %self.name, "Released reconciliation lease");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::seed_pool;

    #[tokio::test]
    async fn test_acquire_and_release() {
        let pool = seed_pool().await;

        let lease = ReconcilerLease::acquire(pool.clone(), "reconcile:sv-001", 60_000)
            .await
            .unwrap();
        lease.release().await.unwrap();

        // Releasable means re-acquirable
        ReconcilerLease::acquire(pool, "reconcile:sv-001", 60_000)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_live_lease_blocks_second_acquirer() {
        let pool = seed_pool().await;

        let _held = ReconcilerLease::acquire(pool.clone(), "reconcile:sv-001", 60_000)
            .await
            .unwrap();

        let err = ReconcilerLease::acquire(pool, "reconcile:sv-001", 60_000)
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::LeaseHeld { .. }));
    }

    #[tokio::test]
    async fn test_expired_lease_is_reclaimed() {
        let pool = seed_pool().await;

        // TTL in the past: expired the moment it is written
        let _stale = ReconcilerLease::acquire(pool.clone(), "reconcile:sv-001", -1_000)
            .await
            .unwrap();

        ReconcilerLease::acquire(pool, "reconcile:sv-001", 60_000)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_leases_are_per_name() {
        let pool = seed_pool().await;

        let _a = ReconcilerLease::acquire(pool.clone(), "reconcile:sv-001", 60_000)
            .await
            .unwrap();
        ReconcilerLease::acquire(pool, "reconcile:sv-other", 60_000)
            .await
            .unwrap();
    }
}
