use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};

use super::{ClinicLease, ClinicLocks};

/// First key of the two-key advisory lock, so clinic locks never collide
/// with other advisory lock users of the database.
const LOCK_NAMESPACE: &str = "knowledge_chunks";

/// Session-level `pg_advisory_lock` per clinic, held on a dedicated pool
/// connection for the length of the run.
pub struct PgAdvisoryLocks {
    pool: PgPool,
}

impl PgAdvisoryLocks {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ClinicLocks for PgAdvisoryLocks {
    async fn acquire(&self, clinic_id: &str) -> Result<Box<dyn ClinicLease>> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .context("failed to get a connection for the clinic lock")?;

        sqlx::query("SELECT pg_advisory_lock(hashtext($1), hashtext($2))")
            .bind(LOCK_NAMESPACE)
            .bind(clinic_id)
            .execute(&mut *conn)
            .await
            .with_context(|| format!("failed to lock clinic {}", clinic_id))?;

        Ok(Box::new(PgClinicLease {
            conn: Some(conn),
            clinic_id: clinic_id.to_string(),
        }))
    }
}

struct PgClinicLease {
    conn: Option<PoolConnection<Postgres>>,
    clinic_id: String,
}

#[async_trait]
impl ClinicLease for PgClinicLease {
    async fn release(self: Box<Self>) -> Result<()> {
        let mut lease = self;
        let Some(mut conn) = lease.conn.take() else {
            return Ok(());
        };

        let unlocked = sqlx::query("SELECT pg_advisory_unlock(hashtext($1), hashtext($2))")
            .bind(LOCK_NAMESPACE)
            .bind(&lease.clinic_id)
            .execute(&mut *conn)
            .await;

        if let Err(e) = unlocked {
            // closing the session drops the lock
            drop(conn.detach());
            return Err(e).with_context(|| format!("failed to unlock clinic {}", lease.clinic_id));
        }
        Ok(())
    }
}

impl Drop for PgClinicLease {
    fn drop(&mut self) {
        // never hand a locked session back to the pool
        if let Some(conn) = self.conn.take() {
            tracing::warn!("Clinic lock for {} dropped without release, closing session", self.clinic_id);
            drop(conn.detach());
        }
    }
}
