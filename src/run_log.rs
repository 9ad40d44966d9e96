use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::models::{IngestionRun, RunLogResponse, RunQuery};
use crate::store::RunLog;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 200;

/// Audit trail of ingestion runs in the `ingestion_runs` table.
pub struct RunLogger {
    pool: PgPool,
}

impl RunLogger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ingestion_runs (
                id UUID PRIMARY KEY,
                clinic_id TEXT NOT NULL,
                started_at TIMESTAMPTZ NOT NULL,
                finished_at TIMESTAMPTZ NOT NULL,
                outcome TEXT NOT NULL,
                chunks_rendered INTEGER NOT NULL,
                chunks_processed INTEGER NOT NULL,
                skipped JSONB NOT NULL,
                warnings JSONB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create ingestion_runs table")?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_ingestion_runs_started ON ingestion_runs(started_at DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_ingestion_runs_clinic ON ingestion_runs(clinic_id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

pub fn page_bounds(query: &RunQuery) -> (i64, i64) {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = query.offset.unwrap_or(0).max(0);
    (limit, offset)
}

fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, query: &RunQuery) {
    if let Some(clinic_id) = &query.clinic_id {
        builder.push(" WHERE clinic_id = ").push_bind(clinic_id.clone());
    }
}

#[async_trait]
impl RunLog for RunLogger {
    async fn record(&self, run: &IngestionRun) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ingestion_runs
            (id, clinic_id, started_at, finished_at, outcome, chunks_rendered, chunks_processed, skipped, warnings)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(run.id)
        .bind(&run.clinic_id)
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(&run.outcome)
        .bind(run.chunks_rendered)
        .bind(run.chunks_processed)
        .bind(&run.skipped)
        .bind(&run.warnings)
        .execute(&self.pool)
        .await
        .context("failed to insert ingestion run")?;

        Ok(())
    }

    async fn recent(&self, query: &RunQuery) -> Result<RunLogResponse> {
        let (limit, offset) = page_bounds(query);

        let mut select = QueryBuilder::<Postgres>::new("SELECT * FROM ingestion_runs");
        push_filter(&mut select, query);
        select
            .push(" ORDER BY started_at DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let runs = select
            .build_query_as::<IngestionRun>()
            .fetch_all(&self.pool)
            .await
            .context("failed to query ingestion runs")?;

        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM ingestion_runs");
        push_filter(&mut count, query);
        let (total,): (i64,) = count
            .build_query_as()
            .fetch_one(&self.pool)
            .await
            .context("failed to count ingestion runs")?;

        Ok(RunLogResponse { runs, total })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_bounds_defaults_and_clamps() {
        assert_eq!(page_bounds(&RunQuery::default()), (50, 0));
        let query = RunQuery { clinic_id: None, limit: Some(10_000), offset: Some(-4) };
        assert_eq!(page_bounds(&query), (200, 0));
        let query = RunQuery { clinic_id: None, limit: Some(0), offset: Some(20) };
        assert_eq!(page_bounds(&query), (1, 20));
    }

    #[test]
    fn test_filter_binds_clinic() {
        let query = RunQuery { clinic_id: Some("d1".into()), ..RunQuery::default() };
        let mut builder = QueryBuilder::<Postgres>::new("SELECT * FROM ingestion_runs");
        push_filter(&mut builder, &query);
        assert_eq!(builder.sql(), "SELECT * FROM ingestion_runs WHERE clinic_id = $1");
    }
}
