use anyhow::{Context, Result};
use async_trait::async_trait;
use pgvector::Vector;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{NewKnowledgeChunk, SearchHit};
use crate::store::KnowledgeStore;

/// `knowledge_chunks` table backed by the pgvector extension.
pub struct PgVectorStore {
    pool: PgPool,
}

impl PgVectorStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self, dimensions: usize) -> Result<()> {
        anyhow::ensure!(dimensions > 0, "embedding dimension must be positive");

        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&self.pool)
            .await
            .context("failed to ensure pgvector extension")?;

        let ddl = format!(
            r#"
            CREATE TABLE IF NOT EXISTS knowledge_chunks (
                id UUID PRIMARY KEY,
                clinic_id TEXT NOT NULL,
                content TEXT NOT NULL,
                embedding VECTOR({dimensions}) NOT NULL,
                metadata JSONB NOT NULL DEFAULT '{{}}'::jsonb,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#
        );
        sqlx::query(&ddl)
            .execute(&self.pool)
            .await
            .context("failed to create knowledge_chunks table")?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_knowledge_chunks_clinic ON knowledge_chunks(clinic_id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_knowledge_chunks_embedding
            ON knowledge_chunks USING hnsw (embedding vector_cosine_ops)
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create knowledge_chunks vector index")?;

        Ok(())
    }
}

#[async_trait]
impl KnowledgeStore for PgVectorStore {
    async fn delete_for_clinic(&self, clinic_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM knowledge_chunks WHERE clinic_id = $1")
            .bind(clinic_id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to delete knowledge chunks for clinic {}", clinic_id))?;

        Ok(result.rows_affected())
    }

    async fn insert_chunk(&self, chunk: NewKnowledgeChunk) -> Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO knowledge_chunks (id, clinic_id, content, embedding, metadata)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(id)
        .bind(&chunk.clinic_id)
        .bind(&chunk.content)
        .bind(Vector::from(chunk.embedding))
        .bind(&chunk.metadata)
        .execute(&self.pool)
        .await
        .context("failed to insert knowledge chunk")?;

        Ok(id)
    }

    async fn count_for_clinic(&self, clinic_id: &str) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM knowledge_chunks WHERE clinic_id = $1")
                .bind(clinic_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    async fn search(
        &self,
        embedding: Vec<f32>,
        clinic_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<SearchHit>> {
        if limit <= 0 {
            return Ok(Vec::new());
        }

        let hits = sqlx::query_as::<_, SearchHit>(
            r#"
            SELECT clinic_id,
                   content,
                   metadata,
                   (embedding <=> $1)::float8 AS distance
            FROM knowledge_chunks
            WHERE ($2::text IS NULL OR clinic_id = $2)
            ORDER BY embedding <=> $1 ASC
            LIMIT $3
            "#,
        )
        .bind(Vector::from(embedding))
        .bind(clinic_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("knowledge search failed")?;

        Ok(hits)
    }
}
