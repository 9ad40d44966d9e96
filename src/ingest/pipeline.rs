use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use super::chunker::{render_chunks, ChunkSource, ClinicSnapshot, TextChunk};
use crate::config::IngestSettings;
use crate::error::IngestError;
use crate::models::NewKnowledgeChunk;
use crate::rag::embeddings::{check_dimensions, Embedder};
use crate::store::{ClinicStore, KnowledgeStore};

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub review_limit: i64,
    pub embed_delay: Duration,
    pub store_timeout: Duration,
}

impl From<&IngestSettings> for PipelineOptions {
    fn from(settings: &IngestSettings) -> Self {
        Self {
            review_limit: settings.review_limit,
            embed_delay: settings.embed_delay(),
            store_timeout: settings.store_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipStage {
    Embedding,
    Persistence,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedChunk {
    pub chunk_index: usize,
    pub source: ChunkSource,
    pub stage: SkipStage,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestOutcome {
    Completed,
    Partial,
    NotFound,
    Failed,
}

impl IngestOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestOutcome::Completed => "completed",
            IngestOutcome::Partial => "partial",
            IngestOutcome::NotFound => "not_found",
            IngestOutcome::Failed => "failed",
        }
    }

    pub fn of(result: &Result<IngestReport, IngestError>) -> Self {
        match result {
            Ok(report) => report.outcome(),
            Err(IngestError::NotFound(_)) => IngestOutcome::NotFound,
            Err(_) => IngestOutcome::Failed,
        }
    }
}

/// Result of a run that got past the clinic lookup and the bulk delete.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub clinic_id: String,
    pub success: bool,
    pub chunks_rendered: usize,
    pub chunks_processed: usize,
    pub skipped: Vec<SkippedChunk>,
    pub warnings: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl IngestReport {
    pub fn outcome(&self) -> IngestOutcome {
        if self.skipped.is_empty() {
            IngestOutcome::Completed
        } else {
            IngestOutcome::Partial
        }
    }
}

pub struct IngestPipeline {
    clinics: Arc<dyn ClinicStore>,
    knowledge: Arc<dyn KnowledgeStore>,
    embedder: Arc<dyn Embedder>,
    options: PipelineOptions,
}

impl IngestPipeline {
    pub fn new(
        clinics: Arc<dyn ClinicStore>,
        knowledge: Arc<dyn KnowledgeStore>,
        embedder: Arc<dyn Embedder>,
        options: PipelineOptions,
    ) -> Self {
        Self { clinics, knowledge, embedder, options }
    }

    /// Rebuilds the knowledge chunks of one clinic.
    ///
    /// Callers must not run two ingestions of the same clinic at once; the
    /// delete-then-insert sequence is not isolated here.
    pub async fn ingest(&self, clinic_id: &str) -> Result<IngestReport, IngestError> {
        let started_at = Utc::now();
        let mut warnings = Vec::new();

        let clinic = self
            .bounded("clinic lookup", self.clinics.fetch_clinic(clinic_id))
            .await?
            .ok_or_else(|| IngestError::NotFound(clinic_id.to_string()))?;

        let (pricing, faqs, reviews) = futures::join!(
            self.bounded("pricing fetch", self.clinics.fetch_pricing(clinic_id)),
            self.bounded("faq fetch", self.clinics.fetch_faqs(clinic_id)),
            self.bounded(
                "review fetch",
                self.clinics.fetch_recent_reviews(clinic_id, self.options.review_limit)
            ),
        );
        let pricing = or_empty(pricing, "pricing", clinic_id, &mut warnings);
        let faqs = or_empty(faqs, "faqs", clinic_id, &mut warnings);
        let mut reviews = or_empty(reviews, "reviews", clinic_id, &mut warnings);
        reviews.truncate(self.options.review_limit.max(0) as usize);

        let snapshot = ClinicSnapshot { clinic, pricing, faqs, reviews };
        let chunks = render_chunks(&snapshot);

        let removed = self
            .bounded("knowledge delete", self.knowledge.delete_for_clinic(clinic_id))
            .await?;
        tracing::info!(
            "Ingesting clinic {}: {} chunks rendered, {} stale chunks removed",
            clinic_id,
            chunks.len(),
            removed
        );

        let mut processed = 0usize;
        let mut skipped = Vec::new();
        let total = chunks.len();

        for (position, chunk) in chunks.iter().enumerate() {
            match self.store_chunk(clinic_id, chunk, started_at).await {
                Ok(()) => processed += 1,
                Err(skip) => {
                    tracing::warn!(
                        "Skipping chunk {} ({}) of clinic {} at {:?}: {}",
                        chunk.chunk_index,
                        chunk.source.tag(),
                        clinic_id,
                        skip.stage,
                        skip.reason
                    );
                    skipped.push(skip);
                }
            }

            if position + 1 < total && !self.options.embed_delay.is_zero() {
                tokio::time::sleep(self.options.embed_delay).await;
            }
        }

        tracing::info!(
            "Ingestion of clinic {} finished: {}/{} chunks stored",
            clinic_id,
            processed,
            total
        );

        Ok(IngestReport {
            clinic_id: clinic_id.to_string(),
            success: true,
            chunks_rendered: total,
            chunks_processed: processed,
            skipped,
            warnings,
            started_at,
            finished_at: Utc::now(),
        })
    }

    async fn store_chunk(
        &self,
        clinic_id: &str,
        chunk: &TextChunk,
        ingested_at: DateTime<Utc>,
    ) -> Result<(), SkippedChunk> {
        let skip = |stage: SkipStage, reason: String| SkippedChunk {
            chunk_index: chunk.chunk_index,
            source: chunk.source.clone(),
            stage,
            reason,
        };

        let embedding = self
            .embedder
            .embed(&chunk.text)
            .await
            .and_then(|embedding| {
                check_dimensions(&embedding, self.embedder.dimensions())?;
                Ok(embedding)
            })
            .map_err(|e| skip(SkipStage::Embedding, format!("{:#}", e)))?;

        let row = NewKnowledgeChunk {
            clinic_id: clinic_id.to_string(),
            content: chunk.text.clone(),
            embedding,
            metadata: chunk_metadata(chunk, ingested_at),
        };

        self.bounded("knowledge insert", self.knowledge.insert_chunk(row))
            .await
            .map(|_| ())
            .map_err(|e| skip(SkipStage::Persistence, e.to_string()))
    }

    async fn bounded<T, F>(&self, what: &'static str, call: F) -> Result<T, IngestError>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        match tokio::time::timeout(self.options.store_timeout, call).await {
            Ok(result) => result.map_err(IngestError::Upstream),
            Err(_) => Err(IngestError::Timeout(what)),
        }
    }
}

fn or_empty<T>(
    result: Result<Vec<T>, IngestError>,
    what: &str,
    clinic_id: &str,
    warnings: &mut Vec<String>,
) -> Vec<T> {
    match result {
        Ok(rows) => rows,
        Err(e) => {
            tracing::warn!("Could not load {} for clinic {}, continuing without: {:#}", what, clinic_id, e);
            warnings.push(format!("{} unavailable: {}", what, e));
            Vec::new()
        }
    }
}

pub fn chunk_metadata(chunk: &TextChunk, ingested_at: DateTime<Utc>) -> serde_json::Value {
    let digest = Sha256::digest(chunk.text.as_bytes());
    serde_json::json!({
        "source": chunk.source.tag(),
        "source_id": chunk.source.source_id(),
        "chunk_index": chunk.chunk_index,
        "content_hash": hex::encode(&digest[..8]),
        "ingested_at": ingested_at.to_rfc3339(),
    })
}
