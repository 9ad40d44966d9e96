//! Storage seams used by the ingestion pipeline, retrieval and the run log.
//!
//! Postgres implementations live next to their tables: clinic reads in
//! [`clinics`], the knowledge table in `rag::vector_store`, the run log in
//! `run_log`. Cross-process clinic locks are in [`locks`].

pub mod clinics;
pub mod locks;

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};
use uuid::Uuid;

use crate::config::DatabaseSettings;
use crate::models::{
    Clinic, FaqRow, IngestionRun, NewKnowledgeChunk, PricingRow, ReviewRow, RunLogResponse,
    RunQuery, SearchHit,
};

/// Read access to clinic records owned by the admin subsystem.
#[async_trait]
pub trait ClinicStore: Send + Sync {
    async fn fetch_clinic(&self, clinic_id: &str) -> Result<Option<Clinic>>;

    async fn fetch_pricing(&self, clinic_id: &str) -> Result<Vec<PricingRow>>;

    /// Ordered by `sort_order` ascending.
    async fn fetch_faqs(&self, clinic_id: &str) -> Result<Vec<FaqRow>>;

    /// At most `limit` reviews, newest first.
    async fn fetch_recent_reviews(&self, clinic_id: &str, limit: i64) -> Result<Vec<ReviewRow>>;

    async fn list_clinic_ids(&self) -> Result<Vec<String>>;
}

/// Exclusion for rebuilding one clinic's chunks, shared by every process that
/// writes the knowledge table (server and `knowledge-ingest`).
#[async_trait]
pub trait ClinicLocks: Send + Sync {
    /// Waits until no other holder has `clinic_id`.
    async fn acquire(&self, clinic_id: &str) -> Result<Box<dyn ClinicLease>>;
}

#[async_trait]
pub trait ClinicLease: Send {
    async fn release(self: Box<Self>) -> Result<()>;
}

#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Removes every chunk of the clinic, returning the number of rows deleted.
    async fn delete_for_clinic(&self, clinic_id: &str) -> Result<u64>;

    async fn insert_chunk(&self, chunk: NewKnowledgeChunk) -> Result<Uuid>;

    async fn count_for_clinic(&self, clinic_id: &str) -> Result<i64>;

    /// Nearest neighbours by cosine distance, closest first.
    async fn search(
        &self,
        embedding: Vec<f32>,
        clinic_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<SearchHit>>;
}

#[async_trait]
pub trait RunLog: Send + Sync {
    async fn record(&self, run: &IngestionRun) -> Result<()>;

    async fn recent(&self, query: &RunQuery) -> Result<RunLogResponse>;
}

pub async fn connect(settings: &DatabaseSettings) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .acquire_timeout(Duration::from_secs(settings.acquire_timeout_secs))
        .connect(&settings.url)
        .await
        .context("failed to connect to Postgres")
}
