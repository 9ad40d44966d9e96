//! In-memory doubles for the storage and embedding seams.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::{
    Clinic, FaqRow, IngestionRun, NewKnowledgeChunk, PricingRow, ReviewRow, RunLogResponse,
    RunQuery, SearchHit,
};
use crate::rag::embeddings::Embedder;
use crate::store::{ClinicLease, ClinicLocks, ClinicStore, KnowledgeStore, RunLog};

pub fn clinic(id: &str, name: &str) -> Clinic {
    Clinic {
        id: id.into(),
        name: name.into(),
        description: None,
        detailed_description: None,
        address: None,
    }
}

pub fn pricing_row(
    id: &str,
    clinic_id: &str,
    treatment: &str,
    price_krw: i64,
    price_jpy: i64,
    promo_price_krw: Option<i64>,
) -> PricingRow {
    PricingRow {
        id: id.into(),
        clinic_id: clinic_id.into(),
        treatment_name: treatment.into(),
        price_krw,
        price_jpy,
        promo_price_krw,
    }
}

pub fn faq_row(id: &str, clinic_id: &str, sort_order: i32) -> FaqRow {
    FaqRow {
        id: id.into(),
        clinic_id: clinic_id.into(),
        question: format!("Question {}?", id),
        answer: format!("Answer {}.", id),
        sort_order,
    }
}

/// Review created `age_minutes` before now.
pub fn review_row(id: &str, clinic_id: &str, rating: i32, age_minutes: i64) -> ReviewRow {
    ReviewRow {
        id: id.into(),
        clinic_id: clinic_id.into(),
        rating,
        content: format!("Review {}", id),
        created_at: Utc::now() - chrono::Duration::minutes(age_minutes),
    }
}

#[derive(Debug, Clone)]
pub struct StoredChunk {
    pub id: Uuid,
    pub clinic_id: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
struct Failures {
    clinic: bool,
    pricing: bool,
    delete: bool,
    locks: bool,
    insert_containing: Option<String>,
}

#[derive(Default)]
struct Inner {
    clinics: HashMap<String, Clinic>,
    pricing: Vec<PricingRow>,
    faqs: Vec<FaqRow>,
    reviews: Vec<ReviewRow>,
    chunks: Vec<StoredChunk>,
    runs: Vec<IngestionRun>,
    events: Vec<String>,
    failures: Failures,
}

/// Clinic tables, knowledge table, clinic locks and run log in one
/// process-local store. Managers sharing a store share its clinic locks the
/// way separate processes share Postgres advisory locks.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    clinic_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    pub fn add_clinic(&self, clinic: Clinic) {
        self.lock().clinics.insert(clinic.id.clone(), clinic);
    }

    pub fn add_pricing(&self, row: PricingRow) {
        self.lock().pricing.push(row);
    }

    pub fn add_faq(&self, row: FaqRow) {
        self.lock().faqs.push(row);
    }

    pub fn add_review(&self, row: ReviewRow) {
        self.lock().reviews.push(row);
    }

    pub fn put_chunk(&self, clinic_id: &str, content: &str, embedding: Vec<f32>) {
        self.lock().chunks.push(StoredChunk {
            id: Uuid::new_v4(),
            clinic_id: clinic_id.into(),
            content: content.into(),
            embedding,
            metadata: serde_json::json!({}),
            created_at: Utc::now(),
        });
    }

    pub fn fail_clinic_lookup(&self) {
        self.lock().failures.clinic = true;
    }

    pub fn fail_pricing(&self) {
        self.lock().failures.pricing = true;
    }

    pub fn fail_delete(&self) {
        self.lock().failures.delete = true;
    }

    pub fn fail_locks(&self) {
        self.lock().failures.locks = true;
    }

    pub fn fail_inserts_containing(&self, marker: &str) {
        self.lock().failures.insert_containing = Some(marker.to_string());
    }

    pub fn chunks_for(&self, clinic_id: &str) -> Vec<StoredChunk> {
        self.lock()
            .chunks
            .iter()
            .filter(|c| c.clinic_id == clinic_id)
            .cloned()
            .collect()
    }

    pub fn count(&self, clinic_id: &str) -> usize {
        self.chunks_for(clinic_id).len()
    }

    pub fn total_chunks(&self) -> usize {
        self.lock().chunks.len()
    }

    /// `delete:<clinic>` / `insert:<clinic>` in the order they happened.
    pub fn events(&self) -> Vec<String> {
        self.lock().events.clone()
    }

    pub fn runs(&self) -> Vec<IngestionRun> {
        self.lock().runs.clone()
    }
}

#[async_trait]
impl ClinicStore for MemoryStore {
    async fn fetch_clinic(&self, clinic_id: &str) -> Result<Option<Clinic>> {
        let inner = self.lock();
        anyhow::ensure!(!inner.failures.clinic, "clinic lookup unavailable");
        Ok(inner.clinics.get(clinic_id).cloned())
    }

    async fn fetch_pricing(&self, clinic_id: &str) -> Result<Vec<PricingRow>> {
        let inner = self.lock();
        anyhow::ensure!(!inner.failures.pricing, "pricing table unavailable");
        Ok(inner.pricing.iter().filter(|r| r.clinic_id == clinic_id).cloned().collect())
    }

    async fn fetch_faqs(&self, clinic_id: &str) -> Result<Vec<FaqRow>> {
        let mut rows: Vec<FaqRow> = self
            .lock()
            .faqs
            .iter()
            .filter(|r| r.clinic_id == clinic_id)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.sort_order);
        Ok(rows)
    }

    async fn fetch_recent_reviews(&self, clinic_id: &str, limit: i64) -> Result<Vec<ReviewRow>> {
        let mut rows: Vec<ReviewRow> = self
            .lock()
            .reviews
            .iter()
            .filter(|r| r.clinic_id == clinic_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn list_clinic_ids(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.lock().clinics.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

#[async_trait]
impl KnowledgeStore for MemoryStore {
    async fn delete_for_clinic(&self, clinic_id: &str) -> Result<u64> {
        let mut inner = self.lock();
        anyhow::ensure!(!inner.failures.delete, "delete rejected");
        let before = inner.chunks.len();
        inner.chunks.retain(|c| c.clinic_id != clinic_id);
        let removed = (before - inner.chunks.len()) as u64;
        inner.events.push(format!("delete:{}", clinic_id));
        Ok(removed)
    }

    async fn insert_chunk(&self, chunk: NewKnowledgeChunk) -> Result<Uuid> {
        let mut inner = self.lock();
        if let Some(marker) = &inner.failures.insert_containing {
            anyhow::ensure!(!chunk.content.contains(marker.as_str()), "insert rejected");
        }
        let id = Uuid::new_v4();
        inner.events.push(format!("insert:{}", chunk.clinic_id));
        inner.chunks.push(StoredChunk {
            id,
            clinic_id: chunk.clinic_id,
            content: chunk.content,
            embedding: chunk.embedding,
            metadata: chunk.metadata,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn count_for_clinic(&self, clinic_id: &str) -> Result<i64> {
        Ok(self.count(clinic_id) as i64)
    }

    async fn search(
        &self,
        embedding: Vec<f32>,
        clinic_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<SearchHit>> {
        let mut hits: Vec<SearchHit> = self
            .lock()
            .chunks
            .iter()
            .filter(|c| clinic_id.map_or(true, |id| c.clinic_id == id))
            .map(|c| SearchHit {
                clinic_id: c.clinic_id.clone(),
                content: c.content.clone(),
                metadata: c.metadata.clone(),
                distance: cosine_distance(&embedding, &c.embedding),
            })
            .collect();
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(limit.max(0) as usize);
        Ok(hits)
    }
}

struct MemoryLease {
    _guard: tokio::sync::OwnedMutexGuard<()>,
}

#[async_trait]
impl ClinicLease for MemoryLease {
    async fn release(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl ClinicLocks for MemoryStore {
    async fn acquire(&self, clinic_id: &str) -> Result<Box<dyn ClinicLease>> {
        anyhow::ensure!(!self.lock().failures.locks, "lock service unavailable");
        let lock = self
            .clinic_locks
            .lock()
            .unwrap()
            .entry(clinic_id.to_string())
            .or_default()
            .clone();
        let guard = lock.lock_owned().await;
        Ok(Box::new(MemoryLease { _guard: guard }))
    }
}

#[async_trait]
impl RunLog for MemoryStore {
    async fn record(&self, run: &IngestionRun) -> Result<()> {
        self.lock().runs.push(run.clone());
        Ok(())
    }

    async fn recent(&self, query: &RunQuery) -> Result<RunLogResponse> {
        let mut runs: Vec<IngestionRun> = self
            .lock()
            .runs
            .iter()
            .filter(|r| query.clinic_id.as_deref().map_or(true, |id| r.clinic_id == id))
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        let total = runs.len() as i64;
        let offset = query.offset.unwrap_or(0).max(0) as usize;
        let limit = query.limit.unwrap_or(50).max(0) as usize;
        let runs = runs.into_iter().skip(offset).take(limit).collect();
        Ok(RunLogResponse { runs, total })
    }
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| (*x as f64) * (*y as f64)).sum();
    let norm_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a * norm_b)
}

/// Deterministic embedder: vectors derive from a hash of the text.
pub struct ScriptedEmbedder {
    dims: usize,
    reported_dims: usize,
    fail_markers: Vec<String>,
    delay: Duration,
    calls: AtomicUsize,
}

impl ScriptedEmbedder {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            reported_dims: dims,
            fail_markers: Vec::new(),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    /// Fails every text containing `marker`.
    pub fn failing_on(mut self, marker: &str) -> Self {
        self.fail_markers.push(marker.to_string());
        self
    }

    /// Claims a dimension different from the vectors it produces.
    pub fn reporting_dimensions(mut self, dims: usize) -> Self {
        self.reported_dims = dims;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let digest = Sha256::digest(text.as_bytes());
        let mut vector: Vec<f32> = (0..self.dims)
            .map(|i| (digest[i % digest.len()] ^ (i as u8)) as f32 / 255.0 - 0.5)
            .collect();
        if let Some(first) = vector.first_mut() {
            *first = 1.0;
        }
        vector
    }
}

#[async_trait]
impl Embedder for ScriptedEmbedder {
    fn dimensions(&self) -> usize {
        self.reported_dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(marker) = self.fail_markers.iter().find(|m| text.contains(m.as_str())) {
            anyhow::bail!("embedding quota exceeded for text containing {:?}", marker);
        }
        Ok(self.vector_for(text))
    }
}
