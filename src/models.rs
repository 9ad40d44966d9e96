use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};

// Clinic records (owned by the admin subsystem, read-only here)

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Clinic {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub detailed_description: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PricingRow {
    pub id: String,
    pub clinic_id: String,
    pub treatment_name: String,
    pub price_krw: i64,
    pub price_jpy: i64,
    pub promo_price_krw: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct FaqRow {
    pub id: String,
    pub clinic_id: String,
    pub question: String,
    pub answer: String,
    pub sort_order: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ReviewRow {
    pub id: String,
    pub clinic_id: String,
    pub rating: i32,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

// Knowledge table

#[derive(Debug, Clone)]
pub struct NewKnowledgeChunk {
    pub clinic_id: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SearchHit {
    pub clinic_id: String,
    pub content: String,
    pub metadata: serde_json::Value,
    pub distance: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    pub clinic_id: Option<String>,
    pub top_k: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub hits: Vec<SearchHit>,
}

// Chat relay

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub clinic_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatRelayPayload {
    pub message: String,
    pub clinic_id: Option<String>,
    pub session_id: Option<String>,
    pub context: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    #[serde(alias = "output")]
    pub reply: String,
}

// Ingestion run log

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct IngestionRun {
    pub id: Uuid,
    pub clinic_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: String,
    pub chunks_rendered: i32,
    pub chunks_processed: i32,
    pub skipped: serde_json::Value,
    pub warnings: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunQuery {
    pub clinic_id: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLogResponse {
    pub runs: Vec<IngestionRun>,
    pub total: i64,
}
