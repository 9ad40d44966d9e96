use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, Method},
    routing::{get, post},
    Json, Router,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use chrono::Utc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::ServerSettings;
use crate::error::ApiError;
use crate::ingest::manager::{BatchSummary, IngestManager, IngestStatus};
use crate::ingest::pipeline::IngestReport;
use crate::models::{
    ChatRelayPayload, ChatRequest, ChatResponse, RunLogResponse, RunQuery, SearchQuery,
    SearchResponse,
};
use crate::proxy::ChatRelay;
use crate::rag::KnowledgeBase;
use crate::rate_limit::{client_identifier, RateLimitPolicy, RateLimiter};
use crate::store::RunLog;

pub struct AppState {
    pub manager: Arc<IngestManager>,
    pub knowledge: KnowledgeBase,
    pub run_log: Arc<dyn RunLog>,
    pub chat: ChatRelay,
    pub limiter: Arc<RateLimiter>,
    pub chat_policy: RateLimitPolicy,
    pub search_policy: RateLimitPolicy,
    pub admin_token: Option<String>,
}

type AdminAuth = Option<TypedHeader<Authorization<Bearer>>>;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/admin/clinics/:clinic_id/ingest", post(ingest_clinic_handler))
        .route("/api/v1/admin/ingest", post(ingest_all_handler))
        .route("/api/v1/admin/ingest/status", get(ingest_status_handler))
        .route("/api/v1/admin/ingestion-runs", get(ingestion_runs_handler))
        .route("/api/v1/knowledge/search", get(search_handler))
        .route("/api/v1/chat", post(chat_handler))
        .route("/api/health", get(health_check))
        .with_state(state)
}

/// [`router`] wrapped in tracing, CORS and a request timeout.
pub fn app(state: Arc<AppState>, settings: &ServerSettings) -> Router {
    let mut app = router(state)
        .layer(TimeoutLayer::new(Duration::from_secs(settings.request_timeout_secs)))
        .layer(TraceLayer::new_for_http());

    if settings.cors_allow_any {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(Any);
        app = app.layer(cors);
    }
    app
}

fn require_admin(state: &AppState, auth: AdminAuth) -> Result<(), ApiError> {
    let Some(expected) = state.admin_token.as_deref().filter(|t| !t.is_empty()) else {
        return Err(ApiError::Unauthorized);
    };
    match auth {
        Some(TypedHeader(Authorization(bearer))) if bearer.token() == expected => Ok(()),
        _ => Err(ApiError::Unauthorized),
    }
}

async fn ingest_clinic_handler(
    State(state): State<Arc<AppState>>,
    auth: AdminAuth,
    Path(clinic_id): Path<String>,
) -> Result<Json<IngestReport>, ApiError> {
    require_admin(&state, auth)?;

    // the run outlives a timed-out request so it always finishes and is recorded
    let manager = state.manager.clone();
    let report = tokio::spawn(async move { manager.ingest_clinic(&clinic_id).await })
        .await
        .map_err(|e| ApiError::Internal(e.into()))??;
    Ok(Json(report))
}

async fn ingest_all_handler(
    State(state): State<Arc<AppState>>,
    auth: AdminAuth,
) -> Result<Json<BatchSummary>, ApiError> {
    require_admin(&state, auth)?;

    // the batch outlives a timed-out request
    let manager = state.manager.clone();
    let summary = tokio::spawn(async move { manager.ingest_all().await })
        .await
        .map_err(|e| ApiError::Internal(e.into()))??;

    Ok(Json(summary))
}

async fn ingest_status_handler(
    State(state): State<Arc<AppState>>,
    auth: AdminAuth,
) -> Result<Json<IngestStatus>, ApiError> {
    require_admin(&state, auth)?;
    Ok(Json(state.manager.get_status().await))
}

async fn ingestion_runs_handler(
    State(state): State<Arc<AppState>>,
    auth: AdminAuth,
    Query(query): Query<RunQuery>,
) -> Result<Json<RunLogResponse>, ApiError> {
    require_admin(&state, auth)?;
    let response = state.run_log.recent(&query).await.map_err(ApiError::Internal)?;
    Ok(Json(response))
}

async fn search_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<SearchQuery>,
) -> Result<Json<SearchResponse>, ApiError> {
    state
        .limiter
        .enforce(&state.search_policy, &client_identifier(&headers))?;

    let text = query.q.trim();
    if text.is_empty() {
        return Err(ApiError::BadRequest("query text must not be empty".to_string()));
    }

    let hits = state
        .knowledge
        .search(text, query.clinic_id.as_deref(), query.top_k)
        .await
        .map_err(ApiError::Upstream)?;
    Ok(Json(SearchResponse { hits }))
}

async fn chat_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    state
        .limiter
        .enforce(&state.chat_policy, &client_identifier(&headers))?;

    let message = request.message.trim();
    if message.is_empty() {
        return Err(ApiError::BadRequest("message must not be empty".to_string()));
    }
    if !state.chat.is_configured() {
        return Err(ApiError::Upstream(anyhow::anyhow!("chat webhook is not configured")));
    }

    let context = match state
        .knowledge
        .retrieve_context(message, request.clinic_id.as_deref())
        .await
    {
        Ok(context) => context,
        Err(e) => {
            tracing::warn!("Knowledge retrieval failed, answering without context: {:#}", e);
            String::new()
        }
    };

    let payload = ChatRelayPayload {
        message: message.to_string(),
        clinic_id: request.clinic_id,
        session_id: request.session_id,
        context,
    };
    let reply = state.chat.relay(&payload).await.map_err(ApiError::Upstream)?;
    Ok(Json(reply))
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}
