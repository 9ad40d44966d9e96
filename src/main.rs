use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use clinic_concierge::config::Settings;
use clinic_concierge::ingest::{IngestManager, IngestPipeline, PipelineOptions};
use clinic_concierge::proxy::ChatRelay;
use clinic_concierge::rag::embeddings::HostedEmbedder;
use clinic_concierge::rag::vector_store::PgVectorStore;
use clinic_concierge::rag::KnowledgeBase;
use clinic_concierge::rate_limit::RateLimiter;
use clinic_concierge::run_log::RunLogger;
use clinic_concierge::server::{self, AppState};
use clinic_concierge::store::{self, clinics::PgClinicStore, locks::PgAdvisoryLocks};
use clinic_concierge::telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();
    let settings = Settings::load()?;

    tracing::info!("Connecting to database");
    let pool = store::connect(&settings.database).await?;

    let knowledge_store = Arc::new(PgVectorStore::new(pool.clone()));
    knowledge_store.init_schema(settings.embedding.dimensions).await?;
    let run_log = Arc::new(RunLogger::new(pool.clone()));
    run_log.init_schema().await?;
    let clinic_locks = Arc::new(PgAdvisoryLocks::new(pool.clone()));
    let clinic_store = Arc::new(PgClinicStore::new(pool));

    let embedder = Arc::new(HostedEmbedder::new(&settings.embedding)?);
    tracing::info!(
        "Embedding model {} ({} dimensions)",
        settings.embedding.model,
        settings.embedding.dimensions
    );

    let pipeline = IngestPipeline::new(
        clinic_store.clone(),
        knowledge_store.clone(),
        embedder.clone(),
        PipelineOptions::from(&settings.ingest),
    );
    let manager = Arc::new(IngestManager::new(
        pipeline,
        clinic_store,
        clinic_locks,
        run_log.clone(),
        settings.ingest.schedule_interval_minutes,
    ));

    let chat = ChatRelay::new(
        settings.chat.webhook_url.clone(),
        Duration::from_secs(settings.chat.timeout_secs),
    )?;
    if !chat.is_configured() {
        tracing::warn!("chat.webhook_url is not set; /api/v1/chat will answer 502");
    }
    if settings.admin.api_token.is_none() {
        tracing::warn!("admin.api_token is not set; admin routes will reject every request");
    }

    let limiter = Arc::new(RateLimiter::new());
    RateLimiter::start_sweeper(
        limiter.clone(),
        Duration::from_secs(settings.rate_limit.sweep_interval_secs),
    );
    IngestManager::start_scheduler(
        manager.clone(),
        Duration::from_secs(settings.ingest.schedule_interval_minutes * 60),
    );

    let state = Arc::new(AppState {
        manager,
        knowledge: KnowledgeBase::new(embedder, knowledge_store, &settings.retrieval),
        run_log,
        chat,
        limiter,
        chat_policy: settings.chat_policy(),
        search_policy: settings.search_policy(),
        admin_token: settings.admin.api_token.clone(),
    });

    let app = server::app(state, &settings.server);

    let listener = tokio::net::TcpListener::bind(&settings.server.bind).await?;
    tracing::info!("Concierge server listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
