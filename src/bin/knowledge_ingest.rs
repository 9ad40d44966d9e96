use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

use clinic_concierge::config::Settings;
use clinic_concierge::ingest::manager::{summarize, ClinicRunSummary};
use clinic_concierge::ingest::{IngestManager, IngestOutcome, IngestPipeline, PipelineOptions};
use clinic_concierge::rag::embeddings::HostedEmbedder;
use clinic_concierge::rag::vector_store::PgVectorStore;
use clinic_concierge::run_log::RunLogger;
use clinic_concierge::store::{self, clinics::PgClinicStore, locks::PgAdvisoryLocks, ClinicStore};
use clinic_concierge::telemetry;

#[derive(Parser, Debug)]
#[command(name = "knowledge-ingest")]
#[command(about = "Rebuild clinic knowledge chunks in the vector store")]
struct Args {
    /// Clinic id to ingest (repeatable)
    #[arg(short, long = "clinic")]
    clinics: Vec<String>,

    /// Ingest every clinic
    #[arg(long, conflicts_with = "clinics")]
    all: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();
    let args = Args::parse();

    if !args.all && args.clinics.is_empty() {
        anyhow::bail!("Nothing to do: pass --clinic <ID> or --all");
    }

    let settings = Settings::load()?;

    println!("Connecting to database...");
    let pool = store::connect(&settings.database).await?;
    let knowledge_store = Arc::new(PgVectorStore::new(pool.clone()));
    knowledge_store.init_schema(settings.embedding.dimensions).await?;
    let run_log = Arc::new(RunLogger::new(pool.clone()));
    run_log.init_schema().await?;
    // the server may ingest the same clinics concurrently
    let clinic_locks = Arc::new(PgAdvisoryLocks::new(pool.clone()));
    let clinic_store = Arc::new(PgClinicStore::new(pool));

    let embedder = Arc::new(HostedEmbedder::new(&settings.embedding)?);
    let pipeline = IngestPipeline::new(
        clinic_store.clone(),
        knowledge_store,
        embedder,
        PipelineOptions::from(&settings.ingest),
    );
    let manager = IngestManager::new(pipeline, clinic_store.clone(), clinic_locks, run_log, 0);

    let clinic_ids = if args.all {
        clinic_store.list_clinic_ids().await?
    } else {
        args.clinics.clone()
    };
    println!("Ingesting {} clinics", clinic_ids.len());

    if clinic_ids.is_empty() {
        println!("No clinics found. Exiting.");
        return Ok(());
    }

    let pb = ProgressBar::new(clinic_ids.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );

    let mut summaries: Vec<ClinicRunSummary> = Vec::with_capacity(clinic_ids.len());
    for clinic_id in &clinic_ids {
        pb.set_message(clinic_id.clone());
        let result = manager.ingest_clinic(clinic_id).await;
        summaries.push(summarize(clinic_id, &result));
        pb.inc(1);
    }

    pb.finish_with_message("done");

    let failed: Vec<&ClinicRunSummary> = summaries
        .iter()
        .filter(|s| matches!(s.outcome, IngestOutcome::Failed | IngestOutcome::NotFound))
        .collect();
    let count = |outcome: IngestOutcome| summaries.iter().filter(|s| s.outcome == outcome).count();

    println!("\nIngestion complete!");
    println!("  Clinics processed: {}/{}", summaries.len() - failed.len(), summaries.len());
    println!("  Clinics partial:   {}", count(IngestOutcome::Partial));
    println!("  Clinics not found: {}", count(IngestOutcome::NotFound));
    println!("  Clinics failed:    {}", count(IngestOutcome::Failed));
    println!(
        "  Chunks stored:     {}",
        summaries.iter().map(|s| s.chunks_processed).sum::<usize>()
    );
    println!(
        "  Chunks skipped:    {}",
        summaries.iter().map(|s| s.chunks_skipped).sum::<usize>()
    );

    if !failed.is_empty() {
        println!("\nFailed clinics:");
        for summary in &failed {
            println!(
                "  {}: {}",
                summary.clinic_id,
                summary.error.as_deref().unwrap_or(summary.outcome.as_str())
            );
        }
        anyhow::bail!("{} clinic(s) failed or were not found", failed.len());
    }

    Ok(())
}
