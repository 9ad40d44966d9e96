use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::pipeline::{IngestOutcome, IngestPipeline, IngestReport};
use crate::error::{BatchError, IngestError};
use crate::models::IngestionRun;
use crate::store::{ClinicLocks, ClinicStore, RunLog};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestStatus {
    pub is_running: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub clinics_ingested: usize,
    pub clinics_failed: usize,
    pub chunks_processed: usize,
    pub schedule_interval_minutes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClinicRunSummary {
    pub clinic_id: String,
    pub outcome: IngestOutcome,
    pub chunks_processed: usize,
    pub chunks_skipped: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub clinics: Vec<ClinicRunSummary>,
}

impl BatchSummary {
    pub fn chunks_processed(&self) -> usize {
        self.clinics.iter().map(|c| c.chunks_processed).sum()
    }

    pub fn failures(&self) -> usize {
        self.clinics
            .iter()
            .filter(|c| matches!(c.outcome, IngestOutcome::Failed | IngestOutcome::NotFound))
            .count()
    }
}

/// Serializes ingestion per clinic, records every run and drives batches.
pub struct IngestManager {
    pipeline: IngestPipeline,
    clinics: Arc<dyn ClinicStore>,
    shared_locks: Arc<dyn ClinicLocks>,
    run_log: Arc<dyn RunLog>,
    clinic_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    status: Mutex<IngestStatus>,
}

impl IngestManager {
    pub fn new(
        pipeline: IngestPipeline,
        clinics: Arc<dyn ClinicStore>,
        shared_locks: Arc<dyn ClinicLocks>,
        run_log: Arc<dyn RunLog>,
        schedule_interval_minutes: u64,
    ) -> Self {
        Self {
            pipeline,
            clinics,
            shared_locks,
            run_log,
            clinic_locks: Mutex::new(HashMap::new()),
            status: Mutex::new(IngestStatus {
                schedule_interval_minutes,
                ..IngestStatus::default()
            }),
        }
    }

    pub async fn get_status(&self) -> IngestStatus {
        self.status.lock().await.clone()
    }

    async fn clinic_lock(&self, clinic_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.clinic_locks.lock().await;
        locks
            .entry(clinic_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Runs one clinic, waiting for any in-flight run of the same clinic in
    /// this process or any other process sharing the knowledge table.
    pub async fn ingest_clinic(&self, clinic_id: &str) -> Result<IngestReport, IngestError> {
        let lock = self.clinic_lock(clinic_id).await;
        let _guard = lock.lock().await;

        let started_at = Utc::now();
        let result = match self.shared_locks.acquire(clinic_id).await {
            Ok(lease) => {
                let result = self.pipeline.ingest(clinic_id).await;
                if let Err(e) = lease.release().await {
                    tracing::warn!("Failed to release lock for clinic {}: {:#}", clinic_id, e);
                }
                result
            }
            Err(e) => Err(IngestError::Upstream(e)),
        };
        self.record_run(clinic_id, started_at, &result).await;

        match &result {
            Ok(report) => {
                tracing::info!(
                    "Clinic {} ingested: {} stored, {} skipped",
                    clinic_id,
                    report.chunks_processed,
                    report.skipped.len()
                );
            }
            Err(IngestError::NotFound(_)) => tracing::warn!("Clinic {} not found, nothing ingested", clinic_id),
            Err(e) => tracing::error!("Ingestion of clinic {} failed: {:#}", clinic_id, e),
        }
        result
    }

    async fn record_run(
        &self,
        clinic_id: &str,
        started_at: DateTime<Utc>,
        result: &Result<IngestReport, IngestError>,
    ) {
        let run = run_record(clinic_id, started_at, result);
        if let Err(e) = self.run_log.record(&run).await {
            tracing::warn!("Failed to record ingestion run for clinic {}: {:#}", clinic_id, e);
        }
    }

    /// Ingests every clinic in turn. Only one batch may run at a time.
    pub async fn ingest_all(&self) -> Result<BatchSummary, BatchError> {
        {
            let mut status = self.status.lock().await;
            if status.is_running {
                return Err(BatchError::AlreadyRunning);
            }
            status.is_running = true;
            status.last_error = None;
        }

        // is_running must reset even if a run panics
        let result = std::panic::AssertUnwindSafe(self.run_batch())
            .catch_unwind()
            .await;

        let mut status = self.status.lock().await;
        status.is_running = false;
        match result {
            Ok(Ok(summary)) => {
                status.last_run_at = Some(summary.finished_at);
                status.clinics_ingested = summary.clinics.len() - summary.failures();
                status.clinics_failed = summary.failures();
                status.chunks_processed = summary.chunks_processed();
                Ok(summary)
            }
            Ok(Err(e)) => {
                let error_msg = format!("Ingestion batch error: {:#}", e);
                tracing::error!("{}", error_msg);
                status.last_error = Some(error_msg);
                Err(BatchError::Failed(e))
            }
            Err(panic_info) => {
                let panic_msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                    format!("Ingestion batch panicked: {}", s)
                } else if let Some(s) = panic_info.downcast_ref::<String>() {
                    format!("Ingestion batch panicked: {}", s)
                } else {
                    "Ingestion batch panicked with unknown error".to_string()
                };
                tracing::error!("{}", panic_msg);
                status.last_error = Some(panic_msg.clone());
                Err(BatchError::Failed(anyhow::anyhow!(panic_msg)))
            }
        }
    }

    async fn run_batch(&self) -> Result<BatchSummary> {
        let started_at = Utc::now();
        let clinic_ids = self.clinics.list_clinic_ids().await?;
        tracing::info!("Ingesting {} clinics", clinic_ids.len());

        let mut clinics = Vec::with_capacity(clinic_ids.len());
        for clinic_id in clinic_ids {
            let result = self.ingest_clinic(&clinic_id).await;
            clinics.push(summarize(&clinic_id, &result));
        }

        let summary = BatchSummary {
            started_at,
            finished_at: Utc::now(),
            clinics,
        };
        tracing::info!(
            "Ingestion batch complete: {} clinics, {} chunks, {} failures",
            summary.clinics.len(),
            summary.chunks_processed(),
            summary.failures()
        );
        Ok(summary)
    }

    pub fn start_scheduler(manager: Arc<Self>, interval: Duration) {
        if interval.is_zero() {
            return;
        }
        tokio::spawn(async move {
            // let the server come up before the first batch
            tokio::time::sleep(Duration::from_secs(60)).await;

            loop {
                tracing::info!("Scheduled ingestion starting...");
                if let Err(e) = manager.ingest_all().await {
                    tracing::error!("Scheduled ingestion failed: {:#}", e);
                }
                tokio::time::sleep(interval).await;
            }
        });
    }
}

pub fn summarize(clinic_id: &str, result: &Result<IngestReport, IngestError>) -> ClinicRunSummary {
    let outcome = IngestOutcome::of(result);
    match result {
        Ok(report) => ClinicRunSummary {
            clinic_id: clinic_id.to_string(),
            outcome,
            chunks_processed: report.chunks_processed,
            chunks_skipped: report.skipped.len(),
            error: None,
        },
        Err(e) => ClinicRunSummary {
            clinic_id: clinic_id.to_string(),
            outcome,
            chunks_processed: 0,
            chunks_skipped: 0,
            error: Some(e.to_string()),
        },
    }
}

fn run_record(
    clinic_id: &str,
    started_at: DateTime<Utc>,
    result: &Result<IngestReport, IngestError>,
) -> IngestionRun {
    let outcome = IngestOutcome::of(result).as_str().to_string();
    match result {
        Ok(report) => IngestionRun {
            id: Uuid::new_v4(),
            clinic_id: clinic_id.to_string(),
            started_at: report.started_at,
            finished_at: report.finished_at,
            outcome,
            chunks_rendered: report.chunks_rendered as i32,
            chunks_processed: report.chunks_processed as i32,
            skipped: serde_json::to_value(&report.skipped).unwrap_or_default(),
            warnings: serde_json::to_value(&report.warnings).unwrap_or_default(),
        },
        Err(e) => IngestionRun {
            id: Uuid::new_v4(),
            clinic_id: clinic_id.to_string(),
            started_at,
            finished_at: Utc::now(),
            outcome,
            chunks_rendered: 0,
            chunks_processed: 0,
            skipped: serde_json::json!([]),
            warnings: serde_json::json!([e.to_string()]),
        },
    }
}
