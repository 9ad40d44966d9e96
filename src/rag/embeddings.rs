use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::config::EmbeddingSettings;

/// Turns a piece of text into a fixed-length vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Client for an OpenAI-compatible `/embeddings` endpoint.
pub struct HostedEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    dimensions: usize,
    send_dimensions: bool,
    max_retries: usize,
}

impl HostedEmbedder {
    pub fn new(settings: &EmbeddingSettings) -> Result<Self> {
        anyhow::ensure!(!settings.api_key.trim().is_empty(), "missing embedding API key");
        anyhow::ensure!(!settings.model.trim().is_empty(), "missing embedding model name");

        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", settings.api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).context("invalid embedding API key")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .default_headers(headers)
            .build()
            .context("failed to build embedding HTTP client")?;

        tracing::info!(
            "Embedding client ready: model={} dimensions={}",
            settings.model,
            settings.dimensions
        );

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", settings.base_url.trim_end_matches('/')),
            model: settings.model.clone(),
            dimensions: settings.dimensions,
            send_dimensions: settings.send_dimensions,
            max_retries: settings.max_retries,
        })
    }

    fn should_retry(status: StatusCode) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
    }

    fn is_retryable_error(err: &reqwest::Error) -> bool {
        err.is_timeout() || err.is_connect() || err.is_request()
    }

    fn retry_backoff(attempt: usize) -> Duration {
        let capped = attempt.min(5) as u32;
        Duration::from_millis(250 * (1 << capped))
    }

    async fn request_once(&self, text: &str) -> std::result::Result<Vec<f32>, Attempt> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: [text],
            dimensions: self.send_dimensions.then_some(self.dimensions),
        };

        let response = match self.client.post(&self.endpoint).json(&request).send().await {
            Ok(resp) => resp,
            Err(err) => {
                let retryable = Self::is_retryable_error(&err);
                return Err(Attempt { error: err.into(), retryable });
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(Attempt {
                error: anyhow::anyhow!("embedding request failed ({}): {}", status, body),
                retryable: Self::should_retry(status),
            });
        }

        let parsed: EmbeddingResponse = response.json().await.map_err(|e| Attempt {
            error: anyhow::Error::new(e).context("failed to parse embedding response"),
            retryable: false,
        })?;

        let embedding = parsed
            .data
            .into_iter()
            .min_by_key(|entry| entry.index)
            .map(|entry| entry.embedding)
            .ok_or_else(|| Attempt {
                error: anyhow::anyhow!("embedding service returned no vectors"),
                retryable: false,
            })?;

        check_dimensions(&embedding, self.dimensions).map_err(|error| Attempt {
            error,
            retryable: false,
        })?;
        Ok(embedding)
    }
}

struct Attempt {
    error: anyhow::Error,
    retryable: bool,
}

#[async_trait]
impl Embedder for HostedEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut attempt = 0usize;
        loop {
            match self.request_once(text).await {
                Ok(embedding) => return Ok(embedding),
                Err(failure) if failure.retryable && attempt < self.max_retries => {
                    attempt += 1;
                    let backoff = Self::retry_backoff(attempt);
                    tracing::debug!(
                        "embedding attempt {} failed, retrying in {:?}: {:#}",
                        attempt,
                        backoff,
                        failure.error
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(failure) => return Err(failure.error),
            }
        }
    }
}

pub fn check_dimensions(embedding: &[f32], expected: usize) -> Result<()> {
    anyhow::ensure!(
        embedding.len() == expected,
        "embedding has {} dimensions, expected {}",
        embedding.len(),
        expected
    );
    Ok(())
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: [&'a str; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}
