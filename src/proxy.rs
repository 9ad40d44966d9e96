use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use crate::models::{ChatRelayPayload, ChatResponse};

/// Forwards chat messages to the workflow webhook that produces replies.
pub struct ChatRelay {
    client: Client,
    webhook_url: Option<String>,
}

impl ChatRelay {
    pub fn new(webhook_url: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build chat relay HTTP client")?;

        Ok(Self {
            client,
            webhook_url: webhook_url.filter(|url| !url.trim().is_empty()),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.webhook_url.is_some()
    }

    pub async fn relay(&self, payload: &ChatRelayPayload) -> Result<ChatResponse> {
        let Some(url) = &self.webhook_url else {
            anyhow::bail!("chat webhook is not configured");
        };

        let response = self.client.post(url).json(payload).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("chat webhook failed: {} - {}", status, error_text);
        }

        let reply: ChatResponse = response
            .json()
            .await
            .context("chat webhook returned an unexpected body")?;
        Ok(reply)
    }
}
