use anyhow::{Context, Result};
use reqwest::Client;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::models::{Tally, VoteRequest};

/// Sends widget votes to the vote endpoint and loads tally snapshots
#[derive(Clone)]
pub struct VoteRelay {
    client: Client,
    endpoint: String,
}

impl VoteRelay {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
        }
    }

    /// Post one vote and wait for the endpoint to accept it
    pub async fn submit(&self, key: &str) -> Result<()> {
        debug!(key, endpoint = %self.endpoint, "Submitting vote");

        let response = self
            .client
            .post(&self.endpoint)
            .json(&VoteRequest::new(key))
            .send()
            .await
            .context("Failed to send vote")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Vote endpoint returned error: {} - {}", status, body);
        }

        info!(key, "Vote submitted");
        Ok(())
    }

    /// Submit in the background. Failures are logged and otherwise ignored
    /// so the caller can move on to the next round.
    pub fn submit_detached(&self, key: String) -> JoinHandle<()> {
        let relay = self.clone();
        tokio::spawn(async move {
            if let Err(err) = relay.submit(&key).await {
                warn!(key = %key, error = %format!("{:#}", err), "Vote submission failed");
            }
        })
    }

    /// Load a tally snapshot from an http(s) URL or a local file
    pub async fn load_snapshot(&self, source: &str) -> Result<Tally> {
        let text = if source.starts_with("http://") || source.starts_with("https://") {
            let response = self
                .client
                .get(source)
                .send()
                .await
                .with_context(|| format!("Failed to fetch snapshot: {}", source))?;

            let status = response.status();
            if !status.is_success() {
                anyhow::bail!("Snapshot request returned {}: {}", status, source);
            }

            response
                .text()
                .await
                .context("Failed to read snapshot body")?
        } else {
            tokio::fs::read_to_string(source)
                .await
                .with_context(|| format!("Failed to read snapshot file: {}", source))?
        };

        let tally = Tally::parse(&text)
            .with_context(|| format!("Failed to parse snapshot: {}", source))?;
        debug!(source, keys = tally.len(), "Loaded snapshot");

        Ok(tally)
    }
}
