// src/ct_log/client.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use std::time::Duration;
use tracing::debug;

use super::types::{GetEntriesResponse, RawEntry, SignedTreeHead};

/// The two RFC 6962 operations the ingestion worker depends on. A trait so
/// tests can substitute a fake without a real log behind it; `HttpLogClient`
/// is the only production implementation.
#[async_trait]
pub trait LogClient: Send + Sync {
    async fn get_sth(&self) -> Result<SignedTreeHead>;
    async fn get_entries(&self, start: u64, end: u64) -> Result<Vec<RawEntry>>;
}

/// HTTP client for a single Certificate Transparency log's RFC 6962 API.
pub struct HttpLogClient {
    base_url: String,
    http_client: reqwest::Client,
}

impl HttpLogClient {
    pub fn new(base_url: String) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .gzip(true)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            base_url,
            http_client,
        })
    }
}

#[async_trait]
impl LogClient for HttpLogClient {
    /// `GET {base_url}/ct/v1/get-sth`
    async fn get_sth(&self) -> Result<SignedTreeHead> {
        let url = format!("{}/ct/v1/get-sth", self.base_url);
        debug!("fetching STH from {}", url);

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .context("failed to fetch STH")?;

        if !response.status().is_success() {
            anyhow::bail!(
                "get-sth request failed with status {}: {}",
                response.status(),
                response.text().await.unwrap_or_default()
            );
        }

        let sth: SignedTreeHead = response.json().await.context("failed to parse STH JSON")?;

        debug!(
            "STH received: tree_size={}, timestamp={}",
            sth.tree_size, sth.timestamp
        );

        Ok(sth)
    }

    /// `GET {base_url}/ct/v1/get-entries?start={start}&end={end}`
    ///
    /// The log is permitted to return fewer entries than requested; callers
    /// must not assume `result.len() == end - start + 1`.
    async fn get_entries(&self, start: u64, end: u64) -> Result<Vec<RawEntry>> {
        let url = format!(
            "{}/ct/v1/get-entries?start={}&end={}",
            self.base_url, start, end
        );
        debug!("fetching entries {}-{} from {}", start, end, self.base_url);

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .context("failed to fetch entries")?;

        if !response.status().is_success() {
            anyhow::bail!(
                "get-entries request failed with status {}: {}",
                response.status(),
                response.text().await.unwrap_or_default()
            );
        }

        let wire: GetEntriesResponse = response
            .json()
            .await
            .context("failed to parse get-entries JSON")?;

        let entries = wire
            .entries
            .into_iter()
            .map(|e| {
                let leaf_input = base64::engine::general_purpose::STANDARD
                    .decode(e.leaf_input)
                    .context("failed to decode base64 leaf_input")?;
                let extra_data = base64::engine::general_purpose::STANDARD
                    .decode(e.extra_data)
                    .context("failed to decode base64 extra_data")?;
                Ok(RawEntry {
                    leaf_input,
                    extra_data,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        debug!("received {} entries from {}", entries.len(), self.base_url);

        Ok(entries)
    }
}
