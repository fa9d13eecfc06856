//! HTTP relay: POSTs each raw inbound segment to an aggregator.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;

use crate::service::Relay;

#[derive(Clone)]
pub struct HttpRelay {
    url: String,
    client: Client,
}

impl HttpRelay {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build relay client")?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Relay for HttpRelay {
    async fn post_segment(&self, raw: &[u8]) -> Result<()> {
        self.client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(raw.to_vec())
            .send()
            .await
            .with_context(|| format!("failed to reach relay at {}", self.url))?
            .error_for_status()
            .context("relay rejected segment")?;
        Ok(())
    }
}
