//! HTTP fetching of metrics payloads

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::{Error, Result};

/// Retrieves the exposition text served at a URL
#[async_trait]
pub trait MetricsFetcher: Send + Sync {
    /// GET `url`, failing on timeout, transport errors and non-2xx status
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<String>;
}

/// `reqwest`-backed fetcher sharing one connection pool across queries
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("metrics-aggregator/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MetricsFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<String> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::scrape(format!("timed out after {:?} getting metrics", timeout))
                } else {
                    Error::scrape(format!("request failed: {}", e))
                }
            })?
            .error_for_status()?;

        Ok(response.text().await?)
    }
}
