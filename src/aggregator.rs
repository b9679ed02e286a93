//! Query pipeline: scrape a job, relabel each endpoint, merge the results

use std::sync::Arc;
use std::time::Instant;

use crate::discovery::{DiscoveryCache, DiscoverySnapshot};
use crate::exposition::{self, AggregatedDocument, MalformedLinePolicy};
use crate::scrape::Scraper;
use crate::Result;

pub struct MetricsAggregator {
    cache: Arc<DiscoveryCache>,
    scraper: Scraper,
    policy: MalformedLinePolicy,
}

impl MetricsAggregator {
    pub fn new(cache: Arc<DiscoveryCache>, scraper: Scraper, policy: MalformedLinePolicy) -> Self {
        Self {
            cache,
            scraper,
            policy,
        }
    }

    /// Scrape and merge every endpoint of `job` from the current snapshot
    pub async fn aggregate(&self, job: &str) -> Result<AggregatedDocument> {
        let snapshot = self.cache.current();
        self.aggregate_snapshot(job, &snapshot).await
    }

    /// Same as [`aggregate`](Self::aggregate) against an explicit snapshot
    pub async fn aggregate_snapshot(
        &self,
        job: &str,
        snapshot: &DiscoverySnapshot,
    ) -> Result<AggregatedDocument> {
        let start = Instant::now();

        let results = self.scraper.scrape(job, snapshot).await?;
        let endpoints = results.len();

        let mut lines = Vec::new();
        for result in results {
            lines.extend(result.into_lines(self.policy)?);
        }

        let document = exposition::merge(lines);

        tracing::debug!(
            job,
            endpoints,
            lines = document.lines().len(),
            took_ms = start.elapsed().as_millis() as u64,
            "Aggregated job metrics"
        );

        Ok(document)
    }

    pub fn cache(&self) -> &Arc<DiscoveryCache> {
        &self.cache
    }
}
