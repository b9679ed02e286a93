//! Scrape orchestration
//!
//! Fetches every endpoint of a job with bounded concurrency. Each fetch has
//! its own timeout; a failed endpoint is reported as such and never affects
//! its siblings.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};

use crate::discovery::DiscoverySnapshot;
use crate::exposition::{self, Line, MalformedLinePolicy};
use crate::types::{EndpointDescriptor, ENDPOINT_PATH, PORT, SCRAPE_TIMEOUT_SECONDS};
use crate::{Error, Result};

pub mod http;

pub use http::{HttpFetcher, MetricsFetcher};

/// Default number of concurrent fetches per query
pub const DEFAULT_SCRAPE_WORKERS: usize = 2;

/// Outcome of scraping one endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScrapeOutcome {
    /// Body of the response, one entry per line
    Lines(Vec<String>),
    /// Timeout, transport error or non-2xx response
    Failed,
}

/// One endpoint's result for one query
#[derive(Debug, Clone)]
pub struct ScrapeResult {
    pub endpoint: EndpointDescriptor,
    pub outcome: ScrapeOutcome,
}

impl ScrapeResult {
    /// Relabel this result into exposition lines.
    ///
    /// A failed scrape yields only the `up 0` sample.
    pub fn into_lines(self, policy: MalformedLinePolicy) -> Result<Vec<Line>> {
        match &self.outcome {
            ScrapeOutcome::Lines(raw) => {
                exposition::relabel(raw.iter().map(String::as_str), &self.endpoint, policy)
            }
            ScrapeOutcome::Failed => Ok(vec![exposition::failure_sample(&self.endpoint)]),
        }
    }
}

/// Where and how long to fetch an endpoint's metrics
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapeTarget {
    pub url: String,
    pub timeout: Duration,
}

impl ScrapeTarget {
    /// Build the target from an endpoint's `port`, `endpoint-path` and
    /// `scrape-timeout-seconds` attributes
    pub fn for_endpoint(endpoint: &EndpointDescriptor) -> Result<Self> {
        let port: u16 = endpoint
            .attribute(PORT)
            .unwrap_or_default()
            .parse()
            .map_err(|_| {
                Error::scrape(format!(
                    "invalid port '{}'",
                    endpoint.attribute(PORT).unwrap_or_default()
                ))
            })?;

        let raw_timeout = endpoint.attribute(SCRAPE_TIMEOUT_SECONDS).unwrap_or_default();
        let timeout = raw_timeout
            .parse::<f64>()
            .ok()
            .filter(|secs| *secs > 0.0)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .ok_or_else(|| Error::scrape(format!("invalid scrape timeout '{}'", raw_timeout)))?;

        let path = endpoint.attribute(ENDPOINT_PATH).unwrap_or_default();

        Ok(Self {
            url: format!(
                "http://{}:{}/{}",
                endpoint.address,
                port,
                path.trim_start_matches('/')
            ),
            timeout,
        })
    }
}

/// Fans a job's fetches out over a bounded number of workers
#[derive(Clone)]
pub struct Scraper {
    fetcher: Arc<dyn MetricsFetcher>,
    workers: usize,
}

impl Scraper {
    pub fn new(fetcher: Arc<dyn MetricsFetcher>, workers: usize) -> Self {
        Self {
            fetcher,
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Scrape every endpoint of `job`.
    ///
    /// Results come back in completion order.
    pub async fn scrape(
        &self,
        job: &str,
        snapshot: &DiscoverySnapshot,
    ) -> Result<Vec<ScrapeResult>> {
        let endpoints = snapshot
            .endpoints(job)
            .ok_or_else(|| Error::JobNotFound(job.to_string()))?;

        tracing::debug!(job, endpoints = endpoints.len(), workers = self.workers, "Scraping job");

        if self.workers < 2 {
            let mut results = Vec::with_capacity(endpoints.len());
            for endpoint in endpoints {
                results.push(self.scrape_endpoint(endpoint).await);
            }
            return Ok(results);
        }

        let fetches: Vec<_> = endpoints
            .iter()
            .map(|endpoint| self.scrape_endpoint(endpoint))
            .collect();
        let results: Vec<ScrapeResult> = stream::iter(fetches)
            .buffer_unordered(self.workers)
            .collect()
            .await;

        Ok(results)
    }

    async fn scrape_endpoint(&self, endpoint: &EndpointDescriptor) -> ScrapeResult {
        tracing::debug!(
            namespace = %endpoint.namespace,
            pod = %endpoint.name,
            job = %endpoint.job_name(),
            "Checking metrics"
        );

        let outcome = match ScrapeTarget::for_endpoint(endpoint) {
            Ok(target) => match self.fetcher.fetch(&target.url, target.timeout).await {
                Ok(body) => ScrapeOutcome::Lines(body.lines().map(str::to_string).collect()),
                Err(e) => {
                    tracing::warn!(
                        namespace = %endpoint.namespace,
                        pod = %endpoint.name,
                        url = %target.url,
                        error = %e,
                        "Fetching metrics failed"
                    );
                    ScrapeOutcome::Failed
                }
            },
            Err(e) => {
                tracing::warn!(
                    namespace = %endpoint.namespace,
                    pod = %endpoint.name,
                    error = %e,
                    "Endpoint attributes do not form a scrape target"
                );
                ScrapeOutcome::Failed
            }
        };

        ScrapeResult {
            endpoint: endpoint.clone(),
            outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::DEFAULT_LABEL_PREFIX;
    use crate::types::Workload;
    use async_trait::async_trait;
    use std::collections::{BTreeMap, HashMap};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves canned bodies by URL; unknown URLs fail
    struct CannedFetcher {
        bodies: HashMap<String, String>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl CannedFetcher {
        fn new(bodies: &[(&str, &str)]) -> Self {
            Self {
                bodies: bodies
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl MetricsFetcher for CannedFetcher {
        async fn fetch(&self, url: &str, _timeout: Duration) -> Result<String> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            self.bodies
                .get(url)
                .cloned()
                .ok_or_else(|| Error::scrape(format!("connection refused: {}", url)))
        }
    }

    fn workload(name: &str, ip: &str, extra: &[(&str, &str)]) -> Workload {
        let mut labels = BTreeMap::new();
        labels.insert(format!("{}/job-name", DEFAULT_LABEL_PREFIX), "api".to_string());
        for (k, v) in extra {
            labels.insert(format!("{}/{}", DEFAULT_LABEL_PREFIX, k), v.to_string());
        }
        Workload {
            name: name.to_string(),
            address: Some(ip.to_string()),
            namespace: "prod".to_string(),
            labels: Some(labels),
        }
    }

    #[test]
    fn test_target_from_defaults() {
        let snapshot =
            DiscoverySnapshot::build(DEFAULT_LABEL_PREFIX, &[workload("api-0", "10.0.0.5", &[])]);
        let endpoint = &snapshot.endpoints("api").unwrap()[0];

        let target = ScrapeTarget::for_endpoint(endpoint).unwrap();
        assert_eq!(target.url, "http://10.0.0.5:80/metrics");
        assert_eq!(target.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_target_from_overrides() {
        let snapshot = DiscoverySnapshot::build(
            DEFAULT_LABEL_PREFIX,
            &[workload(
                "api-0",
                "10.0.0.5",
                &[("port", "9000"), ("endpoint-path", "stats"), ("scrape-timeout-seconds", "0.5")],
            )],
        );
        let endpoint = &snapshot.endpoints("api").unwrap()[0];

        let target = ScrapeTarget::for_endpoint(endpoint).unwrap();
        assert_eq!(target.url, "http://10.0.0.5:9000/stats");
        assert_eq!(target.timeout, Duration::from_millis(500));
    }

    #[test]
    fn test_target_rejects_bad_attributes() {
        let snapshot = DiscoverySnapshot::build(
            DEFAULT_LABEL_PREFIX,
            &[
                workload("bad-port", "10.0.0.1", &[("port", "http")]),
                workload("bad-timeout", "10.0.0.2", &[("scrape-timeout-seconds", "0")]),
                workload("huge-timeout", "10.0.0.3", &[("scrape-timeout-seconds", "1e20")]),
                workload("nan-timeout", "10.0.0.4", &[("scrape-timeout-seconds", "NaN")]),
                workload("inf-timeout", "10.0.0.5", &[("scrape-timeout-seconds", "inf")]),
            ],
        );

        let endpoints = snapshot.endpoints("api").unwrap();
        assert_eq!(endpoints.len(), 5);
        for endpoint in endpoints {
            assert!(ScrapeTarget::for_endpoint(endpoint).is_err());
        }
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let scraper = Scraper::new(Arc::new(CannedFetcher::new(&[])), 2);
        let snapshot = DiscoverySnapshot::empty();

        let err = scraper.scrape("missing", &snapshot).await.unwrap_err();
        assert!(matches!(err, Error::JobNotFound(job) if job == "missing"));
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let fetcher = Arc::new(CannedFetcher::new(&[(
            "http://10.0.0.1:80/metrics",
            "requests_total 1\n",
        )]));
        let scraper = Scraper::new(fetcher, 2);
        let snapshot = DiscoverySnapshot::build(
            DEFAULT_LABEL_PREFIX,
            &[
                workload("api-0", "10.0.0.1", &[]),
                workload("api-1", "10.0.0.2", &[]),
                workload("api-2", "10.0.0.3", &[("port", "nope")]),
                workload("api-3", "10.0.0.1", &[("scrape-timeout-seconds", "1e20")]),
            ],
        );

        let mut results = scraper.scrape("api", &snapshot).await.unwrap();
        results.sort_by(|a, b| a.endpoint.name.cmp(&b.endpoint.name));

        assert_eq!(results.len(), 4);
        assert_eq!(
            results[0].outcome,
            ScrapeOutcome::Lines(vec!["requests_total 1".to_string()])
        );
        assert_eq!(results[1].outcome, ScrapeOutcome::Failed);
        assert_eq!(results[2].outcome, ScrapeOutcome::Failed);
        // Same address as api-0, but the timeout cannot be represented
        assert_eq!(results[3].outcome, ScrapeOutcome::Failed);

        let lines = results.remove(1).into_lines(MalformedLinePolicy::Reject).unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(
            lines[0].to_string(),
            r#"up{instance="api-1",job="api",pod_namespace="prod",pod_ip="10.0.0.2"} 0"#
        );
    }

    #[tokio::test]
    async fn test_worker_limit_bounds_concurrency() {
        let workloads: Vec<Workload> = (0..6)
            .map(|i| workload(&format!("api-{}", i), &format!("10.0.0.{}", i), &[]))
            .collect();
        let snapshot = DiscoverySnapshot::build(DEFAULT_LABEL_PREFIX, &workloads);

        for workers in [1, 3] {
            let fetcher = Arc::new(CannedFetcher::new(&[]));
            let scraper = Scraper::new(fetcher.clone(), workers);

            let results = scraper.scrape("api", &snapshot).await.unwrap();
            assert_eq!(results.len(), 6);
            assert!(fetcher.max_in_flight.load(Ordering::SeqCst) <= workers);
        }
    }
}
