//! Core types for metrics-aggregator

use std::collections::BTreeMap;

/// Attribute holding the job a workload is scraped under
pub const JOB_NAME: &str = "job-name";

/// Attribute holding the metrics path, without leading slash
pub const ENDPOINT_PATH: &str = "endpoint-path";

/// Attribute holding the metrics port
pub const PORT: &str = "port";

/// Attribute holding the per-fetch timeout in seconds
pub const SCRAPE_TIMEOUT_SECONDS: &str = "scrape-timeout-seconds";

/// Attributes every descriptor starts from before label overrides apply
pub const DEFAULT_ATTRIBUTES: [(&str, &str); 3] = [
    (ENDPOINT_PATH, "metrics"),
    (PORT, "80"),
    (SCRAPE_TIMEOUT_SECONDS, "5"),
];

/// A workload as reported by the cluster inventory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Workload {
    pub name: String,
    /// Pod IP; `None` while the pod has not been scheduled
    pub address: Option<String>,
    pub namespace: String,
    /// `None` when the workload carries no labels at all
    pub labels: Option<BTreeMap<String, String>>,
}

/// One discovered, participating workload instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointDescriptor {
    pub name: String,
    pub address: String,
    pub namespace: String,
    pub attributes: BTreeMap<String, String>,
}

impl EndpointDescriptor {
    /// Job name; never empty for a constructed descriptor
    pub fn job_name(&self) -> &str {
        self.attribute(JOB_NAME).unwrap_or_default()
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}
