//! Label parsing: turns a workload's labels into an endpoint descriptor

use std::collections::BTreeMap;

use crate::types::{EndpointDescriptor, Workload, DEFAULT_ATTRIBUTES, JOB_NAME};

/// Default prefix reserved for discovery labels
pub const DEFAULT_LABEL_PREFIX: &str = "metrics-aggregator.apawel.me";

/// Build the attribute set for a label map.
///
/// Returns `None` unless `<prefix>/job-name` is present with a non-empty value.
/// Every `<prefix>/<key>` label overrides the default attribute `<key>`.
pub fn parse_labels(
    prefix: &str,
    labels: Option<&BTreeMap<String, String>>,
) -> Option<BTreeMap<String, String>> {
    let labels = labels?;

    let marker = format!("{}/{}", prefix, JOB_NAME);
    if labels.get(&marker).map_or(true, |job| job.is_empty()) {
        return None;
    }

    let mut attributes: BTreeMap<String, String> = DEFAULT_ATTRIBUTES
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    for (key, value) in labels {
        let Some(rest) = key
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix('/'))
        else {
            continue;
        };
        attributes.insert(rest.to_string(), value.clone());
    }

    Some(attributes)
}

impl EndpointDescriptor {
    /// Descriptor for a participating workload, or `None` if it does not
    /// participate or has no address yet.
    pub fn from_workload(prefix: &str, workload: &Workload) -> Option<Self> {
        let attributes = parse_labels(prefix, workload.labels.as_ref())?;

        let Some(address) = workload.address.clone().filter(|a| !a.is_empty()) else {
            tracing::debug!(
                pod = %workload.name,
                namespace = %workload.namespace,
                "Skipping labelled workload without an address"
            );
            return None;
        };

        Some(Self {
            name: workload.name.clone(),
            address,
            namespace: workload.namespace.clone(),
            attributes,
        })
    }
}
