//! Workload discovery
//!
//! Lists workloads from the cluster inventory, keeps the ones carrying the
//! discovery labels and publishes them grouped by job as an immutable snapshot.
//! Readers load the current snapshot without locking; the refresher swaps in a
//! new one each cycle.

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::types::{EndpointDescriptor, Workload};
use crate::Result;

pub mod k8s;
pub mod labels;
pub mod refresher;

pub use labels::{parse_labels, DEFAULT_LABEL_PREFIX};
pub use refresher::DiscoveryRefresher;

/// Source of the cluster's workload list
#[async_trait]
pub trait WorkloadInventory: Send + Sync {
    /// List every workload cluster-wide
    async fn list_workloads(&self) -> Result<Vec<Workload>>;
}

/// One fully built generation of the endpoint index
#[derive(Debug, Clone)]
pub struct DiscoverySnapshot {
    jobs: BTreeMap<String, Vec<EndpointDescriptor>>,
    generated_at: DateTime<Utc>,
}

impl DiscoverySnapshot {
    /// Group participating workloads by job, keeping inventory order per job
    pub fn build(prefix: &str, workloads: &[Workload]) -> Self {
        let mut jobs: BTreeMap<String, Vec<EndpointDescriptor>> = BTreeMap::new();

        for workload in workloads {
            let Some(descriptor) = EndpointDescriptor::from_workload(prefix, workload) else {
                continue;
            };

            tracing::debug!(
                pod = %descriptor.name,
                namespace = %descriptor.namespace,
                address = %descriptor.address,
                job = %descriptor.job_name(),
                "Discovered endpoint"
            );

            jobs.entry(descriptor.job_name().to_string())
                .or_default()
                .push(descriptor);
        }

        Self {
            jobs,
            generated_at: Utc::now(),
        }
    }

    pub fn empty() -> Self {
        Self {
            jobs: BTreeMap::new(),
            generated_at: Utc::now(),
        }
    }

    /// Endpoints of a job, or `None` if the job is unknown
    pub fn endpoints(&self, job: &str) -> Option<&[EndpointDescriptor]> {
        self.jobs.get(job).map(Vec::as_slice)
    }

    pub fn jobs(&self) -> impl Iterator<Item = (&str, &[EndpointDescriptor])> {
        self.jobs.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    pub fn endpoint_count(&self) -> usize {
        self.jobs.values().map(Vec::len).sum()
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }
}

/// Holder of the current discovery snapshot
pub struct DiscoveryCache {
    inventory: Arc<dyn WorkloadInventory>,
    label_prefix: String,
    current: ArcSwap<DiscoverySnapshot>,
    refreshing: Mutex<()>,
}

impl DiscoveryCache {
    /// Create the cache and build its first snapshot before returning
    pub async fn initialize(
        inventory: Arc<dyn WorkloadInventory>,
        label_prefix: impl Into<String>,
    ) -> Result<Self> {
        let label_prefix = label_prefix.into();
        let workloads = inventory.list_workloads().await?;
        let snapshot = DiscoverySnapshot::build(&label_prefix, &workloads);

        tracing::info!(
            jobs = snapshot.job_count(),
            endpoints = snapshot.endpoint_count(),
            "Initial discovery snapshot built"
        );

        Ok(Self {
            inventory,
            label_prefix,
            current: ArcSwap::from_pointee(snapshot),
            refreshing: Mutex::new(()),
        })
    }

    /// Current snapshot; never blocks on a running refresh
    pub fn current(&self) -> Arc<DiscoverySnapshot> {
        self.current.load_full()
    }

    /// Rebuild and publish a snapshot.
    ///
    /// Returns `Ok(None)` without touching the inventory if another refresh
    /// is still in flight. On error the previous snapshot stays current.
    pub async fn refresh(&self) -> Result<Option<Arc<DiscoverySnapshot>>> {
        let Ok(_guard) = self.refreshing.try_lock() else {
            tracing::debug!("Discovery refresh already in flight, skipping");
            return Ok(None);
        };

        tracing::debug!("Starting discovery refresh");

        let workloads = self.inventory.list_workloads().await?;
        let snapshot = Arc::new(DiscoverySnapshot::build(&self.label_prefix, &workloads));
        self.current.store(snapshot.clone());

        tracing::debug!(
            jobs = snapshot.job_count(),
            endpoints = snapshot.endpoint_count(),
            "Discovery snapshot published"
        );

        Ok(Some(snapshot))
    }

    pub fn label_prefix(&self) -> &str {
        &self.label_prefix
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    fn workload(name: &str, ip: &str, job: Option<&str>) -> Workload {
        let labels = job.map(|job| {
            let mut labels = BTreeMap::new();
            labels.insert(
                format!("{}/job-name", DEFAULT_LABEL_PREFIX),
                job.to_string(),
            );
            labels
        });
        Workload {
            name: name.to_string(),
            address: Some(ip.to_string()),
            namespace: "default".to_string(),
            labels,
        }
    }

    struct FlakyInventory {
        workloads: Vec<Workload>,
        fail: AtomicBool,
        calls: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl WorkloadInventory for FlakyInventory {
        async fn list_workloads(&self) -> Result<Vec<Workload>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::inventory("api server unavailable"));
            }
            Ok(self.workloads.clone())
        }
    }

    #[test]
    fn test_snapshot_groups_by_job() {
        let workloads = vec![
            workload("api-0", "10.0.0.1", Some("api")),
            workload("db-0", "10.0.0.2", Some("db")),
            workload("sidecar", "10.0.0.3", None),
            workload("api-1", "10.0.0.4", Some("api")),
        ];

        let snapshot = DiscoverySnapshot::build(DEFAULT_LABEL_PREFIX, &workloads);

        assert_eq!(snapshot.job_count(), 2);
        assert_eq!(snapshot.endpoint_count(), 3);

        let api: Vec<&str> = snapshot
            .endpoints("api")
            .unwrap()
            .iter()
            .map(|e| e.name.as_str())
            .collect();
        assert_eq!(api, vec!["api-0", "api-1"]);
        assert!(snapshot.endpoints("sidecar").is_none());

        for (job, endpoints) in snapshot.jobs() {
            assert!(!endpoints.is_empty());
            assert!(endpoints.iter().all(|e| e.job_name() == job));
        }
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_last_snapshot() {
        let inventory = Arc::new(FlakyInventory {
            workloads: vec![workload("api-0", "10.0.0.1", Some("api"))],
            fail: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        });

        let cache = DiscoveryCache::initialize(inventory.clone(), DEFAULT_LABEL_PREFIX)
            .await
            .unwrap();
        let before = cache.current();

        inventory.fail.store(true, Ordering::SeqCst);
        assert!(cache.refresh().await.is_err());

        let after = cache.current();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(after.endpoint_count(), 1);
    }

    #[tokio::test]
    async fn test_initialize_fails_without_inventory() {
        let inventory = Arc::new(FlakyInventory {
            workloads: Vec::new(),
            fail: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        });

        assert!(DiscoveryCache::initialize(inventory, DEFAULT_LABEL_PREFIX)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_refresh_is_not_reentrant() {
        let inventory = Arc::new(FlakyInventory {
            workloads: vec![workload("api-0", "10.0.0.1", Some("api"))],
            fail: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(200),
        });

        let cache = DiscoveryCache::initialize(inventory.clone(), DEFAULT_LABEL_PREFIX)
            .await
            .unwrap();

        let (first, second) = tokio::join!(cache.refresh(), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cache.refresh().await
        });

        assert!(first.unwrap().is_some());
        assert!(second.unwrap().is_none());
        // one call for initialize, one for the refresh that ran
        assert_eq!(inventory.calls.load(Ordering::SeqCst), 2);
    }
}
