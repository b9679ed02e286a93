//! Kubernetes workload inventory

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::ListParams;
use kube::{Api, Client};

use crate::types::Workload;
use crate::Result;

use super::WorkloadInventory;

/// Lists pods across all namespaces
pub struct KubeInventory {
    pods: Api<Pod>,
}

impl KubeInventory {
    /// Connect using the in-cluster service account, falling back to the local kubeconfig
    pub async fn connect() -> Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self::new(client))
    }

    pub fn new(client: Client) -> Self {
        Self {
            pods: Api::all(client),
        }
    }
}

#[async_trait]
impl WorkloadInventory for KubeInventory {
    async fn list_workloads(&self) -> Result<Vec<Workload>> {
        let pods = self.pods.list(&ListParams::default()).await?;
        Ok(pods.items.into_iter().map(pod_to_workload).collect())
    }
}

fn pod_to_workload(pod: Pod) -> Workload {
    Workload {
        name: pod.metadata.name.unwrap_or_default(),
        address: pod.status.and_then(|status| status.pod_ip),
        namespace: pod.metadata.namespace.unwrap_or_default(),
        labels: pod.metadata.labels,
    }
}
