//! Workload inspection across the fleet.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::{ControlError, ControlResult};
use crate::types::ClusterId;

/// Pod lifecycle phase, as Kubernetes reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodPhase {
    /// Accepted but not yet scheduled or pulling images.
    Pending,
    /// Bound and running.
    Running,
    /// All containers terminated successfully.
    Succeeded,
    /// At least one container terminated in failure.
    Failed,
    /// State could not be obtained.
    Unknown,
}

/// One pod of a cluster's workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodStatus {
    /// Pod name.
    pub name: String,
    /// Namespace the pod runs in.
    pub namespace: String,
    /// Current phase.
    pub phase: PodPhase,
    /// Container restarts observed.
    pub restarts: u32,
}

impl PodStatus {
    /// A pod in the given phase with no restarts.
    #[must_use]
    pub fn new(name: impl Into<String>, namespace: impl Into<String>, phase: PodPhase) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            phase,
            restarts: 0,
        }
    }
}

/// The workload of one cluster in a fleet listing.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterWorkloads {
    /// Engine-side identifier.
    pub id: ClusterId,
    /// Cluster name.
    pub name: String,
    /// Pods visible in the cluster.
    pub pods: Vec<PodStatus>,
}

/// Lists workloads of clusters reachable through a kubeconfig.
#[async_trait]
pub trait WorkloadInspector: Send + Sync {
    /// List pods visible in the cluster.
    async fn list_pods(&self, cluster_name: &str, kube_config: &[u8])
        -> ControlResult<Vec<PodStatus>>;
}

/// In-memory inspector used by the test suites.
#[derive(Debug, Default)]
pub struct MockWorkloads {
    pods: DashMap<String, Vec<PodStatus>>,
    broken: DashMap<String, String>,
}

impl MockWorkloads {
    /// Create an empty inspector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pods the named cluster reports.
    pub fn set_pods(&self, cluster_name: &str, pods: Vec<PodStatus>) {
        self.pods.insert(cluster_name.to_owned(), pods);
    }

    /// Make listings on the named cluster fail.
    pub fn break_cluster(&self, cluster_name: &str, message: impl Into<String>) {
        self.broken.insert(cluster_name.to_owned(), message.into());
    }
}

#[async_trait]
impl WorkloadInspector for MockWorkloads {
    async fn list_pods(
        &self,
        cluster_name: &str,
        _kube_config: &[u8],
    ) -> ControlResult<Vec<PodStatus>> {
        if let Some(message) = self.broken.get(cluster_name) {
            return Err(ControlError::provider(message.value().clone()));
        }
        Ok(self
            .pods
            .get(cluster_name)
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn listing_reports_configured_pods() {
        let inspector = MockWorkloads::new();
        inspector.set_pods(
            "web_prod",
            vec![
                PodStatus::new("api-0", "default", PodPhase::Running),
                PodStatus::new("worker-0", "jobs", PodPhase::Pending),
            ],
        );

        let pods = inspector
            .list_pods("web_prod", b"kubeconfig")
            .await
            .expect("listing failed");
        assert_eq!(pods.len(), 2);
        assert_eq!(pods[0].phase, PodPhase::Running);

        // Unknown clusters report an empty workload rather than an error.
        let empty = inspector
            .list_pods("other", b"kubeconfig")
            .await
            .expect("listing failed");
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn broken_cluster_fails_listing() {
        let inspector = MockWorkloads::new();
        inspector.break_cluster("web_prod", "apiserver unreachable");
        assert!(inspector.list_pods("web_prod", b"kubeconfig").await.is_err());
    }
}
