//! An in-memory cloud implementing every provider API.
//!
//! Backs the test suites and local development. Failures can be injected
//! per operation or per cluster, and an artificial latency can be applied
//! to exercise timeout handling.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::{ControlError, ControlResult};
use crate::types::{CloudProvider, ProviderRef};

use super::amazon::{EksApi, EksCreatePayload, EksUpdatePayload};
use super::azure::{AksApi, ManagedClusterDocument};
use super::google::{GkeApi, GkeCreatePayload, GkeUpdatePayload};
use super::ProviderHealth;

/// Operations that can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    /// Cluster creation.
    Create,
    /// Health lookups.
    Health,
    /// Kubeconfig fetches.
    Credentials,
    /// Node pool updates.
    Update,
    /// Cluster deletion.
    Delete,
}

/// Provider-side state of one mock cluster.
#[derive(Debug, Clone)]
pub struct MockManagedCluster {
    /// Cloud the cluster was created on.
    pub cloud: CloudProvider,
    /// Provider location.
    pub location: String,
    /// Provider-native state string.
    pub state: String,
    /// Total node count across pools.
    pub node_count: u32,
    /// The payload the cluster was created or last updated with.
    pub payload: serde_json::Value,
}

/// In-memory cloud used by the test suites.
#[derive(Debug, Default)]
pub struct MockCloud {
    clusters: DashMap<String, MockManagedCluster>,
    broken: DashMap<String, String>,
    fail_ops: DashMap<MockOp, String>,
    latency_ms: AtomicU64,
    credential_fetches: AtomicUsize,
}

impl MockCloud {
    /// Create an empty mock cloud.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call of the given operation fail with the message.
    pub fn fail(&self, op: MockOp, message: impl Into<String>) {
        self.fail_ops.insert(op, message.into());
    }

    /// Make every operation against the named cluster fail.
    pub fn break_cluster(&self, name: &str, message: impl Into<String>) {
        self.broken.insert(name.to_owned(), message.into());
    }

    /// Remove all injected failures.
    pub fn clear_failures(&self) {
        self.fail_ops.clear();
        self.broken.clear();
    }

    /// Delay every call by the given duration.
    pub fn set_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(millis, Ordering::Relaxed);
    }

    /// Whether the provider knows the named cluster.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.clusters.contains_key(name)
    }

    /// Provider-side view of the named cluster.
    #[must_use]
    pub fn cluster(&self, name: &str) -> Option<MockManagedCluster> {
        self.clusters.get(name).map(|entry| entry.value().clone())
    }

    /// Node count of the named cluster.
    #[must_use]
    pub fn node_count(&self, name: &str) -> Option<u32> {
        self.clusters.get(name).map(|entry| entry.node_count)
    }

    /// How many kubeconfig fetches the provider has served.
    #[must_use]
    pub fn credential_fetches(&self) -> usize {
        self.credential_fetches.load(Ordering::Relaxed)
    }

    async fn pause(&self) {
        let millis = self.latency_ms.load(Ordering::Relaxed);
        if millis > 0 {
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }
    }

    fn guard(&self, op: MockOp, name: &str) -> ControlResult<()> {
        if let Some(message) = self.fail_ops.get(&op) {
            return Err(ControlError::provider(message.value().clone()));
        }
        if let Some(message) = self.broken.get(name) {
            return Err(ControlError::provider(message.value().clone()));
        }
        Ok(())
    }

    fn register(
        &self,
        cloud: CloudProvider,
        name: &str,
        location: &str,
        node_count: u32,
        payload: serde_json::Value,
    ) -> ProviderRef {
        self.clusters.insert(
            name.to_owned(),
            MockManagedCluster {
                cloud,
                location: location.to_owned(),
                state: "Running".to_owned(),
                node_count,
                payload,
            },
        );
        ProviderRef::new(format!("mock/{cloud}/{name}"))
    }

    fn health_of(&self, name: &str) -> ControlResult<ProviderHealth> {
        self.clusters
            .get(name)
            .map(|entry| ProviderHealth {
                state: entry.state.clone(),
                node_count: entry.node_count,
            })
            .ok_or_else(|| {
                ControlError::provider(format!("cluster {name} not found on provider"))
            })
    }

    fn reshape(
        &self,
        name: &str,
        node_count: u32,
        payload: serde_json::Value,
    ) -> ControlResult<()> {
        let mut entry = self.clusters.get_mut(name).ok_or_else(|| {
            ControlError::provider(format!("cluster {name} not found on provider"))
        })?;
        entry.node_count = node_count;
        entry.payload = payload;
        Ok(())
    }

    fn remove(&self, name: &str) -> ControlResult<()> {
        self.clusters.remove(name).ok_or_else(|| {
            ControlError::provider(format!("cluster {name} not found on provider"))
        })?;
        Ok(())
    }

    fn credentials_for(&self, name: &str) -> ControlResult<Vec<u8>> {
        if !self.clusters.contains_key(name) {
            return Err(ControlError::provider(format!(
                "cluster {name} not found on provider"
            )));
        }
        self.credential_fetches.fetch_add(1, Ordering::Relaxed);
        Ok(kube_config_bytes(name))
    }

    fn encode<T: serde::Serialize>(payload: &T) -> ControlResult<serde_json::Value> {
        serde_json::to_value(payload).map_err(|err| ControlError::serialisation(err.to_string()))
    }
}

fn kube_config_bytes(name: &str) -> Vec<u8> {
    format!(
        "apiVersion: v1\nkind: Config\nclusters:\n- name: {name}\n  cluster:\n    server: https://{name}.mock.invalid\n"
    )
    .into_bytes()
}

#[async_trait]
impl EksApi for MockCloud {
    async fn create_cluster(&self, payload: &EksCreatePayload) -> ControlResult<ProviderRef> {
        self.pause().await;
        self.guard(MockOp::Create, &payload.name)?;
        let node_count = payload.node_pools.iter().map(|pool| pool.desired_capacity).sum();
        let value = Self::encode(payload)?;
        Ok(self.register(
            CloudProvider::Amazon,
            &payload.name,
            &payload.region,
            node_count,
            value,
        ))
    }

    async fn describe_cluster(&self, _region: &str, name: &str) -> ControlResult<ProviderHealth> {
        self.pause().await;
        self.guard(MockOp::Health, name)?;
        self.health_of(name)
    }

    async fn update_cluster(&self, payload: &EksUpdatePayload) -> ControlResult<()> {
        self.pause().await;
        self.guard(MockOp::Update, &payload.name)?;
        let node_count = payload.node_pools.iter().map(|pool| pool.desired_capacity).sum();
        let value = Self::encode(payload)?;
        self.reshape(&payload.name, node_count, value)
    }

    async fn delete_cluster(&self, _region: &str, name: &str) -> ControlResult<()> {
        self.pause().await;
        self.guard(MockOp::Delete, name)?;
        self.remove(name)
    }

    async fn cluster_credentials(&self, _region: &str, name: &str) -> ControlResult<Vec<u8>> {
        self.pause().await;
        self.guard(MockOp::Credentials, name)?;
        self.credentials_for(name)
    }
}

#[async_trait]
impl AksApi for MockCloud {
    async fn create_cluster(
        &self,
        _resource_group: &str,
        name: &str,
        document: &ManagedClusterDocument,
    ) -> ControlResult<ProviderRef> {
        self.pause().await;
        self.guard(MockOp::Create, name)?;
        let node_count = document
            .properties
            .agent_pool_profiles
            .iter()
            .map(|pool| pool.count)
            .sum();
        let value = Self::encode(document)?;
        Ok(self.register(CloudProvider::Azure, name, &document.location, node_count, value))
    }

    async fn get_cluster(
        &self,
        _resource_group: &str,
        name: &str,
    ) -> ControlResult<ProviderHealth> {
        self.pause().await;
        self.guard(MockOp::Health, name)?;
        self.health_of(name)
    }

    async fn update_cluster(
        &self,
        _resource_group: &str,
        name: &str,
        document: &ManagedClusterDocument,
    ) -> ControlResult<()> {
        self.pause().await;
        self.guard(MockOp::Update, name)?;
        let node_count = document
            .properties
            .agent_pool_profiles
            .iter()
            .map(|pool| pool.count)
            .sum();
        let value = Self::encode(document)?;
        self.reshape(name, node_count, value)
    }

    async fn delete_cluster(&self, _resource_group: &str, name: &str) -> ControlResult<()> {
        self.pause().await;
        self.guard(MockOp::Delete, name)?;
        self.remove(name)
    }

    async fn cluster_credentials(
        &self,
        _resource_group: &str,
        name: &str,
    ) -> ControlResult<Vec<u8>> {
        self.pause().await;
        self.guard(MockOp::Credentials, name)?;
        self.credentials_for(name)
    }
}

#[async_trait]
impl GkeApi for MockCloud {
    async fn create_cluster(&self, payload: &GkeCreatePayload) -> ControlResult<ProviderRef> {
        self.pause().await;
        self.guard(MockOp::Create, &payload.name)?;
        let node_count = payload
            .node_pools
            .iter()
            .map(|pool| pool.initial_node_count)
            .sum();
        let value = Self::encode(payload)?;
        Ok(self.register(
            CloudProvider::Google,
            &payload.name,
            &payload.zone,
            node_count,
            value,
        ))
    }

    async fn get_cluster(&self, _zone: &str, name: &str) -> ControlResult<ProviderHealth> {
        self.pause().await;
        self.guard(MockOp::Health, name)?;
        self.health_of(name)
    }

    async fn update_cluster(&self, payload: &GkeUpdatePayload) -> ControlResult<()> {
        self.pause().await;
        self.guard(MockOp::Update, &payload.name)?;
        let node_count = payload
            .node_pools
            .iter()
            .map(|pool| pool.initial_node_count)
            .sum();
        let value = Self::encode(payload)?;
        self.reshape(&payload.name, node_count, value)
    }

    async fn delete_cluster(&self, _zone: &str, name: &str) -> ControlResult<()> {
        self.pause().await;
        self.guard(MockOp::Delete, name)?;
        self.remove(name)
    }

    async fn cluster_credentials(&self, _zone: &str, name: &str) -> ControlResult<Vec<u8>> {
        self.pause().await;
        self.guard(MockOp::Credentials, name)?;
        self.credentials_for(name)
    }
}

#[cfg(test)]
mod tests {
    use super::super::amazon::{EksMasterSpec, EksPoolSpec};
    use super::*;

    fn eks_payload(name: &str) -> EksCreatePayload {
        EksCreatePayload {
            name: name.to_owned(),
            region: "eu-west-1".to_owned(),
            master: EksMasterSpec {
                instance_type: "m4.xlarge".to_owned(),
                image: "ami-06d1667f".to_owned(),
            },
            node_pools: vec![EksPoolSpec {
                name: "pool1".to_owned(),
                instance_type: "m4.xlarge".to_owned(),
                image: "ami-06d1667f".to_owned(),
                spot_price: "0.2".to_owned(),
                min_size: 1,
                max_size: 4,
                desired_capacity: 2,
            }],
        }
    }

    #[tokio::test]
    async fn create_then_describe() {
        let cloud = MockCloud::new();
        let provider_ref = EksApi::create_cluster(&cloud, &eks_payload("web_prod"))
            .await
            .expect("create failed");
        assert_eq!(provider_ref.as_str(), "mock/amazon/web_prod");
        assert!(cloud.contains("web_prod"));

        let health = EksApi::describe_cluster(&cloud, "eu-west-1", "web_prod")
            .await
            .expect("describe failed");
        assert_eq!(health.state, "Running");
        assert_eq!(health.node_count, 2);
    }

    #[tokio::test]
    async fn injected_failures_apply() {
        let cloud = MockCloud::new();
        cloud.fail(MockOp::Create, "quota exceeded");
        let err = EksApi::create_cluster(&cloud, &eks_payload("web_prod"))
            .await
            .expect_err("create should fail");
        assert!(err.to_string().contains("quota exceeded"));

        cloud.clear_failures();
        EksApi::create_cluster(&cloud, &eks_payload("web_prod"))
            .await
            .expect("create failed");
        cloud.break_cluster("web_prod", "control plane unreachable");
        assert!(EksApi::describe_cluster(&cloud, "eu-west-1", "web_prod")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn credential_fetches_are_counted() {
        let cloud = MockCloud::new();
        EksApi::create_cluster(&cloud, &eks_payload("web_prod"))
            .await
            .expect("create failed");

        let first = EksApi::cluster_credentials(&cloud, "eu-west-1", "web_prod")
            .await
            .expect("credentials failed");
        assert!(String::from_utf8(first).expect("utf8").contains("web_prod"));
        EksApi::cluster_credentials(&cloud, "eu-west-1", "web_prod")
            .await
            .expect("credentials failed");
        assert_eq!(cloud.credential_fetches(), 2);
    }
}
