//! Google GKE cluster variant.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{ControlError, ControlResult};
use crate::profiles::GoogleProfile;
use crate::types::{
    CloudProvider, ClusterConfig, CreateClusterRequest, GoogleConfig, GoogleNodePool,
    ProviderRef, UpdateClusterRequest,
};

use super::{ProviderCluster, ProviderHealth};

/// Provider API surface for Google GKE.
#[async_trait]
pub trait GkeApi: Send + Sync {
    /// Submit cluster creation.
    async fn create_cluster(&self, payload: &GkeCreatePayload) -> ControlResult<ProviderRef>;

    /// Fetch a running cluster.
    async fn get_cluster(&self, zone: &str, name: &str) -> ControlResult<ProviderHealth>;

    /// Submit a node pool update.
    async fn update_cluster(&self, payload: &GkeUpdatePayload) -> ControlResult<()>;

    /// Tear the cluster down.
    async fn delete_cluster(&self, zone: &str, name: &str) -> ControlResult<()>;

    /// Fetch kubeconfig bytes for the cluster.
    async fn cluster_credentials(&self, zone: &str, name: &str) -> ControlResult<Vec<u8>>;
}

/// Creation payload submitted to the GKE API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GkeCreatePayload {
    /// Cluster name.
    pub name: String,
    /// Compute zone.
    pub zone: String,
    /// Control plane Kubernetes version.
    pub master_version: String,
    /// Node Kubernetes version.
    pub node_version: String,
    /// Node pool specifications.
    pub node_pools: Vec<GkePoolSpec>,
}

/// One node pool in provider terms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GkePoolSpec {
    /// Pool name.
    pub name: String,
    /// Node count at creation.
    pub initial_node_count: u32,
    /// Compute machine type.
    pub machine_type: String,
}

/// Update payload submitted to the GKE API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GkeUpdatePayload {
    /// Cluster name.
    pub name: String,
    /// Compute zone.
    pub zone: String,
    /// Desired node pool specifications.
    pub node_pools: Vec<GkePoolSpec>,
}

fn pool_specs(pools: &BTreeMap<String, GoogleNodePool>) -> Vec<GkePoolSpec> {
    pools
        .iter()
        .map(|(name, pool)| GkePoolSpec {
            name: name.clone(),
            initial_node_count: pool.count,
            machine_type: pool.machine_type.clone(),
        })
        .collect()
}

/// Build a Google configuration from a create request, filling omitted
/// fields from the profile.
pub(super) fn merge_create(
    request: &CreateClusterRequest,
    profile: &GoogleProfile,
) -> ControlResult<GoogleConfig> {
    let block = request.google.clone().unwrap_or_default();
    let node_pools = if block.node_pools.is_empty() {
        profile.node_pools.clone()
    } else {
        block.node_pools
    };

    let config = GoogleConfig {
        location: request
            .location
            .clone()
            .unwrap_or_else(|| profile.location.clone()),
        master_version: block
            .master_version
            .unwrap_or_else(|| profile.master_version.clone()),
        node_version: block
            .node_version
            .unwrap_or_else(|| profile.node_version.clone()),
        node_pools,
    };
    validate_pools(&config.node_pools)?;
    Ok(config)
}

/// Validate a node pool map.
pub(super) fn validate_pools(pools: &BTreeMap<String, GoogleNodePool>) -> ControlResult<()> {
    if pools.is_empty() {
        return Err(ControlError::validation("at least one node pool is required"));
    }
    for (name, pool) in pools {
        if pool.machine_type.is_empty() {
            return Err(ControlError::validation(format!(
                "node pool {name} has no machine type"
            )));
        }
        if pool.count == 0 {
            return Err(ControlError::validation(format!(
                "node pool {name} must keep at least one node"
            )));
        }
    }
    Ok(())
}

/// A Google GKE cluster bound to its provider API.
pub struct GkeCluster {
    name: String,
    config: GoogleConfig,
    api: Arc<dyn GkeApi>,
}

impl GkeCluster {
    /// Create a variant for an existing configuration.
    #[must_use]
    pub fn new(name: impl Into<String>, config: GoogleConfig, api: Arc<dyn GkeApi>) -> Self {
        Self {
            name: name.into(),
            config,
            api,
        }
    }

    fn create_payload(&self) -> GkeCreatePayload {
        GkeCreatePayload {
            name: self.name.clone(),
            zone: self.config.location.clone(),
            master_version: self.config.master_version.clone(),
            node_version: self.config.node_version.clone(),
            node_pools: pool_specs(&self.config.node_pools),
        }
    }
}

#[async_trait]
impl ProviderCluster for GkeCluster {
    fn cloud(&self) -> CloudProvider {
        CloudProvider::Google
    }

    async fn create(&self) -> ControlResult<ProviderRef> {
        let payload = self.create_payload();
        self.api.create_cluster(&payload).await
    }

    async fn health(&self) -> ControlResult<ProviderHealth> {
        self.api
            .get_cluster(&self.config.location, &self.name)
            .await
    }

    async fn kube_config(&self) -> ControlResult<Vec<u8>> {
        self.api
            .cluster_credentials(&self.config.location, &self.name)
            .await
    }

    fn apply_update_defaults(&self, request: &mut UpdateClusterRequest) {
        let block = request.google.get_or_insert_with(Default::default);
        if block.node_pools.is_empty() {
            block.node_pools = self.config.node_pools.clone();
        }
    }

    fn update_changes_anything(&self, request: &UpdateClusterRequest) -> bool {
        request
            .google
            .as_ref()
            .is_some_and(|block| block.node_pools != self.config.node_pools)
    }

    fn validate_update(&self, request: &UpdateClusterRequest) -> ControlResult<()> {
        let Some(block) = request.google.as_ref() else {
            return Err(ControlError::validation(
                "google fields are required when updating a google cluster",
            ));
        };
        validate_pools(&block.node_pools)
    }

    async fn update(&self, request: &UpdateClusterRequest) -> ControlResult<ClusterConfig> {
        let Some(block) = request.google.as_ref() else {
            return Err(ControlError::validation(
                "google fields are required when updating a google cluster",
            ));
        };

        let payload = GkeUpdatePayload {
            name: self.name.clone(),
            zone: self.config.location.clone(),
            node_pools: pool_specs(&block.node_pools),
        };
        self.api.update_cluster(&payload).await?;

        let mut config = self.config.clone();
        config.node_pools = block.node_pools.clone();
        Ok(ClusterConfig::Google(config))
    }

    async fn delete(&self) -> ControlResult<()> {
        self.api
            .delete_cluster(&self.config.location, &self.name)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiles::{DefaultProfile, ProfilePayload};
    use crate::types::GoogleCreateRequest;

    fn profile() -> GoogleProfile {
        let ProfilePayload::Google(google) = DefaultProfile::baseline(CloudProvider::Google).payload
        else {
            panic!("baseline should be a google payload");
        };
        google
    }

    fn bare_request() -> CreateClusterRequest {
        CreateClusterRequest {
            name: "data_sci".to_owned(),
            cloud: CloudProvider::Google,
            location: None,
            profile_name: None,
            amazon: None,
            azure: None,
            google: None,
        }
    }

    #[test]
    fn merge_fills_versions_from_profile() {
        let config = merge_create(&bare_request(), &profile()).expect("merge failed");
        assert_eq!(config.location, "us-central1-a");
        assert_eq!(config.master_version, "1.10");
        assert_eq!(config.node_version, "1.10");
        assert!(config.node_pools.contains_key("pool1"));
    }

    #[test]
    fn requested_pools_replace_profile_pools() {
        let mut pools = BTreeMap::new();
        pools.insert(
            "highmem".to_owned(),
            GoogleNodePool {
                count: 3,
                machine_type: "n1-highmem-4".to_owned(),
            },
        );
        let mut request = bare_request();
        request.google = Some(GoogleCreateRequest {
            master_version: Some("1.11".to_owned()),
            node_version: None,
            node_pools: pools,
        });

        let config = merge_create(&request, &profile()).expect("merge failed");
        assert_eq!(config.master_version, "1.11");
        assert_eq!(config.node_version, "1.10");
        assert_eq!(config.node_pools.len(), 1);
        assert!(config.node_pools.contains_key("highmem"));
    }

    #[test]
    fn empty_machine_type_is_rejected() {
        let mut pools = BTreeMap::new();
        pools.insert(
            "bad".to_owned(),
            GoogleNodePool {
                count: 1,
                machine_type: String::new(),
            },
        );
        assert!(validate_pools(&pools).is_err());
    }
}
