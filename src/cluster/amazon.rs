//! Amazon EKS cluster variant.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{ControlError, ControlResult};
use crate::profiles::AmazonProfile;
use crate::types::{
    AmazonConfig, AmazonNodePool, CloudProvider, ClusterConfig, CreateClusterRequest,
    ProviderRef, UpdateClusterRequest,
};

use super::{ProviderCluster, ProviderHealth};

/// Provider API surface for Amazon EKS.
///
/// This is the boundary the engine drives; real SDK bindings live outside
/// this crate. [`super::MockCloud`] implements it for tests.
#[async_trait]
pub trait EksApi: Send + Sync {
    /// Submit cluster creation.
    async fn create_cluster(&self, payload: &EksCreatePayload) -> ControlResult<ProviderRef>;

    /// Describe a running cluster.
    async fn describe_cluster(&self, region: &str, name: &str) -> ControlResult<ProviderHealth>;

    /// Submit a node pool update.
    async fn update_cluster(&self, payload: &EksUpdatePayload) -> ControlResult<()>;

    /// Tear the cluster down.
    async fn delete_cluster(&self, region: &str, name: &str) -> ControlResult<()>;

    /// Fetch kubeconfig bytes for the cluster.
    async fn cluster_credentials(&self, region: &str, name: &str) -> ControlResult<Vec<u8>>;
}

/// Creation payload submitted to the EKS API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EksCreatePayload {
    /// Cluster name.
    pub name: String,
    /// AWS region.
    pub region: String,
    /// Master node specification.
    pub master: EksMasterSpec,
    /// Node pool specifications.
    pub node_pools: Vec<EksPoolSpec>,
}

/// Master node specification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EksMasterSpec {
    /// EC2 instance type.
    pub instance_type: String,
    /// Machine image.
    pub image: String,
}

/// One node pool in provider terms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EksPoolSpec {
    /// Pool name.
    pub name: String,
    /// EC2 instance type.
    pub instance_type: String,
    /// Machine image.
    pub image: String,
    /// Spot bid; empty for on-demand.
    pub spot_price: String,
    /// Autoscaling lower bound.
    pub min_size: u32,
    /// Autoscaling upper bound.
    pub max_size: u32,
    /// Desired node count.
    pub desired_capacity: u32,
}

/// Update payload submitted to the EKS API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EksUpdatePayload {
    /// Cluster name.
    pub name: String,
    /// AWS region.
    pub region: String,
    /// Desired node pool specifications.
    pub node_pools: Vec<EksPoolSpec>,
}

fn pool_specs(pools: &BTreeMap<String, AmazonNodePool>) -> Vec<EksPoolSpec> {
    pools
        .iter()
        .map(|(name, pool)| EksPoolSpec {
            name: name.clone(),
            instance_type: pool.instance_type.clone(),
            image: pool.image.clone(),
            spot_price: pool.spot_price.clone(),
            min_size: pool.min_count,
            max_size: pool.max_count,
            desired_capacity: pool.count,
        })
        .collect()
}

/// Build an Amazon configuration from a create request, filling omitted
/// fields from the profile.
pub(super) fn merge_create(
    request: &CreateClusterRequest,
    profile: &AmazonProfile,
) -> ControlResult<AmazonConfig> {
    let block = request.amazon.clone().unwrap_or_default();
    let node_pools = if block.node_pools.is_empty() {
        profile.node_pools.clone()
    } else {
        block.node_pools
    };

    let config = AmazonConfig {
        location: request
            .location
            .clone()
            .unwrap_or_else(|| profile.location.clone()),
        master_instance_type: block
            .master_instance_type
            .unwrap_or_else(|| profile.master_instance_type.clone()),
        master_image: block
            .master_image
            .unwrap_or_else(|| profile.master_image.clone()),
        node_pools,
    };
    validate_pools(&config.node_pools)?;
    Ok(config)
}

/// Validate a node pool map.
pub(super) fn validate_pools(pools: &BTreeMap<String, AmazonNodePool>) -> ControlResult<()> {
    if pools.is_empty() {
        return Err(ControlError::validation("at least one node pool is required"));
    }
    for (name, pool) in pools {
        if pool.instance_type.is_empty() {
            return Err(ControlError::validation(format!(
                "node pool {name} has no instance type"
            )));
        }
        if pool.image.is_empty() {
            return Err(ControlError::validation(format!(
                "node pool {name} has no machine image"
            )));
        }
        if pool.min_count == 0 || pool.min_count > pool.max_count {
            return Err(ControlError::validation(format!(
                "node pool {name} autoscaling bounds are invalid: min {} max {}",
                pool.min_count, pool.max_count
            )));
        }
        if pool.count < pool.min_count || pool.count > pool.max_count {
            return Err(ControlError::validation(format!(
                "node pool {name} desired count {} is outside [{}, {}]",
                pool.count, pool.min_count, pool.max_count
            )));
        }
    }
    Ok(())
}

/// An Amazon EKS cluster bound to its provider API.
pub struct EksCluster {
    name: String,
    config: AmazonConfig,
    api: Arc<dyn EksApi>,
}

impl EksCluster {
    /// Create a variant for an existing configuration.
    #[must_use]
    pub fn new(name: impl Into<String>, config: AmazonConfig, api: Arc<dyn EksApi>) -> Self {
        Self {
            name: name.into(),
            config,
            api,
        }
    }

    fn create_payload(&self) -> EksCreatePayload {
        EksCreatePayload {
            name: self.name.clone(),
            region: self.config.location.clone(),
            master: EksMasterSpec {
                instance_type: self.config.master_instance_type.clone(),
                image: self.config.master_image.clone(),
            },
            node_pools: pool_specs(&self.config.node_pools),
        }
    }
}

#[async_trait]
impl ProviderCluster for EksCluster {
    fn cloud(&self) -> CloudProvider {
        CloudProvider::Amazon
    }

    async fn create(&self) -> ControlResult<ProviderRef> {
        let payload = self.create_payload();
        self.api.create_cluster(&payload).await
    }

    async fn health(&self) -> ControlResult<ProviderHealth> {
        self.api
            .describe_cluster(&self.config.location, &self.name)
            .await
    }

    async fn kube_config(&self) -> ControlResult<Vec<u8>> {
        self.api
            .cluster_credentials(&self.config.location, &self.name)
            .await
    }

    fn apply_update_defaults(&self, request: &mut UpdateClusterRequest) {
        let block = request.amazon.get_or_insert_with(Default::default);
        if block.node_pools.is_empty() {
            block.node_pools = self.config.node_pools.clone();
        }
    }

    fn update_changes_anything(&self, request: &UpdateClusterRequest) -> bool {
        request
            .amazon
            .as_ref()
            .is_some_and(|block| block.node_pools != self.config.node_pools)
    }

    fn validate_update(&self, request: &UpdateClusterRequest) -> ControlResult<()> {
        let Some(block) = request.amazon.as_ref() else {
            return Err(ControlError::validation(
                "amazon fields are required when updating an amazon cluster",
            ));
        };
        validate_pools(&block.node_pools)
    }

    async fn update(&self, request: &UpdateClusterRequest) -> ControlResult<ClusterConfig> {
        let Some(block) = request.amazon.as_ref() else {
            return Err(ControlError::validation(
                "amazon fields are required when updating an amazon cluster",
            ));
        };

        let payload = EksUpdatePayload {
            name: self.name.clone(),
            region: self.config.location.clone(),
            node_pools: pool_specs(&block.node_pools),
        };
        self.api.update_cluster(&payload).await?;

        let mut config = self.config.clone();
        config.node_pools = block.node_pools.clone();
        Ok(ClusterConfig::Amazon(config))
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
    use crate::types::AmazonUpdateRequest;

    fn profile() -> AmazonProfile {
        let ProfilePayload::Amazon(amazon) = DefaultProfile::baseline(CloudProvider::Amazon).payload
        else {
            panic!("baseline should be an amazon payload");
        };
        amazon
    }

    fn bare_request() -> CreateClusterRequest {
        CreateClusterRequest {
            name: "web_prod".to_owned(),
            cloud: CloudProvider::Amazon,
            location: None,
            profile_name: None,
            amazon: None,
            azure: None,
            google: None,
        }
    }

    #[test]
    fn merge_fills_everything_from_profile() {
        let config = merge_create(&bare_request(), &profile()).expect("merge failed");
        assert_eq!(config.location, "eu-west-1");
        assert_eq!(config.master_instance_type, "m4.xlarge");
        assert!(config.node_pools.contains_key("pool1"));
    }

    #[test]
    fn request_fields_override_profile() {
        let mut request = bare_request();
        request.location = Some("us-east-1".to_owned());
        request.amazon = Some(crate::types::AmazonCreateRequest {
            master_instance_type: Some("m5.large".to_owned()),
            master_image: None,
            node_pools: BTreeMap::new(),
        });

        let config = merge_create(&request, &profile()).expect("merge failed");
        assert_eq!(config.location, "us-east-1");
        assert_eq!(config.master_instance_type, "m5.large");
        // Image still comes from the profile.
        assert_eq!(config.master_image, "ami-06d1667f");
    }

    #[test]
    fn pool_bounds_are_checked() {
        let mut pools = BTreeMap::new();
        pools.insert(
            "bad".to_owned(),
            AmazonNodePool {
                instance_type: "m4.xlarge".to_owned(),
                image: "ami-06d1667f".to_owned(),
                spot_price: String::new(),
                min_count: 3,
                max_count: 2,
                count: 3,
            },
        );
        let err = validate_pools(&pools).expect_err("inverted bounds should fail");
        assert!(matches!(err, ControlError::Validation(_)));

        assert!(validate_pools(&BTreeMap::new()).is_err());
    }

    #[test]
    fn update_defaults_fill_current_pools() {
        let config = merge_create(&bare_request(), &profile()).expect("merge failed");
        let cluster = EksCluster::new("web_prod", config.clone(), test_api());

        let mut request = UpdateClusterRequest {
            cloud: CloudProvider::Amazon,
            amazon: None,
            azure: None,
            google: None,
        };
        cluster.apply_update_defaults(&mut request);

        let block = request.amazon.expect("block should be filled");
        assert_eq!(block.node_pools, config.node_pools);
        assert!(!cluster.update_changes_anything(&UpdateClusterRequest {
            cloud: CloudProvider::Amazon,
            amazon: Some(AmazonUpdateRequest {
                node_pools: config.node_pools,
            }),
            azure: None,
            google: None,
        }));
    }

    fn test_api() -> Arc<dyn EksApi> {
        Arc::new(super::super::MockCloud::new())
    }
}
