//! Azure AKS cluster variant.
//!
//! AKS drives both creation and updates through the same managed-cluster
//! document, so updates re-submit the full document with the new pool
//! counts rather than a dedicated patch payload.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::AzureProviderConfig;
use crate::error::{ControlError, ControlResult};
use crate::profiles::AzureProfile;
use crate::types::{
    AzureConfig, AzureNodePool, CloudProvider, ClusterConfig, CreateClusterRequest,
    ProviderRef, UpdateClusterRequest,
};

use super::{ProviderCluster, ProviderHealth};

/// Provider API surface for Azure AKS.
#[async_trait]
pub trait AksApi: Send + Sync {
    /// Submit cluster creation into the given resource group.
    async fn create_cluster(
        &self,
        resource_group: &str,
        name: &str,
        document: &ManagedClusterDocument,
    ) -> ControlResult<ProviderRef>;

    /// Fetch a running cluster.
    async fn get_cluster(&self, resource_group: &str, name: &str) -> ControlResult<ProviderHealth>;

    /// Re-submit the managed-cluster document with updated pools.
    async fn update_cluster(
        &self,
        resource_group: &str,
        name: &str,
        document: &ManagedClusterDocument,
    ) -> ControlResult<()>;

    /// Tear the cluster down.
    async fn delete_cluster(&self, resource_group: &str, name: &str) -> ControlResult<()>;

    /// Fetch kubeconfig bytes for the cluster.
    async fn cluster_credentials(&self, resource_group: &str, name: &str)
        -> ControlResult<Vec<u8>>;
}

/// The managed-cluster resource document, in the wire shape AKS expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterDocument {
    /// Azure location.
    pub location: String,
    /// Cluster properties.
    pub properties: ManagedClusterProperties,
}

/// Properties block of a managed-cluster document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterProperties {
    /// DNS prefix for the cluster endpoint.
    pub dns_prefix: String,
    /// Kubernetes version to run.
    pub kubernetes_version: String,
    /// Agent pool specifications.
    pub agent_pool_profiles: Vec<AgentPoolProfile>,
    /// Service principal used by the cluster, when configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_principal_profile: Option<ServicePrincipalProfile>,
    /// Linux login configuration, when an SSH key is configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linux_profile: Option<LinuxProfile>,
}

/// One agent pool in provider terms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentPoolProfile {
    /// Pool name.
    pub name: String,
    /// Node count.
    pub count: u32,
    /// Azure VM size.
    pub vm_size: String,
}

/// Service principal credentials embedded in the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePrincipalProfile {
    /// Application client id.
    pub client_id: String,
    /// Application secret.
    pub secret: String,
}

/// Linux login configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinuxProfile {
    /// Admin account name on the nodes.
    pub admin_username: String,
    /// SSH access configuration.
    pub ssh: SshConfiguration,
}

/// SSH key set for node access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshConfiguration {
    /// Authorised public keys.
    pub public_keys: Vec<SshPublicKey>,
}

/// One authorised SSH public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshPublicKey {
    /// Key material in authorized_keys format.
    pub key_data: String,
}

/// Build the managed-cluster document for a configuration.
///
/// The service principal and Linux profiles are only attached when the
/// engine configuration carries the respective credentials.
#[must_use]
pub fn build_document(
    config: &AzureConfig,
    settings: &AzureProviderConfig,
) -> ManagedClusterDocument {
    let agent_pool_profiles = config
        .node_pools
        .iter()
        .map(|(name, pool)| AgentPoolProfile {
            name: name.clone(),
            count: pool.count,
            vm_size: pool.vm_size.clone(),
        })
        .collect();

    let service_principal_profile = match (&settings.client_id, &settings.client_secret) {
        (Some(client_id), Some(secret)) => Some(ServicePrincipalProfile {
            client_id: client_id.clone(),
            secret: secret.clone(),
        }),
        _ => None,
    };

    let linux_profile = settings.ssh_public_key.as_ref().map(|key| LinuxProfile {
        admin_username: settings.admin_username.clone(),
        ssh: SshConfiguration {
            public_keys: vec![SshPublicKey {
                key_data: key.clone(),
            }],
        },
    });

    ManagedClusterDocument {
        location: config.location.clone(),
        properties: ManagedClusterProperties {
            dns_prefix: settings.dns_prefix.clone(),
            kubernetes_version: config.kubernetes_version.clone(),
            agent_pool_profiles,
            service_principal_profile,
            linux_profile,
        },
    }
}

/// Build an Azure configuration from a create request, filling omitted
/// fields from the profile.
///
/// Profiles do not carry resource groups, so the request must name one.
pub(super) fn merge_create(
    request: &CreateClusterRequest,
    profile: &AzureProfile,
) -> ControlResult<AzureConfig> {
    let block = request.azure.clone().unwrap_or_default();
    let resource_group = match block.resource_group {
        Some(group) if !group.is_empty() => group,
        _ => {
            return Err(ControlError::validation(
                "azure requests must name a resource group",
            ))
        }
    };
    let node_pools = if block.node_pools.is_empty() {
        profile.node_pools.clone()
    } else {
        block.node_pools
    };

    let config = AzureConfig {
        location: request
            .location
            .clone()
            .unwrap_or_else(|| profile.location.clone()),
        kubernetes_version: block
            .kubernetes_version
            .unwrap_or_else(|| profile.kubernetes_version.clone()),
        resource_group,
        node_pools,
    };
    validate_pools(&config.node_pools)?;
    Ok(config)
}

/// Validate an agent pool map.
pub(super) fn validate_pools(pools: &BTreeMap<String, AzureNodePool>) -> ControlResult<()> {
    if pools.is_empty() {
        return Err(ControlError::validation("at least one node pool is required"));
    }
    for (name, pool) in pools {
        if pool.vm_size.is_empty() {
            return Err(ControlError::validation(format!(
                "node pool {name} has no VM size"
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

/// An Azure AKS cluster bound to its provider API.
pub struct AksCluster {
    name: String,
    config: AzureConfig,
    settings: AzureProviderConfig,
    api: Arc<dyn AksApi>,
}

impl AksCluster {
    /// Create a variant for an existing configuration.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        config: AzureConfig,
        settings: AzureProviderConfig,
        api: Arc<dyn AksApi>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            settings,
            api,
        }
    }

    /// The document this variant would submit for its configuration.
    #[must_use]
    pub fn document(&self) -> ManagedClusterDocument {
        build_document(&self.config, &self.settings)
    }
}

#[async_trait]
impl ProviderCluster for AksCluster {
    fn cloud(&self) -> CloudProvider {
        CloudProvider::Azure
    }

    async fn create(&self) -> ControlResult<ProviderRef> {
        let document = self.document();
        self.api
            .create_cluster(&self.config.resource_group, &self.name, &document)
            .await
    }

    async fn health(&self) -> ControlResult<ProviderHealth> {
        self.api
            .get_cluster(&self.config.resource_group, &self.name)
            .await
    }

    async fn kube_config(&self) -> ControlResult<Vec<u8>> {
        self.api
            .cluster_credentials(&self.config.resource_group, &self.name)
            .await
    }

    fn apply_update_defaults(&self, request: &mut UpdateClusterRequest) {
        let block = request.azure.get_or_insert_with(Default::default);
        if block.node_pools.is_empty() {
            block.node_pools = self.config.node_pools.clone();
        }
    }

    fn update_changes_anything(&self, request: &UpdateClusterRequest) -> bool {
        request
            .azure
            .as_ref()
            .is_some_and(|block| block.node_pools != self.config.node_pools)
    }

    fn validate_update(&self, request: &UpdateClusterRequest) -> ControlResult<()> {
        let Some(block) = request.azure.as_ref() else {
            return Err(ControlError::validation(
                "azure fields are required when updating an azure cluster",
            ));
        };
        validate_pools(&block.node_pools)
    }

    async fn update(&self, request: &UpdateClusterRequest) -> ControlResult<ClusterConfig> {
        let Some(block) = request.azure.as_ref() else {
            return Err(ControlError::validation(
                "azure fields are required when updating an azure cluster",
            ));
        };

        let mut config = self.config.clone();
        config.node_pools = block.node_pools.clone();
        let document = build_document(&config, &self.settings);
        self.api
            .update_cluster(&config.resource_group, &self.name, &document)
            .await?;
        Ok(ClusterConfig::Azure(config))
    }

    async fn delete(&self) -> ControlResult<()> {
        self.api
            .delete_cluster(&self.config.resource_group, &self.name)
            .await
    }
}
