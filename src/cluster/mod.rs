//! Cluster variants and the provider-agnostic facade over them.
//!
//! Each supported cloud contributes one variant implementing
//! [`ProviderCluster`]; [`from_record`] picks the variant for a stored
//! record and wraps it in a [`CommonCluster`], which is what the rest of
//! the engine works against.

mod amazon;
mod azure;
mod google;
mod mock;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use crate::config::ProviderConfig;
use crate::error::{ControlError, ControlResult};
use crate::profiles::{DefaultProfile, ProfilePayload};
use crate::store::ClusterStore;
use crate::types::{
    CloudProvider, ClusterConfig, ClusterId, ClusterRecord, ClusterStatus, CreateClusterRequest,
    ProviderRef, StatusSnapshot, UpdateClusterRequest,
};

pub use amazon::{
    EksApi, EksCluster, EksCreatePayload, EksMasterSpec, EksPoolSpec, EksUpdatePayload,
};
pub use azure::{
    build_document, AgentPoolProfile, AksApi, AksCluster, LinuxProfile, ManagedClusterDocument,
    ManagedClusterProperties, ServicePrincipalProfile, SshConfiguration, SshPublicKey,
};
pub use google::{GkeApi, GkeCluster, GkeCreatePayload, GkePoolSpec, GkeUpdatePayload};
pub use mock::{MockCloud, MockManagedCluster, MockOp};

/// Provider-side view of a running cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderHealth {
    /// Provider-native state string, e.g. `Running`.
    pub state: String,
    /// Total node count across pools.
    pub node_count: u32,
}

/// The capability set every cloud variant implements.
///
/// Variants are stateless beyond their configuration; all persistence goes
/// through [`CommonCluster`].
#[async_trait]
pub trait ProviderCluster: Send + Sync {
    /// Cloud this variant drives.
    fn cloud(&self) -> CloudProvider;

    /// Submit provider-side creation and return the provider-native
    /// reference for the new cluster.
    async fn create(&self) -> ControlResult<ProviderRef>;

    /// Fetch the provider-side view of the cluster.
    async fn health(&self) -> ControlResult<ProviderHealth>;

    /// Fetch kubeconfig bytes for the cluster.
    async fn kube_config(&self) -> ControlResult<Vec<u8>>;

    /// Fill omitted update fields from the current configuration.
    fn apply_update_defaults(&self, request: &mut UpdateClusterRequest);

    /// Whether the update would change the running configuration.
    fn update_changes_anything(&self, request: &UpdateClusterRequest) -> bool;

    /// Per-cloud sanity checks on an update request.
    fn validate_update(&self, request: &UpdateClusterRequest) -> ControlResult<()>;

    /// Submit the update and return the configuration now in force.
    async fn update(&self, request: &UpdateClusterRequest) -> ControlResult<ClusterConfig>;

    /// Tear down the provider-side resources.
    async fn delete(&self) -> ControlResult<()>;
}

/// Provider API bindings for every supported cloud.
#[derive(Clone)]
pub struct CloudClients {
    /// Amazon EKS binding.
    pub eks: Arc<dyn EksApi>,
    /// Azure AKS binding.
    pub aks: Arc<dyn AksApi>,
    /// Google GKE binding.
    pub gke: Arc<dyn GkeApi>,
}

impl CloudClients {
    /// Wire every cloud to the same in-memory mock.
    #[must_use]
    pub fn mocked(mock: &Arc<MockCloud>) -> Self {
        Self {
            eks: Arc::clone(mock) as Arc<dyn EksApi>,
            aks: Arc::clone(mock) as Arc<dyn AksApi>,
            gke: Arc::clone(mock) as Arc<dyn GkeApi>,
        }
    }
}

/// A stored cluster joined with its cloud variant.
///
/// This is the one shape the orchestration layer handles: callers never see
/// which cloud they are talking to except through [`CommonCluster::cloud`].
pub struct CommonCluster {
    record: ClusterRecord,
    ops: Box<dyn ProviderCluster>,
    store: Arc<dyn ClusterStore>,
}

impl CommonCluster {
    /// Engine-side identifier.
    #[must_use]
    pub fn id(&self) -> &ClusterId {
        &self.record.data.id
    }

    /// Cluster name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.record.data.name
    }

    /// Cloud the cluster runs on.
    #[must_use]
    pub fn cloud(&self) -> CloudProvider {
        self.record.data.cloud
    }

    /// The stored record this facade was built from.
    #[must_use]
    pub fn record(&self) -> &ClusterRecord {
        &self.record
    }

    /// Write a status change through the store and mirror it locally.
    pub async fn persist(
        &mut self,
        status: ClusterStatus,
        message: Option<&str>,
    ) -> ControlResult<()> {
        self.store
            .update_status(&self.record.data.id, status, message)
            .await?;
        self.record.status = status;
        self.record.data.status_message = message.map(str::to_owned);
        self.record.data.updated_at = Utc::now();
        Ok(())
    }

    /// Live snapshot combining the stored record with provider health.
    pub async fn snapshot(&self) -> ControlResult<StatusSnapshot> {
        let health = self.ops.health().await?;
        let mut snapshot = StatusSnapshot::from_record(&self.record);
        snapshot.provider_state = Some(health.state);
        snapshot.node_count = Some(health.node_count);
        Ok(snapshot)
    }

    /// Submit provider-side creation.
    pub async fn create(&self) -> ControlResult<ProviderRef> {
        self.ops.create().await
    }

    /// Fetch kubeconfig bytes from the provider.
    pub async fn kube_config(&self) -> ControlResult<Vec<u8>> {
        self.ops.kube_config().await
    }

    /// Fill omitted update fields from the current configuration.
    pub fn apply_update_defaults(&self, request: &mut UpdateClusterRequest) {
        self.ops.apply_update_defaults(request);
    }

    /// Whether the update would change the running configuration.
    #[must_use]
    pub fn update_changes_anything(&self, request: &UpdateClusterRequest) -> bool {
        self.ops.update_changes_anything(request)
    }

    /// Per-cloud sanity checks on an update request.
    pub fn validate_update(&self, request: &UpdateClusterRequest) -> ControlResult<()> {
        self.ops.validate_update(request)
    }

    /// Submit the update and return the configuration now in force.
    pub async fn update(&self, request: &UpdateClusterRequest) -> ControlResult<ClusterConfig> {
        self.ops.update(request).await
    }

    /// Tear down the provider-side resources.
    pub async fn delete(&self) -> ControlResult<()> {
        self.ops.delete().await
    }
}

impl std::fmt::Debug for CommonCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommonCluster").finish_non_exhaustive()
    }
}

/// Join a stored record with the variant for its cloud.
///
/// Fails with a malformed-record error when the record's cloud column and
/// its configuration document disagree; such records cannot be operated on
/// safely.
pub fn from_record(
    record: ClusterRecord,
    clients: &CloudClients,
    provider: &ProviderConfig,
    store: Arc<dyn ClusterStore>,
) -> ControlResult<CommonCluster> {
    let name = record.data.name.clone();
    let ops: Box<dyn ProviderCluster> = match (record.data.cloud, &record.data.config) {
        (CloudProvider::Amazon, ClusterConfig::Amazon(config)) => Box::new(EksCluster::new(
            name,
            config.clone(),
            Arc::clone(&clients.eks),
        )),
        (CloudProvider::Azure, ClusterConfig::Azure(config)) => Box::new(AksCluster::new(
            name,
            config.clone(),
            provider.azure.clone(),
            Arc::clone(&clients.aks),
        )),
        (CloudProvider::Google, ClusterConfig::Google(config)) => Box::new(GkeCluster::new(
            name,
            config.clone(),
            Arc::clone(&clients.gke),
        )),
        (cloud, config) => {
            return Err(ControlError::malformed_record(format!(
                "cluster {} is marked {cloud} but its configuration is for {}",
                record.data.id,
                config.cloud()
            )))
        }
    };
    Ok(CommonCluster { record, ops, store })
}

/// Build the full configuration for a create request, filling omitted
/// fields from the resolved profile.
pub fn config_from_request(
    request: &CreateClusterRequest,
    profile: &DefaultProfile,
) -> ControlResult<ClusterConfig> {
    match (request.cloud, &profile.payload) {
        (CloudProvider::Amazon, ProfilePayload::Amazon(defaults)) => {
            amazon::merge_create(request, defaults).map(ClusterConfig::Amazon)
        }
        (CloudProvider::Azure, ProfilePayload::Azure(defaults)) => {
            azure::merge_create(request, defaults).map(ClusterConfig::Azure)
        }
        (CloudProvider::Google, ProfilePayload::Google(defaults)) => {
            google::merge_create(request, defaults).map(ClusterConfig::Google)
        }
        (cloud, payload) => Err(ControlError::validation(format!(
            "profile {} belongs to {} and cannot configure a {cloud} cluster",
            profile.name,
            payload.cloud()
        ))),
    }
}
