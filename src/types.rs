//! Core types for meridian-control.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ControlError, ControlResult};

/// Longest permitted cluster name. Provider-side resource names derive from
/// the cluster name, and the strictest provider caps them at 32 characters.
pub const MAX_CLUSTER_NAME_LEN: usize = 31;

/// Unique identifier for a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterId(String);

impl ClusterId {
    /// Create a cluster ID from an existing string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a new unique cluster ID using ULID.
    #[must_use]
    pub fn generate() -> Self {
        Self(ulid::Ulid::new().to_string().to_lowercase())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ClusterId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The cloud providers this engine can drive.
///
/// The set is closed: adding a provider means adding a variant here and
/// letting the compiler point at every match that must learn about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloudProvider {
    /// Amazon Web Services (EKS).
    Amazon,
    /// Microsoft Azure (AKS).
    Azure,
    /// Google Cloud (GKE).
    Google,
}

impl CloudProvider {
    /// All supported providers, in stable order.
    pub const ALL: [Self; 3] = [Self::Amazon, Self::Azure, Self::Google];

    /// Get the provider name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Amazon => "amazon",
            Self::Azure => "azure",
            Self::Google => "google",
        }
    }
}

impl fmt::Display for CloudProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for CloudProvider {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "amazon" => Ok(Self::Amazon),
            "azure" => Ok(Self::Azure),
            "google" => Ok(Self::Google),
            other => Err(ControlError::UnsupportedCloud(other.to_string())),
        }
    }
}

/// Persisted cluster status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterStatus {
    /// Request accepted and recorded, provider not yet engaged.
    Requested,
    /// Provider-side creation in progress.
    Creating,
    /// Cluster is up and usable.
    Created,
    /// Provider-side update in progress.
    Updating,
    /// Provider-side teardown in progress.
    Deleting,
    /// Cluster fully removed.
    Deleted,
    /// An operation failed; see the record's status message.
    Error,
}

impl ClusterStatus {
    /// Get the status name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Creating => "creating",
            Self::Created => "created",
            Self::Updating => "updating",
            Self::Deleting => "deleting",
            Self::Deleted => "deleted",
            Self::Error => "error",
        }
    }

    /// Whether no further automatic transitions leave this status.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Deleted | Self::Error)
    }
}

impl fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ClusterStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "requested" => Ok(Self::Requested),
            "creating" => Ok(Self::Creating),
            "created" => Ok(Self::Created),
            "updating" => Ok(Self::Updating),
            "deleting" => Ok(Self::Deleting),
            "deleted" => Ok(Self::Deleted),
            "error" => Ok(Self::Error),
            _ => Err(format!("unknown cluster status: {s}")),
        }
    }
}

/// Provider-native identifier of a created cluster (ARN, resource ID or
/// self-link, depending on the cloud).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderRef(String);

impl ProviderRef {
    /// Wrap a provider-native identifier.
    #[must_use]
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    /// Get the reference as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A node pool on Amazon EKS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmazonNodePool {
    /// EC2 instance type for pool members.
    pub instance_type: String,
    /// Machine image for pool members.
    pub image: String,
    /// Spot bid as a decimal string; empty means on-demand instances.
    #[serde(default)]
    pub spot_price: String,
    /// Autoscaling lower bound.
    pub min_count: u32,
    /// Autoscaling upper bound.
    pub max_count: u32,
    /// Desired node count.
    pub count: u32,
}

/// Amazon cluster configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmazonConfig {
    /// AWS region, e.g. `eu-west-1`.
    pub location: String,
    /// Instance type of the master nodes.
    pub master_instance_type: String,
    /// Machine image of the master nodes.
    pub master_image: String,
    /// Node pools keyed by pool name.
    pub node_pools: BTreeMap<String, AmazonNodePool>,
}

/// An agent pool on Azure AKS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AzureNodePool {
    /// Number of agents in the pool.
    pub count: u32,
    /// Azure VM size, e.g. `Standard_D2_v2`.
    pub vm_size: String,
}

/// Azure cluster configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AzureConfig {
    /// Azure location, e.g. `eastus`.
    pub location: String,
    /// Kubernetes version to run.
    pub kubernetes_version: String,
    /// Resource group the managed cluster lives in.
    pub resource_group: String,
    /// Agent pools keyed by pool name.
    pub node_pools: BTreeMap<String, AzureNodePool>,
}

/// A node pool on Google GKE.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoogleNodePool {
    /// Number of nodes in the pool.
    pub count: u32,
    /// GCE machine type, e.g. `n1-standard-1`.
    pub machine_type: String,
}

/// Google cluster configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoogleConfig {
    /// Compute zone, e.g. `us-central1-a`.
    pub location: String,
    /// Kubernetes version of the control plane.
    pub master_version: String,
    /// Kubernetes version of the nodes.
    pub node_version: String,
    /// Node pools keyed by pool name.
    pub node_pools: BTreeMap<String, GoogleNodePool>,
}

/// Per-cloud cluster configuration.
///
/// The tag mirrors [`CloudProvider`], so a record whose `cloud` column
/// disagrees with its config document is detectably malformed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cloud", rename_all = "lowercase")]
pub enum ClusterConfig {
    /// Amazon EKS configuration.
    Amazon(AmazonConfig),
    /// Azure AKS configuration.
    Azure(AzureConfig),
    /// Google GKE configuration.
    Google(GoogleConfig),
}

impl ClusterConfig {
    /// The provider this configuration belongs to.
    #[must_use]
    pub const fn cloud(&self) -> CloudProvider {
        match self {
            Self::Amazon(_) => CloudProvider::Amazon,
            Self::Azure(_) => CloudProvider::Azure,
            Self::Google(_) => CloudProvider::Google,
        }
    }

    /// The provider location the cluster runs in.
    #[must_use]
    pub fn location(&self) -> &str {
        match self {
            Self::Amazon(c) => &c.location,
            Self::Azure(c) => &c.location,
            Self::Google(c) => &c.location,
        }
    }
}

/// Common data shared across all cluster lifecycle states.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterData {
    /// Unique cluster identifier.
    pub id: ClusterId,
    /// Cluster name, unique across live records.
    pub name: String,
    /// Cloud provider; immutable once the record exists.
    pub cloud: CloudProvider,
    /// Per-cloud configuration.
    pub config: ClusterConfig,
    /// Provider-native reference, set once creation succeeds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_ref: Option<ProviderRef>,
    /// Human-readable detail for the current status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last updated.
    pub updated_at: DateTime<Utc>,
}

impl ClusterData {
    /// Create new cluster data. The provider is derived from the
    /// configuration document.
    #[must_use]
    pub fn new(name: impl Into<String>, config: ClusterConfig) -> Self {
        let now = Utc::now();
        Self {
            id: ClusterId::generate(),
            name: name.into(),
            cloud: config.cloud(),
            config,
            provider_ref: None,
            status_message: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A cluster record as stored in the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterRecord {
    /// The cluster data.
    #[serde(flatten)]
    pub data: ClusterData,
    /// Current status.
    pub status: ClusterStatus,
}

impl ClusterRecord {
    /// Create a new cluster record in the requested status.
    #[must_use]
    pub const fn new(data: ClusterData) -> Self {
        Self {
            data,
            status: ClusterStatus::Requested,
        }
    }
}

/// Amazon-specific fields of a create request. Anything omitted is filled
/// from the resolved profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AmazonCreateRequest {
    /// Instance type of the master nodes.
    #[serde(default)]
    pub master_instance_type: Option<String>,
    /// Machine image of the master nodes.
    #[serde(default)]
    pub master_image: Option<String>,
    /// Node pools; empty means the profile's pools.
    #[serde(default)]
    pub node_pools: BTreeMap<String, AmazonNodePool>,
}

/// Azure-specific fields of a create request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AzureCreateRequest {
    /// Resource group to create the managed cluster in. Required: profiles
    /// do not carry resource groups, they are account-specific.
    #[serde(default)]
    pub resource_group: Option<String>,
    /// Kubernetes version to run.
    #[serde(default)]
    pub kubernetes_version: Option<String>,
    /// Agent pools; empty means the profile's pools.
    #[serde(default)]
    pub node_pools: BTreeMap<String, AzureNodePool>,
}

/// Google-specific fields of a create request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GoogleCreateRequest {
    /// Control plane Kubernetes version.
    #[serde(default)]
    pub master_version: Option<String>,
    /// Node Kubernetes version.
    #[serde(default)]
    pub node_version: Option<String>,
    /// Node pools; empty means the profile's pools.
    #[serde(default)]
    pub node_pools: BTreeMap<String, GoogleNodePool>,
}

/// Request to create a cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateClusterRequest {
    /// Cluster name; must satisfy [`validate_cluster_name`].
    pub name: String,
    /// Target cloud provider.
    pub cloud: CloudProvider,
    /// Provider location; defaults from the resolved profile.
    #[serde(default)]
    pub location: Option<String>,
    /// Profile supplying defaults; `default` when omitted.
    #[serde(default)]
    pub profile_name: Option<String>,
    /// Amazon-specific fields.
    #[serde(default)]
    pub amazon: Option<AmazonCreateRequest>,
    /// Azure-specific fields.
    #[serde(default)]
    pub azure: Option<AzureCreateRequest>,
    /// Google-specific fields.
    #[serde(default)]
    pub google: Option<GoogleCreateRequest>,
}

impl CreateClusterRequest {
    /// The profile name to resolve defaults from.
    #[must_use]
    pub fn profile(&self) -> &str {
        self.profile_name.as_deref().unwrap_or(DEFAULT_PROFILE_NAME)
    }
}

/// Name of the built-in profile used when a request names none.
pub const DEFAULT_PROFILE_NAME: &str = "default";

/// Amazon-specific fields of an update request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmazonUpdateRequest {
    /// Desired node pools; empty means keep the current pools.
    #[serde(default)]
    pub node_pools: BTreeMap<String, AmazonNodePool>,
}

/// Azure-specific fields of an update request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AzureUpdateRequest {
    /// Desired agent pools; empty means keep the current pools.
    #[serde(default)]
    pub node_pools: BTreeMap<String, AzureNodePool>,
}

/// Google-specific fields of an update request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoogleUpdateRequest {
    /// Desired node pools; empty means keep the current pools.
    #[serde(default)]
    pub node_pools: BTreeMap<String, GoogleNodePool>,
}

/// Request to update a running cluster.
///
/// The cloud field exists only to cross-check against the record; the cloud
/// of a running cluster can never change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateClusterRequest {
    /// Cloud the caller believes the cluster runs on.
    pub cloud: CloudProvider,
    /// Amazon-specific fields.
    #[serde(default)]
    pub amazon: Option<AmazonUpdateRequest>,
    /// Azure-specific fields.
    #[serde(default)]
    pub azure: Option<AzureUpdateRequest>,
    /// Google-specific fields.
    #[serde(default)]
    pub google: Option<GoogleUpdateRequest>,
}

/// Point-in-time view of one cluster, merging the persisted record with
/// what the provider reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Cluster identifier.
    pub id: ClusterId,
    /// Cluster name.
    pub name: String,
    /// Cloud provider.
    pub cloud: CloudProvider,
    /// Provider location.
    pub location: String,
    /// Persisted lifecycle status.
    pub status: ClusterStatus,
    /// Raw provider-side state string, when the provider answered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_state: Option<String>,
    /// Total node count across pools, when the provider answered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_count: Option<u32>,
    /// Status message or degraded-view note.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StatusSnapshot {
    /// The record-only view, with no provider-side fields filled.
    #[must_use]
    pub fn from_record(record: &ClusterRecord) -> Self {
        Self {
            id: record.data.id.clone(),
            name: record.data.name.clone(),
            cloud: record.data.cloud,
            location: record.data.config.location().to_owned(),
            status: record.status,
            provider_state: None,
            node_count: None,
            message: record.data.status_message.clone(),
        }
    }
}

/// Acknowledgement returned once a cluster has been deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteReceipt {
    /// Identifier of the removed cluster.
    pub id: ClusterId,
    /// Name of the removed cluster.
    pub name: String,
    /// Human-readable note (e.g. whether deletion was forced).
    pub message: String,
}

/// Validate a cluster name.
///
/// Names must be non-empty, at most [`MAX_CLUSTER_NAME_LEN`] characters,
/// contain only lowercase ASCII letters, digits and underscores, and end
/// with a letter or digit.
pub fn validate_cluster_name(name: &str) -> ControlResult<()> {
    if name.is_empty() {
        return Err(ControlError::validation("cluster name must not be empty"));
    }
    if name.len() > MAX_CLUSTER_NAME_LEN {
        return Err(ControlError::validation(format!(
            "cluster name {name:?} is too long: at most {MAX_CLUSTER_NAME_LEN} characters"
        )));
    }
    let body_ok = name
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_');
    let tail_ok = name
        .bytes()
        .last()
        .is_some_and(|b| b.is_ascii_lowercase() || b.is_ascii_digit());
    if !body_ok || !tail_ok {
        return Err(ControlError::validation(format!(
            "cluster name {name:?} must contain only lowercase letters, digits and \
             underscores, and end with a letter or digit"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_names_pass() {
        for name in ["a", "web_prod_3", "c1", "a_1"] {
            assert!(validate_cluster_name(name).is_ok(), "{name} should pass");
        }
    }

    #[test]
    fn invalid_names_fail() {
        let too_long = "a".repeat(32);
        for name in ["", "Mixed", "ends_with_underscore_", "has-dash", too_long.as_str()] {
            let err = validate_cluster_name(name).unwrap_err();
            assert!(
                matches!(err, ControlError::Validation(_)),
                "{name:?} should fail validation, got {err}"
            );
        }
    }

    #[test]
    fn cloud_parsing_rejects_unknown() {
        assert_eq!("azure".parse::<CloudProvider>().unwrap(), CloudProvider::Azure);
        let err = "digitalocean".parse::<CloudProvider>().unwrap_err();
        assert!(matches!(err, ControlError::UnsupportedCloud(_)));
    }

    #[test]
    fn config_tag_matches_cloud() {
        let config = ClusterConfig::Google(GoogleConfig {
            location: "us-central1-a".into(),
            master_version: "1.10".into(),
            node_version: "1.10".into(),
            node_pools: BTreeMap::new(),
        });
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["cloud"], "google");
        let back: ClusterConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back.cloud(), CloudProvider::Google);
    }

    #[test]
    fn record_serialises_flat() {
        let data = ClusterData::new(
            "edge1",
            ClusterConfig::Azure(AzureConfig {
                location: "eastus".into(),
                kubernetes_version: "1.9.2".into(),
                resource_group: "rg1".into(),
                node_pools: BTreeMap::new(),
            }),
        );
        let record = ClusterRecord::new(data);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "requested");
        assert_eq!(json["name"], "edge1");
        assert_eq!(json["cloud"], "azure");
    }
}
