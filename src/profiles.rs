//! Cluster profiles.
//!
//! A profile is a named per-cloud preset. Create requests name a profile (or
//! fall back to `default`) and any field the request omits is filled from
//! it, so a minimal request needs nothing beyond a name and a cloud.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ControlError, ControlResult};
use crate::types::{
    AmazonNodePool, AzureNodePool, CloudProvider, GoogleNodePool, DEFAULT_PROFILE_NAME,
};

/// Amazon profile payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmazonProfile {
    /// AWS region.
    pub location: String,
    /// Instance type of the master nodes.
    pub master_instance_type: String,
    /// Machine image of the master nodes.
    pub master_image: String,
    /// Node pools keyed by pool name.
    pub node_pools: BTreeMap<String, AmazonNodePool>,
}

/// Azure profile payload.
///
/// Deliberately carries no resource group: resource groups are
/// account-specific and must come from the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AzureProfile {
    /// Azure location.
    pub location: String,
    /// Kubernetes version to run.
    pub kubernetes_version: String,
    /// Agent pools keyed by pool name.
    pub node_pools: BTreeMap<String, AzureNodePool>,
}

/// Google profile payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoogleProfile {
    /// Compute zone.
    pub location: String,
    /// Control plane Kubernetes version.
    pub master_version: String,
    /// Node Kubernetes version.
    pub node_version: String,
    /// Node pools keyed by pool name.
    pub node_pools: BTreeMap<String, GoogleNodePool>,
}

/// Per-cloud profile payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cloud", rename_all = "lowercase")]
pub enum ProfilePayload {
    /// Amazon preset.
    Amazon(AmazonProfile),
    /// Azure preset.
    Azure(AzureProfile),
    /// Google preset.
    Google(GoogleProfile),
}

impl ProfilePayload {
    /// The provider this payload belongs to.
    #[must_use]
    pub const fn cloud(&self) -> CloudProvider {
        match self {
            Self::Amazon(_) => CloudProvider::Amazon,
            Self::Azure(_) => CloudProvider::Azure,
            Self::Google(_) => CloudProvider::Google,
        }
    }
}

/// A named per-cloud preset, keyed by `(cloud, name)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultProfile {
    /// Profile name; `default` is seeded per cloud and always present.
    pub name: String,
    /// The preset values.
    pub payload: ProfilePayload,
    /// When the profile was created.
    pub created_at: DateTime<Utc>,
    /// When the profile was last updated.
    pub updated_at: DateTime<Utc>,
}

impl DefaultProfile {
    /// Create a new profile.
    #[must_use]
    pub fn new(name: impl Into<String>, payload: ProfilePayload) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            payload,
            created_at: now,
            updated_at: now,
        }
    }

    /// The cloud this profile applies to.
    #[must_use]
    pub const fn cloud(&self) -> CloudProvider {
        self.payload.cloud()
    }

    /// The built-in `default` profile for a cloud.
    ///
    /// These are the values seeded on first start. Conservative sizes, one
    /// small pool, stable versions.
    #[must_use]
    pub fn baseline(cloud: CloudProvider) -> Self {
        let payload = match cloud {
            CloudProvider::Amazon => {
                let mut node_pools = BTreeMap::new();
                node_pools.insert(
                    "pool1".to_owned(),
                    AmazonNodePool {
                        instance_type: "m4.xlarge".to_owned(),
                        image: "ami-06d1667f".to_owned(),
                        spot_price: "0.2".to_owned(),
                        min_count: 1,
                        max_count: 2,
                        count: 1,
                    },
                );
                ProfilePayload::Amazon(AmazonProfile {
                    location: "eu-west-1".to_owned(),
                    master_instance_type: "m4.xlarge".to_owned(),
                    master_image: "ami-06d1667f".to_owned(),
                    node_pools,
                })
            }
            CloudProvider::Azure => {
                let mut node_pools = BTreeMap::new();
                node_pools.insert(
                    "agentpool1".to_owned(),
                    AzureNodePool {
                        count: 1,
                        vm_size: "Standard_D2_v2".to_owned(),
                    },
                );
                ProfilePayload::Azure(AzureProfile {
                    location: "eastus".to_owned(),
                    kubernetes_version: "1.9.2".to_owned(),
                    node_pools,
                })
            }
            CloudProvider::Google => {
                let mut node_pools = BTreeMap::new();
                node_pools.insert(
                    "pool1".to_owned(),
                    GoogleNodePool {
                        count: 1,
                        machine_type: "n1-standard-1".to_owned(),
                    },
                );
                ProfilePayload::Google(GoogleProfile {
                    location: "us-central1-a".to_owned(),
                    master_version: "1.10".to_owned(),
                    node_version: "1.10".to_owned(),
                    node_pools,
                })
            }
        };
        Self::new(DEFAULT_PROFILE_NAME, payload)
    }
}

/// Refuse removal of the built-in `default` profile.
///
/// Shared by every profile store implementation; create flows resolve the
/// default profile whenever a request names none, so it must always exist.
pub(crate) fn refuse_default_removal(name: &str) -> ControlResult<()> {
    if name == DEFAULT_PROFILE_NAME {
        return Err(ControlError::validation(
            "the default profile cannot be deleted",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baselines_cover_every_cloud() {
        for cloud in CloudProvider::ALL {
            let profile = DefaultProfile::baseline(cloud);
            assert_eq!(profile.name, DEFAULT_PROFILE_NAME);
            assert_eq!(profile.cloud(), cloud);
        }
    }

    #[test]
    fn amazon_baseline_values() {
        let profile = DefaultProfile::baseline(CloudProvider::Amazon);
        let ProfilePayload::Amazon(amazon) = &profile.payload else {
            panic!("expected amazon payload");
        };
        assert_eq!(amazon.location, "eu-west-1");
        assert_eq!(amazon.master_instance_type, "m4.xlarge");
        let pool = amazon.node_pools.get("pool1").expect("pool1 missing");
        assert_eq!(pool.min_count, 1);
        assert_eq!(pool.max_count, 2);
        assert_eq!(pool.spot_price, "0.2");
    }

    #[test]
    fn payload_tag_matches_cloud() {
        let profile = DefaultProfile::baseline(CloudProvider::Azure);
        let json = serde_json::to_value(&profile.payload).unwrap();
        assert_eq!(json["cloud"], "azure");
    }

    #[test]
    fn default_profile_is_protected() {
        assert!(refuse_default_removal("default").is_err());
        assert!(refuse_default_removal("gpu-lab").is_ok());
    }
}
