//! Test fixtures for lifecycle integration tests.

use std::collections::BTreeMap;

use meridian_control::types::{
    AmazonNodePool, AmazonUpdateRequest, AzureCreateRequest, CloudProvider, CreateClusterRequest,
    UpdateClusterRequest,
};

/// Builder for creating test cluster requests.
pub struct RequestBuilder {
    name: String,
    cloud: CloudProvider,
    location: Option<String>,
    profile_name: Option<String>,
    resource_group: Option<String>,
}

impl RequestBuilder {
    /// Creates a new request builder for the given name and cloud.
    pub fn new(name: &str, cloud: CloudProvider) -> Self {
        Self {
            name: name.to_string(),
            cloud,
            location: None,
            profile_name: None,
            resource_group: None,
        }
    }

    /// Creates an Amazon request builder.
    pub fn on_amazon(name: &str) -> Self {
        Self::new(name, CloudProvider::Amazon)
    }

    /// Creates an Azure request builder.
    pub fn on_azure(name: &str) -> Self {
        Self::new(name, CloudProvider::Azure)
    }

    /// Creates a Google request builder.
    pub fn on_google(name: &str) -> Self {
        Self::new(name, CloudProvider::Google)
    }

    /// Sets the provider location.
    pub fn with_location(mut self, location: &str) -> Self {
        self.location = Some(location.to_string());
        self
    }

    /// Sets the profile to resolve defaults from.
    pub fn with_profile(mut self, profile: &str) -> Self {
        self.profile_name = Some(profile.to_string());
        self
    }

    /// Sets the Azure resource group.
    pub fn with_resource_group(mut self, resource_group: &str) -> Self {
        self.resource_group = Some(resource_group.to_string());
        self
    }

    /// Builds the CreateClusterRequest.
    pub fn build(self) -> CreateClusterRequest {
        CreateClusterRequest {
            name: self.name,
            cloud: self.cloud,
            location: self.location,
            profile_name: self.profile_name,
            amazon: None,
            azure: self.resource_group.map(|resource_group| AzureCreateRequest {
                resource_group: Some(resource_group),
                kubernetes_version: None,
                node_pools: BTreeMap::new(),
            }),
            google: None,
        }
    }
}

/// Amazon update request resizing `pool1` of the baseline profile to the
/// given count.
pub fn amazon_resize(count: u32) -> UpdateClusterRequest {
    let mut node_pools = BTreeMap::new();
    node_pools.insert(
        "pool1".to_owned(),
        AmazonNodePool {
            instance_type: "m4.xlarge".to_owned(),
            image: "ami-06d1667f".to_owned(),
            spot_price: "0.2".to_owned(),
            min_count: 1,
            max_count: 2,
            count,
        },
    );
    UpdateClusterRequest {
        cloud: CloudProvider::Amazon,
        amazon: Some(AmazonUpdateRequest { node_pools }),
        azure: None,
        google: None,
    }
}

/// Amazon update request that carries nothing; every field fills from the
/// running configuration.
pub fn empty_amazon_update() -> UpdateClusterRequest {
    UpdateClusterRequest {
        cloud: CloudProvider::Amazon,
        amazon: None,
        azure: None,
        google: None,
    }
}
