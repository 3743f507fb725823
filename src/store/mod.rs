//! Cluster storage backends.
//!
//! This module provides traits and implementations for persisting cluster
//! records and profiles. The primary implementation uses PostgreSQL, but an
//! in-memory implementation is provided for testing and embedded use.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use async_trait::async_trait;

use crate::error::ControlResult;
use crate::profiles::DefaultProfile;
use crate::types::{CloudProvider, ClusterId, ClusterRecord, ClusterStatus};

/// Filter criteria for listing clusters.
#[derive(Debug, Clone, Default)]
pub struct ClusterFilter {
    /// Filter by cloud provider.
    pub cloud: Option<CloudProvider>,
    /// Filter by status.
    pub status: Option<ClusterStatus>,
    /// Filter by name prefix.
    pub name_prefix: Option<String>,
    /// Maximum number of results.
    pub limit: Option<u32>,
    /// Offset for pagination.
    pub offset: Option<u32>,
}

impl ClusterFilter {
    /// Create a new empty filter.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            cloud: None,
            status: None,
            name_prefix: None,
            limit: None,
            offset: None,
        }
    }

    /// Filter by cloud provider.
    #[must_use]
    pub const fn with_cloud(mut self, cloud: CloudProvider) -> Self {
        self.cloud = Some(cloud);
        self
    }

    /// Filter by status.
    #[must_use]
    pub const fn with_status(mut self, status: ClusterStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Filter by name prefix.
    #[must_use]
    pub fn with_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = Some(prefix.into());
        self
    }

    /// Set maximum results.
    #[must_use]
    pub const fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set pagination offset.
    #[must_use]
    pub const fn with_offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// Backend for storing cluster records.
///
/// Implementations own the name-uniqueness guarantee: two concurrent inserts
/// with the same name must resolve to exactly one winner, the loser seeing a
/// duplicate-name error. Callers may pre-check, but only the store decides.
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Insert a new cluster record.
    ///
    /// Fails with a duplicate-name error when a record with the same name
    /// already exists, atomically with respect to concurrent inserts.
    async fn insert(&self, record: &ClusterRecord) -> ControlResult<()>;

    /// Get a cluster by ID.
    ///
    /// Returns `None` if the cluster does not exist.
    async fn get(&self, id: &ClusterId) -> ControlResult<Option<ClusterRecord>>;

    /// Get a cluster by name.
    ///
    /// Returns `None` if no cluster holds the name.
    async fn find_by_name(&self, name: &str) -> ControlResult<Option<ClusterRecord>>;

    /// List clusters matching the filter criteria.
    ///
    /// Results are ordered by `created_at` descending (newest first).
    async fn list(&self, filter: &ClusterFilter) -> ControlResult<Vec<ClusterRecord>>;

    /// Write a full record back, replacing the stored version.
    ///
    /// Used by update flows that change the configuration document. The
    /// name-uniqueness guarantee applies here too.
    async fn save(&self, record: &ClusterRecord) -> ControlResult<()>;

    /// Update a cluster's status.
    ///
    /// Also updates the `updated_at` timestamp and replaces the status
    /// message.
    async fn update_status(
        &self,
        id: &ClusterId,
        status: ClusterStatus,
        message: Option<&str>,
    ) -> ControlResult<()>;

    /// Delete a cluster record.
    ///
    /// Records are removed for good once a cluster is gone; there is no
    /// tombstone row.
    async fn delete(&self, id: &ClusterId) -> ControlResult<()>;
}

/// Backend for storing cluster profiles.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Get a profile by cloud and name.
    ///
    /// Returns `None` if the profile does not exist.
    async fn profile(
        &self,
        cloud: CloudProvider,
        name: &str,
    ) -> ControlResult<Option<DefaultProfile>>;

    /// List all profiles for a cloud, ordered by name.
    async fn profiles(&self, cloud: CloudProvider) -> ControlResult<Vec<DefaultProfile>>;

    /// Insert or replace a profile, keyed by `(cloud, name)`.
    async fn save_profile(&self, profile: &DefaultProfile) -> ControlResult<()>;

    /// Insert a profile only if the `(cloud, name)` key is vacant.
    ///
    /// Returns `true` when the profile was inserted, `false` when an
    /// existing profile was left untouched. Atomic with respect to
    /// concurrent callers.
    async fn insert_profile_if_absent(&self, profile: &DefaultProfile) -> ControlResult<bool>;

    /// Delete a profile.
    ///
    /// The built-in `default` profile cannot be deleted: create flows
    /// resolve it whenever a request names no profile.
    async fn delete_profile(&self, cloud: CloudProvider, name: &str) -> ControlResult<()>;

    /// Seed the built-in default profile for every cloud.
    ///
    /// Idempotent: existing profiles, edited or not, are never overwritten.
    /// Returns how many profiles were newly seeded.
    async fn ensure_defaults(&self) -> ControlResult<usize> {
        let mut seeded = 0;
        for cloud in CloudProvider::ALL {
            if self
                .insert_profile_if_absent(&DefaultProfile::baseline(cloud))
                .await?
            {
                seeded += 1;
            }
        }
        Ok(seeded)
    }
}
