//! In-memory cluster store for testing and embedded use.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{ControlError, ControlResult};
use crate::profiles::{refuse_default_removal, DefaultProfile};
use crate::types::{CloudProvider, ClusterId, ClusterRecord, ClusterStatus};

use super::{ClusterFilter, ClusterStore, ProfileStore};

/// In-memory cluster store.
///
/// Not suitable for production use as data is lost when the process exits,
/// but it honours the same atomicity guarantees as the PostgreSQL store:
/// name-uniqueness checks happen under the write lock.
#[derive(Debug, Default)]
pub struct MemoryStore {
    clusters: RwLock<HashMap<String, ClusterRecord>>,
    profiles: RwLock<HashMap<(CloudProvider, String), DefaultProfile>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClusterStore for MemoryStore {
    async fn insert(&self, record: &ClusterRecord) -> ControlResult<()> {
        let mut clusters = self
            .clusters
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        if clusters.values().any(|r| r.data.name == record.data.name) {
            return Err(ControlError::duplicate_name(&record.data.name));
        }

        let key = record.data.id.as_str().to_owned();
        if clusters.contains_key(&key) {
            return Err(ControlError::internal(format!(
                "cluster {key} already exists"
            )));
        }

        clusters.insert(key, record.clone());
        Ok(())
    }

    async fn get(&self, id: &ClusterId) -> ControlResult<Option<ClusterRecord>> {
        let clusters = self
            .clusters
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        Ok(clusters.get(id.as_str()).cloned())
    }

    async fn find_by_name(&self, name: &str) -> ControlResult<Option<ClusterRecord>> {
        let clusters = self
            .clusters
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        Ok(clusters.values().find(|r| r.data.name == name).cloned())
    }

    async fn list(&self, filter: &ClusterFilter) -> ControlResult<Vec<ClusterRecord>> {
        let clusters = self
            .clusters
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        let mut results: Vec<_> = clusters
            .values()
            .filter(|r| {
                if let Some(cloud) = filter.cloud {
                    if r.data.cloud != cloud {
                        return false;
                    }
                }
                if let Some(status) = filter.status {
                    if r.status != status {
                        return false;
                    }
                }
                if let Some(ref prefix) = filter.name_prefix {
                    if !r.data.name.starts_with(prefix.as_str()) {
                        return false;
                    }
                }
                true
            })
            .cloned()
            .collect();

        results.sort_by(|a, b| b.data.created_at.cmp(&a.data.created_at));

        #[allow(clippy::as_conversions)]
        let offset = filter.offset.unwrap_or(0) as usize;
        let results: Vec<_> = results.into_iter().skip(offset).collect();

        if let Some(limit) = filter.limit {
            #[allow(clippy::as_conversions)]
            Ok(results.into_iter().take(limit as usize).collect())
        } else {
            Ok(results)
        }
    }

    async fn save(&self, record: &ClusterRecord) -> ControlResult<()> {
        let mut clusters = self
            .clusters
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        let taken_elsewhere = clusters
            .values()
            .any(|r| r.data.name == record.data.name && r.data.id != record.data.id);
        if taken_elsewhere {
            return Err(ControlError::duplicate_name(&record.data.name));
        }

        clusters.insert(record.data.id.as_str().to_owned(), record.clone());
        Ok(())
    }

    async fn update_status(
        &self,
        id: &ClusterId,
        status: ClusterStatus,
        message: Option<&str>,
    ) -> ControlResult<()> {
        let mut clusters = self
            .clusters
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        let record = clusters
            .get_mut(id.as_str())
            .ok_or_else(|| ControlError::ClusterNotFound(id.to_string()))?;

        record.status = status;
        record.data.status_message = message.map(ToOwned::to_owned);
        record.data.updated_at = chrono::Utc::now();

        Ok(())
    }

    async fn delete(&self, id: &ClusterId) -> ControlResult<()> {
        let mut clusters = self
            .clusters
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        if clusters.remove(id.as_str()).is_none() {
            return Err(ControlError::ClusterNotFound(id.to_string()));
        }

        Ok(())
    }
}

#[async_trait]
impl ProfileStore for MemoryStore {
    async fn profile(
        &self,
        cloud: CloudProvider,
        name: &str,
    ) -> ControlResult<Option<DefaultProfile>> {
        let profiles = self
            .profiles
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        Ok(profiles.get(&(cloud, name.to_owned())).cloned())
    }

    async fn profiles(&self, cloud: CloudProvider) -> ControlResult<Vec<DefaultProfile>> {
        let profiles = self
            .profiles
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        let mut results: Vec<_> = profiles
            .iter()
            .filter(|((c, _), _)| *c == cloud)
            .map(|(_, p)| p.clone())
            .collect();
        results.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(results)
    }

    async fn save_profile(&self, profile: &DefaultProfile) -> ControlResult<()> {
        let mut profiles = self
            .profiles
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        profiles.insert((profile.cloud(), profile.name.clone()), profile.clone());
        Ok(())
    }

    async fn insert_profile_if_absent(&self, profile: &DefaultProfile) -> ControlResult<bool> {
        let mut profiles = self
            .profiles
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        match profiles.entry((profile.cloud(), profile.name.clone())) {
            std::collections::hash_map::Entry::Occupied(_) => Ok(false),
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(profile.clone());
                Ok(true)
            }
        }
    }

    async fn delete_profile(&self, cloud: CloudProvider, name: &str) -> ControlResult<()> {
        refuse_default_removal(name)?;

        let mut profiles = self
            .profiles
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        if profiles.remove(&(cloud, name.to_owned())).is_none() {
            return Err(ControlError::ProfileNotFound {
                cloud,
                name: name.to_owned(),
            });
        }

        Ok(())
    }
}
