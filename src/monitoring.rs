//! Monitoring target registry.
//!
//! When a cluster comes up or goes away the engine rebuilds the monitored
//! target set, so scrapers follow the fleet without manual edits. The
//! registry trait is the seam; real deployments bind it to their scrape
//! configuration store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::error::{ControlError, ControlResult};
use crate::store::{ClusterFilter, ClusterStore};
use crate::types::{CloudProvider, ClusterId, ClusterStatus};

/// One cluster as the monitoring system sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonitoringTarget {
    /// Engine-side identifier.
    pub id: ClusterId,
    /// Cluster name.
    pub name: String,
    /// Cloud the cluster runs on.
    pub cloud: CloudProvider,
}

/// Keeps the monitoring system's target set in step with the fleet.
#[async_trait]
pub trait MonitoringRegistry: Send + Sync {
    /// Replace the monitored target set.
    async fn refresh_targets(&self, targets: &[MonitoringTarget]) -> ControlResult<()>;
}

/// Rebuild the target set from the store.
///
/// Only clusters that are currently up are monitored; clusters mid-create,
/// mid-delete or in error keep out of the scrape set. Returns how many
/// targets the registry now holds.
pub async fn refresh_from_store(
    registry: &dyn MonitoringRegistry,
    store: &dyn ClusterStore,
) -> ControlResult<usize> {
    let records = store
        .list(&ClusterFilter::new().with_status(ClusterStatus::Created))
        .await?;
    let targets: Vec<MonitoringTarget> = records
        .iter()
        .map(|record| MonitoringTarget {
            id: record.data.id.clone(),
            name: record.data.name.clone(),
            cloud: record.data.cloud,
        })
        .collect();
    registry.refresh_targets(&targets).await?;
    debug!(targets = targets.len(), "monitoring targets refreshed");
    Ok(targets.len())
}

/// In-memory registry used by the test suites.
#[derive(Debug, Default)]
pub struct MockMonitoring {
    targets: RwLock<Vec<MonitoringTarget>>,
    failure: RwLock<Option<String>>,
    refreshes: AtomicUsize,
}

impl MockMonitoring {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every refresh fail with the message.
    pub fn fail_with(&self, message: impl Into<String>) {
        if let Ok(mut slot) = self.failure.write() {
            *slot = Some(message.into());
        }
    }

    /// The target set as of the last successful refresh.
    #[must_use]
    pub fn targets(&self) -> Vec<MonitoringTarget> {
        self.targets
            .read()
            .map(|targets| targets.clone())
            .unwrap_or_default()
    }

    /// How many refreshes have been applied.
    #[must_use]
    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl MonitoringRegistry for MockMonitoring {
    async fn refresh_targets(&self, targets: &[MonitoringTarget]) -> ControlResult<()> {
        let failure = self
            .failure
            .read()
            .map_err(|_| ControlError::internal("failure lock poisoned"))?
            .clone();
        if let Some(message) = failure {
            return Err(ControlError::provider(message));
        }

        let mut slot = self
            .targets
            .write()
            .map_err(|_| ControlError::internal("targets lock poisoned"))?;
        *slot = targets.to_vec();
        self.refreshes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
