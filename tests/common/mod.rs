//! Common test utilities for lifecycle integration tests.

pub mod fixtures;

use std::sync::Arc;

use meridian_control::cluster::{CloudClients, MockCloud};
use meridian_control::monitoring::MockMonitoring;
use meridian_control::packages::MockInstaller;
use meridian_control::workload::MockWorkloads;
use meridian_control::{ClusterManager, ControlConfig, MemoryStore};

/// Complete test engine with every seam bound to an in-memory mock.
pub struct TestEngine {
    pub manager: ClusterManager,
    pub mock: Arc<MockCloud>,
    pub store: Arc<MemoryStore>,
    pub installer: Arc<MockInstaller>,
    pub monitoring: Arc<MockMonitoring>,
    pub workloads: Arc<MockWorkloads>,
}

impl TestEngine {
    /// Creates a new test engine with default configuration and the
    /// built-in profiles seeded.
    pub async fn new() -> Self {
        Self::with_config(ControlConfig::default()).await
    }

    /// Creates a new test engine with custom configuration.
    pub async fn with_config(config: ControlConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let mock = Arc::new(MockCloud::new());
        let installer = Arc::new(MockInstaller::new());
        let monitoring = Arc::new(MockMonitoring::new());
        let workloads = Arc::new(MockWorkloads::new());

        let manager = ClusterManager::new(
            Arc::clone(&store) as Arc<dyn meridian_control::ClusterStore>,
            Arc::clone(&store) as Arc<dyn meridian_control::ProfileStore>,
            CloudClients::mocked(&mock),
            Arc::clone(&installer) as Arc<dyn meridian_control::packages::PackageInstaller>,
            Arc::clone(&monitoring) as Arc<dyn meridian_control::monitoring::MonitoringRegistry>,
            Arc::clone(&workloads) as Arc<dyn meridian_control::workload::WorkloadInspector>,
            config,
        );
        manager.initialise().await.unwrap();

        Self {
            manager,
            mock,
            store,
            installer,
            monitoring,
            workloads,
        }
    }

    /// Creates a test engine with a short provider call deadline for
    /// timeout tests.
    pub async fn with_call_timeout(seconds: u64) -> Self {
        let mut config = ControlConfig::default();
        config.provider.call_timeout_secs = seconds;
        Self::with_config(config).await
    }
}
