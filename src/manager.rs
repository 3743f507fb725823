//! Core cluster lifecycle orchestration.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, error, info, warn};

use crate::cluster::{self, CloudClients, CommonCluster};
use crate::config::ControlConfig;
use crate::error::{ControlError, ControlResult};
use crate::lifecycle::{AnyLifecycle, Lifecycle, Requested};
use crate::monitoring::{self, MonitoringRegistry};
use crate::packages::PackageInstaller;
use crate::pipeline::{self, PipelineContext};
use crate::store::{ClusterFilter, ClusterStore, ProfileStore};
use crate::tasks::{TaskId, TaskRunner};
use crate::types::{
    validate_cluster_name, ClusterData, ClusterId, ClusterRecord, ClusterStatus,
    CreateClusterRequest, DeleteReceipt, StatusSnapshot, UpdateClusterRequest,
};
use crate::workload::{ClusterWorkloads, WorkloadInspector};

/// Process-local cache of fetched kubeconfigs.
///
/// Entries survive until the cluster is deleted or the process restarts;
/// a restart simply refetches from the provider on first use.
#[derive(Debug, Default)]
pub struct CredentialCache {
    entries: DashMap<ClusterId, Vec<u8>>,
}

impl CredentialCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached kubeconfig for the cluster, if any.
    #[must_use]
    pub fn get(&self, id: &ClusterId) -> Option<Vec<u8>> {
        self.entries.get(id).map(|entry| entry.value().clone())
    }

    /// Cache a kubeconfig.
    pub fn insert(&self, id: ClusterId, kube_config: Vec<u8>) {
        self.entries.insert(id, kube_config);
    }

    /// Drop the cached kubeconfig for the cluster.
    pub fn remove(&self, id: &ClusterId) {
        self.entries.remove(id);
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Orchestrates the cluster lifecycle across every supported cloud.
pub struct ClusterManager {
    store: Arc<dyn ClusterStore>,
    profiles: Arc<dyn ProfileStore>,
    clients: CloudClients,
    packages: Arc<dyn PackageInstaller>,
    monitoring: Arc<dyn MonitoringRegistry>,
    workloads: Arc<dyn WorkloadInspector>,
    tasks: TaskRunner,
    credentials: Arc<CredentialCache>,
    config: ControlConfig,
}

impl ClusterManager {
    /// Create a new cluster manager.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn ClusterStore>,
        profiles: Arc<dyn ProfileStore>,
        clients: CloudClients,
        packages: Arc<dyn PackageInstaller>,
        monitoring: Arc<dyn MonitoringRegistry>,
        workloads: Arc<dyn WorkloadInspector>,
        config: ControlConfig,
    ) -> Self {
        Self {
            store,
            profiles,
            clients,
            packages,
            monitoring,
            workloads,
            tasks: TaskRunner::new(),
            credentials: Arc::new(CredentialCache::new()),
            config,
        }
    }

    /// Prepare the engine for use: seed the built-in default profiles.
    pub async fn initialise(&self) -> ControlResult<()> {
        let seeded = self.profiles.ensure_defaults().await?;
        if seeded > 0 {
            info!(seeded, "default profiles seeded");
        }
        Ok(())
    }

    /// The background task runner, for observing spawned work.
    #[must_use]
    pub fn tasks(&self) -> &TaskRunner {
        &self.tasks
    }

    /// Create a cluster.
    ///
    /// The flow: validate the request, resolve the profile and merge it
    /// into a full configuration, record the cluster as requested, then
    /// drive provider-side creation. On success the record lands in the
    /// created state and the post-provisioning pipeline is spawned in the
    /// background; on failure the record stays behind in the error state
    /// with the failure message.
    pub async fn create_cluster(
        &self,
        request: CreateClusterRequest,
    ) -> ControlResult<ClusterRecord> {
        validate_cluster_name(&request.name)?;
        let profile = self
            .profiles
            .profile(request.cloud, request.profile())
            .await?
            .ok_or_else(|| ControlError::ProfileNotFound {
                cloud: request.cloud,
                name: request.profile().to_owned(),
            })?;
        let config = cluster::config_from_request(&request, &profile)?;

        // Advisory pre-check; the store's uniqueness constraint is what
        // actually defends against racing creates.
        if self.store.find_by_name(&request.name).await?.is_some() {
            debug!(name = %request.name, "create refused: name already taken");
            return Err(ControlError::DuplicateName { name: request.name });
        }

        let data = ClusterData::new(request.name.clone(), config);
        let cluster_id = data.id.clone();
        info!(
            cluster = %cluster_id,
            name = %request.name,
            cloud = %request.cloud,
            "creating cluster"
        );

        let requested = Lifecycle::<Requested>::request(data);
        self.store.insert(&requested.to_record()).await?;

        let creating = requested.begin_create();
        let mut cluster = self.facade(creating.to_record())?;
        cluster.persist(ClusterStatus::Creating, None).await?;

        match self.bounded(cluster.create()).await {
            Ok(provider_ref) => {
                let record = creating.created(provider_ref).to_record();
                self.store.save(&record).await?;
                info!(cluster = %cluster_id, name = %record.data.name, "cluster created");
                self.spawn_post_provision(&record)?;
                Ok(record)
            }
            Err(err) => {
                error!(cluster = %cluster_id, error = %err, "cluster creation failed");
                self.store
                    .save(&creating.fail(err.to_string()).to_record())
                    .await?;
                Err(err)
            }
        }
    }

    /// Update a running cluster's node pools.
    ///
    /// Only clusters in the created state can be updated. Requests are
    /// filled with the running configuration first, so an effectively
    /// empty request is rejected before anything is written.
    pub async fn update_cluster(
        &self,
        id: &ClusterId,
        mut request: UpdateClusterRequest,
    ) -> ControlResult<ClusterRecord> {
        let record = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| ControlError::ClusterNotFound(id.to_string()))?;
        if record.data.cloud != request.cloud {
            return Err(ControlError::validation(format!(
                "cluster {} runs on {}; the cloud of a running cluster cannot change",
                record.data.name, record.data.cloud
            )));
        }
        let status = record.status;
        let created = AnyLifecycle::from_record(record.clone())
            .try_into_created()
            .map_err(|_| ControlError::ClusterNotReady { status })?;

        let mut cluster = self.facade(record)?;
        cluster.apply_update_defaults(&mut request);
        if !cluster.update_changes_anything(&request) {
            debug!(cluster = %id, "update refused: nothing would change");
            return Err(ControlError::NoChangeRequested);
        }
        cluster.validate_update(&request)?;

        info!(cluster = %id, name = %cluster.name(), "updating cluster");
        let updating = created.begin_update();
        cluster.persist(ClusterStatus::Updating, None).await?;

        match self.bounded(cluster.update(&request)).await {
            Ok(config) => {
                let record = updating.updated_with_config(config).to_record();
                self.store.save(&record).await?;
                info!(cluster = %id, "cluster updated");
                Ok(record)
            }
            Err(err) => {
                error!(cluster = %id, error = %err, "cluster update failed");
                self.store
                    .save(&updating.fail(err.to_string()).to_record())
                    .await?;
                Err(err)
            }
        }
    }

    /// Delete a cluster and hard-remove its record.
    ///
    /// Clusters mid-create or mid-update are only deletable with `force`.
    /// Package cleanup is best effort; a provider teardown failure aborts
    /// the delete unless forced. Once the provider side is gone the record
    /// is removed entirely, freeing the name for reuse.
    pub async fn delete_cluster(
        &self,
        id: &ClusterId,
        force: bool,
    ) -> ControlResult<DeleteReceipt> {
        let record = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| ControlError::ClusterNotFound(id.to_string()))?;
        let name = record.data.name.clone();
        let provider_engaged = record.data.provider_ref.is_some()
            || matches!(
                record.status,
                ClusterStatus::Creating | ClusterStatus::Updating
            );

        let deleting = AnyLifecycle::from_record(record.clone()).begin_delete(force)?;
        info!(cluster = %id, name = %name, force, "deleting cluster");

        let cluster = if provider_engaged {
            match self.facade(record) {
                Ok(cluster) => Some(cluster),
                Err(err) if force => {
                    warn!(
                        cluster = %id,
                        error = %err,
                        "record is malformed; forced delete skips provider teardown"
                    );
                    None
                }
                Err(err) => return Err(err),
            }
        } else {
            debug!(cluster = %id, "provider never engaged; removing the record only");
            None
        };

        self.store
            .update_status(id, ClusterStatus::Deleting, None)
            .await?;

        if let Some(cluster) = &cluster {
            // Best effort: remove installed packages while credentials
            // still work.
            match cluster.kube_config().await {
                Ok(kube_config) => {
                    match self.packages.uninstall_all(&name, &kube_config).await {
                        Ok(removed) => {
                            debug!(cluster = %id, removed, "packages removed before teardown");
                        }
                        Err(err) => {
                            warn!(
                                cluster = %id,
                                error = %err,
                                "package cleanup failed; continuing with teardown"
                            );
                        }
                    }
                }
                Err(err) => {
                    warn!(
                        cluster = %id,
                        error = %err,
                        "credentials unavailable; skipping package cleanup"
                    );
                }
            }

            if let Err(err) = self.bounded(cluster.delete()).await {
                if force {
                    warn!(
                        cluster = %id,
                        error = %err,
                        "provider teardown failed; forced delete removes the record anyway"
                    );
                } else {
                    error!(cluster = %id, error = %err, "provider teardown failed");
                    self.store
                        .save(&deleting.fail(err.to_string()).to_record())
                        .await?;
                    return Err(err);
                }
            }
        }

        self.store.save(&deleting.deleted().to_record()).await?;
        self.store.delete(id).await?;
        self.credentials.remove(id);

        if self.config.pipeline.refresh_monitoring_on_delete {
            let registry = Arc::clone(&self.monitoring);
            let store = Arc::clone(&self.store);
            self.tasks
                .spawn("monitoring-refresh", Some(id.clone()), async move {
                    let targets =
                        monitoring::refresh_from_store(registry.as_ref(), store.as_ref()).await?;
                    Ok(format!("{targets} targets"))
                });
        }

        info!(cluster = %id, name = %name, "cluster deleted");
        let message = if force {
            "cluster deleted (forced)".to_owned()
        } else {
            "cluster deleted".to_owned()
        };
        Ok(DeleteReceipt {
            id: id.clone(),
            name,
            message,
        })
    }

    /// Live status of one cluster.
    ///
    /// Clusters whose provider side never materialised report the stored
    /// view; for everything else the provider is asked and its failure
    /// propagates.
    pub async fn cluster_status(&self, id: &ClusterId) -> ControlResult<StatusSnapshot> {
        let record = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| ControlError::ClusterNotFound(id.to_string()))?;
        self.snapshot_record(record).await
    }

    /// Snapshot every cluster, skipping the ones that cannot answer.
    ///
    /// One broken cluster never hides the rest of the fleet; per-cluster
    /// failures are logged and that cluster is left out of the result.
    pub async fn fleet_status(&self) -> ControlResult<Vec<StatusSnapshot>> {
        let records = self.store.list(&ClusterFilter::new()).await?;
        let mut snapshots = Vec::with_capacity(records.len());
        for record in records {
            let id = record.data.id.clone();
            match self.snapshot_record(record).await {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(err) => {
                    warn!(cluster = %id, error = %err, "skipping cluster in fleet status");
                }
            }
        }
        Ok(snapshots)
    }

    /// Stored records matching the filter, newest first.
    pub async fn clusters(&self, filter: &ClusterFilter) -> ControlResult<Vec<ClusterRecord>> {
        self.store.list(filter).await
    }

    /// Kubeconfig for a running cluster, cached after the first fetch.
    pub async fn cluster_credentials(&self, id: &ClusterId) -> ControlResult<Vec<u8>> {
        if let Some(cached) = self.credentials.get(id) {
            debug!(cluster = %id, "serving cached credentials");
            return Ok(cached);
        }

        let record = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| ControlError::ClusterNotFound(id.to_string()))?;
        if !matches!(
            record.status,
            ClusterStatus::Created | ClusterStatus::Updating
        ) {
            return Err(ControlError::ClusterNotReady {
                status: record.status,
            });
        }

        let cluster = self.facade(record)?;
        let kube_config = self.bounded(cluster.kube_config()).await?;
        self.credentials.insert(id.clone(), kube_config.clone());
        Ok(kube_config)
    }

    /// Workloads of every running cluster, skipping the ones that cannot
    /// answer.
    pub async fn fleet_workloads(&self) -> ControlResult<Vec<ClusterWorkloads>> {
        let records = self
            .store
            .list(&ClusterFilter::new().with_status(ClusterStatus::Created))
            .await?;
        let mut fleet = Vec::with_capacity(records.len());
        for record in records {
            let id = record.data.id.clone();
            let name = record.data.name.clone();
            let kube_config = match self.cluster_credentials(&id).await {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(cluster = %id, error = %err, "skipping cluster in workload listing");
                    continue;
                }
            };
            match self.workloads.list_pods(&name, &kube_config).await {
                Ok(pods) => fleet.push(ClusterWorkloads { id, name, pods }),
                Err(err) => {
                    warn!(cluster = %id, error = %err, "skipping cluster in workload listing");
                }
            }
        }
        Ok(fleet)
    }

    /// Wait for spawned background work to finish.
    pub async fn shutdown(&self) {
        debug!("draining background tasks");
        self.tasks.drain().await;
    }

    async fn snapshot_record(&self, record: ClusterRecord) -> ControlResult<StatusSnapshot> {
        if record.data.provider_ref.is_none() {
            return Ok(StatusSnapshot::from_record(&record));
        }
        let cluster = self.facade(record)?;
        self.bounded(cluster.snapshot()).await
    }

    fn facade(&self, record: ClusterRecord) -> ControlResult<CommonCluster> {
        cluster::from_record(
            record,
            &self.clients,
            &self.config.provider,
            Arc::clone(&self.store),
        )
    }

    fn spawn_post_provision(&self, record: &ClusterRecord) -> ControlResult<TaskId> {
        let cluster = self.facade(record.clone())?;
        let ctx = PipelineContext {
            cluster,
            packages: Arc::clone(&self.packages),
            monitoring: Arc::clone(&self.monitoring),
            store: Arc::clone(&self.store),
            credentials: Arc::clone(&self.credentials),
            config: self.config.pipeline.clone(),
        };
        let task = self
            .tasks
            .spawn("post-provision", Some(record.data.id.clone()), async move {
                let report = pipeline::run(ctx).await;
                let summary = report.summary();
                if report.is_success() {
                    Ok(summary)
                } else {
                    let stage = report.first_failure().unwrap_or("unknown");
                    Err(ControlError::PipelineStage {
                        stage,
                        detail: summary,
                    })
                }
            });
        Ok(task)
    }

    async fn bounded<T>(&self, work: impl Future<Output = ControlResult<T>>) -> ControlResult<T> {
        match tokio::time::timeout(self.config.provider.call_timeout(), work).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ControlError::ProviderTimeout {
                seconds: self.config.provider.call_timeout_secs,
            }),
        }
    }
}

impl std::fmt::Debug for ClusterManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterManager").finish_non_exhaustive()
    }
}
