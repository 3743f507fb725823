//! Post-provisioning pipeline.
//!
//! Once provider-side creation succeeds the engine runs a fixed stage
//! sequence against the new cluster: fetch credentials, refresh the
//! monitoring target set, install the baseline packages, install the
//! ingress controller. The pipeline never touches the cluster's lifecycle
//! status; the cluster is usable from the moment it is created, and stage
//! failures surface through the background task record instead.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};

use crate::cluster::CommonCluster;
use crate::config::PipelineConfig;
use crate::manager::CredentialCache;
use crate::monitoring::{self, MonitoringRegistry};
use crate::packages::PackageInstaller;
use crate::store::ClusterStore;
use crate::types::ClusterId;

/// Credential fetch stage; everything that talks to the cluster depends
/// on it.
pub const STAGE_FETCH_CONFIG: &str = "fetch-config";
/// Monitoring refresh stage; works from the store alone.
pub const STAGE_REFRESH_MONITORING: &str = "refresh-monitoring";
/// Baseline package install stage.
pub const STAGE_INSTALL_BASELINE: &str = "install-baseline-packages";
/// Ingress controller install stage.
pub const STAGE_INSTALL_INGRESS: &str = "install-ingress";

const SKIPPED_NO_CREDENTIALS: &str = "cluster credentials unavailable";

/// How one stage ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Stage ran and succeeded.
    Succeeded,
    /// Stage ran and failed.
    Failed,
    /// Stage did not run because a prerequisite failed.
    Skipped,
}

impl StageStatus {
    /// Get the status name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of one pipeline stage.
#[derive(Debug, Clone, Serialize)]
pub struct StageOutcome {
    /// Stage name.
    pub stage: &'static str,
    /// How the stage ended.
    pub status: StageStatus,
    /// Success summary or failure detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Wall-clock stage duration in milliseconds.
    pub duration_ms: u64,
}

impl StageOutcome {
    fn finish(
        stage: &'static str,
        status: StageStatus,
        detail: Option<String>,
        started: Instant,
    ) -> Self {
        Self {
            stage,
            status,
            detail,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// What a full pipeline run did, stage by stage.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    /// Cluster the pipeline ran against.
    pub cluster: ClusterId,
    /// Stage outcomes in run order.
    pub stages: Vec<StageOutcome>,
}

impl PipelineReport {
    /// Whether no stage failed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.stages
            .iter()
            .all(|stage| stage.status != StageStatus::Failed)
    }

    /// Name of the first failed stage, if any.
    #[must_use]
    pub fn first_failure(&self) -> Option<&'static str> {
        self.stages
            .iter()
            .find(|stage| stage.status == StageStatus::Failed)
            .map(|stage| stage.stage)
    }

    /// One-line human summary of the run.
    #[must_use]
    pub fn summary(&self) -> String {
        let parts: Vec<String> = self
            .stages
            .iter()
            .map(|stage| format!("{} {}", stage.stage, stage.status))
            .collect();
        parts.join(", ")
    }
}

/// Everything one pipeline run needs.
pub struct PipelineContext {
    /// The freshly created cluster.
    pub cluster: CommonCluster,
    /// Package installer binding.
    pub packages: Arc<dyn PackageInstaller>,
    /// Monitoring registry binding.
    pub monitoring: Arc<dyn MonitoringRegistry>,
    /// Cluster store, read by the monitoring refresh.
    pub store: Arc<dyn ClusterStore>,
    /// Credential cache to prime with the fetched kubeconfig.
    pub credentials: Arc<CredentialCache>,
    /// Pipeline settings.
    pub config: PipelineConfig,
}

impl fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineContext").finish_non_exhaustive()
    }
}

/// Run the pipeline to completion and report every stage.
///
/// Stages run in a fixed order. Only the credential fetch gates later
/// stages: when it fails, the two install stages are skipped. A failure in
/// any other stage is recorded and the run continues; one broken package
/// does not cost the cluster its ingress controller.
pub async fn run(ctx: PipelineContext) -> PipelineReport {
    let cluster_id = ctx.cluster.id().clone();
    let name = ctx.cluster.name().to_owned();
    info!(cluster = %cluster_id, name = %name, "post-provisioning starting");

    let mut stages = Vec::with_capacity(4);

    let started = Instant::now();
    let kube_config = match ctx.cluster.kube_config().await {
        Ok(bytes) => {
            ctx.credentials.insert(cluster_id.clone(), bytes.clone());
            stages.push(StageOutcome::finish(
                STAGE_FETCH_CONFIG,
                StageStatus::Succeeded,
                None,
                started,
            ));
            Some(bytes)
        }
        Err(err) => {
            warn!(
                cluster = %cluster_id,
                error = %err,
                "credential fetch failed; install stages will be skipped"
            );
            stages.push(StageOutcome::finish(
                STAGE_FETCH_CONFIG,
                StageStatus::Failed,
                Some(err.to_string()),
                started,
            ));
            None
        }
    };

    let started = Instant::now();
    match monitoring::refresh_from_store(ctx.monitoring.as_ref(), ctx.store.as_ref()).await {
        Ok(targets) => {
            stages.push(StageOutcome::finish(
                STAGE_REFRESH_MONITORING,
                StageStatus::Succeeded,
                Some(format!("{targets} targets")),
                started,
            ));
        }
        Err(err) => {
            warn!(cluster = %cluster_id, error = %err, "monitoring refresh failed");
            stages.push(StageOutcome::finish(
                STAGE_REFRESH_MONITORING,
                StageStatus::Failed,
                Some(err.to_string()),
                started,
            ));
        }
    }

    let started = Instant::now();
    match &kube_config {
        Some(bytes) => {
            let mut failure = None;
            let mut installed = 0usize;
            for package in &ctx.config.baseline_packages {
                match ctx.packages.install(&name, bytes, package).await {
                    Ok(()) => installed += 1,
                    Err(err) => {
                        failure = Some(format!("{package}: {err}"));
                        break;
                    }
                }
            }
            match failure {
                None => stages.push(StageOutcome::finish(
                    STAGE_INSTALL_BASELINE,
                    StageStatus::Succeeded,
                    Some(format!("{installed} packages")),
                    started,
                )),
                Some(detail) => {
                    warn!(
                        cluster = %cluster_id,
                        detail = %detail,
                        "baseline package install failed"
                    );
                    stages.push(StageOutcome::finish(
                        STAGE_INSTALL_BASELINE,
                        StageStatus::Failed,
                        Some(detail),
                        started,
                    ));
                }
            }
        }
        None => stages.push(StageOutcome::finish(
            STAGE_INSTALL_BASELINE,
            StageStatus::Skipped,
            Some(SKIPPED_NO_CREDENTIALS.to_owned()),
            started,
        )),
    }

    let started = Instant::now();
    match &kube_config {
        Some(bytes) => {
            match ctx
                .packages
                .install(&name, bytes, &ctx.config.ingress_package)
                .await
            {
                Ok(()) => stages.push(StageOutcome::finish(
                    STAGE_INSTALL_INGRESS,
                    StageStatus::Succeeded,
                    Some(ctx.config.ingress_package.clone()),
                    started,
                )),
                Err(err) => {
                    warn!(cluster = %cluster_id, error = %err, "ingress install failed");
                    stages.push(StageOutcome::finish(
                        STAGE_INSTALL_INGRESS,
                        StageStatus::Failed,
                        Some(format!("{}: {err}", ctx.config.ingress_package)),
                        started,
                    ));
                }
            }
        }
        None => stages.push(StageOutcome::finish(
            STAGE_INSTALL_INGRESS,
            StageStatus::Skipped,
            Some(SKIPPED_NO_CREDENTIALS.to_owned()),
            started,
        )),
    }

    let report = PipelineReport {
        cluster: cluster_id.clone(),
        stages,
    };
    if report.is_success() {
        info!(cluster = %cluster_id, summary = %report.summary(), "post-provisioning complete");
    } else {
        warn!(
            cluster = %cluster_id,
            summary = %report.summary(),
            "post-provisioning finished with failures"
        );
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{self, CloudClients, MockCloud, MockOp};
    use crate::config::ProviderConfig;
    use crate::monitoring::MockMonitoring;
    use crate::packages::MockInstaller;
    use crate::profiles::DefaultProfile;
    use crate::store::MemoryStore;
    use crate::types::{
        CloudProvider, ClusterData, ClusterRecord, ClusterStatus, CreateClusterRequest,
    };

    async fn provisioned_rig() -> (
        PipelineContext,
        Arc<MockCloud>,
        Arc<MockInstaller>,
        Arc<MockMonitoring>,
        Arc<CredentialCache>,
    ) {
        let mock = Arc::new(MockCloud::new());
        let clients = CloudClients::mocked(&mock);
        let store = Arc::new(MemoryStore::new());
        let installer = Arc::new(MockInstaller::new());
        let monitoring = Arc::new(MockMonitoring::new());
        let credentials = Arc::new(CredentialCache::new());

        let request = CreateClusterRequest {
            name: "web_prod".to_owned(),
            cloud: CloudProvider::Amazon,
            location: None,
            profile_name: None,
            amazon: None,
            azure: None,
            google: None,
        };
        let profile = DefaultProfile::baseline(CloudProvider::Amazon);
        let config = cluster::config_from_request(&request, &profile).expect("merge failed");
        let mut record = ClusterRecord::new(ClusterData::new("web_prod", config));
        record.status = ClusterStatus::Created;
        store.insert(&record).await.expect("insert failed");

        let facade = cluster::from_record(
            record,
            &clients,
            &ProviderConfig::default(),
            Arc::clone(&store) as Arc<dyn ClusterStore>,
        )
        .expect("variant selection failed");
        facade.create().await.expect("mock create failed");

        let ctx = PipelineContext {
            cluster: facade,
            packages: Arc::clone(&installer) as Arc<dyn PackageInstaller>,
            monitoring: Arc::clone(&monitoring) as Arc<dyn MonitoringRegistry>,
            store: store as Arc<dyn ClusterStore>,
            credentials: Arc::clone(&credentials),
            config: PipelineConfig::default(),
        };
        (ctx, mock, installer, monitoring, credentials)
    }

    #[tokio::test]
    async fn all_stages_succeed_in_order() {
        let (ctx, _mock, installer, monitoring, credentials) = provisioned_rig().await;
        let report = run(ctx).await;

        let names: Vec<&str> = report.stages.iter().map(|stage| stage.stage).collect();
        assert_eq!(
            names,
            vec![
                STAGE_FETCH_CONFIG,
                STAGE_REFRESH_MONITORING,
                STAGE_INSTALL_BASELINE,
                STAGE_INSTALL_INGRESS,
            ]
        );
        assert!(report.is_success());
        assert!(report.first_failure().is_none());
        assert!(report.summary().contains("fetch-config succeeded"));

        assert_eq!(credentials.len(), 1);
        assert_eq!(
            installer.installed("web_prod"),
            vec!["tiller", "ingress-controller"]
        );
        assert_eq!(monitoring.targets().len(), 1);
    }

    #[tokio::test]
    async fn failed_credentials_skip_installs() {
        let (ctx, mock, installer, monitoring, credentials) = provisioned_rig().await;
        mock.fail(MockOp::Credentials, "token service down");

        let report = run(ctx).await;
        assert!(!report.is_success());
        assert_eq!(report.first_failure(), Some(STAGE_FETCH_CONFIG));

        assert_eq!(report.stages[2].status, StageStatus::Skipped);
        assert_eq!(report.stages[3].status, StageStatus::Skipped);
        assert_eq!(
            report.stages[2].detail.as_deref(),
            Some("cluster credentials unavailable")
        );
        // Monitoring needs no credentials and still ran.
        assert_eq!(report.stages[1].status, StageStatus::Succeeded);
        assert_eq!(monitoring.refresh_count(), 1);

        assert!(installer.installed("web_prod").is_empty());
        assert!(credentials.is_empty());
    }

    #[tokio::test]
    async fn package_failure_does_not_stop_ingress() {
        let (ctx, _mock, installer, _monitoring, _credentials) = provisioned_rig().await;
        installer.fail_package("tiller", "chart repository unreachable");

        let report = run(ctx).await;
        assert!(!report.is_success());
        assert_eq!(report.first_failure(), Some(STAGE_INSTALL_BASELINE));
        assert!(report.stages[2]
            .detail
            .as_deref()
            .is_some_and(|detail| detail.contains("tiller")));

        assert_eq!(report.stages[3].status, StageStatus::Succeeded);
        assert_eq!(installer.installed("web_prod"), vec!["ingress-controller"]);
    }
}
