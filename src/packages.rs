//! Package installation into provisioned clusters.
//!
//! The engine installs a baseline package set plus an ingress controller
//! into every cluster it brings up, and removes whatever it installed
//! before tearing a cluster down. The installer trait is the seam; real
//! deployments bind it to their package tooling.

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use crate::error::{ControlError, ControlResult};

/// Installs packages into clusters reachable through a kubeconfig.
#[async_trait]
pub trait PackageInstaller: Send + Sync {
    /// Install one package into the cluster.
    async fn install(
        &self,
        cluster_name: &str,
        kube_config: &[u8],
        package: &str,
    ) -> ControlResult<()>;

    /// Remove every package this installer manages from the cluster,
    /// returning how many were removed.
    async fn uninstall_all(&self, cluster_name: &str, kube_config: &[u8]) -> ControlResult<usize>;
}

/// In-memory installer used by the test suites.
#[derive(Debug, Default)]
pub struct MockInstaller {
    installed: DashMap<String, Vec<String>>,
    broken_packages: DashMap<String, String>,
    broken_uninstalls: DashMap<String, String>,
}

impl MockInstaller {
    /// Create an empty installer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make installs of the named package fail.
    pub fn fail_package(&self, package: &str, message: impl Into<String>) {
        self.broken_packages.insert(package.to_owned(), message.into());
    }

    /// Make uninstalls on the named cluster fail.
    pub fn fail_uninstall_for(&self, cluster_name: &str, message: impl Into<String>) {
        self.broken_uninstalls
            .insert(cluster_name.to_owned(), message.into());
    }

    /// Packages currently installed on the named cluster, in install order.
    #[must_use]
    pub fn installed(&self, cluster_name: &str) -> Vec<String> {
        self.installed
            .get(cluster_name)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl PackageInstaller for MockInstaller {
    async fn install(
        &self,
        cluster_name: &str,
        _kube_config: &[u8],
        package: &str,
    ) -> ControlResult<()> {
        if let Some(message) = self.broken_packages.get(package) {
            return Err(ControlError::provider(message.value().clone()));
        }
        self.installed
            .entry(cluster_name.to_owned())
            .or_default()
            .push(package.to_owned());
        debug!(cluster = cluster_name, package, "package installed");
        Ok(())
    }

    async fn uninstall_all(&self, cluster_name: &str, _kube_config: &[u8]) -> ControlResult<usize> {
        if let Some(message) = self.broken_uninstalls.get(cluster_name) {
            return Err(ControlError::provider(message.value().clone()));
        }
        let removed = self
            .installed
            .remove(cluster_name)
            .map_or(0, |(_, packages)| packages.len());
        debug!(cluster = cluster_name, removed, "packages removed");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn install_then_uninstall_all() {
        let installer = MockInstaller::new();
        installer
            .install("web_prod", b"kubeconfig", "tiller")
            .await
            .expect("install failed");
        installer
            .install("web_prod", b"kubeconfig", "ingress-controller")
            .await
            .expect("install failed");
        assert_eq!(installer.installed("web_prod"), vec!["tiller", "ingress-controller"]);

        let removed = installer
            .uninstall_all("web_prod", b"kubeconfig")
            .await
            .expect("uninstall failed");
        assert_eq!(removed, 2);
        assert!(installer.installed("web_prod").is_empty());
    }

    #[tokio::test]
    async fn broken_package_fails_install() {
        let installer = MockInstaller::new();
        installer.fail_package("tiller", "chart repository unreachable");

        let err = installer
            .install("web_prod", b"kubeconfig", "tiller")
            .await
            .expect_err("install should fail");
        assert!(err.to_string().contains("chart repository unreachable"));
        assert!(installer.installed("web_prod").is_empty());
    }
}
