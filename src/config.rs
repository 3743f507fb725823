//! Configuration for meridian-control.

use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;

use crate::error::{ControlError, ControlResult};

/// Top-level configuration for the cluster lifecycle engine.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ControlConfig {
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Cloud provider behaviour configuration.
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Post-provisioning pipeline configuration.
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl ControlConfig {
    /// Load configuration from the default sources.
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default values
    /// 2. `control.toml` in the current directory (if present)
    /// 3. Environment variables with `MERIDIAN_CONTROL_` prefix
    pub fn load() -> ControlResult<Self> {
        Figment::new()
            .merge(Toml::file("control.toml"))
            .merge(Env::prefixed("MERIDIAN_CONTROL_").split("__"))
            .extract()
            .map_err(|e| ControlError::Config(e.to_string()))
    }

    /// Load configuration from a specific TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> ControlResult<Self> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("MERIDIAN_CONTROL_").split("__"))
            .extract()
            .map_err(|e| ControlError::Config(e.to_string()))
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL.
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_database_url() -> String {
    "postgres://localhost/meridian".to_owned()
}

const fn default_max_connections() -> u32 {
    10
}

const fn default_min_connections() -> u32 {
    1
}

const fn default_connect_timeout_secs() -> u64 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// Cloud provider behaviour configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Upper bound on a single provider API call, in seconds. Calls that
    /// exceed it fail the surrounding operation with a timeout error.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,

    /// Azure-specific settings.
    #[serde(default)]
    pub azure: AzureProviderConfig,
}

const fn default_call_timeout_secs() -> u64 {
    300
}

impl ProviderConfig {
    /// The provider call timeout as a [`Duration`].
    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: default_call_timeout_secs(),
            azure: AzureProviderConfig::default(),
        }
    }
}

/// Azure-specific provider settings, used when assembling the managed
/// cluster document.
#[derive(Debug, Clone, Deserialize)]
pub struct AzureProviderConfig {
    /// Admin username baked into the Linux profile of new clusters.
    #[serde(default = "default_admin_username")]
    pub admin_username: String,

    /// SSH public key material installed for the admin user.
    pub ssh_public_key: Option<String>,

    /// Service principal client ID.
    pub client_id: Option<String>,

    /// Service principal client secret.
    pub client_secret: Option<String>,

    /// DNS prefix for cluster hostnames.
    #[serde(default = "default_dns_prefix")]
    pub dns_prefix: String,
}

fn default_admin_username() -> String {
    "clusteradmin".to_owned()
}

fn default_dns_prefix() -> String {
    "dnsprefix".to_owned()
}

impl Default for AzureProviderConfig {
    fn default() -> Self {
        Self {
            admin_username: default_admin_username(),
            ssh_public_key: None,
            client_id: None,
            client_secret: None,
            dns_prefix: default_dns_prefix(),
        }
    }
}

/// Post-provisioning pipeline configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Packages installed into every new cluster, in order.
    #[serde(default = "default_baseline_packages")]
    pub baseline_packages: Vec<String>,

    /// Ingress controller package installed after the baseline.
    #[serde(default = "default_ingress_package")]
    pub ingress_package: String,

    /// Whether deleting a cluster schedules a monitoring target refresh.
    #[serde(default = "default_refresh_monitoring_on_delete")]
    pub refresh_monitoring_on_delete: bool,
}

fn default_baseline_packages() -> Vec<String> {
    vec!["tiller".to_owned()]
}

fn default_ingress_package() -> String {
    "ingress-controller".to_owned()
}

const fn default_refresh_monitoring_on_delete() -> bool {
    true
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            baseline_packages: default_baseline_packages(),
            ingress_package: default_ingress_package(),
            refresh_monitoring_on_delete: default_refresh_monitoring_on_delete(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = ControlConfig::default();
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.provider.call_timeout_secs, 300);
        assert_eq!(config.provider.azure.admin_username, "clusteradmin");
        assert_eq!(config.pipeline.baseline_packages, vec!["tiller"]);
        assert_eq!(config.pipeline.ingress_package, "ingress-controller");
        assert!(config.pipeline.refresh_monitoring_on_delete);
    }

    #[test]
    fn config_from_toml() {
        let toml = r#"
            [database]
            url = "postgres://user:pass@db:5432/clusters"
            max_connections = 20

            [provider]
            call_timeout_secs = 60

            [provider.azure]
            admin_username = "opsadmin"
            ssh_public_key = "ssh-rsa AAAA test@host"

            [pipeline]
            baseline_packages = ["tiller", "cert-manager"]
        "#;

        let config: ControlConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.database.url, "postgres://user:pass@db:5432/clusters");
        assert_eq!(config.database.max_connections, 20);
        assert_eq!(config.provider.call_timeout(), Duration::from_secs(60));
        assert_eq!(config.provider.azure.admin_username, "opsadmin");
        assert_eq!(
            config.pipeline.baseline_packages,
            vec!["tiller", "cert-manager"]
        );
        // Untouched sections keep their defaults.
        assert_eq!(config.pipeline.ingress_package, "ingress-controller");
    }
}
