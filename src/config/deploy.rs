use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Settings for topology generation and the container runtime.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeployConfig {
    /// Root of the per-site topology directories. Empty means `<data_dir>/apps`.
    pub apps_base: PathBuf,
    /// External network shared with the reverse proxy.
    pub proxy_network: String,
    pub http_entrypoint: String,
    pub https_entrypoint: String,
    pub http_resolver: String,
    pub dns_resolver: String,
    /// Repository prefix of pre-built runtime images (`<prefix>/php:8.3`).
    pub image_prefix: String,
    pub default_php_version: String,
    pub readiness_attempts: u32,
    pub readiness_interval_ms: u64,
    pub timeouts: Timeouts,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            apps_base: PathBuf::new(),
            proxy_network: "dockhand_proxy".to_string(),
            http_entrypoint: "web".to_string(),
            https_entrypoint: "websecure".to_string(),
            http_resolver: "letsencrypt".to_string(),
            dns_resolver: "letsencrypt-dns".to_string(),
            image_prefix: "dockhand".to_string(),
            default_php_version: "8.3".to_string(),
            readiness_attempts: 15,
            readiness_interval_ms: 2000,
            timeouts: Timeouts::default(),
        }
    }
}

impl DeployConfig {
    pub fn readiness_interval(&self) -> Duration {
        Duration::from_millis(self.readiness_interval_ms)
    }
}

/// Budgets for external commands, in seconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Timeouts {
    /// Short commands: start, stop, inspect, stats, logs, volume ops.
    pub command_secs: u64,
    /// Bring-up and tear-down, which may pull or build images.
    pub bring_up_secs: u64,
    pub exec_secs: u64,
    /// GitHub deploys (clone, dependency install).
    pub source_deploy_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            command_secs: 60,
            bring_up_secs: 900,
            exec_secs: 300,
            source_deploy_secs: 900,
        }
    }
}

impl Timeouts {
    pub fn command(&self) -> Duration {
        Duration::from_secs(self.command_secs)
    }

    pub fn bring_up(&self) -> Duration {
        Duration::from_secs(self.bring_up_secs)
    }

    pub fn exec(&self) -> Duration {
        Duration::from_secs(self.exec_secs)
    }

    pub fn source_deploy(&self) -> Duration {
        Duration::from_secs(self.source_deploy_secs)
    }
}
