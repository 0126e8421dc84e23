//! Container runtime gateway.
//!
//! Every interaction with the container runtime goes through
//! [`ContainerRuntime`]. Calls block and are bounded by explicit timeouts;
//! callers running on an async executor must move them onto a blocking
//! thread.

mod docker;

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;

pub use docker::DockerCli;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Running,
    Exited,
    Missing,
}

impl ContainerStatus {
    /// Maps the runtime's `State.Status` string.
    pub fn from_state(state: &str) -> Self {
        match state.trim() {
            "running" => Self::Running,
            "" => Self::Missing,
            _ => Self::Exited,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContainerStats {
    pub cpu_percent: f64,
    pub mem_usage: String,
    pub mem_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mount {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub source: String,
    pub destination: String,
}

#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct ContainerDetails {
    pub status: ContainerStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    pub image: String,
    pub mounts: Vec<Mount>,
    /// `KEY=value` pairs; carries secrets, never serialized.
    #[serde(skip)]
    pub env: Vec<String>,
}

impl std::fmt::Debug for ContainerDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerDetails")
            .field("status", &self.status)
            .field("started_at", &self.started_at)
            .field("image", &self.image)
            .field("mounts", &self.mounts)
            .finish_non_exhaustive()
    }
}

impl ContainerDetails {
    pub fn env_var(&self, key: &str) -> Option<&str> {
        self.env.iter().find_map(|pair| {
            pair.split_once('=')
                .filter(|(k, _)| *k == key)
                .map(|(_, v)| v)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub exit_code: i32,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

pub trait ContainerRuntime: Send + Sync {
    /// Creates and starts every service of the topology file.
    fn bring_up(&self, topology: &Path, force_recreate: bool) -> Result<()>;

    fn tear_down(&self, topology: &Path, remove_volumes: bool) -> Result<()>;

    fn start(&self, name: &str) -> Result<()>;

    fn stop(&self, name: &str) -> Result<()>;

    fn restart(&self, name: &str) -> Result<()>;

    /// Force-removes a container. Removing a missing container is not an error.
    fn remove(&self, name: &str) -> Result<()>;

    fn inspect_status(&self, name: &str) -> Result<ContainerStatus>;

    /// `None` when no such container exists.
    fn inspect(&self, name: &str) -> Result<Option<ContainerDetails>>;

    fn stats(&self, name: &str) -> Result<ContainerStats>;

    /// Last `lines` lines of combined output.
    fn logs(&self, name: &str, lines: usize) -> Result<String>;

    /// Runs `command` through `sh -c` inside the container. A non-zero exit is
    /// reported in the output, not as an error. `timeout` of `None` uses the
    /// configured exec budget.
    fn exec_raw(
        &self,
        name: &str,
        command: &str,
        cwd: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<ExecOutput>;

    /// Copies a host file into the container.
    fn copy_to(&self, name: &str, source: &Path, destination: &str) -> Result<()>;

    /// Volume names matching `filter` (a name substring).
    fn list_volumes(&self, filter: &str) -> Result<Vec<String>>;

    fn remove_volume(&self, name: &str) -> Result<()>;

    fn image_exists(&self, image: &str) -> Result<bool>;
}

/// Quotes `value` for a POSIX shell.
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@%+,".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("plain-value_1.0"), "plain-value_1.0");
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("two words"), "'two words'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote("$(rm -rf /)"), "'$(rm -rf /)'");
    }

    #[test]
    fn test_status_from_state() {
        assert_eq!(ContainerStatus::from_state("running\n"), ContainerStatus::Running);
        assert_eq!(ContainerStatus::from_state("exited"), ContainerStatus::Exited);
        assert_eq!(ContainerStatus::from_state("created"), ContainerStatus::Exited);
        assert_eq!(ContainerStatus::from_state(""), ContainerStatus::Missing);
    }

    #[test]
    fn test_details_debug_hides_env() {
        let details = ContainerDetails {
            status: ContainerStatus::Running,
            started_at: None,
            image: "mysql:8.0".to_string(),
            mounts: vec![],
            env: vec!["MYSQL_ROOT_PASSWORD=hunter2".to_string()],
        };
        assert!(!format!("{details:?}").contains("hunter2"));
        assert_eq!(details.env_var("MYSQL_ROOT_PASSWORD"), Some("hunter2"));
    }
}
