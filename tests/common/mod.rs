//! Shared fixtures: a recording container runtime, a scripted source
//! deployer and an orchestrator wired to a temporary SQLite store.

#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tempfile::TempDir;
use uuid::Uuid;

use dockhand::config::{DeployConfig, ServerConfig};
use dockhand::deploy::topology::TopologyDocument;
use dockhand::deploy::{
    ContainerDetails, ContainerRuntime, ContainerStats, ContainerStatus, EnvSyncResult,
    ExecOutput, Orchestrator, SourceDeployResult, SourceDeployer,
};
use dockhand::error::{Error, Result};
use dockhand::store::{SqliteStore, Store};
use dockhand::types::{Site, User};

#[derive(Default)]
struct RuntimeState {
    calls: Vec<String>,
    containers: HashMap<String, ContainerStatus>,
    volumes: BTreeSet<String>,
    copied: HashMap<String, String>,
    failing_exec: Option<String>,
    fail_bring_up: bool,
    missing_images: bool,
}

/// In-memory stand-in for the container runtime. Bringing a topology up
/// marks every service running and creates its volumes.
#[derive(Default)]
pub struct FakeRuntime {
    state: Mutex<RuntimeState>,
}

impl FakeRuntime {
    fn state(&self) -> std::sync::MutexGuard<'_, RuntimeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn calls_matching(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn status_of(&self, name: &str) -> ContainerStatus {
        self.state()
            .containers
            .get(name)
            .copied()
            .unwrap_or(ContainerStatus::Missing)
    }

    pub fn container_count(&self) -> usize {
        self.state().containers.len()
    }

    pub fn volumes(&self) -> Vec<String> {
        self.state().volumes.iter().cloned().collect()
    }

    /// Content copied into the container at `destination`.
    pub fn copied(&self, destination: &str) -> Option<String> {
        self.state().copied.get(destination).cloned()
    }

    /// Makes every exec whose command contains `needle` exit non-zero.
    pub fn fail_exec_containing(&self, needle: &str) {
        self.state().failing_exec = Some(needle.to_string());
    }

    pub fn clear_exec_failure(&self) {
        self.state().failing_exec = None;
    }

    pub fn fail_bring_up(&self, fail: bool) {
        self.state().fail_bring_up = fail;
    }

    pub fn report_missing_images(&self) {
        self.state().missing_images = true;
    }

    fn record(&self, call: String) {
        self.state().calls.push(call);
    }
}

impl ContainerRuntime for FakeRuntime {
    fn bring_up(&self, topology: &Path, force_recreate: bool) -> Result<()> {
        self.record(format!(
            "up {} force={force_recreate}",
            topology.display()
        ));
        if self.state().fail_bring_up {
            return Err(Error::Runtime {
                command: "docker compose up".to_string(),
                exit_code: 1,
                output: "simulated failure".to_string(),
            });
        }

        let doc = TopologyDocument::from_yaml(&fs::read_to_string(topology)?)?;
        let mut state = self.state();
        for name in doc.services.keys() {
            state.containers.insert(name.clone(), ContainerStatus::Running);
        }
        for volume in doc.volume_names() {
            state.volumes.insert(volume.to_string());
        }
        Ok(())
    }

    fn tear_down(&self, topology: &Path, remove_volumes: bool) -> Result<()> {
        self.record(format!(
            "down {} volumes={remove_volumes}",
            topology.display()
        ));
        let doc = TopologyDocument::from_yaml(&fs::read_to_string(topology)?)?;
        let mut state = self.state();
        for name in doc.services.keys() {
            state.containers.remove(name);
        }
        if remove_volumes {
            for volume in doc.volume_names() {
                state.volumes.remove(volume);
            }
        }
        Ok(())
    }

    fn start(&self, name: &str) -> Result<()> {
        self.record(format!("start {name}"));
        self.state()
            .containers
            .insert(name.to_string(), ContainerStatus::Running);
        Ok(())
    }

    fn stop(&self, name: &str) -> Result<()> {
        self.record(format!("stop {name}"));
        let mut state = self.state();
        match state.containers.get_mut(name) {
            Some(status) => {
                *status = ContainerStatus::Exited;
                Ok(())
            }
            None => Err(Error::Runtime {
                command: format!("docker stop {name}"),
                exit_code: 1,
                output: "No such container".to_string(),
            }),
        }
    }

    fn restart(&self, name: &str) -> Result<()> {
        self.record(format!("restart {name}"));
        self.state()
            .containers
            .insert(name.to_string(), ContainerStatus::Running);
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<()> {
        self.record(format!("rm {name}"));
        self.state().containers.remove(name);
        Ok(())
    }

    fn inspect_status(&self, name: &str) -> Result<ContainerStatus> {
        Ok(self.status_of(name))
    }

    fn inspect(&self, name: &str) -> Result<Option<ContainerDetails>> {
        let status = self.status_of(name);
        Ok((status != ContainerStatus::Missing).then(|| ContainerDetails {
            status,
            started_at: Some(Utc::now()),
            image: "fake:latest".to_string(),
            mounts: Vec::new(),
            env: Vec::new(),
        }))
    }

    fn stats(&self, name: &str) -> Result<ContainerStats> {
        self.record(format!("stats {name}"));
        Ok(ContainerStats {
            cpu_percent: 1.5,
            mem_usage: "10MiB / 1GiB".to_string(),
            mem_percent: 0.98,
        })
    }

    fn logs(&self, name: &str, lines: usize) -> Result<String> {
        self.record(format!("logs {name} {lines}"));
        Ok("line one\nline two\n".to_string())
    }

    fn exec_raw(
        &self,
        name: &str,
        command: &str,
        _cwd: Option<&str>,
        _timeout: Option<Duration>,
    ) -> Result<ExecOutput> {
        self.record(format!("exec {name} {command}"));
        let state = self.state();
        if state
            .failing_exec
            .as_deref()
            .is_some_and(|needle| command.contains(needle))
        {
            return Ok(ExecOutput {
                stdout: "simulated exec failure".to_string(),
                exit_code: 1,
            });
        }

        // No entry file exists until one is copied in.
        if command.starts_with("test -e ") {
            let present = state.copied.keys().any(|dest| command.contains(dest.as_str()));
            return Ok(ExecOutput {
                stdout: String::new(),
                exit_code: if present { 0 } else { 1 },
            });
        }

        Ok(ExecOutput {
            stdout: String::new(),
            exit_code: 0,
        })
    }

    fn copy_to(&self, name: &str, source: &Path, destination: &str) -> Result<()> {
        self.record(format!("cp {name} {destination}"));
        let content = fs::read_to_string(source)?;
        self.state()
            .copied
            .insert(destination.to_string(), content);
        Ok(())
    }

    fn list_volumes(&self, filter: &str) -> Result<Vec<String>> {
        Ok(self
            .state()
            .volumes
            .iter()
            .filter(|v| v.contains(filter))
            .cloned()
            .collect())
    }

    fn remove_volume(&self, name: &str) -> Result<()> {
        self.record(format!("volume rm {name}"));
        self.state().volumes.remove(name);
        Ok(())
    }

    fn image_exists(&self, _image: &str) -> Result<bool> {
        Ok(!self.state().missing_images)
    }
}

/// Source deployer that answers from a script instead of running git.
#[derive(Default)]
pub struct FakeSource {
    deploys: Mutex<Vec<String>>,
    fail_with: Mutex<Option<String>>,
}

pub const FAKE_COMMIT: &str = "0123456789abcdef0123456789abcdef01234567";

impl FakeSource {
    pub fn deploys(&self) -> Vec<String> {
        self.deploys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn fail_with(&self, message: &str) {
        *self.fail_with.lock().unwrap_or_else(|e| e.into_inner()) = Some(message.to_string());
    }
}

impl SourceDeployer for FakeSource {
    fn deploy_from_github(&self, site: &Site, container_name: &str) -> SourceDeployResult {
        self.deploys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(container_name.to_string());

        match self
            .fail_with
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
        {
            Some(message) => SourceDeployResult {
                success: false,
                commit_hash: None,
                message,
            },
            None => SourceDeployResult {
                success: true,
                commit_hash: Some(FAKE_COMMIT.to_string()),
                message: format!(
                    "deployed {}",
                    site.github_branch.as_deref().unwrap_or("main")
                ),
            },
        }
    }

    fn sync_env_to_app(&self, _container_name: &str) -> EnvSyncResult {
        EnvSyncResult {
            success: true,
            message: "environment synced".to_string(),
        }
    }
}

pub struct Harness {
    pub temp_dir: TempDir,
    pub store: Arc<SqliteStore>,
    pub runtime: Arc<FakeRuntime>,
    pub source: Arc<FakeSource>,
    pub orchestrator: Orchestrator,
    pub owner: User,
}

impl Harness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("create temp dir");
        let store = Arc::new(SqliteStore::new(temp_dir.path().join("dockhand.db")).expect("open store"));
        store.initialize().expect("initialize store");

        let owner = create_user(store.as_ref(), "owner", true);

        let runtime = Arc::new(FakeRuntime::default());
        let source = Arc::new(FakeSource::default());
        let orchestrator = Orchestrator::new(
            store.clone(),
            runtime.clone(),
            source.clone(),
            deploy_config(temp_dir.path()),
        );

        Self {
            temp_dir,
            store,
            runtime,
            source,
            orchestrator,
            owner,
        }
    }

    pub fn apps_base(&self) -> PathBuf {
        self.temp_dir.path().join("apps")
    }

    pub fn site(&self, id: i64) -> Site {
        self.store
            .get_site(id)
            .expect("get site")
            .expect("site exists")
    }

    pub fn topology_path(&self, site: &Site) -> PathBuf {
        self.apps_base()
            .join(site.site_type.as_str())
            .join("sites")
            .join(&site.container_name)
            .join("docker-compose.yml")
    }

    pub fn topology(&self, site: &Site) -> TopologyDocument {
        let text = fs::read_to_string(self.topology_path(site)).expect("read topology");
        TopologyDocument::from_yaml(&text).expect("parse topology")
    }
}

/// Deploy config rooted at `data_dir` with a fast readiness probe.
pub fn deploy_config(data_dir: &Path) -> DeployConfig {
    let mut config = ServerConfig::load(
        "127.0.0.1".to_string(),
        8080,
        data_dir.to_path_buf(),
        None,
    )
    .expect("load config")
    .deploy;
    config.readiness_attempts = 2;
    config.readiness_interval_ms = 1;
    config
}

pub fn create_user(store: &dyn Store, username: &str, can_create_sites: bool) -> User {
    let now = Utc::now();
    let user = User {
        id: Uuid::new_v4().to_string(),
        username: username.to_string(),
        can_create_sites,
        created_at: now,
        updated_at: now,
    };
    store.create_user(&user).expect("create user");
    user
}

pub fn spec(value: serde_json::Value) -> dockhand::deploy::SiteSpec {
    serde_json::from_value(value).expect("valid site spec")
}

pub fn update(value: serde_json::Value) -> dockhand::deploy::SiteUpdate {
    serde_json::from_value(value).expect("valid site update")
}
