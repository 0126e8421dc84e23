//! Start, stop, restart, rebuild and delete of existing sites.

use std::fs;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::types::{Site, SiteStatus, SiteType};

use super::context::DeployContext;
use super::executor::DeployOutcome;
use super::naming;
use super::runtime::ContainerStatus;

/// One best-effort step of a delete.
#[derive(Debug, Clone, Serialize)]
pub struct CleanupStep {
    pub step: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DeleteReport {
    pub site_id: i64,
    pub keep_data: bool,
    pub steps: Vec<CleanupStep>,
}

impl DeleteReport {
    fn record(&mut self, step: impl Into<String>, result: Result<()>) {
        let step = step.into();
        match result {
            Ok(()) => self.steps.push(CleanupStep {
                step,
                ok: true,
                message: None,
            }),
            Err(e) => {
                warn!(site_id = self.site_id, step = %step, error = %e, "cleanup step failed, continuing");
                self.steps.push(CleanupStep {
                    step,
                    ok: false,
                    message: Some(e.to_string()),
                });
            }
        }
    }

    pub fn is_clean(&self) -> bool {
        self.steps.iter().all(|s| s.ok)
    }

    pub fn failures(&self) -> impl Iterator<Item = &CleanupStep> {
        self.steps.iter().filter(|s| !s.ok)
    }
}

pub struct LifecycleController {
    ctx: Arc<DeployContext>,
}

impl LifecycleController {
    pub fn new(ctx: Arc<DeployContext>) -> Self {
        Self { ctx }
    }

    pub fn start(&self, site_id: i64) -> Result<DeployOutcome> {
        let _guard = self.ctx.locks.acquire(site_id);
        let site = self.ctx.load_site(site_id)?;

        let result = match self.ctx.runtime.inspect_status(&site.container_name) {
            Ok(ContainerStatus::Missing) => self
                .ctx
                .ensure_topology(&site)
                .and_then(|path| self.ctx.runtime.bring_up(&path, false)),
            Ok(_) => self.ctx.runtime.start(&site.container_name),
            Err(e) => Err(e),
        };
        self.finish(&site, "start", result)
    }

    pub fn stop(&self, site_id: i64) -> Result<DeployOutcome> {
        let _guard = self.ctx.locks.acquire(site_id);
        let site = self.ctx.load_site(site_id)?;

        self.ctx
            .runtime
            .stop(&site.container_name)
            .map_err(|e| step_error("stop", e))?;
        self.ctx
            .store
            .update_site_status(site.id, SiteStatus::Stopped, None)?;
        info!(site_id, container = %site.container_name, "stopped site");

        Ok(DeployOutcome {
            site: self.ctx.load_site(site_id)?,
            warning: None,
        })
    }

    pub fn restart(&self, site_id: i64) -> Result<DeployOutcome> {
        let _guard = self.ctx.locks.acquire(site_id);
        let site = self.ctx.load_site(site_id)?;
        let result = self.ctx.runtime.restart(&site.container_name);
        self.finish(&site, "restart", result)
    }

    /// Recreates the containers from a freshly generated topology. Named
    /// volumes are kept.
    pub fn rebuild(&self, site_id: i64) -> Result<DeployOutcome> {
        let _guard = self.ctx.locks.acquire(site_id);
        let site = self.ctx.load_site(site_id)?;

        let result = self
            .ctx
            .restore_topology(&site)
            .and_then(|existing| match existing {
                Some(path) => self.ctx.runtime.tear_down(&path, false),
                None => Ok(()),
            })
            .and_then(|()| self.ctx.deploy_topology(&site, true));
        self.finish(&site, "rebuild", result)
    }

    /// Removes everything the site owns. Every step is attempted regardless
    /// of earlier failures; the database row goes last.
    pub fn delete(&self, site_id: i64, keep_data: bool) -> Result<DeleteReport> {
        let _guard = self.ctx.locks.acquire(site_id);
        let site = self.ctx.load_site(site_id)?;
        let runtime = &self.ctx.runtime;
        let cn = &site.container_name;

        let mut report = DeleteReport {
            site_id,
            keep_data,
            steps: Vec::new(),
        };

        match self.ctx.restore_topology(&site) {
            Ok(Some(path)) => report.record("tear down", runtime.tear_down(&path, !keep_data)),
            Ok(None) => report.record("remove container", runtime.remove(cn)),
            Err(e) => {
                report.record("restore topology", Err(e));
                report.record("remove container", runtime.remove(cn));
            }
        }

        for sidecar in naming::sidecar_containers(cn) {
            report.record(format!("remove {sidecar}"), runtime.remove(&sidecar));
        }

        if !keep_data {
            let patterns = naming::volume_patterns(cn);
            match runtime.list_volumes(cn) {
                Ok(volumes) => {
                    for volume in volumes.iter().filter(|v| patterns.contains(v)) {
                        report.record(format!("remove volume {volume}"), runtime.remove_volume(volume));
                    }
                }
                Err(e) => report.record("list volumes", Err(e)),
            }
        }

        let dir = self.ctx.site_dir(&site);
        if dir.exists() {
            report.record(
                "remove topology directory",
                fs::remove_dir_all(&dir).map_err(Error::Io),
            );
        }

        report.record(
            "delete compose config",
            self.ctx.store.delete_compose_config(site_id).map(|_| ()),
        );

        self.ctx
            .store
            .delete_site(site_id)
            .map_err(|e| step_error("delete record", e))?;
        self.ctx.locks.release(site_id);

        info!(
            site_id,
            container = %cn,
            keep_data,
            failed_steps = report.failures().count(),
            "deleted site"
        );
        Ok(report)
    }

    /// Records the outcome of start, restart and rebuild.
    fn finish(&self, site: &Site, step: &str, result: Result<()>) -> Result<DeployOutcome> {
        if let Err(e) = result {
            let error = step_error(step, e);
            self.ctx
                .store
                .update_site_status(site.id, SiteStatus::Stopped, Some(&error.to_string()))?;
            return Err(error);
        }

        let mut warning = None;
        if site.site_type == SiteType::Laravel {
            let sync = self.ctx.source.sync_env_to_app(&site.container_name);
            if !sync.success {
                warn!(site_id = site.id, message = %sync.message, "env sync failed");
                warning = Some(format!("environment sync failed: {}", sync.message));
            }
        }

        self.ctx
            .store
            .update_site_status(site.id, SiteStatus::Running, None)?;
        info!(site_id = site.id, container = %site.container_name, step, "site is running");

        Ok(DeployOutcome {
            site: self.ctx.load_site(site.id)?,
            warning,
        })
    }
}

fn step_error(step: &str, error: Error) -> Error {
    match error {
        Error::Lifecycle { .. } | Error::NotFound => error,
        other => Error::Lifecycle {
            step: step.to_string(),
            message: other.to_string(),
        },
    }
}
