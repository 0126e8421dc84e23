//! Site deployment and lifecycle orchestration.
//!
//! [`Orchestrator`] ties a [`Store`], a [`ContainerRuntime`] and a
//! [`SourceDeployer`] together and hands out the three workflows built on
//! them: creating sites, driving their lifecycle and reconciling edits.
//! Every call blocks on the container runtime.

mod bootstrap;
mod context;
mod executor;
pub mod labels;
mod lifecycle;
mod locks;
pub mod naming;
mod reconciler;
pub mod runtime;
pub mod secrets;
mod source;
pub mod spec;
pub mod topology;

use std::sync::Arc;

use crate::config::DeployConfig;
use crate::error::{Error, Result};
use crate::store::Store;

pub use context::{DeployContext, SETTING_DEFAULT_PHP, SETTING_WORDPRESS_MAX_PHP};
pub use executor::{DeployOutcome, DeploymentExecutor};
pub use lifecycle::{CleanupStep, DeleteReport, LifecycleController};
pub use locks::SiteLocks;
pub use reconciler::{RedeployReconciler, UpdateOutcome, needs_redeploy};
pub use runtime::{
    ContainerDetails, ContainerRuntime, ContainerStats, ContainerStatus, DockerCli, ExecOutput,
};
pub use source::{EnvSyncResult, GitSourceDeployer, SourceDeployResult, SourceDeployer};
pub use spec::{SiteSpec, SiteUpdate};

/// Runtime view of a site's main container.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SiteRuntimeStatus {
    pub site_id: i64,
    pub container_name: String,
    pub status: ContainerStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ContainerDetails>,
}

pub struct Orchestrator {
    ctx: Arc<DeployContext>,
    executor: DeploymentExecutor,
    lifecycle: LifecycleController,
    reconciler: RedeployReconciler,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        runtime: Arc<dyn ContainerRuntime>,
        source: Arc<dyn SourceDeployer>,
        config: DeployConfig,
    ) -> Self {
        let ctx = Arc::new(DeployContext {
            store,
            runtime,
            source,
            config,
            locks: SiteLocks::default(),
        });
        Self {
            executor: DeploymentExecutor::new(Arc::clone(&ctx)),
            lifecycle: LifecycleController::new(Arc::clone(&ctx)),
            reconciler: RedeployReconciler::new(Arc::clone(&ctx)),
            ctx,
        }
    }

    /// Uses [`GitSourceDeployer`] over the same runtime for source deploys.
    pub fn with_default_source(
        store: Arc<dyn Store>,
        runtime: Arc<dyn ContainerRuntime>,
        config: DeployConfig,
    ) -> Self {
        let source = Arc::new(GitSourceDeployer::new(
            Arc::clone(&runtime),
            config.timeouts.source_deploy(),
        ));
        Self::new(store, runtime, source, config)
    }

    pub fn executor(&self) -> &DeploymentExecutor {
        &self.executor
    }

    pub fn lifecycle(&self) -> &LifecycleController {
        &self.lifecycle
    }

    pub fn reconciler(&self) -> &RedeployReconciler {
        &self.reconciler
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.ctx.store
    }

    pub fn config(&self) -> &DeployConfig {
        &self.ctx.config
    }

    pub fn status(&self, site_id: i64) -> Result<SiteRuntimeStatus> {
        let site = self.ctx.load_site(site_id)?;
        let details = self.ctx.runtime.inspect(&site.container_name)?;
        Ok(SiteRuntimeStatus {
            site_id,
            status: details
                .as_ref()
                .map_or(ContainerStatus::Missing, |d| d.status),
            container_name: site.container_name,
            details,
        })
    }

    pub fn stats(&self, site_id: i64) -> Result<ContainerStats> {
        let site = self.ctx.load_site(site_id)?;
        self.ctx.runtime.stats(&site.container_name)
    }

    pub fn logs(&self, site_id: i64, lines: usize) -> Result<String> {
        let site = self.ctx.load_site(site_id)?;
        self.ctx.runtime.logs(&site.container_name, lines)
    }

    /// The last topology document written for the site.
    pub fn topology(&self, site_id: i64) -> Result<String> {
        self.ctx.load_site(site_id)?;
        self.ctx
            .store
            .get_compose_config(site_id)?
            .map(|c| c.content)
            .ok_or(Error::NotFound)
    }
}
