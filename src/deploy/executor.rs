//! Site creation and (re)deployment.
//!
//! A create moves through `validating → provisioning → starting →
//! bootstrapping` and ends with the site either running or stopped with a
//! warning. Validation and provisioning failures abort with nothing left
//! behind. Anything that fails once the row exists degrades instead: the
//! site is kept, marked stopped with the reason, and can be redeployed from
//! the same record.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info};

use crate::auth::can_create_sites;
use crate::error::{Error, Phase, Result};
use crate::types::{DbType, Site, SiteStatus, SiteType, SslConfig, User};

use super::bootstrap;
use super::context::DeployContext;
use super::naming;
use super::secrets;
use super::spec::{DEFAULT_BRANCH, SiteSpec, validate_domain, validate_linkage, validate_name};
use super::topology::validate_php_version;

/// Attempts at finding a free container name before giving up.
const NAME_ATTEMPTS: i64 = 5;

/// A site after a deploy attempt. `warning` is set when the site was kept
/// but is not running.
#[derive(Debug, Clone, Serialize)]
pub struct DeployOutcome {
    pub site: Site,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

pub struct DeploymentExecutor {
    ctx: Arc<DeployContext>,
    provisioning: Mutex<()>,
}

impl DeploymentExecutor {
    pub fn new(ctx: Arc<DeployContext>) -> Self {
        Self {
            ctx,
            provisioning: Mutex::new(()),
        }
    }

    /// Creates a site for `requester` and deploys it.
    pub fn create(&self, requester: &User, spec: SiteSpec) -> Result<DeployOutcome> {
        let draft = self.validate(requester, spec)?;
        let site = self.provision(draft)?;

        let _guard = self.ctx.locks.acquire(site.id);
        self.deploy(site, false)
    }

    /// Re-runs starting and bootstrapping for an existing site with its
    /// stored name, secrets and options.
    pub fn redeploy(&self, site_id: i64) -> Result<DeployOutcome> {
        let _guard = self.ctx.locks.acquire(site_id);
        let site = self.ctx.load_site(site_id)?;
        if site.container_name.trim().is_empty() {
            return Err(Error::Provisioning(format!(
                "site {site_id} has no container name"
            )));
        }
        self.deploy(site, true)
    }

    fn validate(&self, requester: &User, spec: SiteSpec) -> Result<Site> {
        let name = validate_name(&spec.name)?;
        let site_type = spec
            .site_type
            .ok_or_else(|| Error::Validation("type is required".to_string()))?;
        let domain = if site_type.is_web() {
            validate_domain(&spec.domain)?
        } else {
            String::new()
        };
        if !can_create_sites(requester) {
            return Err(Error::Forbidden);
        }

        if let Some(version) = &spec.php_version {
            validate_php_version(version)?;
        }

        let mut ssl_config = SslConfig::default();
        ssl_config.merge_from(spec.ssl_config.into());

        let github_repo = spec
            .github_repo
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());
        let github_branch = github_repo.as_ref().map(|_| {
            spec.github_branch
                .map(|b| b.trim().to_string())
                .filter(|b| !b.is_empty())
                .unwrap_or_else(|| DEFAULT_BRANCH.to_string())
        });

        let now = Utc::now();
        let site = Site {
            id: 0,
            name,
            site_type,
            container_name: String::new(),
            domain,
            include_www: spec.include_www && site_type.is_web(),
            ssl_enabled: spec.ssl_enabled && site_type.is_web(),
            ssl_config,
            status: SiteStatus::Stopped,
            status_message: None,
            db_type: spec.db_type,
            db_host: spec.db_host.filter(|h| !h.trim().is_empty()),
            db_port: spec.db_port,
            db_name: spec.db_name.filter(|n| !n.trim().is_empty()),
            db_user: spec.db_user.filter(|u| !u.trim().is_empty()),
            db_password: spec.db_password.filter(|_| spec.db_type.is_external()),
            php_version: spec.php_version,
            deploy_options: spec.options,
            github_repo,
            github_branch,
            github_token: spec.github_token.filter(|t| !t.trim().is_empty()),
            github_last_commit: None,
            github_last_pull: None,
            sftp_enabled: spec.sftp_enabled,
            sftp_username: spec.sftp_username,
            sftp_password: spec.sftp_password,
            sftp_port: spec.sftp_port,
            owner_id: requester.id.clone(),
            created_at: now,
            updated_at: now,
        };
        validate_linkage(&site)?;

        if site_type.is_web() && self.ctx.store.get_site_by_domain(&site.domain)?.is_some() {
            return Err(Error::Conflict(format!(
                "domain {} is already in use",
                site.domain
            )));
        }
        if site_type == SiteType::Database {
            check_port_free(&self.ctx, &site)?;
        }

        Ok(site)
    }

    /// Rechecks the instance port, allocates the container name, generates
    /// owned-database secrets and inserts the row, all under the provisioning
    /// mutex.
    fn provision(&self, mut site: Site) -> Result<Site> {
        let _lock = self.provisioning.lock().unwrap_or_else(|e| e.into_inner());
        let store = &self.ctx.store;

        if site.site_type == SiteType::Database {
            check_port_free(&self.ctx, &site)?;
        }

        let engine = site.db_type.instance_engine();
        let prefix = naming::name_prefix(site.site_type, engine.as_ref().map(|e| e.as_str()));
        let now = Utc::now().timestamp();
        let mut container_name = None;
        for offset in 0..NAME_ATTEMPTS {
            let candidate = naming::container_name(prefix, &site.name, now + offset);
            if store.get_site_by_container_name(&candidate)?.is_none() {
                container_name = Some(candidate);
                break;
            }
        }
        site.container_name = container_name.ok_or_else(|| {
            Error::Provisioning("no free container name; retry the request".to_string())
        })?;

        if site.owns_database() {
            let credentials = secrets::generate_db_credentials();
            site.db_password = Some(serde_json::to_string(&credentials)?);
            let default_name = match site.site_type {
                SiteType::Wordpress => "wordpress".to_string(),
                SiteType::Database => naming::sanitize_name(&site.name),
                _ => "app".to_string(),
            };
            site.db_name.get_or_insert(default_name.clone());
            site.db_user.get_or_insert(default_name);

            if site.db_type == DbType::Dedicated {
                let engine = site.deploy_options.db_engine.unwrap_or_default();
                site.db_host = Some(naming::db_service(&site.container_name));
                site.db_port = Some(engine.internal_port());
            } else {
                site.db_host = Some(site.container_name.clone());
            }
        }

        site.id = store.create_site(&site).map_err(|e| match e {
            Error::Conflict(_) | Error::Provisioning(_) | Error::Validation(_) => e,
            other => Error::Provisioning(other.to_string()),
        })?;

        info!(
            site_id = site.id,
            container = %site.container_name,
            site_type = %site.site_type,
            "provisioned site"
        );
        Ok(site)
    }

    /// Starting and bootstrapping. Failures degrade to a stopped site.
    fn deploy(&self, site: Site, force_recreate: bool) -> Result<DeployOutcome> {
        let result = self
            .ctx
            .deploy_topology(&site, force_recreate)
            .map_err(|e| phase_error(&site, Phase::Starting, e))
            .and_then(|()| {
                bootstrap::run(&self.ctx, &site)
                    .map_err(|e| phase_error(&site, Phase::Bootstrapping, e))
            });

        let warning = match result {
            Ok(()) => {
                self.ctx
                    .store
                    .update_site_status(site.id, SiteStatus::Running, None)?;
                info!(site_id = site.id, container = %site.container_name, "site is running");
                None
            }
            Err(e) => {
                let message = e.to_string();
                error!(site_id = site.id, container = %site.container_name, error = %message, "deployment failed, site kept stopped");
                self.ctx
                    .store
                    .update_site_status(site.id, SiteStatus::Stopped, Some(&message))?;
                Some(format!("site created but not deployed: {message}"))
            }
        };

        let site = self.ctx.load_site(site.id)?;
        Ok(DeployOutcome { site, warning })
    }
}

fn phase_error(site: &Site, phase: Phase, error: Error) -> Error {
    match error {
        Error::Deployment { .. } => error,
        other => Error::Deployment {
            site_id: site.id,
            phase,
            message: other.to_string(),
        },
    }
}

/// Rejects a database instance whose exposed port another instance uses.
pub(crate) fn check_port_free(ctx: &DeployContext, site: &Site) -> Result<()> {
    let Some(port) = site.db_port else {
        return Ok(());
    };
    let taken = ctx
        .store
        .list_database_instances()?
        .into_iter()
        .find(|other| other.id != site.id && other.db_port == Some(port));
    match taken {
        Some(other) => Err(Error::Validation(format!(
            "port {port} is already exposed by database instance '{}'",
            other.name
        ))),
        None => Ok(()),
    }
}
