//! Applies edits to an existing site and redeploys only when the generated
//! topology would differ in routing or data source.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info};

use crate::error::{Error, Result};
use crate::types::{DbType, Site, SiteStatus, SiteType};

use super::context::DeployContext;
use super::executor::check_port_free;
use super::naming;
use super::secrets;
use super::spec::SiteUpdate;

#[derive(Debug, Clone, Serialize)]
pub struct UpdateOutcome {
    pub site: Site,
    /// True when containers were force-recreated.
    pub recreated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

pub struct RedeployReconciler {
    ctx: Arc<DeployContext>,
}

/// True when the difference between `stored` and `next` changes the
/// generated topology.
pub fn needs_redeploy(stored: &Site, next: &Site) -> bool {
    let routing = stored.domain != next.domain
        || stored.include_www != next.include_www
        || stored.ssl_enabled != next.ssl_enabled
        || (next.ssl_enabled && !stored.ssl_config.routing_eq(&next.ssl_config));

    let datasource = stored.db_type != next.db_type
        || match next.db_type {
            DbType::Custom | DbType::Shared => {
                stored.db_host != next.db_host
                    || stored.db_port != next.db_port
                    || stored.db_name != next.db_name
                    || stored.db_user != next.db_user
                    || stored.db_password != next.db_password
            }
            DbType::Mysql | DbType::Postgresql | DbType::Mariadb => stored.db_port != next.db_port,
            DbType::None | DbType::Dedicated => false,
        };

    let runtime = stored.php_version != next.php_version;

    routing || datasource || runtime
}

impl RedeployReconciler {
    pub fn new(ctx: Arc<DeployContext>) -> Self {
        Self { ctx }
    }

    pub fn update(&self, site_id: i64, update: SiteUpdate) -> Result<UpdateOutcome> {
        let _guard = self.ctx.locks.acquire(site_id);
        let stored = self.ctx.load_site(site_id)?;

        let mut next = stored.clone();
        update.apply_to(&mut next)?;

        if next.domain != stored.domain {
            let taken = self.ctx.store.get_site_by_domain(&next.domain)?;
            if taken.is_some_and(|other| other.id != site_id) {
                return Err(Error::Conflict(format!(
                    "domain {} is already in use",
                    next.domain
                )));
            }
        }
        if next.site_type == SiteType::Database && next.db_port != stored.db_port {
            check_port_free(&self.ctx, &next)?;
        }
        if next.db_type == DbType::Dedicated && next.owned_db_credentials().is_none() {
            self.provision_dedicated(&mut next)?;
        }

        let redeploy = needs_redeploy(&stored, &next);
        self.ctx.store.update_site(&next)?;

        if !redeploy {
            info!(site_id, "updated site fields, no redeploy needed");
            return Ok(UpdateOutcome {
                site: self.ctx.load_site(site_id)?,
                recreated: false,
                warning: None,
            });
        }

        let warning = match self.ctx.deploy_topology(&next, true) {
            Ok(()) => {
                self.ctx
                    .store
                    .update_site_status(site_id, SiteStatus::Running, None)?;
                info!(site_id, container = %next.container_name, "redeployed site after update");
                None
            }
            Err(e) => {
                let message = format!("redeploy after update failed: {e}");
                error!(site_id, container = %next.container_name, error = %e, "redeploy after update failed");
                self.ctx
                    .store
                    .update_site_status(site_id, SiteStatus::Stopped, Some(&message))?;
                Some(message)
            }
        };

        Ok(UpdateOutcome {
            site: self.ctx.load_site(site_id)?,
            recreated: true,
            warning,
        })
    }

    /// Generates and persists credentials for a site switching to a
    /// dedicated database, before anything uses them.
    fn provision_dedicated(&self, site: &mut Site) -> Result<()> {
        let credentials = secrets::generate_db_credentials();
        let password = serde_json::to_string(&credentials)?;
        let default_name = match site.site_type {
            SiteType::Wordpress => "wordpress",
            _ => "app",
        };
        let db_user = site
            .db_user
            .get_or_insert_with(|| default_name.to_string())
            .clone();
        site.db_name.get_or_insert_with(|| default_name.to_string());
        site.db_host = Some(naming::db_service(&site.container_name));
        site.db_port = Some(site.deploy_options.db_engine.unwrap_or_default().internal_port());
        site.db_password = Some(password);

        self.ctx
            .store
            .update_site_credentials(site.id, Some(&db_user), site.db_password.as_deref())
    }
}
