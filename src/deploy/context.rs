use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use tracing::{debug, info, warn};

use crate::config::DeployConfig;
use crate::error::{Error, Result};
use crate::store::Store;
use crate::types::{Site, SiteType};

use super::locks::SiteLocks;
use super::naming;
use super::runtime::{ContainerRuntime, ContainerStatus};
use super::source::SourceDeployer;
use super::topology::{
    ImageProbe, PERFORMANCE_INI, PERFORMANCE_INI_CONTENT, TopologyDocument, TopologyGenerator,
};

/// Setting overriding the configured default PHP version.
pub const SETTING_DEFAULT_PHP: &str = "default_php_version";
/// Setting overriding the highest PHP version WordPress sites run.
pub const SETTING_WORDPRESS_MAX_PHP: &str = "wordpress_max_php";

const PHP_DOCKERFILE: &str = include_str!("../../templates/php.Dockerfile");
const LARAVEL_DOCKERFILE: &str = include_str!("../../templates/laravel.Dockerfile");

/// Collaborators shared by the executor, lifecycle controller and reconciler.
pub struct DeployContext {
    pub store: Arc<dyn Store>,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub source: Arc<dyn SourceDeployer>,
    pub config: DeployConfig,
    pub locks: SiteLocks,
}

struct RuntimeProbe<'a>(&'a dyn ContainerRuntime);

impl ImageProbe for RuntimeProbe<'_> {
    fn image_exists(&self, image: &str) -> bool {
        self.0.image_exists(image).unwrap_or_else(|e| {
            warn!(image = %image, error = %e, "image probe failed, building from source");
            false
        })
    }
}

impl DeployContext {
    pub fn load_site(&self, site_id: i64) -> Result<Site> {
        self.store.get_site(site_id)?.ok_or(Error::NotFound)
    }

    fn setting(&self, key: &str) -> Option<String> {
        match self.store.get_setting(key) {
            Ok(setting) => setting
                .map(|s| s.value.trim().to_string())
                .filter(|v| !v.is_empty()),
            Err(e) => {
                warn!(key = %key, error = %e, "failed to read setting, using default");
                None
            }
        }
    }

    /// PHP version new sites get when the request names none.
    pub fn default_php_version(&self) -> String {
        self.setting(SETTING_DEFAULT_PHP)
            .unwrap_or_else(|| self.config.default_php_version.clone())
    }

    pub fn site_dir(&self, site: &Site) -> PathBuf {
        naming::site_dir(&self.config.apps_base, site)
    }

    pub fn topology_path(&self, site: &Site) -> PathBuf {
        naming::topology_path(&self.config.apps_base, site)
    }

    /// Generates the site's compose document from its current record.
    pub fn render(&self, site: &Site) -> Result<TopologyDocument> {
        let probe = RuntimeProbe(self.runtime.as_ref());
        let mut generator = TopologyGenerator::new(&self.config, &probe)
            .with_default_php(self.default_php_version());
        if let Some(ceiling) = self.setting(SETTING_WORDPRESS_MAX_PHP) {
            generator = generator.with_wordpress_ceiling(ceiling);
        }
        generator.generate(site, site.owned_db_credentials().as_ref())
    }

    /// Writes the document and its side files, then records the text as the
    /// site's compose config.
    pub fn write_topology(&self, site: &Site, doc: &TopologyDocument) -> Result<PathBuf> {
        let dir = self.site_dir(site);
        fs::create_dir_all(&dir)?;

        if site.site_type == SiteType::Wordpress && site.deploy_options.optimize {
            fs::write(dir.join(PERFORMANCE_INI), PERFORMANCE_INI_CONTENT)?;
        }
        if doc.services.values().any(|s| s.build.is_some()) {
            self.ensure_build_context(site.site_type)?;
        }

        let yaml = doc.to_yaml()?;
        let path = dir.join(naming::TOPOLOGY_FILE);
        write_atomic(&path, &yaml)?;
        self.store.upsert_compose_config(site.id, &yaml)?;

        debug!(site_id = site.id, path = %path.display(), "wrote topology");
        Ok(path)
    }

    fn ensure_build_context(&self, site_type: SiteType) -> Result<()> {
        let dockerfile = match site_type {
            SiteType::Php => PHP_DOCKERFILE,
            SiteType::Laravel => LARAVEL_DOCKERFILE,
            _ => return Ok(()),
        };
        let dir = naming::runtime_build_dir(&self.config.apps_base, site_type);
        let path = dir.join("Dockerfile");
        if !path.exists() {
            fs::create_dir_all(&dir)?;
            fs::write(&path, dockerfile)?;
            info!(path = %path.display(), "installed runtime build context");
        }
        Ok(())
    }

    /// Returns the topology file path, restoring the file from the stored
    /// compose config when it went missing on disk. `None` when neither exists.
    pub fn restore_topology(&self, site: &Site) -> Result<Option<PathBuf>> {
        let path = self.topology_path(site);
        if path.exists() {
            return Ok(Some(path));
        }

        let Some(stored) = self.store.get_compose_config(site.id)? else {
            return Ok(None);
        };
        TopologyDocument::from_yaml(&stored.content)?;

        fs::create_dir_all(self.site_dir(site))?;
        if site.site_type == SiteType::Wordpress && site.deploy_options.optimize {
            fs::write(self.site_dir(site).join(PERFORMANCE_INI), PERFORMANCE_INI_CONTENT)?;
        }
        write_atomic(&path, &stored.content)?;
        warn!(site_id = site.id, path = %path.display(), "topology file was missing, restored from stored config");
        Ok(Some(path))
    }

    /// Like [`restore_topology`](Self::restore_topology), regenerating from the
    /// site record as a last resort.
    pub fn ensure_topology(&self, site: &Site) -> Result<PathBuf> {
        if let Some(path) = self.restore_topology(site)? {
            return Ok(path);
        }
        let doc = self.render(site)?;
        self.write_topology(site, &doc)
    }

    /// Regenerates, writes and brings up the site's topology, then waits for
    /// the main container to report running.
    pub fn deploy_topology(&self, site: &Site, force_recreate: bool) -> Result<()> {
        let doc = self.render(site)?;
        let path = self.write_topology(site, &doc)?;
        self.runtime.bring_up(&path, force_recreate)?;
        self.wait_until_running(&site.container_name)
    }

    /// Polls the container status until it is running or attempts run out.
    pub fn wait_until_running(&self, container: &str) -> Result<()> {
        let attempts = self.config.readiness_attempts.max(1);
        let mut last = ContainerStatus::Missing;
        for attempt in 1..=attempts {
            last = self.runtime.inspect_status(container)?;
            if last == ContainerStatus::Running {
                debug!(container = %container, attempt, "container is running");
                return Ok(());
            }
            if attempt < attempts {
                thread::sleep(self.config.readiness_interval());
            }
        }
        Err(Error::Runtime {
            command: "readiness probe".to_string(),
            exit_code: 0,
            output: format!(
                "container {container} is {} after {attempts} checks",
                match last {
                    ContainerStatus::Running => "running",
                    ContainerStatus::Exited => "not running",
                    ContainerStatus::Missing => "missing",
                }
            ),
        })
    }
}

fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let tmp = path.with_extension("yml.tmp");
    fs::write(&tmp, content)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
