use std::collections::BTreeMap;

use crate::config::DeployConfig;
use crate::deploy::labels::{ProxySettings, Route, build_labels};
use crate::deploy::naming;
use crate::error::{Error, Result};
use crate::types::{DbCredentials, DbEngine, DbType, Site, SiteType};

use super::document::{BuildSpec, Network, PROXY_NETWORK_KEY, Service, TopologyDocument};

pub const SUPPORTED_PHP_VERSIONS: &[&str] = &["7.4", "8.0", "8.1", "8.2", "8.3", "8.4"];
/// Highest PHP version the WordPress image line is known to support.
pub const WORDPRESS_MAX_PHP: &str = "8.3";

pub const APP_PORT: u16 = 80;
pub const CACHE_IMAGE: &str = "redis:7-alpine";
pub const CACHE_PORT: u16 = 6379;
const WEB_ROOT: &str = "/var/www/html";

/// File name of the WordPress PHP override, next to the topology file.
pub const PERFORMANCE_INI: &str = "php-performance.ini";
const PERFORMANCE_INI_MOUNT: &str = "/usr/local/etc/php/conf.d/zz-performance.ini";

pub const PERFORMANCE_INI_CONTENT: &str = "\
memory_limit = 256M
upload_max_filesize = 64M
post_max_size = 64M
max_execution_time = 300
max_input_vars = 3000
opcache.enable = 1
opcache.memory_consumption = 128
opcache.interned_strings_buffer = 16
opcache.max_accelerated_files = 10000
opcache.revalidate_freq = 60
";

/// Answers whether a runtime image is already available locally.
pub trait ImageProbe {
    fn image_exists(&self, image: &str) -> bool;
}

pub fn validate_php_version(version: &str) -> Result<()> {
    if SUPPORTED_PHP_VERSIONS.contains(&version) {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "unsupported PHP version '{version}' (supported: {})",
            SUPPORTED_PHP_VERSIONS.join(", ")
        )))
    }
}

/// Steps `requested` down once when it is newer than `ceiling`.
pub fn clamp_wordpress_php(requested: &str, ceiling: &str) -> String {
    let position = |v: &str| SUPPORTED_PHP_VERSIONS.iter().position(|s| *s == v);
    match (position(requested), position(ceiling)) {
        (Some(req), Some(max)) if req > max => SUPPORTED_PHP_VERSIONS[req - 1].to_string(),
        _ => requested.to_string(),
    }
}

/// Connection details handed to an application container.
struct Datasource {
    engine: DbEngine,
    host: String,
    port: u16,
    name: String,
    user: String,
    password: String,
}

/// Builds a site's compose document. Pure apart from the image probe.
pub struct TopologyGenerator<'a> {
    config: &'a DeployConfig,
    probe: &'a dyn ImageProbe,
    proxy: ProxySettings,
    default_php: String,
    wordpress_ceiling: String,
}

impl<'a> TopologyGenerator<'a> {
    pub fn new(config: &'a DeployConfig, probe: &'a dyn ImageProbe) -> Self {
        Self {
            config,
            probe,
            proxy: ProxySettings::from(config),
            default_php: config.default_php_version.clone(),
            wordpress_ceiling: WORDPRESS_MAX_PHP.to_string(),
        }
    }

    pub fn with_default_php(mut self, version: impl Into<String>) -> Self {
        self.default_php = version.into();
        self
    }

    pub fn with_wordpress_ceiling(mut self, version: impl Into<String>) -> Self {
        self.wordpress_ceiling = version.into();
        self
    }

    /// PHP version the app container will run.
    pub fn php_version(&self, site: &Site) -> String {
        let requested = site
            .php_version
            .clone()
            .unwrap_or_else(|| self.default_php.clone());
        match site.site_type {
            SiteType::Wordpress => clamp_wordpress_php(&requested, &self.wordpress_ceiling),
            _ => requested,
        }
    }

    /// `credentials` must be present for sites that own their database.
    pub fn generate(
        &self,
        site: &Site,
        credentials: Option<&DbCredentials>,
    ) -> Result<TopologyDocument> {
        if site.container_name.trim().is_empty() {
            return Err(Error::Provisioning(format!(
                "site {} has no container name",
                site.id
            )));
        }

        let mut doc = TopologyDocument::new(&site.container_name);
        doc.networks.insert(
            PROXY_NETWORK_KEY.to_string(),
            Network {
                external: true,
                name: Some(self.proxy.network.clone()),
            },
        );

        if site.site_type == SiteType::Database {
            self.add_instance(&mut doc, site, credentials)?;
            return Ok(doc);
        }

        let datasource = self.datasource(site, credentials)?;
        let mut app = self.app_service(site, datasource.as_ref())?;
        doc.add_volume(naming::app_volume(&site.container_name));

        if site.db_type == DbType::Dedicated {
            let credentials = credentials.ok_or_else(|| missing_credentials(site))?;
            let ds = datasource
                .as_ref()
                .ok_or_else(|| missing_credentials(site))?;
            let db = self.dedicated_db(site, ds, credentials);
            app.depends_on.push(db.container_name.clone());
            doc.add_service(db);
            doc.add_volume(naming::db_volume(&site.container_name));
        }

        if site.deploy_options.cache {
            let cache = self.cache_service(site);
            app.depends_on.push(cache.container_name.clone());
            doc.add_service(cache);
        }

        let route = Route {
            name: &site.container_name,
            domain: &site.domain,
            include_www: site.include_www,
            ssl_enabled: site.ssl_enabled,
            challenge: site.ssl_config.challenge,
            port: APP_PORT,
        };
        app.labels = build_labels(&route, &self.proxy)
            .iter()
            .map(ToString::to_string)
            .collect();

        doc.add_service(app);
        Ok(doc)
    }

    fn base_service(&self, container_name: String) -> Service {
        Service {
            container_name,
            networks: vec![PROXY_NETWORK_KEY.to_string()],
            ..Default::default()
        }
    }

    fn app_service(&self, site: &Site, datasource: Option<&Datasource>) -> Result<Service> {
        let cn = &site.container_name;
        let php = self.php_version(site);
        validate_php_version(&php)?;

        let mut service = self.base_service(cn.clone());
        service
            .volumes
            .push(format!("{}:{WEB_ROOT}", naming::app_volume(cn)));
        service.environment = datasource_env(site.site_type, datasource);

        let scheme = if site.ssl_enabled { "https" } else { "http" };
        let cache_host = site.deploy_options.cache.then(|| naming::cache_service(cn));

        match site.site_type {
            SiteType::Wordpress => {
                service.image = Some(format!("wordpress:php{php}-apache"));

                let mut extra = Vec::new();
                if site.ssl_enabled {
                    // `$$` survives compose variable interpolation as a literal `$`
                    extra.push(
                        "if (($$_SERVER['HTTP_X_FORWARDED_PROTO'] ?? '') === 'https') { $$_SERVER['HTTPS'] = 'on'; }"
                            .to_string(),
                    );
                }
                if let Some(host) = &cache_host {
                    extra.push(format!("define('WP_REDIS_HOST', '{host}');"));
                    extra.push(format!("define('WP_REDIS_PORT', {CACHE_PORT});"));
                }
                if !extra.is_empty() {
                    service
                        .environment
                        .insert("WORDPRESS_CONFIG_EXTRA".to_string(), extra.join("\n"));
                }

                if site.deploy_options.optimize {
                    service
                        .volumes
                        .push(format!("./{PERFORMANCE_INI}:{PERFORMANCE_INI_MOUNT}:ro"));
                }
            }
            SiteType::Php | SiteType::Laravel => {
                let (image, build) = self.runtime_image(site.site_type, &php);
                service.image = Some(image);
                service.build = build;

                if let Some(host) = &cache_host {
                    service.environment.insert("REDIS_HOST".to_string(), host.clone());
                    service
                        .environment
                        .insert("REDIS_PORT".to_string(), CACHE_PORT.to_string());
                }

                if site.site_type == SiteType::Laravel {
                    let env = &mut service.environment;
                    env.insert("APP_ENV".to_string(), "production".to_string());
                    env.insert("APP_URL".to_string(), format!("{scheme}://{}", site.domain));
                    env.insert(
                        "APACHE_DOCUMENT_ROOT".to_string(),
                        format!("{WEB_ROOT}/public"),
                    );
                    env.insert("LOG_CHANNEL".to_string(), "stderr".to_string());
                    if cache_host.is_some() {
                        env.insert("CACHE_STORE".to_string(), "redis".to_string());
                        env.insert("SESSION_DRIVER".to_string(), "redis".to_string());
                    }
                }
            }
            SiteType::Database => {
                return Err(Error::Validation(
                    "database instances have no application service".to_string(),
                ));
            }
        }

        Ok(service)
    }

    /// Pre-built image when the probe finds one, else a build definition
    /// that tags its result with the same name.
    fn runtime_image(&self, site_type: SiteType, php: &str) -> (String, Option<BuildSpec>) {
        let image = format!("{}/{}:{php}", self.config.image_prefix, site_type.as_str());
        if self.probe.image_exists(&image) {
            return (image, None);
        }
        let context = naming::runtime_build_dir(&self.config.apps_base, site_type);
        let build = BuildSpec {
            context: context.display().to_string(),
            args: BTreeMap::from([("PHP_VERSION".to_string(), php.to_string())]),
        };
        (image, Some(build))
    }

    fn datasource(
        &self,
        site: &Site,
        credentials: Option<&DbCredentials>,
    ) -> Result<Option<Datasource>> {
        let engine = site.deploy_options.db_engine.unwrap_or_default();
        match site.db_type {
            DbType::None => Ok(None),
            DbType::Dedicated => {
                let credentials = credentials.ok_or_else(|| missing_credentials(site))?;
                Ok(Some(Datasource {
                    engine,
                    host: naming::db_service(&site.container_name),
                    port: engine.internal_port(),
                    name: site.db_name.clone().unwrap_or_else(|| "app".to_string()),
                    user: site.db_user.clone().unwrap_or_else(|| "app".to_string()),
                    password: credentials.user.clone(),
                }))
            }
            DbType::Custom | DbType::Shared => {
                let host = site
                    .db_host
                    .clone()
                    .filter(|h| !h.trim().is_empty())
                    .ok_or_else(|| {
                        Error::Validation(format!(
                            "db_host is required for a {} database",
                            site.db_type.as_str()
                        ))
                    })?;
                Ok(Some(Datasource {
                    engine,
                    host,
                    port: site.db_port.unwrap_or(engine.internal_port()),
                    name: site.db_name.clone().unwrap_or_default(),
                    user: site.db_user.clone().unwrap_or_default(),
                    password: site.db_password.clone().unwrap_or_default(),
                }))
            }
            other => Err(Error::Validation(format!(
                "database type '{}' is only valid for database instances",
                other.as_str()
            ))),
        }
    }

    fn dedicated_db(&self, site: &Site, ds: &Datasource, credentials: &DbCredentials) -> Service {
        let cn = &site.container_name;
        let mut service = self.base_service(naming::db_service(cn));
        service.image = Some(ds.engine.image().to_string());
        service.environment = ds
            .engine
            .init_env(&credentials.root, &ds.name, &ds.user, &credentials.user);
        service.volumes.push(format!(
            "{}:{}",
            naming::db_volume(cn),
            ds.engine.data_dir()
        ));
        service
    }

    fn cache_service(&self, site: &Site) -> Service {
        let mut service = self.base_service(naming::cache_service(&site.container_name));
        service.image = Some(CACHE_IMAGE.to_string());
        service.command = Some(
            [
                "redis-server",
                "--maxmemory",
                "128mb",
                "--maxmemory-policy",
                "allkeys-lru",
                "--save",
                "",
                "--appendonly",
                "no",
            ]
            .iter()
            .map(ToString::to_string)
            .collect(),
        );
        service
    }

    fn add_instance(
        &self,
        doc: &mut TopologyDocument,
        site: &Site,
        credentials: Option<&DbCredentials>,
    ) -> Result<()> {
        let engine = site.db_type.instance_engine().ok_or_else(|| {
            Error::Validation(format!(
                "database instances need an engine, got '{}'",
                site.db_type.as_str()
            ))
        })?;
        let credentials = credentials.ok_or_else(|| missing_credentials(site))?;
        let cn = &site.container_name;

        let mut service = self.base_service(cn.clone());
        service.image = Some(engine.image().to_string());
        service.environment = engine.init_env(
            &credentials.root,
            site.db_name.as_deref().unwrap_or("app"),
            site.db_user.as_deref().unwrap_or("app"),
            &credentials.user,
        );
        service
            .volumes
            .push(format!("{}:{}", naming::app_volume(cn), engine.data_dir()));
        if let Some(port) = site.db_port {
            service
                .ports
                .push(format!("{port}:{}", engine.internal_port()));
        }

        doc.add_service(service);
        doc.add_volume(naming::app_volume(cn));
        Ok(())
    }
}

fn missing_credentials(site: &Site) -> Error {
    Error::Provisioning(format!(
        "site {} owns a database but has no stored credentials",
        site.id
    ))
}

fn datasource_env(site_type: SiteType, ds: Option<&Datasource>) -> BTreeMap<String, String> {
    let host = ds.map(|d| d.host.clone()).unwrap_or_default();
    let port = ds.map(|d| d.port.to_string()).unwrap_or_default();
    let name = ds.map(|d| d.name.clone()).unwrap_or_default();
    let user = ds.map(|d| d.user.clone()).unwrap_or_default();
    let password = ds.map(|d| d.password.clone()).unwrap_or_default();

    let pairs: Vec<(&str, String)> = match site_type {
        SiteType::Wordpress => vec![
            (
                "WORDPRESS_DB_HOST",
                ds.map(|d| format!("{}:{}", d.host, d.port)).unwrap_or_default(),
            ),
            ("WORDPRESS_DB_NAME", name),
            ("WORDPRESS_DB_USER", user),
            ("WORDPRESS_DB_PASSWORD", password),
        ],
        SiteType::Laravel => vec![
            (
                "DB_CONNECTION",
                ds.map(|d| d.engine.laravel_driver().to_string())
                    .unwrap_or_default(),
            ),
            ("DB_HOST", host),
            ("DB_PORT", port),
            ("DB_DATABASE", name),
            ("DB_USERNAME", user),
            ("DB_PASSWORD", password),
        ],
        _ => vec![
            ("DB_HOST", host),
            ("DB_PORT", port),
            ("DB_NAME", name),
            ("DB_USER", user),
            ("DB_PASSWORD", password),
        ],
    };

    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), escape_interpolation(&v)))
        .collect()
}

/// Doubles `$` so user-supplied values reach the container verbatim.
fn escape_interpolation(value: &str) -> String {
    value.replace('$', "$$")
}
