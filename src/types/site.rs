use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteType {
    Wordpress,
    Php,
    Laravel,
    Database,
}

impl SiteType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wordpress => "wordpress",
            Self::Php => "php",
            Self::Laravel => "laravel",
            Self::Database => "database",
        }
    }

    /// Web application types are routed through the proxy and require a domain.
    pub fn is_web(&self) -> bool {
        !matches!(self, Self::Database)
    }
}

impl FromStr for SiteType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "wordpress" => Ok(Self::Wordpress),
            "php" => Ok(Self::Php),
            "laravel" => Ok(Self::Laravel),
            "database" => Ok(Self::Database),
            other => Err(Error::Validation(format!("unknown site type '{other}'"))),
        }
    }
}

impl fmt::Display for SiteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteStatus {
    Running,
    #[default]
    Stopped,
}

impl SiteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
        }
    }
}

impl FromStr for SiteStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "stopped" => Ok(Self::Stopped),
            other => Err(Error::Validation(format!("unknown site status '{other}'"))),
        }
    }
}

/// How a site reaches its database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbType {
    #[default]
    None,
    Shared,
    Dedicated,
    Custom,
    Mysql,
    Postgresql,
    Mariadb,
}

impl DbType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Shared => "shared",
            Self::Dedicated => "dedicated",
            Self::Custom => "custom",
            Self::Mysql => "mysql",
            Self::Postgresql => "postgresql",
            Self::Mariadb => "mariadb",
        }
    }

    /// Engine of a standalone database instance; `None` for application linkage types.
    pub fn instance_engine(&self) -> Option<DbEngine> {
        match self {
            Self::Mysql => Some(DbEngine::Mysql),
            Self::Postgresql => Some(DbEngine::Postgresql),
            Self::Mariadb => Some(DbEngine::Mariadb),
            _ => None,
        }
    }

    /// True when the site points at a database it does not own.
    pub fn is_external(&self) -> bool {
        matches!(self, Self::Custom | Self::Shared)
    }
}

impl FromStr for DbType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" | "" => Ok(Self::None),
            "shared" => Ok(Self::Shared),
            "dedicated" => Ok(Self::Dedicated),
            "custom" => Ok(Self::Custom),
            "mysql" => Ok(Self::Mysql),
            "postgresql" => Ok(Self::Postgresql),
            "mariadb" => Ok(Self::Mariadb),
            other => Err(Error::Validation(format!("unknown database type '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbEngine {
    #[default]
    Mysql,
    Mariadb,
    Postgresql,
}

impl DbEngine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mysql => "mysql",
            Self::Mariadb => "mariadb",
            Self::Postgresql => "postgresql",
        }
    }

    pub fn image(&self) -> &'static str {
        match self {
            Self::Mysql => "mysql:8.0",
            Self::Mariadb => "mariadb:11",
            Self::Postgresql => "postgres:16-alpine",
        }
    }

    pub fn internal_port(&self) -> u16 {
        match self {
            Self::Mysql | Self::Mariadb => 3306,
            Self::Postgresql => 5432,
        }
    }

    pub fn data_dir(&self) -> &'static str {
        match self {
            Self::Mysql | Self::Mariadb => "/var/lib/mysql",
            Self::Postgresql => "/var/lib/postgresql/data",
        }
    }

    /// Laravel `DB_CONNECTION` driver name.
    pub fn laravel_driver(&self) -> &'static str {
        match self {
            Self::Mysql | Self::Mariadb => "mysql",
            Self::Postgresql => "pgsql",
        }
    }

    /// Environment the engine's official image reads on first start.
    pub fn init_env(
        &self,
        root_password: &str,
        database: &str,
        user: &str,
        password: &str,
    ) -> BTreeMap<String, String> {
        let pairs: [(&str, &str); 4] = match self {
            Self::Mysql => [
                ("MYSQL_ROOT_PASSWORD", root_password),
                ("MYSQL_DATABASE", database),
                ("MYSQL_USER", user),
                ("MYSQL_PASSWORD", password),
            ],
            Self::Mariadb => [
                ("MARIADB_ROOT_PASSWORD", root_password),
                ("MARIADB_DATABASE", database),
                ("MARIADB_USER", user),
                ("MARIADB_PASSWORD", password),
            ],
            // postgres has no separate root account; the superuser is the app user
            Self::Postgresql => [
                ("POSTGRES_DB", database),
                ("POSTGRES_USER", user),
                ("POSTGRES_PASSWORD", password),
                ("PGDATA", "/var/lib/postgresql/data/pgdata"),
            ],
        };
        pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

impl FromStr for DbEngine {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mysql" => Ok(Self::Mysql),
            "mariadb" => Ok(Self::Mariadb),
            "postgresql" | "postgres" | "pgsql" => Ok(Self::Postgresql),
            other => Err(Error::Validation(format!("unknown database engine '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeMethod {
    #[default]
    Http,
    Dns,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DnsProvider {
    Cloudflare,
    Route53,
    Digitalocean,
}

impl DnsProvider {
    /// Credential keys the proxy's ACME client expects for this provider.
    pub fn credential_keys(&self) -> &'static [&'static str] {
        match self {
            Self::Cloudflare => &["CF_DNS_API_TOKEN", "CF_API_EMAIL"],
            Self::Route53 => &["AWS_ACCESS_KEY_ID", "AWS_SECRET_ACCESS_KEY", "AWS_REGION"],
            Self::Digitalocean => &["DO_AUTH_TOKEN"],
        }
    }
}

#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SslConfig {
    #[serde(default)]
    pub challenge: ChallengeMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_provider: Option<DnsProvider>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub credentials: BTreeMap<String, String>,
}

impl fmt::Debug for SslConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SslConfig")
            .field("challenge", &self.challenge)
            .field("dns_provider", &self.dns_provider)
            .field("credentials", &self.credentials.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Partial SSL settings from an update. Absent fields keep their stored value.
#[derive(Clone, Default, Deserialize)]
pub struct SslConfigUpdate {
    #[serde(default)]
    pub challenge: Option<ChallengeMethod>,
    #[serde(default)]
    pub dns_provider: Option<DnsProvider>,
    #[serde(default)]
    pub credentials: BTreeMap<String, String>,
}

impl fmt::Debug for SslConfigUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SslConfigUpdate")
            .field("challenge", &self.challenge)
            .field("dns_provider", &self.dns_provider)
            .field("credentials", &self.credentials.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl From<SslConfig> for SslConfigUpdate {
    fn from(config: SslConfig) -> Self {
        Self {
            challenge: Some(config.challenge),
            dns_provider: config.dns_provider,
            credentials: config.credentials,
        }
    }
}

impl SslConfig {
    /// Applies an update: a supplied challenge or provider replaces the stored
    /// one, credentials are merged so that blank incoming values never erase
    /// stored ones. Keys that do not belong to the resulting provider are
    /// dropped.
    pub fn merge_from(&mut self, incoming: SslConfigUpdate) {
        if let Some(challenge) = incoming.challenge {
            self.challenge = challenge;
        }
        if incoming.dns_provider.is_some() {
            self.dns_provider = incoming.dns_provider;
        }

        for (key, value) in incoming.credentials {
            if !value.trim().is_empty() {
                self.credentials.insert(key, value);
            }
        }

        match self.dns_provider {
            Some(provider) => {
                let keys = provider.credential_keys();
                self.credentials.retain(|k, _| keys.contains(&k.as_str()));
            }
            None => self.credentials.clear(),
        }
    }

    /// Fields that influence the generated proxy labels.
    pub fn routing_eq(&self, other: &SslConfig) -> bool {
        self.challenge == other.challenge
    }
}

/// Option bag that shapes the generated topology beyond the core site fields.
/// Persisted with the site so rebuilds regenerate the same topology.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployOptions {
    /// Engine of a dedicated database sidecar.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_engine: Option<DbEngine>,
    /// Emit a cache sidecar.
    #[serde(default)]
    pub cache: bool,
    /// Write the performance `.ini` override (WordPress).
    #[serde(default)]
    pub optimize: bool,
}

/// Root and application-user passwords of a database the site owns
/// (dedicated sidecar or standalone instance), stored as JSON in `db_password`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbCredentials {
    pub root: String,
    pub user: String,
}

impl fmt::Debug for DbCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DbCredentials { .. }")
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct Site {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub site_type: SiteType,
    pub container_name: String,
    pub domain: String,
    pub include_www: bool,
    pub ssl_enabled: bool,
    pub ssl_config: SslConfig,
    pub status: SiteStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    pub db_type: DbType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_user: Option<String>,
    #[serde(skip)]
    pub db_password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub php_version: Option<String>,
    pub deploy_options: DeployOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub github_repo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub github_branch: Option<String>,
    #[serde(skip)]
    pub github_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub github_last_commit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub github_last_pull: Option<DateTime<Utc>>,
    pub sftp_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sftp_username: Option<String>,
    #[serde(skip)]
    pub sftp_password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sftp_port: Option<u16>,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl fmt::Debug for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Site")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("site_type", &self.site_type)
            .field("container_name", &self.container_name)
            .field("domain", &self.domain)
            .field("ssl_enabled", &self.ssl_enabled)
            .field("status", &self.status)
            .field("db_type", &self.db_type)
            .field("owner_id", &self.owner_id)
            .finish_non_exhaustive()
    }
}

impl Site {
    /// Parses the `{root, user}` pair stored for sites that own their database.
    pub fn owned_db_credentials(&self) -> Option<DbCredentials> {
        self.db_password
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
    }

    /// True when the site runs its own database container.
    pub fn owns_database(&self) -> bool {
        self.db_type == DbType::Dedicated || self.db_type.instance_engine().is_some()
    }

    pub fn has_source_repo(&self) -> bool {
        self.github_repo
            .as_deref()
            .is_some_and(|repo| !repo.trim().is_empty())
    }
}
