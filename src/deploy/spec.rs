//! Request values flowing into the executor and reconciler.

use std::fmt;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::types::{
    ChallengeMethod, DbType, DeployOptions, Site, SiteType, SslConfig, SslConfigUpdate,
};

use super::topology::validate_php_version;

const MAX_NAME_LENGTH: usize = 100;
const MAX_DOMAIN_LENGTH: usize = 253;
pub const DEFAULT_BRANCH: &str = "main";

/// Everything a caller supplies to create a site.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct SiteSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub site_type: Option<SiteType>,
    pub domain: String,
    pub include_www: bool,
    pub ssl_enabled: bool,
    pub ssl_config: SslConfig,
    pub db_type: DbType,
    pub db_host: Option<String>,
    pub db_port: Option<u16>,
    pub db_name: Option<String>,
    pub db_user: Option<String>,
    pub db_password: Option<String>,
    pub php_version: Option<String>,
    pub options: DeployOptions,
    pub github_repo: Option<String>,
    pub github_branch: Option<String>,
    pub github_token: Option<String>,
    pub sftp_enabled: bool,
    pub sftp_username: Option<String>,
    pub sftp_password: Option<String>,
    pub sftp_port: Option<u16>,
}

impl fmt::Debug for SiteSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SiteSpec")
            .field("name", &self.name)
            .field("site_type", &self.site_type)
            .field("domain", &self.domain)
            .field("ssl_enabled", &self.ssl_enabled)
            .field("db_type", &self.db_type)
            .field("options", &self.options)
            .field("github_repo", &self.github_repo)
            .finish_non_exhaustive()
    }
}

/// Partial update of a site's editable fields. `None` leaves a field as is.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct SiteUpdate {
    pub name: Option<String>,
    pub domain: Option<String>,
    pub include_www: Option<bool>,
    pub ssl_enabled: Option<bool>,
    pub ssl_config: Option<SslConfigUpdate>,
    pub db_type: Option<DbType>,
    pub db_host: Option<String>,
    pub db_port: Option<u16>,
    pub db_name: Option<String>,
    pub db_user: Option<String>,
    pub db_password: Option<String>,
    pub php_version: Option<String>,
    pub github_repo: Option<String>,
    pub github_branch: Option<String>,
    pub github_token: Option<String>,
    pub sftp_enabled: Option<bool>,
    pub sftp_username: Option<String>,
    pub sftp_password: Option<String>,
    pub sftp_port: Option<u16>,
}

impl fmt::Debug for SiteUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SiteUpdate")
            .field("name", &self.name)
            .field("domain", &self.domain)
            .field("include_www", &self.include_www)
            .field("ssl_enabled", &self.ssl_enabled)
            .field("db_type", &self.db_type)
            .field("php_version", &self.php_version)
            .finish_non_exhaustive()
    }
}

impl SiteUpdate {
    /// Applies the update to `site` and re-validates the result.
    pub fn apply_to(self, site: &mut Site) -> Result<()> {
        if let Some(name) = self.name {
            site.name = validate_name(&name)?;
        }
        if let Some(domain) = self.domain {
            if site.site_type.is_web() {
                site.domain = validate_domain(&domain)?;
            } else if !domain.trim().is_empty() {
                return Err(Error::Validation(
                    "database instances have no domain".to_string(),
                ));
            }
        }
        if let Some(include_www) = self.include_www {
            site.include_www = include_www;
        }
        if let Some(ssl_enabled) = self.ssl_enabled {
            site.ssl_enabled = ssl_enabled;
        }
        if let Some(incoming) = self.ssl_config {
            site.ssl_config.merge_from(incoming);
        }

        let switched = self.db_type.is_some_and(|t| t != site.db_type);
        if let Some(db_type) = self.db_type.filter(|t| *t != site.db_type) {
            if !site.site_type.is_web() {
                return Err(Error::Validation(
                    "the engine of a database instance cannot be changed".to_string(),
                ));
            }
            // connection fields of the previous linkage no longer apply
            site.db_type = db_type;
            site.db_host = None;
            site.db_port = None;
            site.db_name = None;
            site.db_user = None;
            site.db_password = None;
        }

        let differs = |incoming: &Option<String>, stored: &Option<String>| {
            incoming
                .as_deref()
                .is_some_and(|v| Some(v.trim()) != stored.as_deref())
        };
        let renames_owned = site.owns_database()
            && !switched
            && (differs(&self.db_name, &site.db_name) || differs(&self.db_user, &site.db_user));
        if renames_owned {
            return Err(Error::Validation(
                "the database and user of a generated database cannot be renamed".to_string(),
            ));
        }

        if self.db_host.is_some() {
            site.db_host = non_blank(self.db_host);
        }
        if self.db_port.is_some() {
            site.db_port = self.db_port;
        }
        if self.db_name.is_some() {
            site.db_name = non_blank(self.db_name);
        }
        if self.db_user.is_some() {
            site.db_user = non_blank(self.db_user);
        }
        if let Some(password) = self.db_password.filter(|p| !p.is_empty()) {
            if site.owns_database() {
                return Err(Error::Validation(
                    "generated database passwords cannot be replaced".to_string(),
                ));
            }
            site.db_password = Some(password);
        }

        if let Some(version) = self.php_version {
            validate_php_version(&version)?;
            site.php_version = Some(version);
        }

        if self.github_repo.is_some() {
            site.github_repo = non_blank(self.github_repo);
        }
        if self.github_branch.is_some() {
            site.github_branch = non_blank(self.github_branch);
        }
        if let Some(token) = self.github_token.filter(|t| !t.trim().is_empty()) {
            site.github_token = Some(token);
        }

        if let Some(enabled) = self.sftp_enabled {
            site.sftp_enabled = enabled;
        }
        if self.sftp_username.is_some() {
            site.sftp_username = non_blank(self.sftp_username);
        }
        if let Some(password) = self.sftp_password.filter(|p| !p.is_empty()) {
            site.sftp_password = Some(password);
        }
        if self.sftp_port.is_some() {
            site.sftp_port = self.sftp_port;
        }

        validate_linkage(site)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn validate_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::Validation("name is required".to_string()));
    }
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(Error::Validation(format!(
            "name must be at most {MAX_NAME_LENGTH} characters"
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(Error::Validation(
            "name must not contain control characters".to_string(),
        ));
    }
    Ok(name.to_string())
}

/// Normalizes and checks a hostname: lowercase, dot-separated labels of
/// letters, digits and inner hyphens.
pub fn validate_domain(domain: &str) -> Result<String> {
    let domain = domain.trim().trim_end_matches('.').to_ascii_lowercase();
    if domain.is_empty() {
        return Err(Error::Validation("domain is required".to_string()));
    }
    if domain.len() > MAX_DOMAIN_LENGTH {
        return Err(Error::Validation("domain is too long".to_string()));
    }
    if domain.starts_with("www.") {
        return Err(Error::Validation(
            "give the apex domain and set include_www instead of a www. prefix".to_string(),
        ));
    }

    let valid_label = |label: &str| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
    };
    if !domain.split('.').all(valid_label) {
        return Err(Error::Validation(format!("invalid domain '{domain}'")));
    }

    Ok(domain)
}

/// `owner/repo` with GitHub's allowed characters.
pub fn validate_repo(repo: &str) -> Result<()> {
    let part_ok = |s: &str| {
        !s.is_empty()
            && s != "."
            && s != ".."
            && s
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || "-_.".contains(c))
    };
    match repo.split_once('/') {
        Some((owner, name)) if part_ok(owner) && part_ok(name) => Ok(()),
        _ => Err(Error::Validation(format!(
            "github_repo must look like owner/repo, got '{repo}'"
        ))),
    }
}

pub fn validate_branch(branch: &str) -> Result<()> {
    let ok = !branch.is_empty()
        && !branch.starts_with('-')
        && !branch.contains("..")
        && branch
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./".contains(c));
    if ok {
        Ok(())
    } else {
        Err(Error::Validation(format!("invalid branch name '{branch}'")))
    }
}

/// Cross-field checks on a site's database, TLS and source settings.
pub fn validate_linkage(site: &Site) -> Result<()> {
    match (site.site_type, site.db_type) {
        (SiteType::Database, db_type) if db_type.instance_engine().is_none() => {
            return Err(Error::Validation(
                "database instances need db_type mysql, postgresql or mariadb".to_string(),
            ));
        }
        (SiteType::Database, _) => {}
        (_, db_type) if db_type.instance_engine().is_some() => {
            return Err(Error::Validation(format!(
                "db_type '{}' is only valid for database instances",
                db_type.as_str()
            )));
        }
        _ => {}
    }

    if site.db_type.is_external()
        && site
            .db_host
            .as_deref()
            .is_none_or(|h| h.trim().is_empty())
    {
        return Err(Error::Validation(format!(
            "db_host is required for a {} database",
            site.db_type.as_str()
        )));
    }

    if site.site_type == SiteType::Wordpress
        && site.db_type != DbType::None
        && site.deploy_options.db_engine == Some(crate::types::DbEngine::Postgresql)
    {
        return Err(Error::Validation(
            "WordPress needs a MySQL or MariaDB database".to_string(),
        ));
    }

    if site.db_port == Some(0) || site.sftp_port == Some(0) {
        return Err(Error::Validation("port 0 is not valid".to_string()));
    }

    if site.ssl_enabled && site.ssl_config.challenge == ChallengeMethod::Dns {
        let provider = site.ssl_config.dns_provider.ok_or_else(|| {
            Error::Validation("dns challenge requires a dns_provider".to_string())
        })?;
        let primary = provider.credential_keys()[0];
        if site
            .ssl_config
            .credentials
            .get(primary)
            .is_none_or(|v| v.trim().is_empty())
        {
            return Err(Error::Validation(format!(
                "dns challenge requires the {primary} credential"
            )));
        }
    }

    if let Some(repo) = &site.github_repo {
        if !matches!(site.site_type, SiteType::Php | SiteType::Laravel) {
            return Err(Error::Validation(
                "GitHub deploys are only available for php and laravel sites".to_string(),
            ));
        }
        validate_repo(repo)?;
    }
    if let Some(branch) = &site.github_branch {
        validate_branch(branch)?;
    }

    if site.sftp_enabled
        && site
            .sftp_username
            .as_deref()
            .is_none_or(|u| u.trim().is_empty())
    {
        return Err(Error::Validation(
            "sftp_username is required when SFTP is enabled".to_string(),
        ));
    }

    Ok(())
}
