//! Identifiers and on-disk locations derived from a site.

use std::path::{Path, PathBuf};

use crate::types::{Site, SiteType};

const MAX_NAME_LENGTH: usize = 32;
pub const TOPOLOGY_FILE: &str = "docker-compose.yml";

/// Lowercases `name` and collapses every run of non-alphanumerics into `_`.
pub fn sanitize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    let trimmed: String = out
        .trim_matches('_')
        .chars()
        .take(MAX_NAME_LENGTH)
        .collect();
    let trimmed = trimmed.trim_end_matches('_');
    if trimmed.is_empty() {
        "site".to_string()
    } else {
        trimmed.to_string()
    }
}

/// `<prefix>_<sanitized name>_<timestamp>`.
pub fn container_name(prefix: &str, name: &str, timestamp: i64) -> String {
    format!("{prefix}_{}_{timestamp}", sanitize_name(name))
}

/// Prefix of a new site's container name: the engine for database
/// instances, the site type otherwise.
pub fn name_prefix(site_type: SiteType, engine: Option<&str>) -> &str {
    match (site_type, engine) {
        (SiteType::Database, Some(engine)) => engine,
        _ => site_type.as_str(),
    }
}

pub fn site_dir(apps_base: &Path, site: &Site) -> PathBuf {
    apps_base
        .join(site.site_type.as_str())
        .join("sites")
        .join(&site.container_name)
}

pub fn topology_path(apps_base: &Path, site: &Site) -> PathBuf {
    site_dir(apps_base, site).join(TOPOLOGY_FILE)
}

/// Build context of the from-source fallback image for a site type.
pub fn runtime_build_dir(apps_base: &Path, site_type: SiteType) -> PathBuf {
    apps_base.join(site_type.as_str()).join("runtime")
}

pub fn db_service(container_name: &str) -> String {
    format!("{container_name}_db")
}

pub fn cache_service(container_name: &str) -> String {
    format!("{container_name}_redis")
}

pub fn app_volume(container_name: &str) -> String {
    format!("{container_name}_data")
}

pub fn db_volume(container_name: &str) -> String {
    format!("{container_name}_db_data")
}

/// Volume names a site may own, including the project-prefixed forms
/// compose produces for volumes declared without an explicit name.
pub fn volume_patterns(container_name: &str) -> Vec<String> {
    let owned = [
        app_volume(container_name),
        db_volume(container_name),
        format!("{container_name}_redis_data"),
    ];
    let mut patterns: Vec<String> = owned.to_vec();
    patterns.extend(owned.iter().map(|v| format!("{container_name}_{v}")));
    patterns
}

/// Sidecar containers that may exist outside a site's topology file.
pub fn sidecar_containers(container_name: &str) -> [String; 2] {
    [cache_service(container_name), db_service(container_name)]
}
