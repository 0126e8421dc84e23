//! Post-start, type-specific setup run against a freshly started site.

use std::fs;
use std::thread;

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::types::{Site, SiteType};

use super::context::DeployContext;
use super::runtime::shell_quote;

const WELCOME_TEMPLATE: &str = include_str!("../../templates/welcome.php");
const WELCOME_FILE: &str = "welcome.php";
const WEB_USER: &str = "www-data";
const WP_ROOT: &str = "/var/www/html";

const CACHE_PLUGIN_SCRIPT: &str = r#"set -e
if ! command -v wp >/dev/null 2>&1; then
  curl -fsSL -o /usr/local/bin/wp https://raw.githubusercontent.com/wp-cli/builds/gh-pages/phar/wp-cli.phar
  chmod +x /usr/local/bin/wp
fi
wp plugin is-installed redis-cache --allow-root || wp plugin install redis-cache --allow-root
wp plugin activate redis-cache --allow-root
wp redis enable --allow-root
"#;

/// Runs the bootstrap for the site's type.
pub fn run(ctx: &DeployContext, site: &Site) -> Result<()> {
    match site.site_type {
        SiteType::Php | SiteType::Laravel if site.has_source_repo() => deploy_source(ctx, site),
        SiteType::Php | SiteType::Laravel => ensure_entry_file(ctx, site),
        SiteType::Wordpress if site.deploy_options.cache => enable_object_cache(ctx, site),
        SiteType::Wordpress | SiteType::Database => Ok(()),
    }
}

fn document_root(site_type: SiteType) -> &'static str {
    match site_type {
        SiteType::Laravel => "/var/www/html/public",
        _ => "/var/www/html",
    }
}

fn failure(site: &Site, message: impl Into<String>) -> Error {
    Error::Deployment {
        site_id: site.id,
        phase: crate::error::Phase::Bootstrapping,
        message: message.into(),
    }
}

fn exec_checked(ctx: &DeployContext, site: &Site, command: &str, what: &str) -> Result<()> {
    let output = ctx
        .runtime
        .exec_raw(&site.container_name, command, None, None)?;
    if output.success() {
        Ok(())
    } else {
        Err(failure(
            site,
            format!("{what} exited with {}: {}", output.exit_code, output.stdout.trim()),
        ))
    }
}

/// Installs the welcome page unless the document root already has an entry file.
fn ensure_entry_file(ctx: &DeployContext, site: &Site) -> Result<()> {
    let root = document_root(site.site_type);
    let probe = format!("test -e {root}/index.php || test -e {root}/index.html");
    let existing = ctx
        .runtime
        .exec_raw(&site.container_name, &probe, None, None)?;
    if existing.success() {
        debug!(site_id = site.id, "entry file present, skipping welcome page");
        return Ok(());
    }

    let target = format!("{root}/index.php");
    let page = WELCOME_TEMPLATE
        .replace("{{SITE_NAME}}", &escape_html(&site.name))
        .replace("{{ENTRY_PATH}}", &target);
    let local = ctx.site_dir(site).join(WELCOME_FILE);
    fs::create_dir_all(ctx.site_dir(site))?;
    fs::write(&local, page)?;

    exec_checked(ctx, site, &format!("mkdir -p {root}"), "creating the document root")?;
    ctx.runtime.copy_to(&site.container_name, &local, &target)?;
    let quoted = shell_quote(&target);
    exec_checked(
        ctx,
        site,
        &format!("chown {WEB_USER}:{WEB_USER} {quoted} && chmod 644 {quoted}"),
        "fixing welcome page ownership",
    )?;

    info!(site_id = site.id, container = %site.container_name, "installed welcome page");
    Ok(())
}

fn deploy_source(ctx: &DeployContext, site: &Site) -> Result<()> {
    let result = ctx.source.deploy_from_github(site, &site.container_name);
    if !result.success {
        return Err(failure(site, result.message));
    }
    if let Some(commit) = &result.commit_hash {
        ctx.store.update_site_commit(site.id, commit)?;
    }
    info!(site_id = site.id, message = %result.message, "source deployed");

    if site.site_type == SiteType::Laravel {
        let sync = ctx.source.sync_env_to_app(&site.container_name);
        if !sync.success {
            return Err(failure(site, sync.message));
        }
    }
    Ok(())
}

/// Waits for the image entrypoint to lay out WordPress, then installs and
/// enables the Redis object cache plugin.
fn enable_object_cache(ctx: &DeployContext, site: &Site) -> Result<()> {
    let ready = format!("test -f {WP_ROOT}/wp-config.php && test -f {WP_ROOT}/wp-includes/version.php");
    let attempts = ctx.config.readiness_attempts.max(1);
    let mut initialized = false;
    for attempt in 1..=attempts {
        if ctx
            .runtime
            .exec_raw(&site.container_name, &ready, None, None)?
            .success()
        {
            initialized = true;
            break;
        }
        if attempt < attempts {
            thread::sleep(ctx.config.readiness_interval());
        }
    }
    if !initialized {
        return Err(failure(site, "WordPress did not finish initializing"));
    }

    let output = ctx.runtime.exec_raw(
        &site.container_name,
        CACHE_PLUGIN_SCRIPT,
        Some(WP_ROOT),
        None,
    )?;
    if !output.success() {
        return Err(failure(
            site,
            format!("cache plugin setup exited with {}: {}", output.exit_code, output.stdout.trim()),
        ));
    }

    info!(site_id = site.id, "enabled object cache");
    Ok(())
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
