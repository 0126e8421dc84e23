//! Reverse-proxy routing and TLS labels.
//!
//! The proxy discovers routes purely from container labels, so everything it
//! needs to know about a site is encoded here. Output depends only on the
//! route description, never on the kind of application behind it.

use std::fmt;

use crate::config::DeployConfig;
use crate::types::ChallengeMethod;

/// `Host(...)` matcher for a domain and, optionally, its `www.` alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRule {
    domain: String,
    include_www: bool,
}

impl HostRule {
    pub fn new(domain: &str, include_www: bool) -> Self {
        Self {
            domain: domain.trim().trim_end_matches('.').to_ascii_lowercase(),
            include_www,
        }
    }

    pub fn hosts(&self) -> Vec<String> {
        let mut hosts = vec![self.domain.clone()];
        if self.include_www {
            hosts.push(format!("www.{}", self.domain));
        }
        hosts
    }

    /// True if a request for `host` (optionally with a port) would be routed here.
    pub fn matches(&self, host: &str) -> bool {
        let host = host.split(':').next().unwrap_or_default();
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        self.hosts().iter().any(|h| *h == host)
    }
}

impl fmt::Display for HostRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rules: Vec<String> = self
            .hosts()
            .iter()
            .map(|h| format!("Host(`{h}`)"))
            .collect();
        f.write_str(&rules.join(" || "))
    }
}

/// Proxy-side names the labels refer to.
#[derive(Debug, Clone)]
pub struct ProxySettings {
    pub network: String,
    pub http_entrypoint: String,
    pub https_entrypoint: String,
    pub http_resolver: String,
    pub dns_resolver: String,
}

impl From<&DeployConfig> for ProxySettings {
    fn from(config: &DeployConfig) -> Self {
        Self {
            network: config.proxy_network.clone(),
            http_entrypoint: config.http_entrypoint.clone(),
            https_entrypoint: config.https_entrypoint.clone(),
            http_resolver: config.http_resolver.clone(),
            dns_resolver: config.dns_resolver.clone(),
        }
    }
}

impl ProxySettings {
    pub fn resolver_for(&self, challenge: ChallengeMethod) -> &str {
        match challenge {
            ChallengeMethod::Dns => &self.dns_resolver,
            ChallengeMethod::Http => &self.http_resolver,
        }
    }
}

/// Everything that determines a site's route.
#[derive(Debug, Clone)]
pub struct Route<'a> {
    /// Router and service name; unique per site.
    pub name: &'a str,
    pub domain: &'a str,
    pub include_www: bool,
    pub ssl_enabled: bool,
    pub challenge: ChallengeMethod,
    /// Port the application listens on inside its container.
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub key: String,
    pub value: String,
}

impl Label {
    fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// Builds the ordered label set for a route.
pub fn build_labels(route: &Route<'_>, proxy: &ProxySettings) -> Vec<Label> {
    let name = route.name;
    let rule = HostRule::new(route.domain, route.include_www).to_string();
    let router = format!("traefik.http.routers.{name}");
    let redirect = format!("{name}-https-redirect");

    let mut labels = vec![
        Label::new("traefik.enable", "true"),
        Label::new("traefik.docker.network", &proxy.network),
        Label::new(format!("{router}.rule"), &rule),
        Label::new(format!("{router}.entrypoints"), &proxy.http_entrypoint),
    ];

    if route.ssl_enabled {
        let secure = format!("traefik.http.routers.{name}-secure");
        labels.extend([
            Label::new(format!("{router}.middlewares"), &redirect),
            Label::new(
                format!("traefik.http.middlewares.{redirect}.redirectscheme.scheme"),
                "https",
            ),
            Label::new(
                format!("traefik.http.middlewares.{redirect}.redirectscheme.permanent"),
                "true",
            ),
            Label::new(format!("{secure}.rule"), &rule),
            Label::new(format!("{secure}.entrypoints"), &proxy.https_entrypoint),
            Label::new(format!("{secure}.tls"), "true"),
            Label::new(
                format!("{secure}.tls.certresolver"),
                proxy.resolver_for(route.challenge),
            ),
        ]);
    }

    labels.push(Label::new(
        format!("traefik.http.services.{name}.loadbalancer.server.port"),
        route.port.to_string(),
    ));

    labels
}
