use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::DeployConfig;
use crate::error::{Error, Result};

const CONFIG_FILE_NAME: &str = "dockhand.toml";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub deploy: DeployConfig,
}

/// On-disk shape of `dockhand.toml`. Every section is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    deploy: Option<DeployConfig>,
}

impl ServerConfig {
    /// Builds a config for `data_dir`, reading `dockhand.toml` from `config_path`
    /// or, when not given, from the data directory if it exists there.
    pub fn load(
        host: String,
        port: u16,
        data_dir: PathBuf,
        config_path: Option<&Path>,
    ) -> Result<Self> {
        let default_path = data_dir.join(CONFIG_FILE_NAME);
        let path = match config_path {
            Some(path) => Some(path.to_path_buf()),
            None => default_path.exists().then_some(default_path),
        };

        let file = match path {
            Some(path) => {
                let content = std::fs::read_to_string(&path)?;
                toml::from_str::<ConfigFile>(&content).map_err(|e| {
                    Error::Config(format!("{}: {e}", path.display()))
                })?
            }
            None => ConfigFile::default(),
        };

        let mut deploy = file.deploy.unwrap_or_default();
        if deploy.apps_base.as_os_str().is_empty() {
            deploy.apps_base = data_dir.join("apps");
        }

        Ok(Self {
            host,
            port,
            data_dir,
            deploy,
        })
    }

    pub fn socket_addr(&self) -> std::result::Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }

    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("dockhand.db")
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        let data_dir = PathBuf::from("./data");
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            deploy: DeployConfig {
                apps_base: data_dir.join("apps"),
                ..DeployConfig::default()
            },
            data_dir,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_without_file_uses_defaults() {
        let temp = TempDir::new().unwrap();
        let config =
            ServerConfig::load("0.0.0.0".into(), 9000, temp.path().to_path_buf(), None).unwrap();

        assert_eq!(config.deploy.apps_base, temp.path().join("apps"));
        assert_eq!(config.deploy.proxy_network, "dockhand_proxy");
        assert_eq!(config.db_path(), temp.path().join("dockhand.db"));
        assert_eq!(config.socket_addr().unwrap().port(), 9000);
    }

    #[test]
    fn test_load_reads_data_dir_file() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(CONFIG_FILE_NAME),
            r#"
[deploy]
apps_base = "/srv/apps"
proxy_network = "traefik"

[deploy.timeouts]
bring_up_secs = 1200
"#,
        )
        .unwrap();

        let config =
            ServerConfig::load("127.0.0.1".into(), 8080, temp.path().to_path_buf(), None).unwrap();

        assert_eq!(config.deploy.apps_base, PathBuf::from("/srv/apps"));
        assert_eq!(config.deploy.proxy_network, "traefik");
        assert_eq!(config.deploy.timeouts.bring_up_secs, 1200);
        assert_eq!(config.deploy.timeouts.command_secs, 60);
        assert_eq!(config.deploy.http_entrypoint, "web");
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("custom.toml");
        std::fs::write(&path, "[deploy]\nproxy_netwrok = \"typo\"\n").unwrap();

        let result =
            ServerConfig::load("127.0.0.1".into(), 8080, temp.path().to_path_buf(), Some(&path));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
