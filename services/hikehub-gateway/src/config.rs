//! Configuration types and loading
//!
//! Config path precedence: `--config` > `CONFIG_PATH` env > default file.
//! The seed access token comes from `HIKEHUB_ACCESS_TOKEN` or
//! `session.access_token_file`, never from the TOML itself.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use common::Secret;
use hikehub_client::{ClientConfig, DEFAULT_REJECTION_STATUSES};
use hikehub_session::{DEFAULT_BASE_URL, DEFAULT_STORAGE_KEY, LOGIN_PATH, REFRESH_PATH, SessionConfig};
use serde::Deserialize;

pub const DEFAULT_CONFIG_PATH: &str = "hikehub-gateway.toml";

/// Env var holding a seed access token.
pub const ACCESS_TOKEN_ENV: &str = "HIKEHUB_ACCESS_TOKEN";

/// Root configuration
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

/// Upstream HikeHub API
#[derive(Debug, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout(),
        }
    }
}

/// Where the access token lives
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// Lost on restart
    #[default]
    Memory,
    /// JSON file at `session_file`
    File,
}

/// Token lifecycle settings
#[derive(Debug, Deserialize)]
pub struct SessionSection {
    #[serde(default)]
    pub storage: StorageKind,
    #[serde(default)]
    pub session_file: Option<PathBuf>,
    #[serde(default = "default_storage_key")]
    pub storage_key: String,
    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,
    #[serde(default = "default_login_path")]
    pub login_path: String,
    #[serde(default = "default_rejection_statuses")]
    pub rejection_statuses: Vec<u16>,
    #[serde(default)]
    pub expiry_leeway_secs: u64,
    /// Path to a file containing a seed access token
    #[serde(default)]
    pub access_token_file: Option<PathBuf>,
    #[serde(skip)]
    pub access_token: Option<Secret<String>>,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            storage: StorageKind::default(),
            session_file: None,
            storage_key: default_storage_key(),
            refresh_path: default_refresh_path(),
            login_path: default_login_path(),
            rejection_statuses: default_rejection_statuses(),
            expiry_leeway_secs: 0,
            access_token_file: None,
            access_token: None,
        }
    }
}

/// Local listener
#[derive(Debug, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_storage_key() -> String {
    DEFAULT_STORAGE_KEY.to_string()
}

fn default_refresh_path() -> String {
    REFRESH_PATH.to_string()
}

fn default_login_path() -> String {
    LOGIN_PATH.to_string()
}

fn default_rejection_statuses() -> Vec<u16> {
    DEFAULT_REJECTION_STATUSES.to_vec()
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_max_connections() -> usize {
    1000
}

impl Config {
    /// Load configuration from a TOML file, validate it, then resolve the
    /// seed token (env var first, then `access_token_file`).
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.validate()?;

        if let Ok(token) = std::env::var(ACCESS_TOKEN_ENV) {
            let token = token.trim().to_owned();
            if !token.is_empty() {
                config.session.access_token = Some(Secret::new(token));
            }
        } else if let Some(ref token_file) = config.session.access_token_file {
            let token = std::fs::read_to_string(token_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read access_token_file {}: {e}",
                    token_file.display()
                ))
            })?;
            let token = token.trim().to_owned();
            if !token.is_empty() {
                config.session.access_token = Some(Secret::new(token));
            }
        }

        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        if !self.api.base_url.starts_with("http://") && !self.api.base_url.starts_with("https://")
        {
            return Err(common::Error::InvalidUrl {
                field: "api.base_url",
                value: self.api.base_url.clone(),
            });
        }

        if self.api.timeout_secs == 0 {
            return Err(common::Error::Config(
                "api.timeout_secs must be greater than 0".into(),
            ));
        }

        if self.gateway.max_connections == 0 {
            return Err(common::Error::Config(
                "gateway.max_connections must be greater than 0".into(),
            ));
        }

        if self.session.rejection_statuses.is_empty() {
            return Err(common::Error::Config(
                "session.rejection_statuses must not be empty".into(),
            ));
        }
        if let Some(status) = self
            .session
            .rejection_statuses
            .iter()
            .find(|s| !(400..500).contains(*s))
        {
            return Err(common::Error::Config(format!(
                "session.rejection_statuses must be 4xx codes, got {status}"
            )));
        }

        if self.session.storage == StorageKind::File && self.session.session_file.is_none() {
            return Err(common::Error::Config(
                "session.session_file is required when session.storage = \"file\"".into(),
            ));
        }

        Ok(())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&Path>) -> PathBuf {
        if let Some(p) = cli_path {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from(DEFAULT_CONFIG_PATH)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_secs)
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            base_url: self.api.base_url.clone(),
            refresh_path: self.session.refresh_path.clone(),
            login_path: self.session.login_path.clone(),
            rejection_statuses: self.session.rejection_statuses.clone(),
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            storage_key: self.session.storage_key.clone(),
            expiry_leeway: Duration::from_secs(self.session.expiry_leeway_secs),
        }
    }
}
