use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use common::stream::EngineConfig;

pub const CONFIG_FILE_NAME: &str = "relaydrive.toml";

/// Gateway configuration, loaded from toml. Every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// address for the HTTP server to listen on
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    /// directory of `<file_id>.json` manifests
    #[serde(default = "default_catalog_dir")]
    pub catalog_dir: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub host_api: HostApiConfig,
    /// prefetch window and retry policy
    #[serde(default)]
    pub engine: EngineConfig,
}

/// Where fresh attachment links come from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostApiConfig {
    #[serde(default = "default_api_base")]
    pub base_url: String,
    /// bot token; locator refresh is disabled without one
    #[serde(default)]
    pub token: Option<String>,
    /// how long a fetched message is trusted when its links carry no expiry
    #[serde(default = "default_message_ttl_secs")]
    pub message_ttl_secs: u64,
    /// bound on a single API request
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), 8080)
}

fn default_catalog_dir() -> PathBuf {
    PathBuf::from("catalog")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_api_base() -> String {
    "https://discord.com/api/v10/".to_string()
}

fn default_message_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_request_timeout_secs() -> u64 {
    15
}

impl Default for HostApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base(),
            token: None,
            message_ttl_secs: default_message_ttl_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl HostApiConfig {
    pub fn base_url(&self) -> Result<Url, url::ParseError> {
        Url::parse(&self.base_url)
    }

    pub fn message_ttl(&self) -> Duration {
        Duration::from_secs(self.message_ttl_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            catalog_dir: default_catalog_dir(),
            log_level: default_log_level(),
            host_api: HostApiConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

impl Config {
    /// Load from a toml file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Parsed log level, falling back to info
    pub fn log_level(&self) -> tracing::Level {
        self.log_level.parse().unwrap_or(tracing::Level::INFO)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}
