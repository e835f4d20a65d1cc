//! Configuration for a DataNode.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $DATANODE_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/clusterdfs/datanode.toml
//!   3. ~/.config/clusterdfs/datanode.toml
//!
//! The loaded value is validated once and then shared read-only.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DataNodeConfig {
    pub network: NetworkConfig,
    pub storage: StorageConfig,
    pub coordinator: CoordinatorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// TCP port for block queries. 0 = OS-assigned.
    pub port: u16,
    /// Address to bind the query listener to.
    pub bind_addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding one file per block.
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub host: String,
    pub port: u16,
    /// Seconds between liveness pings.
    pub ping_interval_secs: u64,
    /// Never contact the coordinator. For standalone and test nodes.
    pub isolated: bool,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: 7777,
            bind_addr: "0.0.0.0".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: data_dir().join("blocks"),
        }
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 7770,
            ping_interval_secs: 10,
            isolated: false,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("clusterdfs")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("clusterdfs")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/var/lib"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("invalid value for {key}: {value:?}")]
    InvalidEnv { key: &'static str, value: String },
    #[error("ping interval must be at least one second")]
    ZeroPingInterval,
    #[error("data directory is empty")]
    EmptyDataDir,
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl DataNodeConfig {
    /// Load config: env vars → file → defaults, then validate.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            DataNodeConfig::default()
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("DATANODE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("datanode.toml"))
    }

    /// Standalone node storing under `data_dir`, listening on an
    /// OS-assigned loopback port, with the heartbeat disabled.
    pub fn isolated(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            network: NetworkConfig {
                port: 0,
                bind_addr: "127.0.0.1".to_string(),
            },
            storage: StorageConfig {
                data_dir: data_dir.into(),
            },
            coordinator: CoordinatorConfig {
                isolated: true,
                ..CoordinatorConfig::default()
            },
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.coordinator.ping_interval_secs == 0 {
            return Err(ConfigError::ZeroPingInterval);
        }
        if self.storage.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::EmptyDataDir);
        }
        Ok(())
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.coordinator.ping_interval_secs)
    }

    /// `host:port` of the coordinator.
    pub fn coordinator_addr(&self) -> String {
        format!("{}:{}", self.coordinator.host, self.coordinator.port)
    }

    /// `addr:port` the query listener binds to.
    pub fn listen_addr(&self) -> String {
        if self.network.bind_addr.contains(':') {
            format!("[{}]:{}", self.network.bind_addr, self.network.port)
        } else {
            format!("{}:{}", self.network.bind_addr, self.network.port)
        }
    }

    /// Apply DATANODE_* env var overrides.
    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("DATANODE_NETWORK__PORT") {
            self.network.port = parse_env("DATANODE_NETWORK__PORT", v)?;
        }
        if let Some(v) = lookup("DATANODE_NETWORK__BIND_ADDR") {
            self.network.bind_addr = v;
        }
        if let Some(v) = lookup("DATANODE_STORAGE__DATA_DIR") {
            self.storage.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("DATANODE_COORDINATOR__HOST") {
            self.coordinator.host = v;
        }
        if let Some(v) = lookup("DATANODE_COORDINATOR__PORT") {
            self.coordinator.port = parse_env("DATANODE_COORDINATOR__PORT", v)?;
        }
        if let Some(v) = lookup("DATANODE_COORDINATOR__PING_INTERVAL_SECS") {
            self.coordinator.ping_interval_secs =
                parse_env("DATANODE_COORDINATOR__PING_INTERVAL_SECS", v)?;
        }
        if let Some(v) = lookup("DATANODE_COORDINATOR__ISOLATED") {
            self.coordinator.isolated = v == "true" || v == "1";
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::InvalidEnv { key, value })
}
