//! Configuration loaded from `config.toml` plus environment overrides

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::routing::DEFAULT_CALL_TIMEOUT_MS;
use crate::storage::{DatabaseConfig, default_database_path};

/// Environment variable overriding the config directory
pub const CONFIG_DIR_ENV: &str = "SIVA_ROUTER_CONFIG_DIR";
/// Environment variable overriding `storage.database_path`
pub const DATABASE_ENV: &str = "SIVA_ROUTER_DATABASE";
/// Environment variable overriding `server.bind`
pub const BIND_ENV: &str = "SIVA_ROUTER_BIND";

/// Router configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub catalog: CatalogConfig,
    pub gateway: GatewayConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_path: PathBuf,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Seed file imported by `siva-router init`
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub call_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            max_connections: 5,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8087".to_string(),
        }
    }
}

impl StorageConfig {
    /// Database settings for opening the pool
    pub fn database_config(&self) -> DatabaseConfig {
        DatabaseConfig::with_path(self.database_path.clone()).max_connections(self.max_connections)
    }
}

impl GatewayConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        self.bind
            .parse()
            .with_context(|| format!("Invalid server.bind address: {}", self.bind))
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var(CONFIG_DIR_ENV) {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("siva-router")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from the config directory, then apply environment
    /// overrides. Defaults are used when no file exists.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_overrides(|key| env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file (defaults if absent)
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `SIVA_ROUTER_DATABASE` / `SIVA_ROUTER_BIND` style overrides
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup(DATABASE_ENV).filter(|v| !v.is_empty()) {
            self.storage.database_path = PathBuf::from(path);
        }
        if let Some(bind) = lookup(BIND_ENV).filter(|v| !v.is_empty()) {
            self.server.bind = bind;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.storage.max_connections == 0 {
            return Err(anyhow!("storage.max_connections must be at least 1"));
        }
        if self.gateway.call_timeout_ms == 0 {
            return Err(anyhow!("gateway.call_timeout_ms must be greater than 0"));
        }
        self.server.socket_addr()?;
        Ok(())
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        match key {
            "storage.database_path" => Ok(self.storage.database_path.display().to_string()),
            "storage.max_connections" => Ok(self.storage.max_connections.to_string()),
            "catalog.path" => Ok(self
                .catalog
                .path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(built-in defaults)".to_string())),
            "gateway.call_timeout_ms" => Ok(self.gateway.call_timeout_ms.to_string()),
            "server.bind" => Ok(self.server.bind.clone()),
            _ => Err(anyhow!(
                "Unknown configuration key: {}. Use `siva-router config show` to see available keys.",
                key
            )),
        }
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        let keys = [
            "storage.database_path",
            "storage.max_connections",
            "catalog.path",
            "gateway.call_timeout_ms",
            "server.bind",
        ];

        keys.into_iter()
            .map(|key| Ok((key.to_string(), self.get(key)?)))
            .collect()
    }
}
