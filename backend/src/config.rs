// Configuration for the Lodestar control-plane server

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Server bind configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server bind address
    pub host: String,
    /// Server port
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 7843,
        }
    }
}

/// KV store backend selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// "etcd" for clustered deployments, "memory" for single-node dev
    pub backend: String,
    /// etcd endpoints
    pub endpoints: Vec<String>,
    /// Per-request deadline in seconds
    pub request_timeout_secs: u64,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            backend: "etcd".to_string(),
            endpoints: vec!["http://127.0.0.1:2379".to_string()],
            request_timeout_secs: 5,
            username: None,
            password: None,
        }
    }
}

/// Node identity and environment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub id: String,
    pub environment: String,
    /// Process-wide salt for encrypted config fields
    pub config_salt: String,
    /// Directory searched for per-component config files
    pub config_dir: Option<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            id: "lodestar-1".to_string(),
            environment: "all".to_string(),
            config_salt: String::new(),
            config_dir: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// tracing env-filter directive, e.g. "info,lodestar_kv=debug"
    pub filter: String,
    /// Emit JSON log lines
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            filter: "info".to_string(),
            json: false,
        }
    }
}

/// Top-level application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub node: NodeConfig,
    pub log: LogConfig,
    pub auth: lodestar_auth::AuthConfig,
}

impl AppConfig {
    /// Load from a TOML file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) if path.is_file() => {
                let text = std::fs::read_to_string(path)?;
                toml::from_str(&text)?
            }
            _ => AppConfig::default(),
        };
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(host) = std::env::var("LODESTAR_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("LODESTAR_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }
        if let Ok(endpoints) = std::env::var("LODESTAR_ETCD_ENDPOINTS") {
            self.store.endpoints = endpoints.split(',').map(str::to_string).collect();
        }
        if let Ok(backend) = std::env::var("LODESTAR_STORE_BACKEND") {
            self.store.backend = backend;
        }
        if let Ok(salt) = std::env::var("LODESTAR_CONFIG_SALT") {
            self.node.config_salt = salt;
        }
    }
}
