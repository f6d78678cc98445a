/// Configuration management for ramal

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::core::NodeRole;

/// Main ramal configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Physical connections behind the proxy
    pub nodes: Vec<NodeConfig>,
    /// Blacklist / cooldown policy
    pub blacklist: BlacklistConfig,
    /// Read-after-write stickiness
    pub sticky: StickyConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Descriptor for one primary or replica connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Stable node identifier, derived from role and position when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub role: NodeRole,
    /// Relative selection weight among replicas
    #[serde(default = "default_weight")]
    pub weight: u32,
    /// Connection string handed to the transport factory
    pub url: String,
    /// Transport connect timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

/// Blacklist configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlacklistConfig {
    /// Seconds a failed node stays out of rotation
    pub cooldown_sec: u64,
    /// Consecutive connectivity failures before a node is blacklisted
    pub failure_threshold: u32,
}

/// Sticky context configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StickyConfig {
    /// Disable to route purely on classification ("dry" mode)
    pub enabled: bool,
    /// Seconds a context stays pinned to the primary after a write
    pub window_sec: u64,
    /// Prefix for keys written to the context store
    pub key_prefix: String,
    pub store: StoreConfig,
}

/// Context store selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum StoreConfig {
    /// In-process store, per-process stickiness only
    #[serde(rename = "memory")]
    Memory,
    /// Never remembers anything
    #[serde(rename = "noop")]
    Noop,
    /// Redis-compatible key/value server shared across processes
    #[serde(rename = "remote")]
    Remote {
        addr: String,
        #[serde(default = "default_store_timeout_ms")]
        timeout_ms: u64,
    },
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
    /// Log format (json, text)
    pub format: String,
}

fn default_weight() -> u32 {
    1
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_store_timeout_ms() -> u64 {
    200
}

impl NodeConfig {
    pub fn new<S: Into<String>>(role: NodeRole, url: S) -> Self {
        Self {
            id: None,
            role,
            weight: default_weight(),
            url: url.into(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_id<S: Into<String>>(mut self, id: S) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl BlacklistConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_sec)
    }
}

impl StickyConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_sec)
    }
}

impl Default for BlacklistConfig {
    fn default() -> Self {
        Self {
            cooldown_sec: 30,
            failure_threshold: 1,
        }
    }
}

impl Default for StickyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_sec: 5,
            key_prefix: "ramal:ctx".to_string(),
            store: StoreConfig::Memory,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            nodes: vec![
                NodeConfig::new(NodeRole::Primary, "postgres://127.0.0.1:5432/app"),
                NodeConfig::new(NodeRole::Replica, "postgres://127.0.0.1:5433/app"),
            ],
            blacklist: BlacklistConfig::default(),
            sticky: StickyConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        fs::write(path, content)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Resolved node ids, in configuration order
    ///
    /// Unnamed nodes become `primary` and `replica-N` (N counting replicas from 1).
    pub fn node_ids(&self) -> Vec<String> {
        let mut replica_index = 0;
        self.nodes
            .iter()
            .map(|node| match (&node.id, node.role) {
                (Some(id), _) => id.clone(),
                (None, NodeRole::Primary) => "primary".to_string(),
                (None, NodeRole::Replica) => {
                    replica_index += 1;
                    format!("replica-{}", replica_index)
                }
            })
            .collect()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let primaries = self
            .nodes
            .iter()
            .filter(|n| n.role == NodeRole::Primary)
            .count();
        if primaries != 1 {
            return Err(ConfigError::ValidationError(format!(
                "exactly one primary node is required, found {}",
                primaries
            )));
        }

        if !self.nodes.iter().any(|n| n.role == NodeRole::Replica) {
            return Err(ConfigError::ValidationError(
                "at least one replica node is required".to_string(),
            ));
        }

        for node in &self.nodes {
            if node.url.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "node url cannot be empty".to_string(),
                ));
            }
            if node.weight == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "weight for node {} must be greater than 0",
                    node.url
                )));
            }
        }

        let ids = self.node_ids();
        for (i, id) in ids.iter().enumerate() {
            if ids[..i].contains(id) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate node id: {}",
                    id
                )));
            }
        }

        // Validate blacklist config
        if self.blacklist.cooldown_sec == 0 {
            return Err(ConfigError::ValidationError(
                "blacklist cooldown_sec must be greater than 0".to_string(),
            ));
        }

        if self.blacklist.failure_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "blacklist failure_threshold must be greater than 0".to_string(),
            ));
        }

        // Validate sticky config
        if self.sticky.enabled && self.sticky.window_sec == 0 {
            return Err(ConfigError::ValidationError(
                "sticky window_sec must be greater than 0".to_string(),
            ));
        }

        if let StoreConfig::Remote { addr, timeout_ms } = &self.sticky.store {
            if !is_host_port(addr) {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid context store address (expected host:port): {}",
                    addr
                )));
            }
            if *timeout_ms == 0 {
                return Err(ConfigError::ValidationError(
                    "context store timeout_ms must be greater than 0".to_string(),
                ));
            }
        }

        // Validate logging config
        match self.logging.level.as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            _ => return Err(ConfigError::ValidationError(
                format!("Invalid log level: {}", self.logging.level)
            )),
        }

        match self.logging.format.as_str() {
            "json" | "text" => {}
            _ => return Err(ConfigError::ValidationError(
                format!("Invalid log format: {}", self.logging.format)
            )),
        }

        Ok(())
    }

    /// Create example configuration file
    pub fn create_example_config<P: AsRef<Path>>(path: P, store: &str) -> Result<(), ConfigError> {
        let nodes = vec![
            NodeConfig::new(NodeRole::Primary, "postgres://10.0.1.10:5432/app"),
            NodeConfig::new(NodeRole::Replica, "postgres://10.0.1.11:5432/app").with_weight(2),
            NodeConfig::new(NodeRole::Replica, "postgres://10.0.1.12:5432/app"),
        ];

        let store = match store {
            "memory" => StoreConfig::Memory,
            "noop" => StoreConfig::Noop,
            "remote" => StoreConfig::Remote {
                addr: "10.0.1.20:6379".to_string(),
                timeout_ms: default_store_timeout_ms(),
            },
            _ => return Err(ConfigError::ValidationError(
                "Store must be 'memory', 'noop' or 'remote'".to_string(),
            )),
        };

        let config = Config {
            nodes,
            sticky: StickyConfig {
                store,
                ..Default::default()
            },
            ..Default::default()
        };

        config.save_to_file(path)
    }
}

/// `host:port` with a non-empty host and a numeric port; IPv6 hosts go in brackets
fn is_host_port(addr: &str) -> bool {
    let Some((host, port)) = addr.rsplit_once(':') else {
        return false;
    };
    let host_ok = match host.strip_prefix('[') {
        Some(v6) => v6.strip_suffix(']').map_or(false, |ip| ip.parse::<std::net::Ipv6Addr>().is_ok()),
        None => !host.is_empty() && !host.contains(':') && !host.contains(char::is_whitespace),
    };
    host_ok && port.parse::<u16>().is_ok()
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}
