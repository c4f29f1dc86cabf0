//! Configuration system for bucketmesh
//!
//! Supports multiple configuration sources with the following precedence (highest to lowest):
//! 1. CLI arguments
//! 2. Environment variables (BUCKETMESH_* prefix)
//! 3. Configuration file (TOML)
//! 4. Default values

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Main node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Node identity and basic settings
    pub node: NodeSettings,

    /// Local buckets, fixed for the lifetime of the process
    pub buckets: Vec<BucketSettings>,

    /// Sibling discovery and transport settings
    pub peer: PeerSettings,

    /// Overflow behaviour of fill
    pub fill: FillSettings,

    /// Logging configuration
    pub logging: LoggingSettings,
}

/// Node identity settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSettings {
    /// Label for this node's log lines (generated if not set); peers never see it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Verbose peer diagnostics
    pub debug: bool,

    /// Runtime worker threads (0 = auto)
    pub worker_threads: usize,
}

/// One local bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketSettings {
    /// Task name served by this bucket
    pub name: String,

    /// Maximum queued items
    pub capacity: usize,
}

/// Peer discovery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerSettings {
    /// Statically configured sibling addresses (host:port)
    pub addresses: Vec<String>,

    /// TCP listen port for inbound peer traffic (0 = auto-assign)
    pub listen_port: u16,

    /// Discovery tick interval in milliseconds
    pub discovery_interval_ms: u64,

    /// Per-peer connection timeout in milliseconds
    pub dial_timeout_ms: u64,

    /// Unanswered pings before a reachable peer is demoted
    pub failure_threshold: u32,

    /// Bounded outbound queue per peer link
    pub outbound_queue_size: usize,
}

/// What fill reports when overflow work was handed to a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Return QueueFull even when the item was forwarded
    ReportFull,
    /// A successful forward is reported as success
    Absorb,
}

impl Default for OverflowPolicy {
    fn default() -> Self {
        OverflowPolicy::ReportFull
    }
}

/// Fill settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FillSettings {
    pub overflow_policy: OverflowPolicy,

    /// Skip forwarding when the caller's token is already cancelled
    pub forward_honors_cancel: bool,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level: trace, debug, info, warn, error
    pub level: String,

    /// Log file path (empty = no file logging)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// Number of rotated log files to keep
    pub max_files: u32,

    /// Enable JSON formatted logging
    pub json_format: bool,
}

// Default implementations

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node: NodeSettings::default(),
            buckets: vec![BucketSettings {
                name: "default".to_string(),
                capacity: 1024,
            }],
            peer: PeerSettings::default(),
            fill: FillSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            id: None,
            debug: false,
            worker_threads: 0,
        }
    }
}

impl Default for PeerSettings {
    fn default() -> Self {
        Self {
            addresses: vec![],
            listen_port: 7400,
            discovery_interval_ms: 2000,
            dial_timeout_ms: 500,
            failure_threshold: 3,
            outbound_queue_size: 256,
        }
    }
}

impl Default for FillSettings {
    fn default() -> Self {
        Self {
            overflow_policy: OverflowPolicy::ReportFull,
            forward_honors_cancel: true,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            max_files: 5,
            json_format: false,
        }
    }
}

impl PeerSettings {
    pub fn discovery_interval(&self) -> Duration {
        Duration::from_millis(self.discovery_interval_ms)
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }
}

impl NodeConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = Self::find_config_file(config_path)? {
            debug!(path = %path.display(), "Loading configuration file");
            let content = fs::read_to_string(&path)
                .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;
            config = Self::from_toml(&content)?;
            info!(path = %path.display(), "Configuration loaded from file");
        }

        config.apply_env_overrides();
        config.expand_paths();
        config.validate()?;

        Ok(config)
    }

    /// Parse a TOML document
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::ConfigParse {
            message: e.message().to_string(),
            source: Some(e),
        })
    }

    /// Find the configuration file to use
    fn find_config_file(explicit_path: Option<&str>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit_path {
            let path = PathBuf::from(expand_path(path));
            if path.exists() {
                return Ok(Some(path));
            }
            return Err(Error::ConfigNotFound { path });
        }

        let search_paths = [
            PathBuf::from("bucketmesh.toml"),
            dirs::config_dir()
                .map(|p| p.join("bucketmesh").join("node.toml"))
                .unwrap_or_default(),
            dirs::home_dir()
                .map(|p| p.join(".bucketmesh").join("node.toml"))
                .unwrap_or_default(),
            PathBuf::from("/etc/bucketmesh/node.toml"),
        ];

        for path in &search_paths {
            if path.is_file() {
                debug!(path = %path.display(), "Found configuration file");
                return Ok(Some(path.clone()));
            }
        }

        debug!("No configuration file found, using defaults");
        Ok(None)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("BUCKETMESH_NODE_ID") {
            self.node.id = Some(val);
        }
        if let Ok(val) = std::env::var("BUCKETMESH_DEBUG") {
            self.node.debug = parse_bool(&val);
        }

        if let Ok(val) = std::env::var("BUCKETMESH_PEERS") {
            self.peer.addresses = val
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Ok(val) = std::env::var("BUCKETMESH_LISTEN_PORT") {
            if let Ok(n) = val.parse() {
                self.peer.listen_port = n;
            }
        }
        if let Ok(val) = std::env::var("BUCKETMESH_DISCOVERY_INTERVAL_MS") {
            if let Ok(n) = val.parse() {
                self.peer.discovery_interval_ms = n;
            }
        }
        if let Ok(val) = std::env::var("BUCKETMESH_DIAL_TIMEOUT_MS") {
            if let Ok(n) = val.parse() {
                self.peer.dial_timeout_ms = n;
            }
        }

        if let Ok(val) = std::env::var("BUCKETMESH_OVERFLOW_POLICY") {
            match val.to_lowercase().as_str() {
                "report_full" => self.fill.overflow_policy = OverflowPolicy::ReportFull,
                "absorb" => self.fill.overflow_policy = OverflowPolicy::Absorb,
                _ => {}
            }
        }

        if let Ok(val) = std::env::var("BUCKETMESH_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("BUCKETMESH_LOG_FILE") {
            self.logging.file = Some(val);
        }
        if let Ok(val) = std::env::var("BUCKETMESH_LOG_JSON") {
            self.logging.json_format = parse_bool(&val);
        }
    }

    /// Expand ~ and other path variables
    fn expand_paths(&mut self) {
        if let Some(ref file) = self.logging.file {
            self.logging.file = Some(expand_path(file));
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for bucket in &self.buckets {
            if bucket.name.trim().is_empty() {
                return Err(Error::config_field_invalid("buckets.name", "Bucket name cannot be empty"));
            }
            if bucket.capacity == 0 {
                return Err(Error::config_field_invalid(
                    "buckets.capacity",
                    format!("Bucket '{}' must have a capacity above 0", bucket.name),
                ));
            }
            if !names.insert(bucket.name.as_str()) {
                return Err(Error::config_field_invalid(
                    "buckets.name",
                    format!("Duplicate bucket '{}'", bucket.name),
                ));
            }
        }

        let mut addresses = HashSet::new();
        for address in &self.peer.addresses {
            if address.trim().is_empty() {
                return Err(Error::config_field_invalid("peer.addresses", "Peer address cannot be empty"));
            }
            if !addresses.insert(address.as_str()) {
                return Err(Error::config_field_invalid(
                    "peer.addresses",
                    format!("Duplicate peer address '{}'", address),
                ));
            }
        }

        if self.peer.discovery_interval_ms == 0 {
            return Err(Error::config_field_invalid(
                "peer.discovery_interval_ms",
                "discovery_interval_ms must be above 0",
            ));
        }
        if self.peer.dial_timeout_ms == 0 {
            return Err(Error::config_field_invalid("peer.dial_timeout_ms", "dial_timeout_ms must be above 0"));
        }
        if self.peer.failure_threshold == 0 {
            return Err(Error::config_field_invalid(
                "peer.failure_threshold",
                "failure_threshold must be at least 1",
            ));
        }
        if self.peer.outbound_queue_size == 0 {
            return Err(Error::config_field_invalid(
                "peer.outbound_queue_size",
                "outbound_queue_size must be above 0",
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(Error::config_validation(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }

        Ok(())
    }

    /// Log label for this node
    ///
    /// Siblings are told nothing about who we are, so the id only tells
    /// log streams apart. When unset it is `<hostname>-<8 hex chars>`,
    /// which keeps several nodes on one host distinguishable.
    pub fn node_id(&self) -> String {
        self.node.id.clone().unwrap_or_else(|| {
            let host = hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "node".to_string());
            format!("{}-{}", host, &uuid::Uuid::new_v4().to_string()[..8])
        })
    }
}

fn parse_bool(val: &str) -> bool {
    val.eq_ignore_ascii_case("true") || val == "1"
}

/// Expand ~ and environment variables in paths
fn expand_path(path: &str) -> String {
    shellexpand::full(path)
        .unwrap_or_else(|_| std::borrow::Cow::Borrowed(path))
        .into_owned()
}

/// Initialize a new configuration file
pub fn init_config(path: Option<&str>, force: bool) -> Result<PathBuf> {
    let config_path = path
        .map(|p| PathBuf::from(expand_path(p)))
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".bucketmesh")
                .join("node.toml")
        });

    if config_path.exists() && !force {
        return Err(Error::Config(format!(
            "Configuration file already exists: {}. Use --force to overwrite.",
            config_path.display()
        )));
    }

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::IoWrite {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    fs::write(&config_path, DEFAULT_CONFIG).map_err(|e| Error::IoWrite {
        path: config_path.clone(),
        source: e,
    })?;

    Ok(config_path)
}

const DEFAULT_CONFIG: &str = r#"# bucketmesh node configuration

[node]
# Node identifier (auto-generated if not set)
# id = "node-a"

# Verbose peer diagnostics
debug = false

# Runtime worker threads (0 = auto)
worker_threads = 0

# One entry per task name served locally
[[buckets]]
name = "default"
capacity = 1024

[peer]
# Sibling nodes (host:port)
addresses = []

# TCP listen port for inbound peer traffic
listen_port = 7400

# Discovery tick interval in milliseconds
discovery_interval_ms = 2000

# Per-peer connection timeout in milliseconds
dial_timeout_ms = 500

# Unanswered pings before a peer is marked unreachable
failure_threshold = 3

# Bounded outbound queue per peer
outbound_queue_size = 256

[fill]
# report_full: forwarded overflow still returns QueueFull
# absorb:      a successful forward returns success
overflow_policy = "report_full"

# Skip forwarding when the caller already cancelled
forward_honors_cancel = true

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log file path (comment out to disable file logging)
# file = "~/.bucketmesh/logs/node.log"

# Number of rotated log files to keep
max_files = 5

# Enable JSON formatted logging
json_format = false
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default();
        assert_eq!(config.peer.dial_timeout_ms, 500);
        assert_eq!(config.peer.failure_threshold, 3);
        assert_eq!(config.fill.overflow_policy, OverflowPolicy::ReportFull);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_file_parses_and_validates() {
        let config = NodeConfig::from_toml(DEFAULT_CONFIG).unwrap();
        assert_eq!(config.buckets.len(), 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_override() {
        env::set_var("BUCKETMESH_PEERS", "10.0.0.1:7400, 10.0.0.2:7400");
        env::set_var("BUCKETMESH_OVERFLOW_POLICY", "absorb");
        env::set_var("BUCKETMESH_DIAL_TIMEOUT_MS", "250");

        let mut config = NodeConfig::default();
        config.apply_env_overrides();

        assert_eq!(config.peer.addresses, vec!["10.0.0.1:7400", "10.0.0.2:7400"]);
        assert_eq!(config.fill.overflow_policy, OverflowPolicy::Absorb);
        assert_eq!(config.peer.dial_timeout_ms, 250);

        env::remove_var("BUCKETMESH_PEERS");
        env::remove_var("BUCKETMESH_OVERFLOW_POLICY");
        env::remove_var("BUCKETMESH_DIAL_TIMEOUT_MS");
    }

    #[test]
    fn test_validation_duplicate_bucket() {
        let mut config = NodeConfig::default();
        config.buckets.push(BucketSettings {
            name: "default".to_string(),
            capacity: 4,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_zero_capacity() {
        let mut config = NodeConfig::default();
        config.buckets[0].capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_duplicate_peer() {
        let mut config = NodeConfig::default();
        config.peer.addresses = vec!["a:1".to_string(), "a:1".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_zero_threshold() {
        let mut config = NodeConfig::default();
        config.peer.failure_threshold = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_invalid_log_level() {
        let mut config = NodeConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_config_file() {
        let config_str = r#"
[node]
id = "node-a"
debug = true

[[buckets]]
name = "resize"
capacity = 8

[[buckets]]
name = "encode"
capacity = 2

[peer]
addresses = ["127.0.0.1:7401", "127.0.0.1:7402"]
listen_port = 7400
discovery_interval_ms = 1000

[fill]
overflow_policy = "absorb"
"#;

        let config = NodeConfig::from_toml(config_str).unwrap();
        assert_eq!(config.node.id, Some("node-a".to_string()));
        assert!(config.node.debug);
        assert_eq!(config.buckets.len(), 2);
        assert_eq!(config.buckets[1].capacity, 2);
        assert_eq!(config.peer.addresses.len(), 2);
        assert_eq!(config.peer.discovery_interval(), Duration::from_secs(1));
        assert_eq!(config.peer.dial_timeout(), Duration::from_millis(500));
        assert_eq!(config.fill.overflow_policy, OverflowPolicy::Absorb);
        assert!(config.fill.forward_honors_cancel);
    }

    #[test]
    fn test_parse_error_is_config_parse() {
        let err = NodeConfig::from_toml("[peer\nlisten_port = ").unwrap_err();
        assert!(matches!(err, Error::ConfigParse { .. }));
    }

    #[test]
    fn test_serialize_deserialize() {
        let config = NodeConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed = NodeConfig::from_toml(&toml_str).unwrap();
        assert_eq!(config.buckets, parsed.buckets);
        assert_eq!(config.peer.listen_port, parsed.peer.listen_port);
    }
}
