//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (BEACON_*)
//! - TOML configuration file
//!
//! The broker binds three separate addresses: the subscriber push socket,
//! the publisher socket (trusted segment), and the long-poll HTTP listener.

use anyhow::{Context, Result};
use beacon_core::BrokerConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Subscriber push socket.
    #[serde(default = "default_subscriber")]
    pub subscriber: BindConfig,

    /// Publisher socket. Trusted callers only; bind it accordingly.
    #[serde(default = "default_publisher")]
    pub publisher: BindConfig,

    /// Long-poll HTTP listener.
    #[serde(default = "default_http")]
    pub http: BindConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Long-poll behavior.
    #[serde(default)]
    pub long_poll: LongPollConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// A host/port pair for one listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindConfig {
    pub host: String,
    pub port: u16,
}

impl BindConfig {
    fn from_env(prefix: &str, default_port: u16) -> Self {
        let host = std::env::var(format!("BEACON_{prefix}_HOST"))
            .unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = std::env::var(format!("BEACON_{prefix}_PORT"))
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(default_port);
        Self { host, port }
    }

    /// Get the socket address to bind to.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        format!("{}:{}", self.host, self.port)
            .parse()
            .expect("Invalid host:port")
    }
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Message log capacity.
    #[serde(default = "default_max_queue")]
    pub max_queue: usize,

    /// Maximum channels per subscription filter.
    #[serde(default = "default_max_filter")]
    pub max_filter: usize,

    /// Maximum subscriber command body size in bytes.
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,

    /// Per-subscriber outbound queue capacity (drop-oldest on overflow).
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
}

/// Long-poll configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LongPollConfig {
    /// How long a poll with no match is held before answering 504.
    #[serde(default = "default_long_poll_timeout")]
    pub timeout_ms: u64,
}

impl LongPollConfig {
    /// The hold duration.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_subscriber() -> BindConfig {
    BindConfig::from_env("SUBSCRIBER", 15100)
}

fn default_publisher() -> BindConfig {
    BindConfig::from_env("PUBLISHER", 15101)
}

fn default_http() -> BindConfig {
    BindConfig::from_env("HTTP", 15102)
}

fn default_true() -> bool {
    true
}

fn default_max_queue() -> usize {
    50
}

fn default_max_filter() -> usize {
    5
}

fn default_max_body_size() -> usize {
    200
}

fn default_outbound_queue() -> usize {
    64
}

fn default_long_poll_timeout() -> u64 {
    60_000
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            subscriber: default_subscriber(),
            publisher: default_publisher(),
            http: default_http(),
            limits: LimitsConfig::default(),
            long_poll: LongPollConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_queue: default_max_queue(),
            max_filter: default_max_filter(),
            max_body_size: default_max_body_size(),
            outbound_queue: default_outbound_queue(),
        }
    }
}

impl Default for LongPollConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_long_poll_timeout(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        // Try to load from default paths
        let config_paths = [
            "beacon.toml",
            "/etc/beacon/beacon.toml",
            "~/.config/beacon/beacon.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// The broker limits this configuration implies.
    #[must_use]
    pub fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            max_queue: self.limits.max_queue,
            max_filter: self.limits.max_filter,
            outbound_capacity: self.limits.outbound_queue,
        }
    }
}
