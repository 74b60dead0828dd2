//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (ROOMCAST_*)
//! - TOML configuration file

use anyhow::{Context, Result};
use roomcast_core::{DeliveryPolicy, RoomConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Per-room tuning.
    #[serde(default)]
    pub room: RoomTuning,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Per-room tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomTuning {
    /// Capacity of each room's message bus.
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,

    /// Capacity of each member's outbox.
    #[serde(default = "default_outbox_capacity")]
    pub outbox_capacity: usize,

    /// What to do when a member's outbox is full at delivery time.
    #[serde(default)]
    pub delivery: DeliveryPolicyConfig,

    /// Close and forget rooms whose last member has left.
    #[serde(default = "default_true")]
    pub drop_empty_rooms: bool,
}

/// Serializable form of [`DeliveryPolicy`].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum DeliveryPolicyConfig {
    /// Drop the message being delivered when the outbox is full.
    #[default]
    DropNewest,
    /// Hand the send to a background task that gives up after `ms`.
    Timeout {
        /// Hand-off timeout in milliseconds.
        ms: u64,
    },
}

impl DeliveryPolicyConfig {
    /// Convert into the core policy type.
    #[must_use]
    pub fn policy(self) -> DeliveryPolicy {
        match self {
            Self::DropNewest => DeliveryPolicy::DropNewest,
            Self::Timeout { ms } => DeliveryPolicy::Timeout(Duration::from_millis(ms)),
        }
    }
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum accepted line length in bytes.
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
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
fn default_host() -> String {
    std::env::var("ROOMCAST_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("ROOMCAST_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(5252)
}

fn default_true() -> bool {
    true
}

fn default_bus_capacity() -> usize {
    64
}

fn default_outbox_capacity() -> usize {
    256
}

fn default_max_line_length() -> usize {
    roomcast_wire::codec::DEFAULT_MAX_LINE
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            room: RoomTuning::default(),
            limits: LimitsConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for RoomTuning {
    fn default() -> Self {
        Self {
            bus_capacity: default_bus_capacity(),
            outbox_capacity: default_outbox_capacity(),
            delivery: DeliveryPolicyConfig::default(),
            drop_empty_rooms: true,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_line_length: default_max_line_length(),
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

impl RoomTuning {
    /// Build the core room configuration from these settings.
    #[must_use]
    pub fn room_config(&self) -> RoomConfig {
        RoomConfig {
            bus_capacity: self.bus_capacity,
            outbox_capacity: self.outbox_capacity,
            delivery: self.delivery.policy(),
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
            "roomcast.toml",
            "/etc/roomcast/roomcast.toml",
            "~/.config/roomcast/roomcast.toml",
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

    /// Get the socket address to bind to.
    #[must_use]
    pub fn bind_addr(&self) -> SocketAddr {
        format!("{}:{}", self.host, self.port)
            .parse()
            .expect("Invalid host:port")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 5252);
        assert!(config.room.drop_empty_rooms);
        assert!(matches!(
            config.room.delivery,
            DeliveryPolicyConfig::DropNewest
        ));
    }

    #[test]
    fn test_config_bind_addr() {
        let config = Config::default();
        let addr = config.bind_addr();
        assert_eq!(addr.port(), 5252);
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 6000

            [room]
            outbox_capacity = 32
            delivery = { mode = "timeout", ms = 250 }

            [limits]
            max_line_length = 1024
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 6000);
        assert_eq!(config.room.outbox_capacity, 32);
        assert_eq!(config.limits.max_line_length, 1024);
        assert!(matches!(
            config.room.delivery.policy(),
            DeliveryPolicy::Timeout(d) if d == Duration::from_millis(250)
        ));
    }
}
