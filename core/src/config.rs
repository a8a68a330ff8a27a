//! Configuration management

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server information
    pub server: ServerConfig,
    /// Login credentials
    pub credentials: CredentialsConfig,
    /// Connection settings
    pub connection: ConnectionConfig,
    /// Outbound rate limits
    pub limits: LimitsConfig,
    /// Metadata correlation windows
    pub correlation: CorrelationConfig,
    /// Moderation settings
    pub moderation: ModerationConfig,
}

/// Chat server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Ordered list of chat servers; rotated through on unknown-host failures
    pub servers: Vec<String>,
    /// Ports to connect on, tried in order
    pub ports: Vec<u16>,
    /// Channels to join automatically after registration
    pub channels: Vec<String>,
}

/// Login credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    /// Account name (also the IRC nickname)
    pub nick: String,
    /// OAuth token, sent as the connection password
    pub token: String,
}

/// Connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Whether to use TLS
    pub tls: bool,
    /// CA bundle for TLS verification (PEM); system trust is not consulted
    pub ca_file: Option<PathBuf>,
    /// Connect timeout in seconds
    pub connect_timeout_seconds: u64,
    /// Maximum automatic reconnection attempts before giving up
    pub max_reconnect_attempts: u32,
    /// Seconds to wait for a join confirmation before re-issuing the join
    pub join_retry_seconds: u64,
}

/// Outbound rate limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Messages-per-window allowance as "<lines>/<seconds>"
    pub message_rate: String,
    /// How many recent message/ban events to keep per user
    pub user_history_capacity: usize,
}

/// Metadata correlation windows
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationConfig {
    /// Window for pairing channel-less status messages with later events (ms)
    pub buffer_window_ms: u64,
    /// How long a moderator-list request can still claim a response (seconds)
    pub mods_valid_seconds: u64,
    /// How long a moderator-list request is tracked at all (seconds)
    pub mods_tracked_seconds: u64,
    /// Correlated pairs required before a user is confirmed subscriber
    pub subscriber_promote_threshold: u8,
    /// Optional emote-set to channel mapping file (JSON)
    pub emote_sets_file: Option<PathBuf>,
}

/// Moderation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationConfig {
    /// Whether to request moderator lists automatically
    pub auto_request_mods: bool,
    /// Interval between automatic moderator-list requests (seconds)
    pub auto_request_interval_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            credentials: CredentialsConfig::default(),
            connection: ConnectionConfig::default(),
            limits: LimitsConfig::default(),
            correlation: CorrelationConfig::default(),
            moderation: ModerationConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            servers: vec!["irc.chat.twitch.tv".to_string()],
            ports: vec![6667, 443],
            channels: Vec::new(),
        }
    }
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            nick: String::new(),
            token: String::new(),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            tls: false,
            ca_file: None,
            connect_timeout_seconds: 30,
            max_reconnect_attempts: 20,
            join_retry_seconds: 7,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            message_rate: "20/30".to_string(),
            user_history_capacity: 100,
        }
    }
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            buffer_window_ms: 500,
            mods_valid_seconds: 5,
            mods_tracked_seconds: 15,
            subscriber_promote_threshold: 2,
            emote_sets_file: None,
        }
    }
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            auto_request_mods: true,
            auto_request_interval_seconds: 30,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.servers.is_empty() {
            return Err(Error::Config("No servers configured".to_string()));
        }
        if self.server.ports.is_empty() {
            return Err(Error::Config("No ports configured".to_string()));
        }
        crate::rate_gate::parse_rate(&self.limits.message_rate)?;
        if self.correlation.subscriber_promote_threshold == 0 {
            return Err(Error::Config(
                "subscriber_promote_threshold must be at least 1".to_string(),
            ));
        }
        if self.moderation.auto_request_interval_seconds == 0 {
            return Err(Error::Config(
                "auto_request_interval_seconds must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.connection.max_reconnect_attempts, 20);
        assert_eq!(config.connection.join_retry_seconds, 7);
        assert_eq!(config.correlation.buffer_window_ms, 500);
        assert_eq!(config.correlation.mods_valid_seconds, 5);
        assert_eq!(config.correlation.mods_tracked_seconds, 15);
        assert_eq!(config.correlation.subscriber_promote_threshold, 2);
        assert_eq!(config.moderation.auto_request_interval_seconds, 30);
    }

    #[test]
    fn test_config_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.credentials.nick = "justinfan123".to_string();
        config.limits.message_rate = "15/30".to_string();
        config.to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.credentials.nick, "justinfan123");
        assert_eq!(loaded.limits.message_rate, "15/30");
        assert_eq!(loaded.server.servers, config.server.servers);
    }

    #[test]
    fn test_invalid_rate_string_rejected() {
        let mut config = Config::default();
        config.limits.message_rate = "twenty/thirty".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_server_list_rejected() {
        let mut config = Config::default();
        config.server.servers.clear();
        assert!(config.validate().is_err());
    }
}
