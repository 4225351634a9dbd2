//! Configuration management for the message router.
//!
//! This module handles loading, validation, and conversion of broker configuration
//! from TOML files and command-line arguments.

use crate::cli::CliArgs;
use router_core::{FrameLimits, WebSocketConfig};
use router_server::ServerConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use tracing::info;

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Listener and admission settings
    pub server: ServerSettings,
    /// Frame and buffer limits applied to every connection
    #[serde(default)]
    pub limits: LimitSettings,
    /// Logging configuration settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Listener and admission settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Network address to bind the server to (e.g., "127.0.0.1:5000")
    pub bind_address: String,
    /// HTTP path the WebSocket upgrade is accepted on
    #[serde(default = "default_websocket_path")]
    pub websocket_path: String,
    /// Maximum number of concurrently connected clients
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Messages queued for one client before it is evicted as stalled
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,
    /// Token clients must present on connect
    #[serde(default)]
    pub access_token: Option<String>,
}

fn default_websocket_path() -> String {
    "/ws".to_string()
}

fn default_max_connections() -> usize {
    1000
}

fn default_outbound_queue_capacity() -> usize {
    1024
}

fn default_max_message_size() -> usize {
    FrameLimits::default().max_message_size
}

fn default_max_buffer_size() -> usize {
    FrameLimits::default().max_buffer_size
}

fn default_max_malformed_frames() -> usize {
    FrameLimits::default().max_malformed_frames
}

/// Per-connection frame limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitSettings {
    /// Largest single frame accepted, in bytes
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    /// Largest amount of undecoded input held for one connection, in bytes
    #[serde(default = "default_max_buffer_size")]
    pub max_buffer_size: usize,
    /// Consecutive malformed frames tolerated before the connection is dropped (0 disables)
    #[serde(default = "default_max_malformed_frames")]
    pub max_malformed_frames: usize,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
            max_buffer_size: default_max_buffer_size(),
            max_malformed_frames: default_max_malformed_frames(),
        }
    }
}

/// Logging system configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    #[serde(default)]
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                bind_address: "127.0.0.1:5000".to_string(),
                websocket_path: default_websocket_path(),
                max_connections: default_max_connections(),
                outbound_queue_capacity: default_outbound_queue_capacity(),
                access_token: None,
            },
            limits: LimitSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, writes the default configuration to `path`
    /// and returns it.
    pub async fn load_from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Applies command-line overrides on top of the file values.
    pub fn apply_overrides(&mut self, args: &CliArgs) {
        if let Some(bind_address) = &args.bind_address {
            self.server.bind_address = bind_address.clone();
        }
        if let Some(path) = &args.websocket_path {
            self.server.websocket_path = path.clone();
        }
        if let Some(token) = &args.access_token {
            self.server.access_token = Some(token.clone());
        }
        if let Some(log_level) = &args.log_level {
            self.logging.level = log_level.clone();
        }
        if args.json_logs {
            self.logging.json_format = true;
        }
    }

    /// Converts the file configuration into the broker's [`ServerConfig`].
    pub fn to_server_config(&self) -> Result<ServerConfig, Box<dyn std::error::Error>> {
        let limits = FrameLimits {
            max_message_size: self.limits.max_message_size,
            max_buffer_size: self.limits.max_buffer_size,
            max_malformed_frames: self.limits.max_malformed_frames,
        };

        Ok(ServerConfig {
            bind_address: self.server.bind_address.parse()?,
            websocket_path: self.server.websocket_path.clone(),
            max_connections: self.server.max_connections,
            outbound_queue_capacity: self.server.outbound_queue_capacity,
            access_token: self
                .server
                .access_token
                .clone()
                .filter(|token| !token.is_empty()),
            websocket: WebSocketConfig {
                limits,
                ..WebSocketConfig::default()
            },
        })
    }

    /// Validates the configuration for consistency and correctness.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.bind_address.parse::<SocketAddr>().is_err() {
            return Err(format!(
                "Invalid bind address: {}",
                &self.server.bind_address
            ));
        }

        if !self.server.websocket_path.starts_with('/') {
            return Err(format!(
                "WebSocket path must start with '/': {}",
                &self.server.websocket_path
            ));
        }

        if self.server.max_connections == 0 {
            return Err("server.max_connections must be greater than 0".to_string());
        }

        if self.server.outbound_queue_capacity == 0 {
            return Err("server.outbound_queue_capacity must be greater than 0".to_string());
        }

        if self.limits.max_message_size == 0 || self.limits.max_buffer_size == 0 {
            return Err(
                "limits.max_message_size and limits.max_buffer_size must be greater than 0"
                    .to_string(),
            );
        }

        if self.limits.max_buffer_size < self.limits.max_message_size {
            return Err(
                "limits.max_buffer_size must be at least limits.max_message_size".to_string(),
            );
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();

        assert_eq!(config.server.bind_address, "127.0.0.1:5000");
        assert_eq!(config.server.websocket_path, "/ws");
        assert_eq!(config.server.max_connections, 1000);
        assert_eq!(config.server.outbound_queue_capacity, 1024);
        assert!(config.server.access_token.is_none());
        assert_eq!(config.limits.max_message_size, 1024 * 1024);
        assert_eq!(config.limits.max_malformed_frames, 16);
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json_format);
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_load_from_nonexistent_file_creates_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("message_router.toml");

        let config = AppConfig::load_from_file(&path)
            .await
            .expect("defaults are written and returned");

        assert_eq!(config, AppConfig::default());
        assert!(path.exists());

        let reloaded = AppConfig::load_from_file(&path)
            .await
            .expect("written file parses");
        assert_eq!(reloaded, config);
    }

    #[tokio::test]
    async fn test_load_from_existing_file() {
        let toml_content = r#"
[server]
bind_address = "0.0.0.0:6000"
websocket_path = "/router"
max_connections = 50
access_token = "secret"

[limits]
max_message_size = 2048

[logging]
level = "debug"
json_format = true
"#;

        let mut file = NamedTempFile::new().expect("temp file");
        file.write_all(toml_content.as_bytes()).expect("write config");

        let config = AppConfig::load_from_file(file.path())
            .await
            .expect("config parses");

        assert_eq!(config.server.bind_address, "0.0.0.0:6000");
        assert_eq!(config.server.websocket_path, "/router");
        assert_eq!(config.server.max_connections, 50);
        assert_eq!(config.server.outbound_queue_capacity, 1024);
        assert_eq!(config.server.access_token.as_deref(), Some("secret"));
        assert_eq!(config.limits.max_message_size, 2048);
        assert_eq!(config.limits.max_buffer_size, 4 * 1024 * 1024);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json_format);
    }

    #[tokio::test]
    async fn test_load_from_invalid_file_fails() {
        let mut file = NamedTempFile::new().expect("temp file");
        file.write_all(b"[server\nbind_address = ").expect("write config");

        assert!(AppConfig::load_from_file(file.path()).await.is_err());
    }

    #[test]
    fn test_overrides_take_precedence() {
        let mut config = AppConfig::default();
        let args = CliArgs {
            bind_address: Some("0.0.0.0:7000".to_string()),
            websocket_path: Some("/mr".to_string()),
            access_token: Some("token".to_string()),
            log_level: Some("trace".to_string()),
            json_logs: true,
            ..CliArgs::default()
        };

        config.apply_overrides(&args);

        assert_eq!(config.server.bind_address, "0.0.0.0:7000");
        assert_eq!(config.server.websocket_path, "/mr");
        assert_eq!(config.server.access_token.as_deref(), Some("token"));
        assert_eq!(config.logging.level, "trace");
        assert!(config.logging.json_format);
    }

    #[test]
    fn test_overrides_leave_unset_values_alone() {
        let mut config = AppConfig::default();
        config.logging.json_format = true;

        config.apply_overrides(&CliArgs::default());

        assert_eq!(config.server.bind_address, "127.0.0.1:5000");
        assert!(config.logging.json_format);
    }

    #[test]
    fn test_to_server_config_conversion() {
        let mut config = AppConfig::default();
        config.server.access_token = Some("abc".to_string());
        config.limits.max_malformed_frames = 0;

        let server_config = config.to_server_config().expect("conversion");

        assert_eq!(server_config.bind_address, "127.0.0.1:5000".parse().expect("addr"));
        assert_eq!(server_config.websocket_path, "/ws");
        assert_eq!(server_config.max_connections, 1000);
        assert_eq!(server_config.access_token.as_deref(), Some("abc"));
        assert_eq!(server_config.websocket.limits.max_malformed_frames, 0);
        assert_eq!(
            server_config.websocket.outbound_capacity,
            WebSocketConfig::default().outbound_capacity
        );
    }

    #[test]
    fn test_empty_access_token_disables_check() {
        let mut config = AppConfig::default();
        config.server.access_token = Some(String::new());

        let server_config = config.to_server_config().expect("conversion");
        assert!(server_config.access_token.is_none());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.server.bind_address = "invalid".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.server.websocket_path = "ws".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.server.max_connections = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.server.outbound_queue_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.limits.max_buffer_size = 10;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_valid_log_levels() {
        for level in ["trace", "debug", "info", "warn", "error"] {
            let mut config = AppConfig::default();
            config.logging.level = level.to_string();
            assert!(config.validate().is_ok(), "level {level} should be accepted");
        }
    }
}
