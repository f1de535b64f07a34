//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: Serialization/deserialization library for converting between Rust structs and data formats
//! - **derive macros**: Automatically generate code for common traits (Debug, Clone, Serialize, Deserialize)
//! - **Result<T, E>**: Error handling that forces you to handle potential failures
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER_HOST, APP_GAME_ROUND_DURATION_SECS, etc.)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// Breaking configuration into logical groups (server, game, storage, performance)
/// makes it easier to understand which part of the relay game a setting affects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub game: GameConfig,
    pub storage: StorageConfig,
    pub performance: PerformanceConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Game pacing settings.
///
/// ## Fields:
/// - `round_duration_secs`: How long every round stays live before the scheduler
///   advances it. The last round gets the same duration before the summary is sent.
/// - `room_code_attempts`: Upper bound on random draws when allocating a room code.
///   With 26^4 possible codes this is only reached when the server is nearly full.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameConfig {
    pub round_duration_secs: u64,
    pub room_code_attempts: u32,
}

/// Where uploaded recordings and their reversed copies are written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub files_dir: String,
}

/// Connection limits and WebSocket keep-alive tuning.
///
/// ## Fields:
/// - `max_concurrent_sessions`: WebSocket connections accepted at the same time
/// - `heartbeat_interval_secs`: How often the server pings each client
/// - `client_timeout_secs`: Silence after which a client is considered gone
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub max_concurrent_sessions: usize,
    pub heartbeat_interval_secs: u64,
    pub client_timeout_secs: u64,
}

/// Provides default configuration values.
///
/// ## Why defaults matter:
/// Default values ensure the application can start even if no configuration file exists.
/// The 30 second round matches the recording timer the web client ships with.
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),  // Localhost only (safe for development)
                port: 8000,
            },
            game: GameConfig {
                round_duration_secs: 30,
                room_code_attempts: 1000,
            },
            storage: StorageConfig {
                files_dir: "game_files".to_string(),
            },
            performance: PerformanceConfig {
                max_concurrent_sessions: 256,
                heartbeat_interval_secs: 30,
                client_timeout_secs: 60,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle special cases for HOST and PORT environment variables
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER_PORT=3000`: Override server port
    /// - `APP_STORAGE_FILES_DIR=/var/lib/relay`: Override recording directory
    /// - `PORT=3000`: Special case for deployment platforms
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            // Double underscore separates sections so field names may keep their own underscores:
            // APP_GAME__ROUND_DURATION_SECS becomes game.round_duration_secs
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## Why validate:
    /// A zero round duration would make the scheduler spin through every round
    /// instantly, and a zero heartbeat interval would flood clients with pings.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.game.round_duration_secs == 0 {
            return Err(anyhow::anyhow!("Round duration must be greater than 0"));
        }

        if self.game.room_code_attempts == 0 {
            return Err(anyhow::anyhow!("Room code attempts must be greater than 0"));
        }

        if self.storage.files_dir.trim().is_empty() {
            return Err(anyhow::anyhow!("Storage directory cannot be empty"));
        }

        if self.performance.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }

        if self.performance.heartbeat_interval_secs == 0 {
            return Err(anyhow::anyhow!("Heartbeat interval must be greater than 0"));
        }

        if self.performance.client_timeout_secs <= self.performance.heartbeat_interval_secs {
            return Err(anyhow::anyhow!("Client timeout must be longer than the heartbeat interval"));
        }

        Ok(())
    }

    /// Round duration as a `Duration`, ready to hand to the round scheduler.
    pub fn round_duration(&self) -> Duration {
        Duration::from_secs(self.game.round_duration_secs)
    }

    pub fn files_dir(&self) -> PathBuf {
        PathBuf::from(&self.storage.files_dir)
    }

    /// Update configuration from a JSON string (used for runtime config updates).
    ///
    /// ## Partial updates:
    /// Only the fields present in the JSON are changed. For example
    /// `{"game": {"round_duration_secs": 45}}` lengthens the rounds of the next game
    /// without touching anything else. Games already running keep their duration.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(server) = partial_config.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port = u16::try_from(port)
                    .map_err(|_| anyhow::anyhow!("Server port {} is out of range", port))?;
            }
        }

        if let Some(game) = partial_config.get("game") {
            if let Some(secs) = game.get("round_duration_secs").and_then(|v| v.as_u64()) {
                self.game.round_duration_secs = secs;
            }
            if let Some(attempts) = game.get("room_code_attempts").and_then(|v| v.as_u64()) {
                self.game.room_code_attempts = u32::try_from(attempts).unwrap_or(u32::MAX);
            }
        }

        if let Some(storage) = partial_config.get("storage") {
            if let Some(dir) = storage.get("files_dir").and_then(|v| v.as_str()) {
                self.storage.files_dir = dir.to_string();
            }
        }

        if let Some(performance) = partial_config.get("performance") {
            if let Some(sessions) = performance.get("max_concurrent_sessions").and_then(|v| v.as_u64()) {
                self.performance.max_concurrent_sessions = sessions as usize;
            }
            if let Some(secs) = performance.get("heartbeat_interval_secs").and_then(|v| v.as_u64()) {
                self.performance.heartbeat_interval_secs = secs;
            }
            if let Some(secs) = performance.get("client_timeout_secs").and_then(|v| v.as_u64()) {
                self.performance.client_timeout_secs = secs;
            }
        }

        self.validate()?;
        Ok(())
    }
}

/// Tests for the configuration module.
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.round_duration(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.game.round_duration_secs = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.performance.client_timeout_secs = config.performance.heartbeat_interval_secs;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_update() {
        let mut config = AppConfig::default();
        let json = r#"{"game": {"round_duration_secs": 45}, "storage": {"files_dir": "/tmp/relay"}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.game.round_duration_secs, 45);
        assert_eq!(config.files_dir(), PathBuf::from("/tmp/relay"));
        // Other fields should remain unchanged
        assert_eq!(config.server.port, 8000);
    }

    #[test]
    fn test_config_update_rejects_invalid_values() {
        let mut config = AppConfig::default();
        assert!(config.update_from_json(r#"{"server": {"port": 70000}}"#).is_err());
        assert!(config.update_from_json(r#"{"game": {"round_duration_secs": 0}}"#).is_err());
    }
}
