use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};

/// Application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port (health endpoint and WebSocket upgrades)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Allowed cross-origin value for the health endpoint
    #[serde(default = "default_cors_origin")]
    pub cors_origin: String,

    /// How long a room may sit with zero attached sessions before it is
    /// closed and evicted from the registry, in milliseconds.
    #[serde(default = "default_room_idle_timeout_ms")]
    pub room_idle_timeout_ms: u64,
}

impl Config {
    /// Load configuration from environment variables or app.env file
    pub fn load() -> Result<Self, ConfigError> {
        // Try to load from app.env file first
        if std::path::Path::new("app.env").exists() {
            dotenvy::from_filename("app.env").ok();
        } else {
            // Fallback to .env file
            dotenvy::dotenv().ok();
        }

        // Load from environment variables using envy
        match envy::from_env::<Config>() {
            Ok(config) => {
                info!("✅ Configuration loaded successfully");
                Ok(config)
            }
            Err(e) => {
                error!("❌ Failed to load configuration: {}", e);
                Err(ConfigError::EnvError(e))
            }
        }
    }

    /// Get the full server address
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Idle grace period as a Duration
    pub fn room_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.room_idle_timeout_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origin: default_cors_origin(),
            room_idle_timeout_ms: default_room_idle_timeout_ms(),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    EnvError(envy::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::EnvError(e) => write!(f, "Environment variable error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5858
}

fn default_cors_origin() -> String {
    "http://localhost:3000".to_string()
}

fn default_room_idle_timeout_ms() -> u64 {
    // 10 minutes with no connections
    600_000
}
