//! Application configuration

use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use serde_with::serde_as;

use crate::errors::TrackerError;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub feed: FeedConfig,
    pub provider: ProviderConfig,
    pub database: DatabaseConfig,
    pub http: HttpConfig,
}

/// Streaming feed connection settings
#[serde_as]
#[derive(Debug, Deserialize, Clone)]
pub struct FeedConfig {
    pub url: String,
    pub api_key: String,
    /// Fixed wait between reconnect attempts
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval: Duration,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Liveness log cadence while subscribed
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: Duration,
}

/// REST position provider settings
///
/// A missing API key means the provider is unconfigured; the reconciliation
/// job reports this distinctly from "no data for this vessel".
#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Shared secret gating the reconciliation trigger. When unset the
    /// endpoint accepts unauthenticated calls.
    #[serde(default)]
    pub cron_secret: Option<String>,
}

fn default_reconnect_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(
                Environment::with_prefix("TRACKER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

impl FeedConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), TrackerError> {
        if self.url.is_empty() {
            return Err(TrackerError::ConfigurationError {
                message: "Feed URL cannot be empty".to_string(),
            });
        }
        if self.api_key.is_empty() {
            return Err(TrackerError::ConfigurationError {
                message: "Feed API key cannot be empty".to_string(),
            });
        }
        if self.max_reconnect_attempts == 0 {
            return Err(TrackerError::ConfigurationError {
                message: "Max reconnect attempts must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

impl DatabaseConfig {
    pub fn validate(&self) -> Result<(), TrackerError> {
        if self.url.is_empty() {
            return Err(TrackerError::ConfigurationError {
                message: "Database URL cannot be empty".to_string(),
            });
        }
        Ok(())
    }
}
