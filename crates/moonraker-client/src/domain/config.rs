//! Client configuration with validation.
//!
//! Durations are written as fractional seconds in config files:
//!
//! ```toml
//! moonraker_config_path = "/home/pi/printer_data/config/moonraker.conf"
//! request_timeout = 30.0
//! reconnect_backoff = 2.0
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Main client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Moonraker's own config file, re-read on every connect attempt
    pub moonraker_config_path: PathBuf,
    /// host:port used until the config file has been read once
    pub fallback_address: String,
    /// Upper bound on how long one RPC may wait for its response
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,
    /// Fixed sleep between reconnect attempts
    #[serde(with = "duration_secs")]
    pub reconnect_backoff: Duration,
    /// Sleep between readiness polls while klippy is starting
    #[serde(with = "duration_secs")]
    pub handshake_poll_interval: Duration,
    /// Log readiness progress once every this many polls
    pub handshake_log_every: u32,
    /// Capacity of the unsolicited message queue
    pub dispatch_queue_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            moonraker_config_path: PathBuf::from("/home/pi/printer_data/config/moonraker.conf"),
            fallback_address: "127.0.0.1:7125".to_string(),
            request_timeout: Duration::from_secs(30),
            reconnect_backoff: Duration::from_secs(2),
            handshake_poll_interval: Duration::from_secs(2),
            // 150 polls * 2s = one line every 5 minutes
            handshake_log_every: 150,
            dispatch_queue_capacity: 20_000,
        }
    }
}

impl ClientConfig {
    /// Create a config pointing at the given moonraker.conf
    pub fn new(moonraker_config_path: impl Into<PathBuf>) -> Self {
        Self {
            moonraker_config_path: moonraker_config_path.into(),
            ..Self::default()
        }
    }

    /// Parse a TOML document, then validate it
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "request_timeout cannot be 0".into(),
            ));
        }
        if self.reconnect_backoff.is_zero() {
            return Err(ConfigError::InvalidValue(
                "reconnect_backoff cannot be 0".into(),
            ));
        }
        if self.handshake_poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "handshake_poll_interval cannot be 0".into(),
            ));
        }
        if self.handshake_log_every == 0 {
            return Err(ConfigError::InvalidValue(
                "handshake_log_every cannot be 0".into(),
            ));
        }
        if self.dispatch_queue_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "dispatch_queue_capacity cannot be 0".into(),
            ));
        }
        Ok(())
    }
}

/// Serde helper: `Duration` as fractional seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
