//! Configuration types.

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::ConfigError;

/// Coordinator configuration.
#[derive(Debug, Clone)]
pub struct FarmConfig {
    /// Address the HTTP API binds to.
    pub bind_addr: SocketAddr,
    /// Path to the SQLite database file.
    pub db_path: String,
    /// A device counts as live if it reported within this window.
    pub device_timeout: Duration,
    /// How long a leased queue message stays hidden before redelivery.
    pub message_lease: Duration,
}

impl Default for FarmConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8000".parse().expect("static addr"),
            db_path: "./data/device-farm.db".to_string(),
            device_timeout: Duration::from_secs(300), // 5 minutes
            message_lease: Duration::from_secs(60),
        }
    }
}

impl FarmConfig {
    /// Build a config from `FARM_*` environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(bind) = std::env::var("FARM_BIND") {
            config.bind_addr = bind.parse().map_err(|e| ConfigError::InvalidValue {
                key: "FARM_BIND".to_string(),
                message: format!("{e}"),
            })?;
        }
        if let Ok(path) = std::env::var("FARM_DB_PATH") {
            config.db_path = path;
        }
        if let Ok(secs) = std::env::var("FARM_DEVICE_TIMEOUT_SECS") {
            let secs: u64 = secs.parse().map_err(|e| ConfigError::InvalidValue {
                key: "FARM_DEVICE_TIMEOUT_SECS".to_string(),
                message: format!("{e}"),
            })?;
            config.device_timeout = Duration::from_secs(secs);
        }
        if let Ok(secs) = std::env::var("FARM_LEASE_SECS") {
            let secs: u64 = secs.parse().map_err(|e| ConfigError::InvalidValue {
                key: "FARM_LEASE_SECS".to_string(),
                message: format!("{e}"),
            })?;
            config.message_lease = Duration::from_secs(secs);
        }

        Ok(config)
    }
}
