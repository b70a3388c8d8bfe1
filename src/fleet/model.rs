//! Device data model.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Reported status of a device.
///
/// Only `online` is ever written by the coordinator (at registration);
/// `working` and `error` exist for devices that report richer state.
/// `offline` is the implicit starting point of an unregistered device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Offline,
    Online,
    Working,
    Error,
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Offline => write!(f, "offline"),
            Self::Online => write!(f, "online"),
            Self::Working => write!(f, "working"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for DeviceStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "offline" => Ok(Self::Offline),
            "online" => Ok(Self::Online),
            "working" => Ok(Self::Working),
            "error" => Ok(Self::Error),
            _ => Err(format!("Unknown device status: {s}")),
        }
    }
}

/// A registered worker device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    /// Caller-chosen stable identity, unique across the fleet.
    pub device_id: String,
    /// Human-readable name.
    pub device_name: String,
    /// Account the device acts under.
    pub account_handle: String,
    pub status: DeviceStatus,
    /// Last registration or result report.
    pub last_seen: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
}

impl Device {
    /// Liveness predicate: status online/working and seen within `timeout`.
    pub fn is_live(&self, now: DateTime<Utc>, timeout: std::time::Duration) -> bool {
        let fresh =
            now - self.last_seen < Duration::from_std(timeout).unwrap_or(Duration::MAX);
        matches!(self.status, DeviceStatus::Online | DeviceStatus::Working) && fresh
    }
}

/// Outcome of a registration call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationOutcome {
    /// First registration of this device id.
    Registered,
    /// Existing device id — name/account/status/last_seen refreshed.
    Updated,
}
