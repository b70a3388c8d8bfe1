//! Fleet registry — device liveness and per-device statistics.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info};

use crate::error::{FleetError, Result};
use crate::fleet::model::{Device, RegistrationOutcome};
use crate::store::FarmStore;

/// Tracks worker devices: registration, liveness snapshots, outcome stats.
pub struct FleetRegistry {
    store: Arc<dyn FarmStore>,
    /// A device counts as live if it reported within this window.
    device_timeout: Duration,
}

impl FleetRegistry {
    pub fn new(store: Arc<dyn FarmStore>, device_timeout: Duration) -> Self {
        Self {
            store,
            device_timeout,
        }
    }

    /// Register a device, or refresh an existing one. Always leaves the
    /// device online with `last_seen = now`.
    pub async fn register(
        &self,
        device_id: &str,
        device_name: &str,
        account_handle: &str,
    ) -> Result<RegistrationOutcome> {
        let outcome = self
            .store
            .upsert_device(device_id, device_name, account_handle)
            .await?;

        info!(
            device_id = device_id,
            device_name = device_name,
            account = account_handle,
            outcome = ?outcome,
            "Device registration"
        );
        Ok(outcome)
    }

    /// One consistent read of every live device, ordered by device id.
    ///
    /// This snapshot is the sole input that fixes a job's target set; the
    /// dispatcher never re-queries mid-fan-out, so worker churn during
    /// delivery cannot change the denominator.
    pub async fn live_snapshot(&self) -> Result<Vec<Device>> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.device_timeout)
                .unwrap_or_else(|_| chrono::Duration::seconds(300));
        let devices = self.store.live_devices(cutoff).await?;
        debug!(count = devices.len(), "Live snapshot taken");
        Ok(devices)
    }

    /// Record one job outcome against a device's counters and refresh its
    /// heartbeat — a result report doubles as proof of life.
    pub async fn record_outcome(&self, device_id: &str, success: bool) -> Result<()> {
        let found = self
            .store
            .bump_device_stats(device_id, success, Utc::now())
            .await?;

        if !found {
            return Err(FleetError::DeviceNotFound {
                device_id: device_id.to_string(),
            }
            .into());
        }

        debug!(device_id = device_id, success = success, "Device outcome recorded");
        Ok(())
    }
}
