//! Per-device durable message channel.
//!
//! Every registered device owns one exclusive inbound channel. Messages
//! are rows co-located with the job store and are written in the same
//! transaction as the assignment they belong to, so the recorded
//! assignment set always equals the enqueued message set.
//!
//! Delivery is at-least-once: a worker leases the next message, which
//! hides it for a visibility window; an unacked lease expires and the
//! message is delivered again. Workers ack after reporting their result,
//! and the result aggregator's duplicate guard makes redelivery safe.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::Result;
use crate::jobs::model::JobAction;
use crate::store::FarmStore;

/// Payload delivered to a device for one assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMessage {
    pub job_id: Uuid,
    pub target_url: String,
    pub target_id: String,
    pub action: JobAction,
    pub device_id: String,
    pub assigned_at: DateTime<Utc>,
}

/// A leased message as handed to a polling worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedMessage {
    /// Identity used to ack this delivery.
    pub message_id: Uuid,
    /// Delivery attempt number, starting at 1.
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    pub message: JobMessage,
}

/// Consumption API over the per-device channels.
pub struct DeviceMailbox {
    store: Arc<dyn FarmStore>,
    lease: Duration,
}

impl DeviceMailbox {
    pub fn new(store: Arc<dyn FarmStore>, lease: Duration) -> Self {
        Self { store, lease }
    }

    /// Lease the oldest deliverable message for `device_id`, hiding it for
    /// the configured visibility window. Returns `None` when the channel
    /// is empty or everything is currently leased.
    pub async fn lease_next(&self, device_id: &str) -> Result<Option<QueuedMessage>> {
        let leased = self
            .store
            .lease_next_message(device_id, Utc::now(), self.lease)
            .await?;

        match &leased {
            Some(msg) => {
                info!(
                    device_id = device_id,
                    message_id = %msg.message_id,
                    job_id = %msg.message.job_id,
                    attempts = msg.attempts,
                    "Message leased"
                );
            }
            None => debug!(device_id = device_id, "Channel empty, nothing to lease"),
        }

        Ok(leased)
    }

    /// Acknowledge (delete) a delivered message. Returns false if the
    /// message id is unknown for this device — already acked, or never
    /// belonged to this channel.
    pub async fn ack(&self, device_id: &str, message_id: Uuid) -> Result<bool> {
        let acked = self.store.ack_message(device_id, message_id).await?;
        if acked {
            info!(device_id = device_id, message_id = %message_id, "Message acked");
        } else {
            debug!(
                device_id = device_id,
                message_id = %message_id,
                "Ack for unknown message ignored"
            );
        }
        Ok(acked)
    }
}
