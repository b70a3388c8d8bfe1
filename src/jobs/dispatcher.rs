//! Job dispatcher — snapshot the fleet, fan the job out device by device.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{error, info, warn};

use crate::error::{JobError, Result};
use crate::fleet::FleetRegistry;
use crate::jobs::model::{Assignment, Job, JobAction, JobStatus};
use crate::jobs::target::extract_target_id;
use crate::queue::JobMessage;
use crate::store::FarmStore;

/// Creates jobs and distributes them to every live device's channel.
pub struct JobDispatcher {
    store: Arc<dyn FarmStore>,
    registry: Arc<FleetRegistry>,
}

impl JobDispatcher {
    pub fn new(store: Arc<dyn FarmStore>, registry: Arc<FleetRegistry>) -> Self {
        Self { store, registry }
    }

    /// Create a job for `target_url` and fan it out to all live devices.
    ///
    /// The live snapshot is taken exactly once and fixes
    /// `target_device_count` for the job's lifetime. Each device gets its
    /// assignment row and queue message written in one transaction, so a
    /// device either has both or neither. Devices whose enqueue fails do
    /// not undo the rest of the fan-out: their peers' assignments remain
    /// authoritative and the job is marked failed with the laggards named
    /// in the error.
    pub async fn create_and_dispatch(&self, target_url: &str, action: JobAction) -> Result<Job> {
        let target_id = extract_target_id(target_url).ok_or_else(|| JobError::InvalidTarget {
            locator: target_url.to_string(),
        })?;

        let snapshot = self.registry.live_snapshot().await?;
        if snapshot.is_empty() {
            warn!(target_id = %target_id, "Dispatch refused, no live devices");
            return Err(JobError::NoWorkersAvailable.into());
        }

        let mut job = Job::new(target_url, &target_id, action, snapshot.len());
        job.status = JobStatus::Distributing;
        self.store.create_job(&job).await?;

        info!(
            job_id = %job.job_id,
            target_id = %target_id,
            action = %action,
            devices = snapshot.len(),
            "Job created, distributing"
        );

        // Per-device fan-out: independent operations, run concurrently.
        let deliveries = snapshot.iter().map(|device| {
            let store = Arc::clone(&self.store);
            let job = job.clone();
            let device_id = device.device_id.clone();
            async move {
                let assignment = Assignment::new(job.job_id, &device_id);
                let message = JobMessage {
                    job_id: job.job_id,
                    target_url: job.target_url.clone(),
                    target_id: job.target_id.clone(),
                    action: job.action,
                    device_id: device_id.clone(),
                    assigned_at: assignment.assigned_at,
                };
                let result = store.assign_job(&assignment, &message).await;
                (device_id, result)
            }
        });

        let mut failed_devices = Vec::new();
        for (device_id, result) in join_all(deliveries).await {
            if let Err(e) = result {
                error!(
                    job_id = %job.job_id,
                    device_id = %device_id,
                    error = %e,
                    "Failed to enqueue job for device"
                );
                failed_devices.push(device_id);
            }
        }

        if failed_devices.is_empty() {
            job.status = JobStatus::Distributed;
            self.store.set_job_status(job.job_id, JobStatus::Distributed).await?;
            info!(job_id = %job.job_id, devices = job.target_device_count, "Job distributed");
            Ok(job)
        } else {
            self.store.set_job_status(job.job_id, JobStatus::Failed).await?;
            Err(JobError::DispatchFailed {
                job_id: job.job_id,
                failed_devices,
            }
            .into())
        }
    }
}
