//! Status reporter — read-only views over jobs and the fleet.

use std::sync::Arc;

use uuid::Uuid;

use crate::error::{JobError, Result};
use crate::fleet::{Device, FleetRegistry};
use crate::jobs::model::{Assignment, Job};
use crate::store::FarmStore;

/// Read-only composition of job, assignment, and device state.
pub struct StatusReporter {
    store: Arc<dyn FarmStore>,
    registry: Arc<FleetRegistry>,
}

impl StatusReporter {
    pub fn new(store: Arc<dyn FarmStore>, registry: Arc<FleetRegistry>) -> Self {
        Self { store, registry }
    }

    /// A job together with all of its per-device assignments.
    pub async fn job_status(&self, job_id: Uuid) -> Result<(Job, Vec<Assignment>)> {
        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or(JobError::NotFound { job_id })?;

        let assignments = self.store.assignments_for_job(job_id).await?;
        Ok((job, assignments))
    }

    /// Every currently-live device, using the registry's own predicate.
    pub async fn live_devices(&self) -> Result<Vec<Device>> {
        self.registry.live_snapshot().await
    }
}
