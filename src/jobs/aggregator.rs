//! Result aggregator — one accepted result per assignment, rolled up into
//! job counters and device statistics.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{JobError, Result};
use crate::fleet::FleetRegistry;
use crate::jobs::model::Job;
use crate::store::FarmStore;

/// Records per-device outcomes and detects job completion.
pub struct ResultAggregator {
    store: Arc<dyn FarmStore>,
    registry: Arc<FleetRegistry>,
}

impl ResultAggregator {
    pub fn new(store: Arc<dyn FarmStore>, registry: Arc<FleetRegistry>) -> Self {
        Self { store, registry }
    }

    /// Record a worker's result for one assignment.
    ///
    /// The first report for a (job, device) pair wins; anything after that
    /// fails `DuplicateResult` without touching any counter, which is what
    /// makes at-least-once message delivery safe. The counter rollup and
    /// the completion check are one atomic unit per job, so concurrent
    /// reports from different devices cannot lose an increment or fire
    /// the completed transition twice.
    pub async fn record_result(
        &self,
        job_id: Uuid,
        device_id: &str,
        success: bool,
        error_message: Option<&str>,
    ) -> Result<Job> {
        let transitioned = self
            .store
            .finish_assignment(job_id, device_id, success, error_message, Utc::now())
            .await?;

        if !transitioned {
            // Distinguish a missing pair from an already-terminal one.
            return match self.store.get_assignment(job_id, device_id).await? {
                Some(_) => {
                    warn!(
                        job_id = %job_id,
                        device_id = device_id,
                        "Duplicate result report rejected"
                    );
                    Err(JobError::DuplicateResult {
                        job_id,
                        device_id: device_id.to_string(),
                    }
                    .into())
                }
                None => Err(JobError::AssignmentNotFound {
                    job_id,
                    device_id: device_id.to_string(),
                }
                .into()),
            };
        }

        // The report doubles as a device heartbeat.
        self.registry.record_outcome(device_id, success).await?;

        let rollup = self
            .store
            .bump_job_counters(job_id, success)
            .await?
            .ok_or(JobError::NotFound { job_id })?;

        info!(
            job_id = %job_id,
            device_id = device_id,
            success = success,
            completed = rollup.job.completed_count,
            failed = rollup.job.failed_count,
            target = rollup.job.target_device_count,
            "Result recorded"
        );

        if rollup.completed_now {
            info!(job_id = %job_id, "All assignments resolved, job completed");
        }

        Ok(rollup.job)
    }
}
