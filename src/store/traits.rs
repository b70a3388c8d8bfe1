//! Unified `FarmStore` trait — single async interface for all persistence.
//!
//! Covers devices, jobs, assignments, and the per-device message queue.
//! Every read goes to the store; the coordinator keeps no in-process cache
//! of registry or job state, so liveness snapshots and completion checks
//! stay correct under concurrent mutation.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::fleet::model::{Device, RegistrationOutcome};
use crate::jobs::model::{Assignment, Job, JobStatus};
use crate::queue::{JobMessage, QueuedMessage};

/// A job row read back after a counter rollup.
#[derive(Debug, Clone)]
pub struct JobRollup {
    pub job: Job,
    /// True when this rollup fired the one-way transition to `completed`.
    pub completed_now: bool,
}

/// Backend-agnostic persistence trait for the coordinator.
#[async_trait]
pub trait FarmStore: Send + Sync {
    // ── Devices ─────────────────────────────────────────────────────

    /// Insert or update a device row. Re-registration refreshes
    /// name/account, sets status to online, and touches `last_seen` —
    /// never a duplicate row.
    async fn upsert_device(
        &self,
        device_id: &str,
        device_name: &str,
        account_handle: &str,
    ) -> Result<RegistrationOutcome, DatabaseError>;

    /// Get a device by id.
    async fn get_device(&self, device_id: &str) -> Result<Option<Device>, DatabaseError>;

    /// All devices with status online/working seen strictly after
    /// `cutoff`, as a single consistent read, ordered by device id.
    async fn live_devices(&self, cutoff: DateTime<Utc>) -> Result<Vec<Device>, DatabaseError>;

    /// Increment the device's completed/failed counter and refresh
    /// `last_seen`. Returns false if the device does not exist.
    async fn bump_device_stats(
        &self,
        device_id: &str,
        success: bool,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>;

    // ── Jobs ────────────────────────────────────────────────────────

    /// Insert a new job row.
    async fn create_job(&self, job: &Job) -> Result<(), DatabaseError>;

    /// Get a job by id.
    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>, DatabaseError>;

    /// Overwrite a job's status.
    async fn set_job_status(&self, job_id: Uuid, status: JobStatus) -> Result<(), DatabaseError>;

    /// Atomically increment the job's completed or failed counter, fire
    /// the one-way transition to `completed` once
    /// `completed + failed >= target_device_count`, and read the row
    /// back. The increment and the completion check are one unit with
    /// respect to concurrent rollups for the same job.
    ///
    /// Returns `None` if the job does not exist.
    async fn bump_job_counters(
        &self,
        job_id: Uuid,
        success: bool,
    ) -> Result<Option<JobRollup>, DatabaseError>;

    // ── Assignments ─────────────────────────────────────────────────

    /// Create an assignment AND enqueue its message to the device's
    /// channel in one transaction. Either both rows exist afterwards or
    /// neither does.
    async fn assign_job(
        &self,
        assignment: &Assignment,
        message: &JobMessage,
    ) -> Result<(), DatabaseError>;

    /// Get the assignment for one (job, device) pair.
    async fn get_assignment(
        &self,
        job_id: Uuid,
        device_id: &str,
    ) -> Result<Option<Assignment>, DatabaseError>;

    /// All assignments for a job, ordered by device id.
    async fn assignments_for_job(&self, job_id: Uuid) -> Result<Vec<Assignment>, DatabaseError>;

    /// Resolve an assignment to completed/failed. The update only applies
    /// while the row is still `assigned`; returns false when no such
    /// transition happened (row missing or already terminal), leaving
    /// terminal rows untouched.
    async fn finish_assignment(
        &self,
        job_id: Uuid,
        device_id: &str,
        success: bool,
        error_message: Option<&str>,
        completed_at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>;

    // ── Queue ───────────────────────────────────────────────────────

    /// Lease the oldest message on the device's channel whose visibility
    /// window has opened, hiding it for `lease`. At most one poller can
    /// win any given message per window.
    async fn lease_next_message(
        &self,
        device_id: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Option<QueuedMessage>, DatabaseError>;

    /// Delete a delivered message. Returns false if no row matched.
    async fn ack_message(&self, device_id: &str, message_id: Uuid) -> Result<bool, DatabaseError>;
}
