//! libSQL backend — async `FarmStore` trait implementation.
//!
//! Stores a single connection that is reused for all operations
//! (`libsql::Connection` is `Send + Sync` and safe for concurrent async
//! use). Multi-statement write sequences take the `write_gate` mutex so
//! no other write can interleave into an open transaction on the shared
//! connection; single reads run ungated.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::fleet::model::{Device, DeviceStatus, RegistrationOutcome};
use crate::jobs::model::{Assignment, AssignmentStatus, Job, JobAction, JobStatus};
use crate::queue::{JobMessage, QueuedMessage};
use crate::store::migrations;
use crate::store::traits::{FarmStore, JobRollup};

/// libSQL store backend.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    write_gate: Mutex<()>,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
            write_gate: Mutex::new(()),
        };
        migrations::run_migrations(backend.conn()).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to create in-memory database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
            write_gate: Mutex::new(()),
        };
        migrations::run_migrations(backend.conn()).await?;
        Ok(backend)
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

const DEVICE_COLUMNS: &str =
    "device_id, device_name, account_handle, status, last_seen, registered_at, jobs_completed, jobs_failed";

const JOB_COLUMNS: &str =
    "job_id, target_url, target_id, action, status, created_at, target_device_count, completed_count, failed_count";

const ASSIGNMENT_COLUMNS: &str =
    "job_id, device_id, status, assigned_at, completed_at, error_message";

/// Map a libsql Row to a Device. Column order matches DEVICE_COLUMNS.
fn row_to_device(row: &libsql::Row) -> Result<Device, libsql::Error> {
    let status_str: String = row.get(3)?;
    let last_seen_str: String = row.get(4)?;
    let registered_str: String = row.get(5)?;

    Ok(Device {
        device_id: row.get(0)?,
        device_name: row.get(1)?,
        account_handle: row.get(2)?,
        status: status_str.parse().unwrap_or(DeviceStatus::Offline),
        last_seen: parse_datetime(&last_seen_str),
        registered_at: parse_datetime(&registered_str),
        jobs_completed: row.get::<i64>(6)? as u64,
        jobs_failed: row.get::<i64>(7)? as u64,
    })
}

/// Map a libsql Row to a Job. Column order matches JOB_COLUMNS.
fn row_to_job(row: &libsql::Row) -> Result<Job, libsql::Error> {
    let id_str: String = row.get(0)?;
    let action_str: String = row.get(3)?;
    let status_str: String = row.get(4)?;
    let created_str: String = row.get(5)?;

    Ok(Job {
        job_id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::nil()),
        target_url: row.get(1)?,
        target_id: row.get(2)?,
        action: action_str.parse().unwrap_or(JobAction::Like),
        status: status_str.parse().unwrap_or(JobStatus::Pending),
        created_at: parse_datetime(&created_str),
        target_device_count: row.get::<i64>(6)? as u64,
        completed_count: row.get::<i64>(7)? as u64,
        failed_count: row.get::<i64>(8)? as u64,
    })
}

/// Map a libsql Row to an Assignment. Column order matches ASSIGNMENT_COLUMNS.
fn row_to_assignment(row: &libsql::Row) -> Result<Assignment, libsql::Error> {
    let job_id_str: String = row.get(0)?;
    let status_str: String = row.get(2)?;
    let assigned_str: String = row.get(3)?;
    let completed_str: Option<String> = row.get(4).ok();

    Ok(Assignment {
        job_id: Uuid::parse_str(&job_id_str).unwrap_or_else(|_| Uuid::nil()),
        device_id: row.get(1)?,
        status: status_str.parse().unwrap_or(AssignmentStatus::Assigned),
        assigned_at: parse_datetime(&assigned_str),
        completed_at: parse_optional_datetime(&completed_str),
        error_message: row.get(5).ok(),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl FarmStore for LibSqlBackend {
    // ── Devices ─────────────────────────────────────────────────────

    async fn upsert_device(
        &self,
        device_id: &str,
        device_name: &str,
        account_handle: &str,
    ) -> Result<RegistrationOutcome, DatabaseError> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();

        // Gate the exists-check + write pair so two concurrent
        // registrations of the same id cannot both take the insert path.
        let _gate = self.write_gate.lock().await;

        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM devices WHERE device_id = ?1",
                params![device_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_device: {e}")))?;

        let exists = match rows.next().await {
            Ok(Some(row)) => row.get::<i64>(0).unwrap_or(0) > 0,
            _ => false,
        };

        if exists {
            conn.execute(
                "UPDATE devices SET device_name = ?2, account_handle = ?3,
                    status = 'online', last_seen = ?4
                 WHERE device_id = ?1",
                params![device_id, device_name, account_handle, now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_device update: {e}")))?;

            debug!(device_id = device_id, "Device re-registered");
            Ok(RegistrationOutcome::Updated)
        } else {
            conn.execute(
                "INSERT INTO devices (device_id, device_name, account_handle, status,
                    last_seen, registered_at, jobs_completed, jobs_failed)
                 VALUES (?1, ?2, ?3, 'online', ?4, ?4, 0, 0)",
                params![device_id, device_name, account_handle, now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_device insert: {e}")))?;

            debug!(device_id = device_id, "Device registered");
            Ok(RegistrationOutcome::Registered)
        }
    }

    async fn get_device(&self, device_id: &str) -> Result<Option<Device>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE device_id = ?1"),
                params![device_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_device: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let device = row_to_device(&row)
                    .map_err(|e| DatabaseError::Query(format!("get_device row parse: {e}")))?;
                Ok(Some(device))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_device: {e}"))),
        }
    }

    async fn live_devices(&self, cutoff: DateTime<Utc>) -> Result<Vec<Device>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {DEVICE_COLUMNS} FROM devices
                     WHERE last_seen > ?1 AND status IN ('online', 'working')
                     ORDER BY device_id"
                ),
                params![cutoff.to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("live_devices: {e}")))?;

        let mut devices = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_device(&row) {
                Ok(device) => devices.push(device),
                Err(e) => {
                    tracing::warn!("Skipping device row: {e}");
                }
            }
        }
        Ok(devices)
    }

    async fn bump_device_stats(
        &self,
        device_id: &str,
        success: bool,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let conn = self.conn();
        let column = if success { "jobs_completed" } else { "jobs_failed" };

        let _gate = self.write_gate.lock().await;
        let affected = conn
            .execute(
                &format!(
                    "UPDATE devices SET {column} = {column} + 1, last_seen = ?2
                     WHERE device_id = ?1"
                ),
                params![device_id, now.to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("bump_device_stats: {e}")))?;

        Ok(affected > 0)
    }

    // ── Jobs ────────────────────────────────────────────────────────

    async fn create_job(&self, job: &Job) -> Result<(), DatabaseError> {
        let conn = self.conn();

        let _gate = self.write_gate.lock().await;
        conn.execute(
            &format!(
                "INSERT INTO jobs ({JOB_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
            ),
            params![
                job.job_id.to_string(),
                job.target_url.clone(),
                job.target_id.clone(),
                job.action.to_string(),
                job.status.to_string(),
                job.created_at.to_rfc3339(),
                job.target_device_count as i64,
                job.completed_count as i64,
                job.failed_count as i64,
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("create_job: {e}")))?;

        debug!(job_id = %job.job_id, "Job row created");
        Ok(())
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = ?1"),
                params![job_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_job: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let job = row_to_job(&row)
                    .map_err(|e| DatabaseError::Query(format!("get_job row parse: {e}")))?;
                Ok(Some(job))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_job: {e}"))),
        }
    }

    async fn set_job_status(&self, job_id: Uuid, status: JobStatus) -> Result<(), DatabaseError> {
        let conn = self.conn();

        let _gate = self.write_gate.lock().await;
        conn.execute(
            "UPDATE jobs SET status = ?2 WHERE job_id = ?1",
            params![job_id.to_string(), status.to_string()],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("set_job_status: {e}")))?;

        debug!(job_id = %job_id, status = %status, "Job status updated");
        Ok(())
    }

    async fn bump_job_counters(
        &self,
        job_id: Uuid,
        success: bool,
    ) -> Result<Option<JobRollup>, DatabaseError> {
        let conn = self.conn();
        let id = job_id.to_string();
        let column = if success { "completed_count" } else { "failed_count" };

        // Increment, completion check, and read-back are one unit with
        // respect to concurrent rollups for the same job.
        let _gate = self.write_gate.lock().await;

        let affected = conn
            .execute(
                &format!("UPDATE jobs SET {column} = {column} + 1 WHERE job_id = ?1"),
                params![id.clone()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("bump_job_counters: {e}")))?;

        if affected == 0 {
            return Ok(None);
        }

        // One-way transition: never fires for completed or dispatch-failed
        // jobs, and at most one rollup observes affected == 1.
        let completed_now = conn
            .execute(
                "UPDATE jobs SET status = 'completed'
                 WHERE job_id = ?1
                   AND status IN ('distributing', 'distributed')
                   AND completed_count + failed_count >= target_device_count",
                params![id.clone()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("bump_job_counters completion: {e}")))?
            > 0;

        let mut rows = conn
            .query(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("bump_job_counters read: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let job = row_to_job(&row).map_err(|e| {
                    DatabaseError::Query(format!("bump_job_counters row parse: {e}"))
                })?;
                Ok(Some(JobRollup { job, completed_now }))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("bump_job_counters read: {e}"))),
        }
    }

    // ── Assignments ─────────────────────────────────────────────────

    async fn assign_job(
        &self,
        assignment: &Assignment,
        message: &JobMessage,
    ) -> Result<(), DatabaseError> {
        let payload = serde_json::to_string(message)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let message_id = Uuid::new_v4();
        let now = Utc::now().to_rfc3339();

        let _gate = self.write_gate.lock().await;
        let tx = self
            .conn
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("assign_job begin: {e}")))?;

        let result: Result<(), libsql::Error> = async {
            tx.execute(
                &format!(
                    "INSERT INTO assignments ({ASSIGNMENT_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, NULL, NULL)"
                ),
                params![
                    assignment.job_id.to_string(),
                    assignment.device_id.clone(),
                    assignment.status.to_string(),
                    assignment.assigned_at.to_rfc3339(),
                ],
            )
            .await?;

            tx.execute(
                "INSERT INTO queue_messages
                    (message_id, device_id, job_id, payload, enqueued_at, available_at, attempts)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5, 0)",
                params![
                    message_id.to_string(),
                    assignment.device_id.clone(),
                    assignment.job_id.to_string(),
                    payload.clone(),
                    now.clone(),
                ],
            )
            .await?;

            Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                tx.commit()
                    .await
                    .map_err(|e| DatabaseError::Query(format!("assign_job commit: {e}")))?;
                debug!(
                    job_id = %assignment.job_id,
                    device_id = %assignment.device_id,
                    message_id = %message_id,
                    "Assignment created and message enqueued"
                );
                Ok(())
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(DatabaseError::Query(format!("assign_job: {e}")))
            }
        }
    }

    async fn get_assignment(
        &self,
        job_id: Uuid,
        device_id: &str,
    ) -> Result<Option<Assignment>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {ASSIGNMENT_COLUMNS} FROM assignments
                     WHERE job_id = ?1 AND device_id = ?2"
                ),
                params![job_id.to_string(), device_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_assignment: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let assignment = row_to_assignment(&row)
                    .map_err(|e| DatabaseError::Query(format!("get_assignment row parse: {e}")))?;
                Ok(Some(assignment))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_assignment: {e}"))),
        }
    }

    async fn assignments_for_job(&self, job_id: Uuid) -> Result<Vec<Assignment>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {ASSIGNMENT_COLUMNS} FROM assignments
                     WHERE job_id = ?1 ORDER BY device_id"
                ),
                params![job_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("assignments_for_job: {e}")))?;

        let mut assignments = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_assignment(&row) {
                Ok(assignment) => assignments.push(assignment),
                Err(e) => {
                    tracing::warn!("Skipping assignment row: {e}");
                }
            }
        }
        Ok(assignments)
    }

    async fn finish_assignment(
        &self,
        job_id: Uuid,
        device_id: &str,
        success: bool,
        error_message: Option<&str>,
        completed_at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let conn = self.conn();
        let status = if success {
            AssignmentStatus::Completed
        } else {
            AssignmentStatus::Failed
        };

        // Only a still-assigned row transitions; terminal rows are sticky.
        let _gate = self.write_gate.lock().await;
        let affected = conn
            .execute(
                "UPDATE assignments
                 SET status = ?3, completed_at = ?4, error_message = ?5
                 WHERE job_id = ?1 AND device_id = ?2 AND status = 'assigned'",
                params![
                    job_id.to_string(),
                    device_id,
                    status.to_string(),
                    completed_at.to_rfc3339(),
                    opt_text(error_message),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("finish_assignment: {e}")))?;

        Ok(affected > 0)
    }

    // ── Queue ───────────────────────────────────────────────────────

    async fn lease_next_message(
        &self,
        device_id: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Option<QueuedMessage>, DatabaseError> {
        let conn = self.conn();
        let now_str = now.to_rfc3339();
        let hidden_until = (now
            + chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::seconds(60)))
        .to_rfc3339();

        // Select-then-update under the gate so two pollers for the same
        // device cannot lease one message twice within a window.
        let _gate = self.write_gate.lock().await;

        let mut rows = conn
            .query(
                "SELECT message_id, payload, enqueued_at, attempts FROM queue_messages
                 WHERE device_id = ?1 AND available_at <= ?2
                 ORDER BY enqueued_at, message_id LIMIT 1",
                params![device_id, now_str.clone()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("lease_next_message: {e}")))?;

        let row = match rows.next().await {
            Ok(Some(row)) => row,
            Ok(None) => return Ok(None),
            Err(e) => return Err(DatabaseError::Query(format!("lease_next_message: {e}"))),
        };

        let id_str: String = row
            .get(0)
            .map_err(|e| DatabaseError::Query(format!("lease_next_message row: {e}")))?;
        let payload: String = row
            .get(1)
            .map_err(|e| DatabaseError::Query(format!("lease_next_message row: {e}")))?;
        let enqueued_str: String = row
            .get(2)
            .map_err(|e| DatabaseError::Query(format!("lease_next_message row: {e}")))?;
        let attempts: i64 = row
            .get(3)
            .map_err(|e| DatabaseError::Query(format!("lease_next_message row: {e}")))?;

        conn.execute(
            "UPDATE queue_messages SET available_at = ?2, attempts = attempts + 1
             WHERE message_id = ?1",
            params![id_str.clone(), hidden_until],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("lease_next_message lease: {e}")))?;

        let message: JobMessage = serde_json::from_str(&payload)
            .map_err(|e| DatabaseError::Serialization(format!("queue payload: {e}")))?;

        Ok(Some(QueuedMessage {
            message_id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::nil()),
            attempts: attempts as u32 + 1,
            enqueued_at: parse_datetime(&enqueued_str),
            message,
        }))
    }

    async fn ack_message(&self, device_id: &str, message_id: Uuid) -> Result<bool, DatabaseError> {
        let conn = self.conn();

        let _gate = self.write_gate.lock().await;
        let affected = conn
            .execute(
                "DELETE FROM queue_messages WHERE message_id = ?1 AND device_id = ?2",
                params![message_id.to_string(), device_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("ack_message: {e}")))?;

        Ok(affected > 0)
    }
}

// ── Tests ───────────────────────────────────────────────────────────
