//! Job and assignment data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Action a device performs against the target resource.
///
/// An opaque tag as far as the coordinator is concerned — new actions are
/// added here and in the workers' capability set, never as branching logic
/// in the dispatch path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobAction {
    Like,
    Repost,
    Reply,
}

impl std::fmt::Display for JobAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Like => write!(f, "like"),
            Self::Repost => write!(f, "repost"),
            Self::Reply => write!(f, "reply"),
        }
    }
}

impl std::str::FromStr for JobAction {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "like" => Ok(Self::Like),
            "repost" => Ok(Self::Repost),
            "reply" => Ok(Self::Reply),
            _ => Err(format!("Unknown action: {s}")),
        }
    }
}

/// Lifecycle of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created but fan-out has not started.
    Pending,
    /// Fan-out in progress.
    Distributing,
    /// Every targeted device has its message enqueued.
    Distributed,
    /// All assignments resolved.
    Completed,
    /// One or more per-device enqueues failed during fan-out.
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Distributing => write!(f, "distributing"),
            Self::Distributed => write!(f, "distributed"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "distributing" => Ok(Self::Distributing),
            "distributed" => Ok(Self::Distributed),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown job status: {s}")),
        }
    }
}

/// One unit of work: a single action against a single target resource,
/// fanned out to every device live at dispatch time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: Uuid,
    /// Locator as submitted by the caller.
    pub target_url: String,
    /// Canonical id extracted from the locator.
    pub target_id: String,
    pub action: JobAction,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    /// Size of the live-device snapshot at dispatch. Fixed for the job's
    /// lifetime; the completion denominator.
    pub target_device_count: u64,
    pub completed_count: u64,
    pub failed_count: u64,
}

impl Job {
    pub fn new(target_url: &str, target_id: &str, action: JobAction, device_count: usize) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            target_url: target_url.to_string(),
            target_id: target_id.to_string(),
            action,
            status: JobStatus::Pending,
            created_at: Utc::now(),
            target_device_count: device_count as u64,
            completed_count: 0,
            failed_count: 0,
        }
    }

    /// Whether every assignment has resolved.
    pub fn is_settled(&self) -> bool {
        self.completed_count + self.failed_count >= self.target_device_count
    }
}

/// Lifecycle of an assignment. Terminal states are sticky: a second result
/// report for the same (job, device) pair is rejected, never re-applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Assigned,
    Completed,
    Failed,
}

impl std::fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Assigned => write!(f, "assigned"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for AssignmentStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "assigned" => Ok(Self::Assigned),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown assignment status: {s}")),
        }
    }
}

/// The per-device slice of a job. Exactly one per (job_id, device_id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub job_id: Uuid,
    pub device_id: String,
    pub status: AssignmentStatus,
    pub assigned_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl Assignment {
    pub fn new(job_id: Uuid, device_id: &str) -> Self {
        Self {
            job_id,
            device_id: device_id.to_string(),
            status: AssignmentStatus::Assigned,
            assigned_at: Utc::now(),
            completed_at: None,
            error_message: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            AssignmentStatus::Completed | AssignmentStatus::Failed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_job_starts_pending_with_zero_counters() {
        let job = Job::new("https://example.com/u/status/12345", "12345", JobAction::Like, 3);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.target_device_count, 3);
        assert_eq!(job.completed_count + job.failed_count, 0);
        assert!(!job.is_settled());
    }

    #[test]
    fn job_with_zero_outstanding_is_settled() {
        let mut job = Job::new("https://example.com/u/status/1", "1", JobAction::Repost, 2);
        job.completed_count = 1;
        job.failed_count = 1;
        assert!(job.is_settled());
    }

    #[test]
    fn action_round_trips_through_str() {
        for action in [JobAction::Like, JobAction::Repost, JobAction::Reply] {
            assert_eq!(action.to_string().parse::<JobAction>().unwrap(), action);
        }
        assert!("follow".parse::<JobAction>().is_err());
    }

    #[test]
    fn new_assignment_is_not_terminal() {
        let a = Assignment::new(Uuid::new_v4(), "d1");
        assert_eq!(a.status, AssignmentStatus::Assigned);
        assert!(!a.is_terminal());
        assert!(a.completed_at.is_none());
    }
}
