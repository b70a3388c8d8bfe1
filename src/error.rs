//! Error types for the device farm coordinator.

use uuid::Uuid;

/// Top-level error type for the coordinator.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Fleet error: {0}")]
    Fleet(#[from] FleetError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Fleet registry errors.
#[derive(Debug, thiserror::Error)]
pub enum FleetError {
    #[error("Device {device_id} is not registered")]
    DeviceNotFound { device_id: String },
}

/// Job dispatch and result aggregation errors.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("No target id could be extracted from locator: {locator}")]
    InvalidTarget { locator: String },

    #[error("No live devices available to dispatch to")]
    NoWorkersAvailable,

    #[error("Job {job_id} failed to reach devices: {failed_devices:?}")]
    DispatchFailed {
        job_id: Uuid,
        failed_devices: Vec<String>,
    },

    #[error("Job {job_id} not found")]
    NotFound { job_id: Uuid },

    #[error("No assignment for job {job_id} on device {device_id}")]
    AssignmentNotFound { job_id: Uuid, device_id: String },

    #[error("Result for job {job_id} on device {device_id} was already recorded")]
    DuplicateResult { job_id: Uuid, device_id: String },
}

/// Result type alias for the coordinator.
pub type Result<T> = std::result::Result<T, Error>;
