//! Persistence layer — SQLite-backed storage for devices, jobs,
//! assignments, and the per-device message queue.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{FarmStore, JobRollup};
