//! Worker fleet — device model and registry.

pub mod model;
pub mod registry;

pub use model::{Device, DeviceStatus, RegistrationOutcome};
pub use registry::FleetRegistry;
