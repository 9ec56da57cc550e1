pub mod config;
pub mod policy;
pub mod registry;
pub mod types;

pub use config::{parse_duration, ConfigError, FleetConfig};
pub use policy::{CapBehavior, Policy, ScalingStrategy};
pub use registry::FleetState;
pub use types::*;
