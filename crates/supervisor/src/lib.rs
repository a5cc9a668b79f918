//! # Lodestar Supervisor
//!
//! Sequences the lifecycle of the node's components: registration order is
//! start order, shutdown runs in reverse. Each component's configuration is
//! resolved from the first available source — a file in the config
//! directory, the config service entry named after the component, or the
//! component's built-in default. Optional ("normal") components only run
//! when their config entry carries `enable == "true"` metadata.

pub mod supervisor;

pub use supervisor::{Supervisor, SupervisorOptions};
