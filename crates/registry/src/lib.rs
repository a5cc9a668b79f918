//! # Lodestar Registry
//!
//! Service registration and discovery over the KV store. An instance's
//! lifetime equals the lifetime of the KV lease its key is bound to:
//! renewing the lease keeps it discoverable, an explicit unregister revokes
//! the lease, and a crashed service simply stops renewing and ages out.
//!
//! - `registry`: register / renew / unregister / discover / watch
//! - `registrar`: client-side self-renewal task (renew at an interval below
//!   TTL/3, re-register when the lease is lost)

pub mod registrar;
pub mod registry;
pub mod types;

pub use registrar::Registrar;
pub use registry::{Registry, RegistryWatch};
pub use types::{InstanceStatus, RegistryOptions, ServiceInstance};
