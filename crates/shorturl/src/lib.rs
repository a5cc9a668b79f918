//! # Lodestar ShortURL
//!
//! The short-link resolution hot path and its admin surface:
//!
//! - `types`: domains, links, target payloads, success events
//! - `store`: KV persistence with host/code indexes and CAS counters
//! - `resolver`: the read-through cached lookup path (domain by host, link
//!   by domain+code), validation guards (enabled / expiry / visit cap /
//!   password), visit accounting, and idempotent success reporting
//!
//! Both caches are single-flight: concurrent misses on one key fire at most
//! one backing-store read.

pub mod resolver;
pub mod store;
pub mod types;

pub use resolver::{ShortUrlOptions, ShortUrlService};
pub use store::ShortUrlStore;
pub use types::{LinkTarget, ShortDomain, ShortLink, SuccessEvent, TargetType};
