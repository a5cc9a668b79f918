//! # Lodestar Config
//!
//! Hierarchical configuration service over the KV store:
//!
//! - typed values (`string`, `int`, `float`, `bool`, `object`, `array`,
//!   `reference`, `encrypted`) with per-entry metadata
//! - environment overlays stored as `<base>.<env>` sibling keys
//! - revision history backed by the KV store's per-key revisions
//! - composite resolution that dereferences cross-entry references and
//!   decrypts `ENC:` fields, with cycle detection
//! - password-protected bulk export/import
//! - a live prefix watch with per-subscriber timeout-drop delivery
//!
//! The AES salt used for encrypted fields is an explicit construction
//! parameter so deployments (and tests) control key material.

pub mod service;
pub mod transfer;
pub mod types;
pub mod watch;

pub use service::{ConfigOptions, ConfigService};
pub use types::{ConfigEntry, ConfigEvent, ConfigRevision, TypedValue, ValueKind};
pub use watch::Subscription;
