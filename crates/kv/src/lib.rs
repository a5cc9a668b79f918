//! # Lodestar KV
//!
//! Thin typed gateway over a strongly-consistent, revisioned KV store.
//!
//! The [`KvStore`] trait captures the store contract the rest of the control
//! plane is written against: point and prefix reads, point-in-time reads at a
//! revision, puts optionally bound to a lease, compare-and-swap transactions,
//! prefix watches, and lease bookkeeping. Two backends implement it:
//!
//! - [`EtcdStore`]: adapter over `etcd-client` for clustered deployments
//! - [`MemoryStore`]: in-process engine with the same revision, lease, and
//!   watch semantics, used by tests and single-node deployments
//!
//! The [`lock::DistributedLock`] built on top provides named cluster-wide
//! mutual exclusion with TTL auto-release.

pub mod etcd;
pub mod lock;
pub mod memory;
pub mod store;
pub mod types;

pub use etcd::{EtcdConfig, EtcdStore};
pub use lock::DistributedLock;
pub use memory::MemoryStore;
pub use store::{KvStore, KvStoreExt};
pub use types::{
    Compare, CompareOp, CompareTarget, EventKind, KvPair, LeaseId, Txn, TxnOp, TxnResponse,
    WatchEvent, WatchStream,
};
