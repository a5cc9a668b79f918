//! KV gateway wire types
//!
//! Mirrors the etcd v3 data model closely enough that the adapter is a
//! field-by-field translation, while staying backend-neutral for the
//! in-process engine.

use lodestar_core::{Error, Result};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Store-assigned lease identifier. Zero means "no lease".
pub type LeaseId = i64;

/// A key-value record together with its revision bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvPair {
    pub key: String,
    pub value: Vec<u8>,
    /// Revision at which this key was last created.
    pub create_revision: i64,
    /// Revision of the write that produced this value.
    pub mod_revision: i64,
    /// Number of writes to this key since creation.
    pub version: i64,
    /// Lease the key is bound to, or 0.
    pub lease: LeaseId,
}

impl KvPair {
    /// Value as UTF-8, failing with `Serialization` on invalid bytes.
    pub fn value_str(&self) -> Result<&str> {
        std::str::from_utf8(&self.value)
            .map_err(|e| Error::Serialization(format!("non-utf8 value at {}: {e}", self.key)))
    }

    /// Decode the value as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.value)
            .map_err(|e| Error::Serialization(format!("decoding {}: {e}", self.key)))
    }
}

/// Kind of change a watch event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Put,
    Delete,
}

/// A single change observed by a prefix watch.
///
/// For `Delete` events the pair carries the key and the revision of the
/// deletion; the value is empty.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub kind: EventKind,
    pub pair: KvPair,
}

/// Receiving half of a prefix watch.
///
/// Dropping the stream cancels the underlying watcher.
pub struct WatchStream {
    rx: mpsc::Receiver<WatchEvent>,
    cancel: CancellationToken,
}

impl WatchStream {
    pub(crate) fn new(rx: mpsc::Receiver<WatchEvent>, cancel: CancellationToken) -> Self {
        Self { rx, cancel }
    }

    /// Next event, or `None` once the watch has terminated.
    pub async fn recv(&mut self) -> Option<WatchEvent> {
        self.rx.recv().await
    }

    /// Drain an already-queued event without waiting. Used by consumers
    /// that collate bursts of changes into one batch.
    pub fn try_recv(&mut self) -> Option<WatchEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for WatchStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Comparison operator for transaction guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Equal,
    NotEqual,
    Greater,
    Less,
}

/// What a transaction guard compares against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompareTarget {
    /// Create revision of the key; comparing against 0 tests absence.
    CreateRevision(i64),
    ModRevision(i64),
    Version(i64),
    Value(Vec<u8>),
}

/// A single transaction guard on one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compare {
    pub key: String,
    pub op: CompareOp,
    pub target: CompareTarget,
}

impl Compare {
    pub fn create_revision(key: impl Into<String>, op: CompareOp, revision: i64) -> Self {
        Self {
            key: key.into(),
            op,
            target: CompareTarget::CreateRevision(revision),
        }
    }

    pub fn mod_revision(key: impl Into<String>, op: CompareOp, revision: i64) -> Self {
        Self {
            key: key.into(),
            op,
            target: CompareTarget::ModRevision(revision),
        }
    }

    pub fn version(key: impl Into<String>, op: CompareOp, version: i64) -> Self {
        Self {
            key: key.into(),
            op,
            target: CompareTarget::Version(version),
        }
    }

    pub fn value(key: impl Into<String>, op: CompareOp, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            op,
            target: CompareTarget::Value(value.into()),
        }
    }

    /// Guard that succeeds only when `key` does not exist.
    pub fn key_absent(key: impl Into<String>) -> Self {
        Self::create_revision(key, CompareOp::Equal, 0)
    }
}

/// A mutation or read inside a transaction arm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnOp {
    Put {
        key: String,
        value: Vec<u8>,
        lease: Option<LeaseId>,
    },
    Delete {
        key: String,
    },
}

impl TxnOp {
    pub fn put(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        TxnOp::Put {
            key: key.into(),
            value: value.into(),
            lease: None,
        }
    }

    pub fn put_with_lease(
        key: impl Into<String>,
        value: impl Into<Vec<u8>>,
        lease: LeaseId,
    ) -> Self {
        TxnOp::Put {
            key: key.into(),
            value: value.into(),
            lease: Some(lease),
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        TxnOp::Delete { key: key.into() }
    }
}

/// Guarded multi-key transaction: if every compare passes, the `then` arm is
/// applied atomically, otherwise the `or_else` arm.
#[derive(Debug, Clone, Default)]
pub struct Txn {
    pub compares: Vec<Compare>,
    pub then_ops: Vec<TxnOp>,
    pub else_ops: Vec<TxnOp>,
}

impl Txn {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn when(mut self, compares: impl Into<Vec<Compare>>) -> Self {
        self.compares = compares.into();
        self
    }

    pub fn and_then(mut self, ops: impl Into<Vec<TxnOp>>) -> Self {
        self.then_ops = ops.into();
        self
    }

    pub fn or_else(mut self, ops: impl Into<Vec<TxnOp>>) -> Self {
        self.else_ops = ops.into();
        self
    }
}

/// Outcome of a transaction.
#[derive(Debug, Clone, Copy)]
pub struct TxnResponse {
    /// True when the compares passed and the `then` arm was applied.
    pub succeeded: bool,
    /// Store revision after the transaction.
    pub revision: i64,
}

impl TxnResponse {
    /// Convert a failed guard into a `TransactionConflict` error.
    pub fn require(self, what: &str) -> Result<Self> {
        if self.succeeded {
            Ok(self)
        } else {
            Err(Error::TransactionConflict(what.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kvpair_json_decoding() {
        let pair = KvPair {
            key: "/k".into(),
            value: br#"{"a":1}"#.to_vec(),
            create_revision: 1,
            mod_revision: 1,
            version: 1,
            lease: 0,
        };
        let v: serde_json::Value = pair.json().unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn test_txn_builder() {
        let txn = Txn::new()
            .when([Compare::key_absent("/a")])
            .and_then([TxnOp::put("/a", "1")])
            .or_else([TxnOp::delete("/a")]);
        assert_eq!(txn.compares.len(), 1);
        assert_eq!(txn.then_ops.len(), 1);
        assert_eq!(txn.else_ops.len(), 1);
    }

    #[test]
    fn test_require_on_failed_txn() {
        let resp = TxnResponse {
            succeeded: false,
            revision: 7,
        };
        assert!(matches!(
            resp.require("create user"),
            Err(Error::TransactionConflict(_))
        ));
    }
}
