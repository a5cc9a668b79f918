//! The store contract every backend implements.

use crate::types::{KvPair, LeaseId, Txn, TxnResponse, WatchStream};
use async_trait::async_trait;
use lodestar_core::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Gateway over a strongly-consistent, revisioned KV store.
///
/// Keys are opaque strings; prefix scans are lexicographic. Implementations
/// fail with `StoreUnavailable` on I/O faults and never invent `NotFound`:
/// absent keys read as `Ok(None)` so callers decide whether absence is an
/// error in their own contract.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a single key.
    async fn get(&self, key: &str) -> Result<Option<KvPair>>;

    /// Read every key under a prefix, in lexicographic order.
    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KvPair>>;

    /// Point-in-time read of `key` as of `revision`.
    ///
    /// Returns `None` when the key had no value at that revision or the
    /// revision has been compacted away.
    async fn get_at_revision(&self, key: &str, revision: i64) -> Result<Option<KvPair>>;

    /// Write a key, optionally binding it to a lease.
    async fn put(&self, key: &str, value: Vec<u8>, lease: Option<LeaseId>) -> Result<()>;

    /// Delete a key; returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Delete every key under a prefix; returns the number deleted.
    async fn delete_prefix(&self, prefix: &str) -> Result<usize>;

    /// Execute a guarded transaction.
    async fn txn(&self, txn: Txn) -> Result<TxnResponse>;

    /// Watch all keys under a prefix. Events flow until the stream is
    /// dropped or the backend terminates the watch.
    async fn watch_prefix(&self, prefix: &str) -> Result<WatchStream>;

    /// Grant a lease with the given TTL in seconds.
    async fn lease_grant(&self, ttl_secs: i64) -> Result<LeaseId>;

    /// Extend a lease by its full TTL once. Fails with `LeaseError` when the
    /// lease is unknown or already expired.
    async fn lease_keep_alive_once(&self, lease: LeaseId) -> Result<()>;

    /// Revoke a lease, deleting every key bound to it.
    async fn lease_revoke(&self, lease: LeaseId) -> Result<()>;
}

/// Typed JSON helpers layered over any [`KvStore`].
#[async_trait]
pub trait KvStoreExt: KvStore {
    /// Read and JSON-decode a single key.
    async fn get_json<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        match self.get(key).await? {
            Some(pair) => Ok(Some(pair.json()?)),
            None => Ok(None),
        }
    }

    /// Read and JSON-decode every value under a prefix.
    async fn list_json<T>(&self, prefix: &str) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Send,
    {
        self.get_prefix(prefix)
            .await?
            .iter()
            .map(|pair| pair.json())
            .collect()
    }

    /// JSON-encode and write a value.
    async fn put_json<T>(&self, key: &str, value: &T) -> Result<()>
    where
        T: Serialize + Sync,
    {
        let bytes = serde_json::to_vec(value)?;
        self.put(key, bytes, None).await
    }

    /// JSON-encode and write a value bound to a lease.
    async fn put_json_with_lease<T>(&self, key: &str, value: &T, lease: LeaseId) -> Result<()>
    where
        T: Serialize + Sync,
    {
        let bytes = serde_json::to_vec(value)?;
        self.put(key, bytes, Some(lease)).await
    }
}

impl<S: KvStore + ?Sized> KvStoreExt for S {}
