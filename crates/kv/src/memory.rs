//! In-process revisioned KV engine.
//!
//! Implements the full [`KvStore`](crate::KvStore) contract — global
//! revision counter, per-key version history, leases with TTL expiry, and
//! prefix watches — inside one process. Backs the test suite and
//! single-node deployments where running etcd would be overkill. State is
//! not persisted.

use crate::store::KvStore;
use crate::types::{
    Compare, CompareOp, CompareTarget, EventKind, KvPair, LeaseId, Txn, TxnOp, TxnResponse,
    WatchEvent, WatchStream,
};
use async_trait::async_trait;
use lodestar_core::{Error, Result};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

const WATCH_CHANNEL_CAPACITY: usize = 256;
const LEASE_REAPER_INTERVAL: Duration = Duration::from_millis(100);

/// One write (or deletion) of a key.
#[derive(Debug, Clone)]
struct VersionEntry {
    /// `None` marks a tombstone.
    value: Option<Vec<u8>>,
    create_revision: i64,
    mod_revision: i64,
    version: i64,
    lease: LeaseId,
}

/// Append-only per-key history.
#[derive(Debug, Default)]
struct Record {
    versions: Vec<VersionEntry>,
}

impl Record {
    fn live(&self) -> Option<&VersionEntry> {
        self.versions.last().filter(|v| v.value.is_some())
    }

    /// State of the key as of `revision`: the newest entry at or below it,
    /// unless that entry is a tombstone.
    fn at_revision(&self, revision: i64) -> Option<&VersionEntry> {
        self.versions
            .iter()
            .rev()
            .find(|v| v.mod_revision <= revision)
            .filter(|v| v.value.is_some())
    }
}

#[derive(Debug)]
struct LeaseRecord {
    ttl: Duration,
    expires_at: Instant,
    keys: HashSet<String>,
}

struct Watcher {
    prefix: String,
    tx: mpsc::Sender<WatchEvent>,
}

struct Inner {
    revision: i64,
    records: BTreeMap<String, Record>,
    leases: HashMap<LeaseId, LeaseRecord>,
    next_lease: LeaseId,
    watchers: Vec<Watcher>,
}

impl Inner {
    fn new() -> Self {
        Self {
            revision: 0,
            records: BTreeMap::new(),
            leases: HashMap::new(),
            next_lease: 1,
            watchers: Vec::new(),
        }
    }

    fn pair_for(key: &str, entry: &VersionEntry) -> KvPair {
        KvPair {
            key: key.to_string(),
            value: entry.value.clone().unwrap_or_default(),
            create_revision: entry.create_revision,
            mod_revision: entry.mod_revision,
            version: entry.version,
            lease: entry.lease,
        }
    }

    fn apply_put(
        &mut self,
        key: &str,
        value: Vec<u8>,
        lease: Option<LeaseId>,
        revision: i64,
    ) -> Result<WatchEvent> {
        if let Some(id) = lease {
            let record = self
                .leases
                .get_mut(&id)
                .ok_or_else(|| Error::LeaseError(format!("unknown lease {id}")))?;
            record.keys.insert(key.to_string());
        }

        let record = self.records.entry(key.to_string()).or_default();
        let (create_revision, version) = match record.live() {
            Some(live) => (live.create_revision, live.version + 1),
            None => (revision, 1),
        };
        let entry = VersionEntry {
            value: Some(value),
            create_revision,
            mod_revision: revision,
            version,
            lease: lease.unwrap_or(0),
        };
        let pair = Self::pair_for(key, &entry);
        record.versions.push(entry);

        Ok(WatchEvent {
            kind: EventKind::Put,
            pair,
        })
    }

    fn apply_delete(&mut self, key: &str, revision: i64) -> Option<WatchEvent> {
        let record = self.records.get_mut(key)?;
        record.live()?;
        record.versions.push(VersionEntry {
            value: None,
            create_revision: 0,
            mod_revision: revision,
            version: 0,
            lease: 0,
        });
        for lease in self.leases.values_mut() {
            lease.keys.remove(key);
        }
        Some(WatchEvent {
            kind: EventKind::Delete,
            pair: KvPair {
                key: key.to_string(),
                value: Vec::new(),
                create_revision: 0,
                mod_revision: revision,
                version: 0,
                lease: 0,
            },
        })
    }

    fn notify(&mut self, events: &[WatchEvent]) {
        self.watchers.retain(|watcher| {
            for event in events {
                if !event.pair.key.starts_with(&watcher.prefix) {
                    continue;
                }
                match watcher.tx.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(prefix = %watcher.prefix, "watch channel full, dropping event");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => return false,
                }
            }
            true
        });
    }

    fn eval_compare(&self, compare: &Compare) -> bool {
        let live = self.records.get(&compare.key).and_then(|r| r.live());
        match &compare.target {
            CompareTarget::CreateRevision(x) => {
                cmp_i64(live.map(|v| v.create_revision).unwrap_or(0), compare.op, *x)
            }
            CompareTarget::ModRevision(x) => {
                cmp_i64(live.map(|v| v.mod_revision).unwrap_or(0), compare.op, *x)
            }
            CompareTarget::Version(x) => {
                cmp_i64(live.map(|v| v.version).unwrap_or(0), compare.op, *x)
            }
            CompareTarget::Value(x) => {
                let value = live
                    .and_then(|v| v.value.as_deref())
                    .unwrap_or(&[] as &[u8]);
                match compare.op {
                    CompareOp::Equal => value == x.as_slice(),
                    CompareOp::NotEqual => value != x.as_slice(),
                    CompareOp::Greater => value > x.as_slice(),
                    CompareOp::Less => value < x.as_slice(),
                }
            }
        }
    }

    /// Revoke a lease, deleting its keys under a single revision bump.
    fn revoke_lease(&mut self, id: LeaseId) -> Vec<WatchEvent> {
        let Some(record) = self.leases.remove(&id) else {
            return Vec::new();
        };
        let mut keys: Vec<String> = record.keys.into_iter().collect();
        keys.sort();
        if keys.is_empty() {
            return Vec::new();
        }
        self.revision += 1;
        let revision = self.revision;
        keys.iter()
            .filter_map(|key| self.apply_delete(key, revision))
            .collect()
    }

    fn expire_due_leases(&mut self, now: Instant) -> Vec<WatchEvent> {
        let due: Vec<LeaseId> = self
            .leases
            .iter()
            .filter(|(_, record)| record.expires_at <= now)
            .map(|(id, _)| *id)
            .collect();
        let mut events = Vec::new();
        for id in due {
            events.extend(self.revoke_lease(id));
        }
        events
    }
}

fn cmp_i64(actual: i64, op: CompareOp, expected: i64) -> bool {
    match op {
        CompareOp::Equal => actual == expected,
        CompareOp::NotEqual => actual != expected,
        CompareOp::Greater => actual > expected,
        CompareOp::Less => actual < expected,
    }
}

/// In-process [`KvStore`] backend.
///
/// Cloning is cheap and every clone shares the same state, so a test can
/// hand "peers" separate handles to one logical store.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    /// Create an empty store and spawn its lease reaper.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new() -> Self {
        let inner = Arc::new(Mutex::new(Inner::new()));
        Self::spawn_reaper(Arc::downgrade(&inner));
        Self { inner }
    }

    fn spawn_reaper(inner: Weak<Mutex<Inner>>) {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(LEASE_REAPER_INTERVAL);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                let Some(inner) = inner.upgrade() else { break };
                let mut guard = inner.lock().expect("kv state poisoned");
                let events = guard.expire_due_leases(Instant::now());
                if !events.is_empty() {
                    guard.notify(&events);
                }
            }
        });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("kv state poisoned")
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<KvPair>> {
        let inner = self.lock();
        Ok(inner
            .records
            .get(key)
            .and_then(|r| r.live())
            .map(|entry| Inner::pair_for(key, entry)))
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KvPair>> {
        let inner = self.lock();
        Ok(inner
            .records
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .filter_map(|(key, record)| record.live().map(|entry| Inner::pair_for(key, entry)))
            .collect())
    }

    async fn get_at_revision(&self, key: &str, revision: i64) -> Result<Option<KvPair>> {
        let inner = self.lock();
        Ok(inner
            .records
            .get(key)
            .and_then(|r| r.at_revision(revision))
            .map(|entry| Inner::pair_for(key, entry)))
    }

    async fn put(&self, key: &str, value: Vec<u8>, lease: Option<LeaseId>) -> Result<()> {
        let mut inner = self.lock();
        inner.revision += 1;
        let revision = inner.revision;
        let event = inner.apply_put(key, value, lease, revision)?;
        inner.notify(&[event]);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut inner = self.lock();
        inner.revision += 1;
        let revision = inner.revision;
        match inner.apply_delete(key, revision) {
            Some(event) => {
                inner.notify(&[event]);
                Ok(true)
            }
            None => {
                inner.revision -= 1;
                Ok(false)
            }
        }
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let mut inner = self.lock();
        let keys: Vec<String> = inner
            .records
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .filter(|(_, record)| record.live().is_some())
            .map(|(key, _)| key.clone())
            .collect();
        if keys.is_empty() {
            return Ok(0);
        }
        inner.revision += 1;
        let revision = inner.revision;
        let events: Vec<WatchEvent> = keys
            .iter()
            .filter_map(|key| inner.apply_delete(key, revision))
            .collect();
        let deleted = events.len();
        inner.notify(&events);
        Ok(deleted)
    }

    async fn txn(&self, txn: Txn) -> Result<TxnResponse> {
        let mut inner = self.lock();
        let succeeded = txn.compares.iter().all(|c| inner.eval_compare(c));
        let ops = if succeeded { &txn.then_ops } else { &txn.else_ops };
        if !ops.is_empty() {
            inner.revision += 1;
        }
        let revision = inner.revision;
        let mut events = Vec::with_capacity(ops.len());
        for op in ops {
            match op {
                TxnOp::Put { key, value, lease } => {
                    events.push(inner.apply_put(key, value.clone(), *lease, revision)?);
                }
                TxnOp::Delete { key } => {
                    events.extend(inner.apply_delete(key, revision));
                }
            }
        }
        inner.notify(&events);
        Ok(TxnResponse {
            succeeded,
            revision,
        })
    }

    async fn watch_prefix(&self, prefix: &str) -> Result<WatchStream> {
        let (tx, rx) = mpsc::channel(WATCH_CHANNEL_CAPACITY);
        let mut inner = self.lock();
        inner.watchers.push(Watcher {
            prefix: prefix.to_string(),
            tx,
        });
        Ok(WatchStream::new(rx, CancellationToken::new()))
    }

    async fn lease_grant(&self, ttl_secs: i64) -> Result<LeaseId> {
        if ttl_secs <= 0 {
            return Err(Error::InvalidInput(format!(
                "lease ttl must be positive, got {ttl_secs}"
            )));
        }
        let ttl = Duration::from_secs(ttl_secs as u64);
        let mut inner = self.lock();
        let id = inner.next_lease;
        inner.next_lease += 1;
        inner.leases.insert(
            id,
            LeaseRecord {
                ttl,
                expires_at: Instant::now() + ttl,
                keys: HashSet::new(),
            },
        );
        Ok(id)
    }

    async fn lease_keep_alive_once(&self, lease: LeaseId) -> Result<()> {
        let mut inner = self.lock();
        let record = inner
            .leases
            .get_mut(&lease)
            .ok_or_else(|| Error::LeaseError(format!("unknown lease {lease}")))?;
        record.expires_at = Instant::now() + record.ttl;
        Ok(())
    }

    async fn lease_revoke(&self, lease: LeaseId) -> Result<()> {
        let mut inner = self.lock();
        let events = inner.revoke_lease(lease);
        inner.notify(&events);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::KvStoreExt;

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let store = MemoryStore::new();
        store.put("/a", b"1".to_vec(), None).await.unwrap();
        let pair = store.get("/a").await.unwrap().unwrap();
        assert_eq!(pair.value, b"1");
        assert_eq!(pair.version, 1);
        assert!(store.get("/missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_revisions_increase_monotonically() {
        let store = MemoryStore::new();
        store.put("/a", b"1".to_vec(), None).await.unwrap();
        let first = store.get("/a").await.unwrap().unwrap();
        store.put("/a", b"2".to_vec(), None).await.unwrap();
        let second = store.get("/a").await.unwrap().unwrap();
        assert!(second.mod_revision > first.mod_revision);
        assert_eq!(second.create_revision, first.create_revision);
        assert_eq!(second.version, 2);
    }

    #[tokio::test]
    async fn test_prefix_scan_is_lexicographic() {
        let store = MemoryStore::new();
        store.put("/svc/b", b"2".to_vec(), None).await.unwrap();
        store.put("/svc/a", b"1".to_vec(), None).await.unwrap();
        store.put("/other", b"x".to_vec(), None).await.unwrap();
        let pairs = store.get_prefix("/svc/").await.unwrap();
        let keys: Vec<&str> = pairs.iter().map(|p| p.key.as_str()).collect();
        assert_eq!(keys, vec!["/svc/a", "/svc/b"]);
    }

    #[tokio::test]
    async fn test_get_at_revision_reads_history() {
        let store = MemoryStore::new();
        store.put("/a", b"v1".to_vec(), None).await.unwrap();
        let rev1 = store.get("/a").await.unwrap().unwrap().mod_revision;
        store.put("/a", b"v2".to_vec(), None).await.unwrap();

        let old = store.get_at_revision("/a", rev1).await.unwrap().unwrap();
        assert_eq!(old.value, b"v1");
        assert!(store.get_at_revision("/a", rev1 - 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_leaves_tombstone_in_history() {
        let store = MemoryStore::new();
        store.put("/a", b"v1".to_vec(), None).await.unwrap();
        let rev1 = store.get("/a").await.unwrap().unwrap().mod_revision;
        assert!(store.delete("/a").await.unwrap());
        assert!(store.get("/a").await.unwrap().is_none());
        // Pre-delete state is still readable at its revision.
        let old = store.get_at_revision("/a", rev1).await.unwrap().unwrap();
        assert_eq!(old.value, b"v1");
        // Post-delete revisions read as absent.
        assert!(store.get_at_revision("/a", rev1 + 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_txn_put_if_absent() {
        let store = MemoryStore::new();
        let txn = Txn::new()
            .when([Compare::key_absent("/a")])
            .and_then([TxnOp::put("/a", "first")]);
        assert!(store.txn(txn.clone()).await.unwrap().succeeded);
        assert!(!store.txn(txn).await.unwrap().succeeded);
        let pair = store.get("/a").await.unwrap().unwrap();
        assert_eq!(pair.value, b"first");
    }

    #[tokio::test]
    async fn test_txn_value_compare_and_swap() {
        let store = MemoryStore::new();
        store.put("/counter", b"1".to_vec(), None).await.unwrap();
        let cas = Txn::new()
            .when([Compare::value("/counter", CompareOp::Equal, "1")])
            .and_then([TxnOp::put("/counter", "2")]);
        assert!(store.txn(cas.clone()).await.unwrap().succeeded);
        assert!(!store.txn(cas).await.unwrap().succeeded);
        assert_eq!(store.get("/counter").await.unwrap().unwrap().value, b"2");
    }

    #[tokio::test]
    async fn test_txn_multi_key_atomicity() {
        let store = MemoryStore::new();
        let txn = Txn::new().and_then([TxnOp::put("/a", "1"), TxnOp::put("/b", "2")]);
        store.txn(txn).await.unwrap();
        let a = store.get("/a").await.unwrap().unwrap();
        let b = store.get("/b").await.unwrap().unwrap();
        assert_eq!(a.mod_revision, b.mod_revision);
    }

    #[tokio::test]
    async fn test_watch_receives_put_and_delete() {
        let store = MemoryStore::new();
        let mut stream = store.watch_prefix("/w/").await.unwrap();
        store.put("/w/a", b"1".to_vec(), None).await.unwrap();
        store.put("/elsewhere", b"x".to_vec(), None).await.unwrap();
        store.delete("/w/a").await.unwrap();

        let first = stream.recv().await.unwrap();
        assert_eq!(first.kind, EventKind::Put);
        assert_eq!(first.pair.key, "/w/a");
        let second = stream.recv().await.unwrap();
        assert_eq!(second.kind, EventKind::Delete);
        assert_eq!(second.pair.key, "/w/a");
    }

    #[tokio::test(start_paused = true)]
    async fn test_lease_expiry_deletes_bound_keys() {
        let store = MemoryStore::new();
        let lease = store.lease_grant(2).await.unwrap();
        store.put("/l/a", b"1".to_vec(), Some(lease)).await.unwrap();
        assert!(store.get("/l/a").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(store.get("/l/a").await.unwrap().is_none());
        assert!(store.lease_keep_alive_once(lease).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_alive_extends_lease() {
        let store = MemoryStore::new();
        let lease = store.lease_grant(2).await.unwrap();
        store.put("/l/a", b"1".to_vec(), Some(lease)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1500)).await;
        store.lease_keep_alive_once(lease).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(store.get("/l/a").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(store.get("/l/a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lease_revoke_deletes_keys_and_notifies() {
        let store = MemoryStore::new();
        let mut stream = store.watch_prefix("/l/").await.unwrap();
        let lease = store.lease_grant(60).await.unwrap();
        store.put("/l/a", b"1".to_vec(), Some(lease)).await.unwrap();
        store.lease_revoke(lease).await.unwrap();

        assert!(store.get("/l/a").await.unwrap().is_none());
        let put = stream.recv().await.unwrap();
        assert_eq!(put.kind, EventKind::Put);
        let deleted = stream.recv().await.unwrap();
        assert_eq!(deleted.kind, EventKind::Delete);
    }

    #[tokio::test]
    async fn test_put_with_unknown_lease_fails() {
        let store = MemoryStore::new();
        let err = store.put("/a", b"1".to_vec(), Some(42)).await.unwrap_err();
        assert!(matches!(err, Error::LeaseError(_)));
    }

    #[tokio::test]
    async fn test_json_helpers() {
        let store = MemoryStore::new();
        store
            .put_json("/j", &serde_json::json!({"n": 5}))
            .await
            .unwrap();
        let value: serde_json::Value = store.get_json("/j").await.unwrap().unwrap();
        assert_eq!(value["n"], 5);
    }
}
