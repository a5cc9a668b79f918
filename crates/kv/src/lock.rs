//! Distributed lock
//!
//! Named cluster-wide mutual exclusion built on the KV store: the lock key
//! is created under a TTL lease iff absent, so at most one holder exists per
//! name and the lock self-releases when its holder dies. While held, a
//! background task keeps the lease alive so the holder is not evicted
//! mid-critical-section.

use crate::store::KvStore;
use crate::types::{Compare, EventKind, LeaseId, Txn, TxnOp};
use lodestar_core::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const LOCK_PREFIX: &str = "/aio/locks/";

struct Held {
    lease: LeaseId,
    keepalive: CancellationToken,
}

/// Handle for one named lock.
///
/// The handle itself is not re-entrant: a second `lock` on the same handle
/// without an `unlock` in between is an error.
pub struct DistributedLock {
    store: Arc<dyn KvStore>,
    name: String,
    key: String,
    ttl: Duration,
    held: Mutex<Option<Held>>,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn KvStore>, name: impl Into<String>, ttl: Duration) -> Self {
        let name = name.into();
        let key = format!("{LOCK_PREFIX}{name}");
        Self {
            store,
            name,
            key,
            ttl,
            held: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Block until the lock is acquired or `timeout` lapses.
    pub async fn lock(&self, timeout: Duration) -> Result<()> {
        tokio::time::timeout(timeout, self.acquire())
            .await
            .map_err(|_| {
                Error::LeaseError(format!("timed out acquiring lock {}", self.name))
            })?
    }

    async fn acquire(&self) -> Result<()> {
        let mut held = self.held.lock().await;
        if held.is_some() {
            return Err(Error::InvalidState(format!(
                "lock {} already held by this handle",
                self.name
            )));
        }
        loop {
            let lease = self.store.lease_grant(self.ttl.as_secs() as i64).await?;
            let txn = Txn::new()
                .when([Compare::key_absent(&self.key)])
                .and_then([TxnOp::put_with_lease(&self.key, Vec::new(), lease)]);
            if self.store.txn(txn).await?.succeeded {
                debug!(lock = %self.name, lease, "acquired");
                let keepalive = self.spawn_keepalive(lease);
                *held = Some(Held { lease, keepalive });
                return Ok(());
            }
            // Lost the race. Drop our lease and wait for the holder's key to
            // disappear. Subscribe before re-checking so a release between
            // the failed txn and the watch cannot be missed.
            self.store.lease_revoke(lease).await.ok();
            let mut stream = self.store.watch_prefix(&self.key).await?;
            if self.store.get(&self.key).await?.is_none() {
                continue;
            }
            while let Some(event) = stream.recv().await {
                if event.kind == EventKind::Delete && event.pair.key == self.key {
                    break;
                }
            }
        }
    }

    fn spawn_keepalive(&self, lease: LeaseId) -> CancellationToken {
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let store = Arc::clone(&self.store);
        let name = self.name.clone();
        let interval = self.ttl / 3;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                if let Err(e) = store.lease_keep_alive_once(lease).await {
                    warn!(lock = %name, error = %e, "lock keep-alive failed");
                    break;
                }
            }
        });
        cancel
    }

    /// Release the lock. The key vanishes with the lease revocation, waking
    /// any waiter.
    pub async fn unlock(&self) -> Result<()> {
        let mut held = self.held.lock().await;
        match held.take() {
            Some(state) => {
                state.keepalive.cancel();
                self.store.lease_revoke(state.lease).await
            }
            None => Err(Error::InvalidState(format!(
                "lock {} is not held by this handle",
                self.name
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    fn shared_store() -> Arc<dyn KvStore> {
        Arc::new(MemoryStore::new())
    }

    #[tokio::test]
    async fn test_lock_then_unlock() {
        let store = shared_store();
        let lock = DistributedLock::new(store, "init", Duration::from_secs(30));
        lock.lock(Duration::from_secs(1)).await.unwrap();
        lock.unlock().await.unwrap();
        // Reacquirable after release.
        lock.lock(Duration::from_secs(1)).await.unwrap();
        lock.unlock().await.unwrap();
    }

    #[tokio::test]
    async fn test_second_holder_times_out_while_held() {
        let store = shared_store();
        let first = DistributedLock::new(Arc::clone(&store), "init", Duration::from_secs(30));
        let second = DistributedLock::new(store, "init", Duration::from_secs(30));

        first.lock(Duration::from_secs(1)).await.unwrap();
        let err = second.lock(Duration::from_millis(200)).await.unwrap_err();
        assert!(matches!(err, Error::LeaseError(_)));
        first.unlock().await.unwrap();
    }

    #[tokio::test]
    async fn test_waiter_acquires_after_release() {
        let store = shared_store();
        let first = Arc::new(DistributedLock::new(
            Arc::clone(&store),
            "seed",
            Duration::from_secs(30),
        ));
        let second = DistributedLock::new(store, "seed", Duration::from_secs(30));

        first.lock(Duration::from_secs(1)).await.unwrap();
        let holder = Arc::clone(&first);
        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            holder.unlock().await.unwrap();
        });

        second.lock(Duration::from_secs(5)).await.unwrap();
        second.unlock().await.unwrap();
        release.await.unwrap();
    }

    #[tokio::test]
    async fn test_mutual_exclusion_under_contention() {
        let store = shared_store();
        let counter = Arc::new(std::sync::Mutex::new((0u32, 0u32))); // (inside, max)
        let mut handles = Vec::new();
        for _ in 0..4 {
            let store = Arc::clone(&store);
            let counter = Arc::clone(&counter);
            handles.push(tokio::spawn(async move {
                let lock = DistributedLock::new(store, "contended", Duration::from_secs(30));
                for _ in 0..3 {
                    lock.lock(Duration::from_secs(10)).await.unwrap();
                    {
                        let mut c = counter.lock().unwrap();
                        c.0 += 1;
                        c.1 = c.1.max(c.0);
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    {
                        let mut c = counter.lock().unwrap();
                        c.0 -= 1;
                    }
                    lock.unlock().await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(counter.lock().unwrap().1, 1, "two holders overlapped");
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_released_when_holder_dies() {
        let store = shared_store();
        let first = DistributedLock::new(Arc::clone(&store), "crashy", Duration::from_secs(2));
        first.lock(Duration::from_secs(1)).await.unwrap();
        // Simulate holder death: cancel its keep-alive without unlocking.
        first.held.lock().await.as_ref().unwrap().keepalive.cancel();

        tokio::time::sleep(Duration::from_secs(4)).await;
        let second = DistributedLock::new(store, "crashy", Duration::from_secs(2));
        second.lock(Duration::from_secs(1)).await.unwrap();
        second.unlock().await.unwrap();
    }
}
