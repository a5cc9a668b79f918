//! etcd v3 backend.
//!
//! Thin adapter translating the [`KvStore`](crate::KvStore) contract onto
//! `etcd-client`. The client is `Clone` (it wraps an inner `Arc`), so each
//! call clones it cheaply to obtain the `&mut` receiver the crate requires.

use crate::store::KvStore;
use crate::types::{
    Compare, CompareOp, CompareTarget, EventKind, KvPair, LeaseId, Txn, TxnOp, TxnResponse,
    WatchEvent, WatchStream,
};
use async_trait::async_trait;
use etcd_client::{Client, ConnectOptions, DeleteOptions, GetOptions, PutOptions, WatchOptions};
use lodestar_core::{Error, Result};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const WATCH_CHANNEL_CAPACITY: usize = 256;

fn store_err(e: etcd_client::Error) -> Error {
    Error::StoreUnavailable(e.to_string())
}

fn to_pair(kv: &etcd_client::KeyValue) -> KvPair {
    KvPair {
        key: String::from_utf8_lossy(kv.key()).into_owned(),
        value: kv.value().to_vec(),
        create_revision: kv.create_revision(),
        mod_revision: kv.mod_revision(),
        version: kv.version(),
        lease: kv.lease(),
    }
}

fn to_etcd_compare(compare: Compare) -> etcd_client::Compare {
    let op = match compare.op {
        CompareOp::Equal => etcd_client::CompareOp::Equal,
        CompareOp::NotEqual => etcd_client::CompareOp::NotEqual,
        CompareOp::Greater => etcd_client::CompareOp::Greater,
        CompareOp::Less => etcd_client::CompareOp::Less,
    };
    match compare.target {
        CompareTarget::CreateRevision(rev) => {
            etcd_client::Compare::create_revision(compare.key, op, rev)
        }
        CompareTarget::ModRevision(rev) => etcd_client::Compare::mod_revision(compare.key, op, rev),
        CompareTarget::Version(version) => etcd_client::Compare::version(compare.key, op, version),
        CompareTarget::Value(value) => etcd_client::Compare::value(compare.key, op, value),
    }
}

fn to_etcd_op(op: TxnOp) -> etcd_client::TxnOp {
    match op {
        TxnOp::Put { key, value, lease } => {
            let options = lease.map(|id| PutOptions::new().with_lease(id));
            etcd_client::TxnOp::put(key, value, options)
        }
        TxnOp::Delete { key } => etcd_client::TxnOp::delete(key, None),
    }
}

/// Connection settings for the etcd backend.
#[derive(Debug, Clone)]
pub struct EtcdConfig {
    pub endpoints: Vec<String>,
    /// Per-request deadline applied by the client.
    pub request_timeout: Duration,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for EtcdConfig {
    fn default() -> Self {
        Self {
            endpoints: vec!["http://127.0.0.1:2379".to_string()],
            request_timeout: Duration::from_secs(5),
            username: None,
            password: None,
        }
    }
}

/// [`KvStore`] backed by an etcd cluster.
#[derive(Clone)]
pub struct EtcdStore {
    client: Client,
}

impl EtcdStore {
    /// Connect to the cluster described by `config`.
    pub async fn connect(config: EtcdConfig) -> Result<Self> {
        let mut options = ConnectOptions::new()
            .with_timeout(config.request_timeout)
            .with_connect_timeout(config.request_timeout);
        if let (Some(user), Some(password)) = (&config.username, &config.password) {
            options = options.with_user(user.clone(), password.clone());
        }
        let client = Client::connect(&config.endpoints, Some(options))
            .await
            .map_err(store_err)?;
        Ok(Self { client })
    }

    /// Wrap an already-connected client.
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl KvStore for EtcdStore {
    async fn get(&self, key: &str) -> Result<Option<KvPair>> {
        let resp = self
            .client
            .clone()
            .get(key, None)
            .await
            .map_err(store_err)?;
        Ok(resp.kvs().first().map(to_pair))
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KvPair>> {
        let options = GetOptions::new().with_prefix();
        let resp = self
            .client
            .clone()
            .get(prefix, Some(options))
            .await
            .map_err(store_err)?;
        Ok(resp.kvs().iter().map(to_pair).collect())
    }

    async fn get_at_revision(&self, key: &str, revision: i64) -> Result<Option<KvPair>> {
        let options = GetOptions::new().with_revision(revision);
        match self.client.clone().get(key, Some(options)).await {
            Ok(resp) => Ok(resp.kvs().first().map(to_pair)),
            // Compacted history reads as absent; the caller is walking
            // revisions downward and treats this as the end of history.
            Err(e) if e.to_string().contains("compacted") => Ok(None),
            Err(e) => Err(store_err(e)),
        }
    }

    async fn put(&self, key: &str, value: Vec<u8>, lease: Option<LeaseId>) -> Result<()> {
        let options = lease.map(|id| PutOptions::new().with_lease(id));
        self.client
            .clone()
            .put(key, value, options)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let resp = self
            .client
            .clone()
            .delete(key, None)
            .await
            .map_err(store_err)?;
        Ok(resp.deleted() > 0)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let options = DeleteOptions::new().with_prefix();
        let resp = self
            .client
            .clone()
            .delete(prefix, Some(options))
            .await
            .map_err(store_err)?;
        Ok(resp.deleted() as usize)
    }

    async fn txn(&self, txn: Txn) -> Result<TxnResponse> {
        let etcd_txn = etcd_client::Txn::new()
            .when(
                txn.compares
                    .into_iter()
                    .map(to_etcd_compare)
                    .collect::<Vec<_>>(),
            )
            .and_then(
                txn.then_ops
                    .into_iter()
                    .map(to_etcd_op)
                    .collect::<Vec<_>>(),
            )
            .or_else(
                txn.else_ops
                    .into_iter()
                    .map(to_etcd_op)
                    .collect::<Vec<_>>(),
            );
        let resp = self.client.clone().txn(etcd_txn).await.map_err(store_err)?;
        let revision = resp.header().map(|h| h.revision()).unwrap_or(0);
        Ok(TxnResponse {
            succeeded: resp.succeeded(),
            revision,
        })
    }

    async fn watch_prefix(&self, prefix: &str) -> Result<WatchStream> {
        let options = WatchOptions::new().with_prefix();
        let (mut watcher, mut stream) = self
            .client
            .clone()
            .watch(prefix, Some(options))
            .await
            .map_err(store_err)?;

        let (tx, rx) = mpsc::channel(WATCH_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let pump_cancel = cancel.clone();
        let watched = prefix.to_string();

        tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    _ = pump_cancel.cancelled() => {
                        if let Err(e) = watcher.cancel().await {
                            debug!(prefix = %watched, error = %e, "watch cancel failed");
                        }
                        break;
                    }
                    message = stream.message() => message,
                };
                let resp = match message {
                    Ok(Some(resp)) => resp,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(prefix = %watched, error = %e, "watch stream failed");
                        break;
                    }
                };
                if resp.canceled() {
                    break;
                }
                for event in resp.events() {
                    let Some(kv) = event.kv() else { continue };
                    let kind = match event.event_type() {
                        etcd_client::EventType::Put => EventKind::Put,
                        etcd_client::EventType::Delete => EventKind::Delete,
                    };
                    let watch_event = WatchEvent {
                        kind,
                        pair: to_pair(kv),
                    };
                    if tx.send(watch_event).await.is_err() {
                        break;
                    }
                }
            }
        });

        Ok(WatchStream::new(rx, cancel))
    }

    async fn lease_grant(&self, ttl_secs: i64) -> Result<LeaseId> {
        let resp = self
            .client
            .clone()
            .lease_grant(ttl_secs, None)
            .await
            .map_err(store_err)?;
        Ok(resp.id())
    }

    async fn lease_keep_alive_once(&self, lease: LeaseId) -> Result<()> {
        let (mut keeper, mut stream) = self
            .client
            .clone()
            .lease_keep_alive(lease)
            .await
            .map_err(|e| Error::LeaseError(e.to_string()))?;
        keeper
            .keep_alive()
            .await
            .map_err(|e| Error::LeaseError(e.to_string()))?;
        match stream.message().await {
            Ok(Some(resp)) if resp.ttl() > 0 => Ok(()),
            Ok(_) => Err(Error::LeaseError(format!("lease {lease} no longer live"))),
            Err(e) => Err(Error::LeaseError(e.to_string())),
        }
    }

    async fn lease_revoke(&self, lease: LeaseId) -> Result<()> {
        self.client
            .clone()
            .lease_revoke(lease)
            .await
            .map_err(|e| Error::LeaseError(e.to_string()))?;
        Ok(())
    }
}
