//! Live config watch.
//!
//! One long-running task watches the whole config prefix on the KV store.
//! Events arriving in a burst are collated so each key propagates only its
//! latest state per batch. Delivery to a subscriber is bounded by a 500 ms
//! timeout — a slow consumer loses events rather than back-pressuring the
//! watcher. When the KV watch fails, the task reconnects after 3 s.

use crate::types::{ConfigEntry, ConfigEvent};
use lodestar_core::Result;
use lodestar_kv::{EventKind, KvStore, WatchEvent};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const SUBSCRIBER_CHANNEL_CAPACITY: usize = 64;
const NOTIFY_TIMEOUT: Duration = Duration::from_millis(500);
const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// A live subscription to config changes.
pub struct Subscription {
    pub id: u64,
    rx: mpsc::Receiver<ConfigEvent>,
}

impl Subscription {
    /// Next change, or `None` once the hub has closed the channel.
    pub async fn recv(&mut self) -> Option<ConfigEvent> {
        self.rx.recv().await
    }
}

struct Subscriber {
    key_prefix: String,
    tx: mpsc::Sender<ConfigEvent>,
}

/// Fan-out hub between the KV watch task and config subscribers.
pub(crate) struct WatchHub {
    kv: Arc<dyn KvStore>,
    store_prefix: String,
    subscribers: Mutex<HashMap<u64, Subscriber>>,
    next_id: AtomicU64,
    cancel: CancellationToken,
}

impl WatchHub {
    pub(crate) fn new(kv: Arc<dyn KvStore>, store_prefix: String) -> Self {
        Self {
            kv,
            store_prefix,
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            cancel: CancellationToken::new(),
        }
    }

    pub(crate) async fn subscribe(&self, key_prefix: &str) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().await.insert(
            id,
            Subscriber {
                key_prefix: key_prefix.to_string(),
                tx,
            },
        );
        Subscription { id, rx }
    }

    /// Dropping the sender is the final action for the subscriber: its
    /// channel closes and pending `recv` calls return `None`.
    pub(crate) async fn unsubscribe(&self, id: u64) {
        self.subscribers.lock().await.remove(&id);
    }

    pub(crate) async fn close(&self) {
        self.cancel.cancel();
        self.subscribers.lock().await.clear();
    }

    pub(crate) fn start(hub: Arc<Self>) {
        tokio::spawn(async move { hub.run().await });
    }

    async fn run(self: Arc<Self>) {
        loop {
            if self.cancel.is_cancelled() {
                return;
            }
            match self.kv.watch_prefix(&self.store_prefix).await {
                Ok(mut stream) => loop {
                    let first = tokio::select! {
                        _ = self.cancel.cancelled() => return,
                        event = stream.recv() => event,
                    };
                    let Some(first) = first else { break };
                    // Collate the burst: per key, only the latest event
                    // survives the batch.
                    let mut batch: HashMap<String, WatchEvent> = HashMap::new();
                    batch.insert(first.pair.key.clone(), first);
                    while let Some(event) = stream.try_recv() {
                        batch.insert(event.pair.key.clone(), event);
                    }
                    self.dispatch(batch).await;
                },
                Err(e) => {
                    warn!(error = %e, "config watch failed, reconnecting");
                }
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
            }
        }
    }

    async fn dispatch(&self, batch: HashMap<String, WatchEvent>) {
        let events: Vec<ConfigEvent> = batch
            .into_values()
            .filter_map(|event| self.to_config_event(event).transpose())
            .filter_map(|result| match result {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!(error = %e, "undecodable config watch event");
                    None
                }
            })
            .collect();
        if events.is_empty() {
            return;
        }

        let mut subscribers = self.subscribers.lock().await;
        let mut dead = Vec::new();
        for (id, subscriber) in subscribers.iter() {
            for event in &events {
                if !event.key.starts_with(&subscriber.key_prefix) {
                    continue;
                }
                match tokio::time::timeout(NOTIFY_TIMEOUT, subscriber.tx.send(event.clone())).await
                {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => {
                        dead.push(*id);
                        break;
                    }
                    Err(_) => {
                        // Slow consumer: drop the event for this subscriber,
                        // never stall the watcher.
                        debug!(subscriber = id, key = %event.key, "notify timed out, dropped");
                    }
                }
            }
        }
        for id in dead {
            subscribers.remove(&id);
        }
    }

    /// Strip the store prefix and decode the entry. `Ok(None)` filters keys
    /// outside the logical namespace.
    fn to_config_event(&self, event: WatchEvent) -> Result<Option<ConfigEvent>> {
        let Some(key) = event.pair.key.strip_prefix(&self.store_prefix) else {
            return Ok(None);
        };
        let entry: Option<ConfigEntry> = match event.kind {
            EventKind::Put => Some(event.pair.json()?),
            EventKind::Delete => None,
        };
        Ok(Some(ConfigEvent {
            key: key.to_string(),
            entry,
        }))
    }
}
