//! The service registry.

use crate::types::{InstanceStatus, RegistryOptions, ServiceInstance};
use async_trait::async_trait;
use dashmap::DashMap;
use lodestar_core::traits::{Component, ComponentStatus, NodeContext};
use lodestar_core::types::{now_millis, Environment};
use lodestar_core::{Error, Result};
use lodestar_crypto::codegen;
use lodestar_kv::{KvStore, KvStoreExt, LeaseId, WatchStream};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Snapshot stream produced by [`Registry::watch`]. Every change under the
/// service's prefix triggers a fresh discovery, and the full instance list
/// is delivered.
pub struct RegistryWatch {
    rx: mpsc::Receiver<Vec<ServiceInstance>>,
    cancel: CancellationToken,
}

impl RegistryWatch {
    pub async fn recv(&mut self) -> Option<Vec<ServiceInstance>> {
        self.rx.recv().await
    }
}

impl Drop for RegistryWatch {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Register/renew/discover service instances with lease-bound liveness.
pub struct Registry {
    kv: Arc<dyn KvStore>,
    options: RegistryOptions,
    /// Instance id → lease handle, for instances registered through this
    /// process.
    leases: DashMap<String, LeaseId>,
    status: RwLock<ComponentStatus>,
}

impl Registry {
    pub fn new(kv: Arc<dyn KvStore>, options: RegistryOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            kv,
            options,
            leases: DashMap::new(),
            status: RwLock::new(ComponentStatus::NotInitialized),
        })
    }

    pub fn options(&self) -> &RegistryOptions {
        &self.options
    }

    fn service_prefix(&self, name: &str) -> String {
        format!("{}/{name}/", self.options.prefix)
    }

    fn instance_key(&self, name: &str, id: &str) -> String {
        format!("{}/{name}/{id}", self.options.prefix)
    }

    /// Register an instance, filling defaults and binding its key to a
    /// fresh lease.
    pub async fn register(&self, mut instance: ServiceInstance) -> Result<ServiceInstance> {
        if instance.name.is_empty() {
            return Err(Error::InvalidInput("service name is required".to_string()));
        }
        if instance.address.is_empty() {
            return Err(Error::InvalidInput("service address is required".to_string()));
        }

        let now = now_millis();
        if instance.id.is_empty() {
            instance.id = format!("{}-{}", instance.name, codegen::hex_suffix(8));
        }
        if instance.started_at == 0 {
            instance.started_at = now;
        }
        instance.registered_at = now;
        instance.last_renewed_at = now;
        instance.status = InstanceStatus::Active;
        instance.offline_at = None;

        let lease = self.kv.lease_grant(self.options.lease_ttl_secs).await?;
        let key = self.instance_key(&instance.name, &instance.id);
        self.kv.put_json_with_lease(&key, &instance, lease).await?;
        self.leases.insert(instance.id.clone(), lease);

        info!(service = %instance.name, id = %instance.id, lease, "registered instance");
        Ok(instance)
    }

    /// Extend the lease of an instance registered by this process.
    pub async fn renew(&self, id: &str) -> Result<()> {
        let lease = self
            .leases
            .get(id)
            .map(|entry| *entry.value())
            .ok_or_else(|| Error::LeaseError(format!("no lease recorded for {id}")))?;
        match self.kv.lease_keep_alive_once(lease).await {
            Ok(()) => Ok(()),
            Err(e) => {
                // The store no longer honors the lease; the handle is dead.
                self.leases.remove(id);
                Err(e)
            }
        }
    }

    /// Revoke the instance's lease (deleting its key) and sweep any
    /// straggler keys still carrying the id.
    pub async fn unregister(&self, name: &str, id: &str) -> Result<()> {
        if let Some((_, lease)) = self.leases.remove(id) {
            if let Err(e) = self.kv.lease_revoke(lease).await {
                warn!(id, error = %e, "lease revoke failed during unregister");
            }
        }
        let stragglers = self.kv.get_prefix(&self.service_prefix(name)).await?;
        for pair in stragglers {
            if pair.key.contains(id) {
                self.kv.delete(&pair.key).await?;
            }
        }
        debug!(service = name, id, "unregistered instance");
        Ok(())
    }

    /// All live instances of a service.
    pub async fn discover(&self, name: &str) -> Result<Vec<ServiceInstance>> {
        self.kv.list_json(&self.service_prefix(name)).await
    }

    /// Instances visible to `env`: scoped to it, or scoped to `all`.
    pub async fn discover_by_env(
        &self,
        name: &str,
        env: Environment,
    ) -> Result<Vec<ServiceInstance>> {
        Ok(self
            .discover(name)
            .await?
            .into_iter()
            .filter(|instance| instance.env.matches(env))
            .collect())
    }

    /// Watch a service: every change under its prefix produces a fresh
    /// discovery snapshot.
    pub async fn watch(&self, name: &str) -> Result<RegistryWatch> {
        let mut stream: WatchStream = self.kv.watch_prefix(&self.service_prefix(name)).await?;
        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let kv = Arc::clone(&self.kv);
        let prefix = self.service_prefix(name);
        let service = name.to_string();

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    event = stream.recv() => event,
                };
                if event.is_none() {
                    break;
                }
                // Coalesce whatever else arrived with this change.
                while stream.try_recv().is_some() {}
                let snapshot = match kv.list_json::<ServiceInstance>(&prefix).await {
                    Ok(snapshot) => snapshot,
                    Err(e) => {
                        warn!(service = %service, error = %e, "discovery refresh failed");
                        continue;
                    }
                };
                if tx.send(snapshot).await.is_err() {
                    break;
                }
            }
        });

        Ok(RegistryWatch { rx, cancel })
    }

    /// Supervisory staleness pass: instances whose last renewal is older
    /// than `max_age` are rewritten as logically offline (still bound to
    /// their lease, so eviction proceeds regardless).
    pub async fn mark_stale(&self, name: &str, max_age: Duration) -> Result<usize> {
        self.mark_stale_under(&self.service_prefix(name), max_age)
            .await
    }

    /// Staleness pass over every registered service.
    pub async fn mark_stale_all(&self, max_age: Duration) -> Result<usize> {
        let prefix = format!("{}/", self.options.prefix);
        self.mark_stale_under(&prefix, max_age).await
    }

    async fn mark_stale_under(&self, prefix: &str, max_age: Duration) -> Result<usize> {
        let cutoff = now_millis() - max_age.as_millis() as i64;
        let pairs = self.kv.get_prefix(prefix).await?;
        let mut marked = 0;
        for pair in pairs {
            let mut instance: ServiceInstance = pair.json()?;
            if instance.status == InstanceStatus::Offline || instance.last_renewed_at >= cutoff {
                continue;
            }
            instance.status = InstanceStatus::Offline;
            instance.offline_at = Some(now_millis());
            let lease = (pair.lease != 0).then_some(pair.lease);
            let bytes = serde_json::to_vec(&instance)?;
            if let Err(e) = self.kv.put(&pair.key, bytes, lease).await {
                // The lease may have expired between scan and write; the key
                // is on its way out anyway.
                debug!(key = %pair.key, error = %e, "stale rewrite skipped");
                continue;
            }
            marked += 1;
        }
        Ok(marked)
    }
}

#[async_trait]
impl Component for Registry {
    fn name(&self) -> &str {
        "registry"
    }

    fn status(&self) -> ComponentStatus {
        *self.status.read().expect("status poisoned")
    }

    fn default_config(&self) -> Option<serde_json::Value> {
        serde_json::to_value(RegistryOptions::default()).ok()
    }

    async fn init(&self, _ctx: &NodeContext, _raw_config: serde_json::Value) -> Result<()> {
        *self.status.write().expect("status poisoned") = ComponentStatus::Initialized;
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        *self.status.write().expect("status poisoned") = ComponentStatus::Running;
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        // Local registrations die with their leases once renewal stops.
        self.leases.clear();
        *self.status.write().expect("status poisoned") = ComponentStatus::Stopped;
        Ok(())
    }
}
