//! Client-side self-renewal.
//!
//! A service that registers itself keeps its lease alive by renewing on an
//! interval below TTL/3. When a renewal fails — the lease expired while the
//! process was stalled, or the registry lost the handle — the registrar
//! re-registers, retrying a configured number of times before giving up and
//! logging the outage.

use crate::registry::Registry;
use crate::types::ServiceInstance;
use lodestar_core::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Handle to a self-renewing registration.
pub struct Registrar {
    registry: Arc<Registry>,
    instance: ServiceInstance,
    cancel: CancellationToken,
}

impl Registrar {
    /// Register `instance` and spawn the renewal task.
    pub async fn start(registry: Arc<Registry>, instance: ServiceInstance) -> Result<Self> {
        let instance = registry.register(instance).await?;
        let cancel = CancellationToken::new();

        let task_registry = Arc::clone(&registry);
        let task_cancel = cancel.clone();
        let task_instance = instance.clone();
        tokio::spawn(async move {
            renew_loop(task_registry, task_instance, task_cancel).await;
        });

        Ok(Self {
            registry,
            instance,
            cancel,
        })
    }

    /// The instance as registered (with generated id and stamped times).
    pub fn instance(&self) -> &ServiceInstance {
        &self.instance
    }

    /// Stop renewing and unregister.
    pub async fn shutdown(self) -> Result<()> {
        self.cancel.cancel();
        self.registry
            .unregister(&self.instance.name, &self.instance.id)
            .await
    }
}

async fn renew_loop(registry: Arc<Registry>, mut instance: ServiceInstance, cancel: CancellationToken) {
    let options = registry.options().clone();
    let interval = options.renew_interval();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }
        match registry.renew(&instance.id).await {
            Ok(()) => continue,
            Err(e) => {
                warn!(id = %instance.id, error = %e, "renewal failed, re-registering");
            }
        }

        let mut recovered = false;
        for attempt in 1..=options.retry_count.max(1) {
            match registry.register(instance.clone()).await {
                Ok(registered) => {
                    info!(id = %registered.id, attempt, "re-registered after lost lease");
                    instance = registered;
                    recovered = true;
                    break;
                }
                Err(e) => {
                    warn!(id = %instance.id, attempt, error = %e, "re-registration failed");
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(options.retry_delay()) => {}
                    }
                }
            }
        }
        if !recovered {
            error!(id = %instance.id, "giving up on re-registration");
            return;
        }
    }
}
