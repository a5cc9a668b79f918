//! Registry behavior, including the lease-liveness contract, against the
//! in-process KV store.

use lodestar_core::types::Environment;
use lodestar_core::Error;
use lodestar_kv::{KvStore, MemoryStore};
use lodestar_registry::{Registrar, Registry, RegistryOptions, ServiceInstance};
use std::sync::Arc;
use std::time::Duration;

fn registry_with(kv: Arc<dyn KvStore>, ttl: i64, renew: u64) -> Arc<Registry> {
    Arc::new(
        Registry::new(
            kv,
            RegistryOptions {
                lease_ttl_secs: ttl,
                renew_interval_secs: renew,
                retry_delay_ms: 50,
                ..RegistryOptions::default()
            },
        )
        .unwrap(),
    )
}

#[tokio::test]
async fn register_fills_defaults() {
    let registry = registry_with(Arc::new(MemoryStore::new()), 30, 10);
    let instance = registry
        .register(ServiceInstance::new("payments", "10.0.0.1:7000"))
        .await
        .unwrap();

    assert!(instance.id.starts_with("payments-"));
    assert_eq!(instance.id.len(), "payments-".len() + 8);
    assert_eq!(instance.env, Environment::All);
    assert!(instance.registered_at > 0);
    assert!(instance.started_at > 0);

    let found = registry.discover("payments").await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, instance.id);
}

#[tokio::test]
async fn register_validates_required_fields() {
    let registry = registry_with(Arc::new(MemoryStore::new()), 30, 10);
    assert!(matches!(
        registry.register(ServiceInstance::new("", "addr")).await,
        Err(Error::InvalidInput(_))
    ));
    assert!(matches!(
        registry.register(ServiceInstance::new("svc", "")).await,
        Err(Error::InvalidInput(_))
    ));
}

#[tokio::test]
async fn discover_by_env_filters() {
    let registry = registry_with(Arc::new(MemoryStore::new()), 30, 10);
    registry
        .register(ServiceInstance::new("api", "a:1").with_env(Environment::Dev))
        .await
        .unwrap();
    registry
        .register(ServiceInstance::new("api", "b:1").with_env(Environment::Prod))
        .await
        .unwrap();
    registry
        .register(ServiceInstance::new("api", "c:1").with_env(Environment::All))
        .await
        .unwrap();

    let dev = registry
        .discover_by_env("api", Environment::Dev)
        .await
        .unwrap();
    let addresses: Vec<&str> = dev.iter().map(|i| i.address.as_str()).collect();
    assert_eq!(dev.len(), 2);
    assert!(addresses.contains(&"a:1"));
    assert!(addresses.contains(&"c:1"));
}

#[tokio::test(start_paused = true)]
async fn lease_liveness_contract() {
    let registry = registry_with(Arc::new(MemoryStore::new()), 2, 1);
    let instance = registry
        .register(ServiceInstance::new("api", "a:1"))
        .await
        .unwrap();

    // Renew within the TTL: still discoverable.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    registry.renew(&instance.id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(registry.discover("api").await.unwrap().len(), 1);

    // Stop renewing: the lease lapses and the instance vanishes.
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(registry.discover("api").await.unwrap().is_empty());

    // Renewing a dead lease reports the error.
    assert!(registry.renew(&instance.id).await.is_err());
    // The handle was dropped, so a second renew is LeaseError for an
    // unknown id.
    assert!(matches!(
        registry.renew(&instance.id).await,
        Err(Error::LeaseError(_))
    ));
}

#[tokio::test]
async fn renew_unknown_id_fails() {
    let registry = registry_with(Arc::new(MemoryStore::new()), 30, 10);
    assert!(matches!(
        registry.renew("nope").await,
        Err(Error::LeaseError(_))
    ));
}

#[tokio::test]
async fn unregister_removes_instance() {
    let kv: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
    let registry = registry_with(Arc::clone(&kv), 30, 10);
    let instance = registry
        .register(ServiceInstance::new("api", "a:1"))
        .await
        .unwrap();

    registry.unregister("api", &instance.id).await.unwrap();
    assert!(registry.discover("api").await.unwrap().is_empty());

    // A straggling key containing the id is swept even without a lease
    // handle (e.g. left by a previous process).
    let straggler = format!("/aio/registry/api/{}", instance.id);
    kv.put(&straggler, b"{}".to_vec(), None).await.unwrap();
    registry.unregister("api", &instance.id).await.unwrap();
    assert!(kv.get(&straggler).await.unwrap().is_none());
}

#[tokio::test]
async fn watch_delivers_snapshots() {
    let registry = registry_with(Arc::new(MemoryStore::new()), 30, 10);
    let mut watch = registry.watch("api").await.unwrap();

    registry
        .register(ServiceInstance::new("api", "a:1"))
        .await
        .unwrap();
    let snapshot = tokio::time::timeout(Duration::from_secs(5), watch.recv())
        .await
        .expect("no snapshot")
        .expect("watch closed");
    assert_eq!(snapshot.len(), 1);

    let second = registry
        .register(ServiceInstance::new("api", "b:1"))
        .await
        .unwrap();
    let snapshot = tokio::time::timeout(Duration::from_secs(5), watch.recv())
        .await
        .expect("no snapshot")
        .expect("watch closed");
    assert_eq!(snapshot.len(), 2);

    registry.unregister("api", &second.id).await.unwrap();
    let snapshot = tokio::time::timeout(Duration::from_secs(5), watch.recv())
        .await
        .expect("no snapshot")
        .expect("watch closed");
    assert_eq!(snapshot.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn registrar_keeps_instance_alive() {
    let registry = registry_with(Arc::new(MemoryStore::new()), 2, 1);
    let registrar = Registrar::start(
        Arc::clone(&registry),
        ServiceInstance::new("api", "a:1"),
    )
    .await
    .unwrap();

    // Far beyond the TTL, the renewal task has kept the lease fresh.
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(registry.discover("api").await.unwrap().len(), 1);

    registrar.shutdown().await.unwrap();
    assert!(registry.discover("api").await.unwrap().is_empty());
}

#[tokio::test]
async fn mark_stale_flags_unrenewed_instances() {
    let registry = registry_with(Arc::new(MemoryStore::new()), 30, 10);
    registry
        .register(ServiceInstance::new("api", "a:1"))
        .await
        .unwrap();

    // Wall-clock cutoff: anything not renewed in the last 10ms is stale.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let marked = registry
        .mark_stale("api", Duration::from_millis(10))
        .await
        .unwrap();
    assert_eq!(marked, 1);

    let instances = registry.discover("api").await.unwrap();
    assert_eq!(instances[0].status, lodestar_registry::InstanceStatus::Offline);
    assert!(instances[0].offline_at.is_some());

    // Already-offline instances are not re-marked.
    let marked = registry
        .mark_stale("api", Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(marked, 0);
}
