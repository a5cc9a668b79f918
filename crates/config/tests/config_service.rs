//! Config service behavior against the in-process KV store.

use lodestar_config::{ConfigOptions, ConfigService, TypedValue, ValueKind};
use lodestar_core::traits::Component;
use lodestar_core::types::Environment;
use lodestar_core::Error;
use lodestar_kv::{KvStore, MemoryStore};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

fn service_with(kv: Arc<dyn KvStore>, salt: &str) -> ConfigService {
    ConfigService::new(
        kv,
        ConfigOptions {
            prefix: "/aio/config/".to_string(),
            salt: salt.to_string(),
        },
    )
    .unwrap()
}

fn service() -> ConfigService {
    service_with(Arc::new(MemoryStore::new()), "test-salt")
}

fn values(pairs: &[(&str, TypedValue)]) -> HashMap<String, TypedValue> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

#[tokio::test]
async fn set_get_roundtrip_and_version_stamp() {
    let svc = service();
    let first = svc
        .set("db", values(&[("host", TypedValue::string("localhost"))]), HashMap::new())
        .await
        .unwrap();
    let second = svc
        .set("db", values(&[("host", TypedValue::string("db.internal"))]), HashMap::new())
        .await
        .unwrap();
    assert!(second.version > first.version);

    let entry = svc.get("db").await.unwrap();
    assert_eq!(entry.value["host"].value, "db.internal");
    assert!(matches!(svc.get("missing").await, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn encrypted_values_are_sealed_at_rest_and_stable() {
    let svc = service();
    let entry = svc
        .set(
            "secrets",
            values(&[("pw", TypedValue::encrypted("p@ss"))]),
            HashMap::new(),
        )
        .await
        .unwrap();
    let sealed = entry.value["pw"].value.clone();
    assert!(sealed.starts_with("ENC:"));

    // Re-writing the already-sealed value must not double-encrypt.
    let rewritten = svc
        .set(
            "secrets",
            values(&[("pw", TypedValue::encrypted(sealed.clone()))]),
            HashMap::new(),
        )
        .await
        .unwrap();
    assert_eq!(rewritten.value["pw"].value, sealed);

    let resolved = svc.composite("secrets").await.unwrap();
    assert_eq!(resolved["pw"], "p@ss");
}

#[tokio::test]
async fn environment_fallback_order() {
    let svc = service();
    svc.set_for_environment(
        "db",
        Environment::Dev,
        values(&[("host", TypedValue::string("localhost"))]),
        HashMap::new(),
    )
    .await
    .unwrap();

    // Miss on db.test falls back to db.dev.
    let entry = svc
        .get_for_environment("db", Environment::Test, &[Environment::Dev])
        .await
        .unwrap();
    assert_eq!(entry.key, "db.dev");
    assert_eq!(entry.metadata["environment"], "dev");

    // No fallback and no base: NotFound.
    assert!(matches!(
        svc.get_for_environment("db", Environment::Test, &[]).await,
        Err(Error::NotFound(_))
    ));

    // Base entry is the last resort.
    svc.set("db", values(&[("host", TypedValue::string("base"))]), HashMap::new())
        .await
        .unwrap();
    let entry = svc
        .get_for_environment("db", Environment::Prod, &[])
        .await
        .unwrap();
    assert_eq!(entry.key, "db");
}

#[tokio::test]
async fn env_suffix_is_stripped_before_scoped_write() {
    let svc = service();
    svc.set_for_environment(
        "db.dev",
        Environment::Dev,
        values(&[("host", TypedValue::string("h"))]),
        HashMap::new(),
    )
    .await
    .unwrap();
    // Stored as db.dev, not db.dev.dev.
    assert!(svc.get("db.dev").await.is_ok());
    assert!(matches!(svc.get("db.dev.dev").await, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn list_by_environment_buckets() {
    let svc = service();
    svc.set("db", values(&[("h", TypedValue::string("base"))]), HashMap::new())
        .await
        .unwrap();
    svc.set_for_environment(
        "db",
        Environment::Dev,
        values(&[("h", TypedValue::string("dev"))]),
        HashMap::new(),
    )
    .await
    .unwrap();
    svc.set_for_environment(
        "db",
        Environment::Prod,
        values(&[("h", TypedValue::string("prod"))]),
        HashMap::new(),
    )
    .await
    .unwrap();
    // A sibling key sharing the textual prefix must not leak in.
    svc.set("dbx", values(&[("h", TypedValue::string("x"))]), HashMap::new())
        .await
        .unwrap();

    let buckets = svc.list_by_environment("db").await.unwrap();
    assert_eq!(buckets["default"].len(), 1);
    assert_eq!(buckets["dev"].len(), 1);
    assert_eq!(buckets["prod"].len(), 1);
    assert_eq!(buckets.values().map(|v| v.len()).sum::<usize>(), 3);
}

#[tokio::test]
async fn reference_chain_resolves_through_encryption() {
    let svc = service();
    svc.set(
        "secrets",
        values(&[("pw", TypedValue::encrypted("p@ss"))]),
        HashMap::new(),
    )
    .await
    .unwrap();
    svc.set(
        "app",
        values(&[("credential", TypedValue::reference("secrets.pw"))]),
        HashMap::new(),
    )
    .await
    .unwrap();

    let resolved = svc.composite("app").await.unwrap();
    assert_eq!(resolved["credential"], "p@ss");
}

#[tokio::test]
async fn reference_without_property_yields_whole_map() {
    let svc = service();
    svc.set("db", values(&[("host", TypedValue::string("h"))]), HashMap::new())
        .await
        .unwrap();
    svc.set("app", values(&[("db", TypedValue::reference("db"))]), HashMap::new())
        .await
        .unwrap();

    let resolved = svc.composite("app").await.unwrap();
    assert_eq!(resolved["db"]["host"], "h");
}

#[tokio::test]
async fn missing_reference_target_and_property_fail() {
    let svc = service();
    svc.set(
        "app",
        values(&[("x", TypedValue::reference("nowhere.prop"))]),
        HashMap::new(),
    )
    .await
    .unwrap();
    assert!(matches!(
        svc.composite("app").await,
        Err(Error::ReferenceUnresolved(_))
    ));

    svc.set("target", values(&[("a", TypedValue::string("1"))]), HashMap::new())
        .await
        .unwrap();
    svc.set(
        "app2",
        values(&[("x", TypedValue::reference("target.missing"))]),
        HashMap::new(),
    )
    .await
    .unwrap();
    assert!(matches!(
        svc.composite("app2").await,
        Err(Error::ReferenceUnresolved(_))
    ));
}

#[tokio::test]
async fn reference_cycles_are_detected() {
    let svc = service();
    svc.set("a", values(&[("x", TypedValue::reference("b.x"))]), HashMap::new())
        .await
        .unwrap();
    svc.set("b", values(&[("x", TypedValue::reference("a.x"))]), HashMap::new())
        .await
        .unwrap();
    assert!(matches!(
        svc.composite("a").await,
        Err(Error::ReferenceUnresolved(_))
    ));

    // Self-reference is the one-hop cycle.
    svc.set("selfish", values(&[("x", TypedValue::reference("selfish.x"))]), HashMap::new())
        .await
        .unwrap();
    assert!(matches!(
        svc.composite("selfish").await,
        Err(Error::ReferenceUnresolved(_))
    ));

    // A diamond (two paths to one target) is not a cycle.
    svc.set("shared", values(&[("v", TypedValue::string("s"))]), HashMap::new())
        .await
        .unwrap();
    svc.set(
        "diamond",
        values(&[
            ("left", TypedValue::reference("shared.v")),
            ("right", TypedValue::reference("shared.v")),
        ]),
        HashMap::new(),
    )
    .await
    .unwrap();
    let resolved = svc.composite("diamond").await.unwrap();
    assert_eq!(resolved["left"], "s");
    assert_eq!(resolved["right"], "s");
}

#[tokio::test]
async fn composite_with_environment_overlays_base() {
    let svc = service();
    svc.set(
        "app",
        values(&[
            ("host", TypedValue::string("base-host")),
            ("port", TypedValue::int(80)),
        ]),
        HashMap::new(),
    )
    .await
    .unwrap();
    svc.set_for_environment(
        "app",
        Environment::Dev,
        values(&[("host", TypedValue::string("dev-host"))]),
        HashMap::new(),
    )
    .await
    .unwrap();

    let resolved = svc
        .composite_for_environment("app", Environment::Dev, &[])
        .await
        .unwrap();
    // Env value wins, base value survives.
    assert_eq!(resolved["host"], "dev-host");
    assert_eq!(resolved["port"], 80);

    // Resolving an env with no variant falls through to the bare base.
    let resolved = svc
        .composite_for_environment("app", Environment::Prod, &[])
        .await
        .unwrap();
    assert_eq!(resolved["host"], "base-host");
}

#[tokio::test]
async fn primitive_kinds_parse() {
    let svc = service();
    svc.set(
        "mixed",
        values(&[
            ("s", TypedValue::string("text")),
            ("i", TypedValue::int(-7)),
            ("f", TypedValue::float(2.5)),
            ("b", TypedValue::bool(true)),
            ("o", TypedValue::new(ValueKind::Object, r#"{"k":1}"#)),
            ("a", TypedValue::new(ValueKind::Array, "[1,2,3]")),
        ]),
        HashMap::new(),
    )
    .await
    .unwrap();

    let resolved = svc.composite("mixed").await.unwrap();
    assert_eq!(resolved["s"], "text");
    assert_eq!(resolved["i"], -7);
    assert_eq!(resolved["f"], 2.5);
    assert_eq!(resolved["b"], true);
    assert_eq!(resolved["o"]["k"], 1);
    assert_eq!(resolved["a"][2], 3);
}

#[tokio::test]
async fn history_walks_revisions_downward() {
    let svc = service();
    for host in ["one", "two", "three"] {
        svc.set("db", values(&[("host", TypedValue::string(host))]), HashMap::new())
            .await
            .unwrap();
    }

    let history = svc.get_history("db", 10).await.unwrap();
    assert_eq!(history.len(), 3);
    let hosts: Vec<&str> = history
        .iter()
        .map(|r| r.entry.value["host"].value.as_str())
        .collect();
    assert_eq!(hosts, vec!["three", "two", "one"]);
    assert!(history[0].mod_revision > history[1].mod_revision);

    // Limit truncates from the newest end.
    let limited = svc.get_history("db", 2).await.unwrap();
    assert_eq!(limited.len(), 2);
    assert_eq!(limited[0].entry.value["host"].value, "three");

    // Point read at an old revision.
    let old = svc
        .get_by_revision("db", history[2].mod_revision)
        .await
        .unwrap();
    assert_eq!(old.value["host"].value, "one");

    assert!(svc.get_history("missing", 5).await.unwrap().is_empty());
}

#[tokio::test]
async fn export_import_across_salts() {
    let svc_a = service_with(Arc::new(MemoryStore::new()), "salt-a");
    svc_a
        .set(
            "secrets",
            values(&[("pw", TypedValue::encrypted("p@ss"))]),
            HashMap::new(),
        )
        .await
        .unwrap();
    svc_a
        .set("plain", values(&[("v", TypedValue::string("x"))]), HashMap::new())
        .await
        .unwrap();

    let blob = svc_a.export_all("export-pw").await.unwrap();

    // Import into a process with a different salt.
    let svc_b = service_with(Arc::new(MemoryStore::new()), "salt-b");
    let skipped = svc_b.import_all(&blob, "export-pw", true).await.unwrap();
    assert!(skipped.is_empty());

    // Encrypted fields were re-sealed under salt-b and still resolve.
    let stored = svc_b.get("secrets").await.unwrap();
    assert!(stored.value["pw"].value.starts_with("ENC:"));
    let resolved = svc_b.composite("secrets").await.unwrap();
    assert_eq!(resolved["pw"], "p@ss");

    // Wrong password cannot open the blob.
    assert!(svc_b.import_all(&blob, "wrong", true).await.is_err());

    // Re-import with skip_existing reports both keys untouched.
    let skipped = svc_b.import_all(&blob, "export-pw", true).await.unwrap();
    let mut skipped_sorted = skipped.clone();
    skipped_sorted.sort();
    assert_eq!(skipped_sorted, vec!["plain", "secrets"]);
}

#[tokio::test]
async fn watch_delivers_latest_entry_per_key() {
    let kv: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
    let svc = service_with(Arc::clone(&kv), "salt");
    svc.start().await.unwrap();
    // Give the spawned watcher a beat to register with the store.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut sub = svc.subscribe("db").await;
    svc.set("db", values(&[("host", TypedValue::string("h1"))]), HashMap::new())
        .await
        .unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), sub.recv())
        .await
        .expect("no watch event")
        .expect("subscription closed");
    assert_eq!(event.key, "db");
    assert_eq!(event.entry.unwrap().value["host"].value, "h1");

    // Keys outside the subscribed prefix are filtered.
    svc.set("other", values(&[("v", TypedValue::string("x"))]), HashMap::new())
        .await
        .unwrap();
    svc.set("db", values(&[("host", TypedValue::string("h2"))]), HashMap::new())
        .await
        .unwrap();
    let event = tokio::time::timeout(Duration::from_secs(5), sub.recv())
        .await
        .expect("no watch event")
        .expect("subscription closed");
    assert_eq!(event.key, "db");

    // Close ends every subscription.
    svc.close().await;
    assert!(tokio::time::timeout(Duration::from_secs(1), sub.recv())
        .await
        .expect("recv should resolve after close")
        .is_none());
}
