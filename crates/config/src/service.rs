//! The configuration service.

use crate::types::{
    env_key, split_env_suffix, ConfigEntry, ConfigRevision, TypedValue, ValueKind,
    META_ENVIRONMENT,
};
use crate::watch::{Subscription, WatchHub};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use lodestar_core::traits::{Component, ComponentStatus, NodeContext};
use lodestar_core::types::{now_millis, now_nanos, Environment};
use lodestar_core::{Error, Result};
use lodestar_crypto::SaltCipher;
use lodestar_kv::{KvStore, KvStoreExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Construction options for [`ConfigService`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigOptions {
    /// KV prefix all entries live under. Must end with `/`.
    pub prefix: String,
    /// Process-wide salt the field cipher is derived from.
    pub salt: String,
}

impl Default for ConfigOptions {
    fn default() -> Self {
        Self {
            prefix: "/aio/config/".to_string(),
            salt: String::new(),
        }
    }
}

impl ConfigOptions {
    fn validate(&self) -> Result<()> {
        if self.prefix.is_empty() {
            return Err(Error::Configuration("config prefix is required".to_string()));
        }
        if self.salt.is_empty() {
            return Err(Error::Configuration("config salt is required".to_string()));
        }
        Ok(())
    }
}

/// Typed config entries with environment overlays, references, encrypted
/// fields, revision history, and live watches.
pub struct ConfigService {
    kv: Arc<dyn KvStore>,
    prefix: String,
    cipher: SaltCipher,
    salt: Vec<u8>,
    watch: Arc<WatchHub>,
    status: RwLock<ComponentStatus>,
}

impl ConfigService {
    pub fn new(kv: Arc<dyn KvStore>, options: ConfigOptions) -> Result<Self> {
        options.validate()?;
        let mut prefix = options.prefix;
        if !prefix.ends_with('/') {
            prefix.push('/');
        }
        let salt = options.salt.into_bytes();
        let cipher = SaltCipher::new(&salt)?;
        let watch = Arc::new(WatchHub::new(Arc::clone(&kv), prefix.clone()));
        Ok(Self {
            kv,
            prefix,
            cipher,
            salt,
            watch,
            status: RwLock::new(ComponentStatus::NotInitialized),
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn path(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }

    // ── Reads and writes ─────────────────────────────────────────

    /// Fetch one entry. Fails with `NotFound` when absent.
    pub async fn get(&self, key: &str) -> Result<ConfigEntry> {
        self.kv
            .get_json(&self.path(key))
            .await?
            .ok_or_else(|| Error::NotFound(format!("config entry {key}")))
    }

    /// Write an entry. Values tagged `encrypted` whose payload lacks the
    /// `ENC:` prefix are sealed in place before storage. The watch hub picks
    /// the write up through the KV watch.
    pub async fn set(
        &self,
        key: &str,
        mut value: HashMap<String, TypedValue>,
        metadata: HashMap<String, String>,
    ) -> Result<ConfigEntry> {
        if key.is_empty() {
            return Err(Error::InvalidInput("config key is required".to_string()));
        }
        for tv in value.values_mut() {
            if tv.kind == ValueKind::Encrypted {
                tv.value = self.cipher.encrypt_string(&tv.value)?;
            }
        }
        let entry = ConfigEntry {
            key: key.to_string(),
            value,
            metadata,
            version: now_nanos(),
            updated_at: now_millis(),
        };
        self.kv.put_json(&self.path(key), &entry).await?;
        Ok(entry)
    }

    /// Write an entry scoped to `env`. A known env suffix already present on
    /// `key` is stripped first, so passing `db.dev` and `Dev` does not
    /// produce `db.dev.dev`.
    pub async fn set_for_environment(
        &self,
        key: &str,
        env: Environment,
        value: HashMap<String, TypedValue>,
        mut metadata: HashMap<String, String>,
    ) -> Result<ConfigEntry> {
        let (base, _) = split_env_suffix(key);
        metadata.insert(META_ENVIRONMENT.to_string(), env.to_string());
        self.set(&env_key(base, env), value, metadata).await
    }

    /// Environment-scoped read: `base.env`, then each `base.<fallback>` in
    /// order, finally `base` itself. The first hit wins.
    pub async fn get_for_environment(
        &self,
        base_key: &str,
        env: Environment,
        fallbacks: &[Environment],
    ) -> Result<ConfigEntry> {
        let mut candidates = Vec::with_capacity(fallbacks.len() + 2);
        candidates.push(env_key(base_key, env));
        for fallback in fallbacks {
            candidates.push(env_key(base_key, *fallback));
        }
        candidates.push(base_key.to_string());

        for candidate in &candidates {
            match self.get(candidate).await {
                Ok(entry) => return Ok(entry),
                Err(Error::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(Error::NotFound(format!(
            "config entry {base_key} (environment {env})"
        )))
    }

    /// Scan all variants of `base_key` and bucket them by environment.
    /// Entries without an environment land in the `"default"` bucket.
    pub async fn list_by_environment(
        &self,
        base_key: &str,
    ) -> Result<HashMap<String, Vec<ConfigEntry>>> {
        let pairs = self.kv.get_prefix(&self.path(base_key)).await?;
        let mut buckets: HashMap<String, Vec<ConfigEntry>> = HashMap::new();
        for pair in pairs {
            let entry: ConfigEntry = pair.json()?;
            if entry.key != base_key && !entry.key.starts_with(&format!("{base_key}.")) {
                continue;
            }
            let bucket = entry
                .environment()
                .map(|env| env.to_string())
                .unwrap_or_else(|| "default".to_string());
            buckets.entry(bucket).or_default().push(entry);
        }
        Ok(buckets)
    }

    // ── History ──────────────────────────────────────────────────

    /// Walk the key's KV revisions downward from the current head until
    /// `limit` distinct revisions are collected or history runs out.
    pub async fn get_history(&self, key: &str, limit: usize) -> Result<Vec<ConfigRevision>> {
        let path = self.path(key);
        let mut out = Vec::new();
        let Some(head) = self.kv.get(&path).await? else {
            return Ok(out);
        };
        let mut revision = head.mod_revision;
        let mut seen = HashSet::new();
        while out.len() < limit && revision > 0 {
            let Some(pair) = self.kv.get_at_revision(&path, revision).await? else {
                break;
            };
            if !seen.insert(pair.mod_revision) {
                break;
            }
            revision = pair.mod_revision - 1;
            out.push(ConfigRevision {
                entry: pair.json()?,
                mod_revision: pair.mod_revision,
            });
        }
        Ok(out)
    }

    /// Point read of the entry as of a KV revision.
    pub async fn get_by_revision(&self, key: &str, revision: i64) -> Result<ConfigEntry> {
        let pair = self
            .kv
            .get_at_revision(&self.path(key), revision)
            .await?
            .ok_or_else(|| Error::NotFound(format!("config entry {key} at revision {revision}")))?;
        pair.json()
    }

    // ── Composite resolution ─────────────────────────────────────

    /// Fully resolve an entry: primitives parsed, JSON decoded, encrypted
    /// fields decrypted, references dereferenced (recursively).
    pub async fn composite(&self, key: &str) -> Result<Map<String, Value>> {
        let entry = self.get(key).await?;
        let mut visited = HashSet::new();
        self.resolve_entry(&entry, &mut visited).await
    }

    /// Composite resolution honoring environment overlays: when the
    /// environment variant resolves and a base entry exists, the variant's
    /// values shallowly overlay the base's.
    pub async fn composite_for_environment(
        &self,
        key: &str,
        env: Environment,
        fallbacks: &[Environment],
    ) -> Result<Map<String, Value>> {
        let entry = self.get_for_environment(key, env, fallbacks).await?;
        let mut visited = HashSet::new();
        let resolved = self.resolve_entry(&entry, &mut visited).await?;

        let (base, suffix) = split_env_suffix(&entry.key);
        if suffix.is_none() {
            return Ok(resolved);
        }
        match self.get(base).await {
            Ok(base_entry) => {
                let mut merged = self.resolve_entry(&base_entry, &mut HashSet::new()).await?;
                for (k, v) in resolved {
                    merged.insert(k, v);
                }
                Ok(merged)
            }
            Err(Error::NotFound(_)) => Ok(resolved),
            Err(e) => Err(e),
        }
    }

    fn resolve_key<'a>(
        &'a self,
        key: &'a str,
        visited: &'a mut HashSet<String>,
    ) -> BoxFuture<'a, Result<Map<String, Value>>> {
        async move {
            // Re-entering a key on the current resolution path is a cycle.
            if !visited.insert(key.to_string()) {
                return Err(Error::ReferenceUnresolved(format!(
                    "reference cycle through {key}"
                )));
            }
            let entry = self.get(key).await.map_err(|e| match e {
                Error::NotFound(_) => {
                    Error::ReferenceUnresolved(format!("referenced entry {key} not found"))
                }
                other => other,
            })?;
            let resolved = self.resolve_entry_inner(&entry, visited).await;
            visited.remove(key);
            resolved
        }
        .boxed()
    }

    async fn resolve_entry(
        &self,
        entry: &ConfigEntry,
        visited: &mut HashSet<String>,
    ) -> Result<Map<String, Value>> {
        visited.insert(entry.key.clone());
        let out = self.resolve_entry_inner(entry, visited).await;
        visited.remove(&entry.key);
        out
    }

    async fn resolve_entry_inner(
        &self,
        entry: &ConfigEntry,
        visited: &mut HashSet<String>,
    ) -> Result<Map<String, Value>> {
        let mut out = Map::new();
        for (name, tv) in &entry.value {
            out.insert(name.clone(), self.resolve_value(tv, visited).await?);
        }
        Ok(out)
    }

    async fn resolve_value(
        &self,
        tv: &TypedValue,
        visited: &mut HashSet<String>,
    ) -> Result<Value> {
        match tv.kind {
            ValueKind::String => Ok(Value::String(tv.value.clone())),
            ValueKind::Int => {
                let n: i64 = tv.value.parse().map_err(|_| {
                    Error::Serialization(format!("invalid int config value: {}", tv.value))
                })?;
                Ok(Value::from(n))
            }
            ValueKind::Float => {
                let n: f64 = tv.value.parse().map_err(|_| {
                    Error::Serialization(format!("invalid float config value: {}", tv.value))
                })?;
                Ok(Value::from(n))
            }
            ValueKind::Bool => {
                let b: bool = tv.value.parse().map_err(|_| {
                    Error::Serialization(format!("invalid bool config value: {}", tv.value))
                })?;
                Ok(Value::Bool(b))
            }
            ValueKind::Object | ValueKind::Array => Ok(serde_json::from_str(&tv.value)?),
            ValueKind::Encrypted => Ok(Value::String(self.cipher.decrypt_string(&tv.value)?)),
            ValueKind::Reference => {
                // `<target key>.<property>`, split at the last dot. Without
                // a dot the whole string names the entry and the property is
                // empty, yielding the full resolved map.
                let (target, property) = match tv.value.rsplit_once('.') {
                    Some((target, property)) => (target, property),
                    None => (tv.value.as_str(), ""),
                };
                let resolved = self.resolve_key(target, visited).await?;
                if property.is_empty() {
                    return Ok(Value::Object(resolved));
                }
                resolved.get(property).cloned().ok_or_else(|| {
                    Error::ReferenceUnresolved(format!(
                        "property {property} not found in {target}"
                    ))
                })
            }
        }
    }

    // ── Export / import ──────────────────────────────────────────

    /// Every entry under the prefix, as stored.
    pub async fn list_all(&self) -> Result<Vec<ConfigEntry>> {
        self.kv.list_json(&self.prefix).await
    }

    pub(crate) fn cipher(&self) -> &SaltCipher {
        &self.cipher
    }

    pub(crate) fn salt(&self) -> &[u8] {
        &self.salt
    }

    // ── Watch ────────────────────────────────────────────────────

    /// Subscribe to changes under a key prefix (empty prefix = everything).
    pub async fn subscribe(&self, key_prefix: &str) -> Subscription {
        self.watch.subscribe(key_prefix).await
    }

    pub async fn unsubscribe(&self, id: u64) {
        self.watch.unsubscribe(id).await;
    }

    /// Stop the watcher and close every subscriber channel.
    pub async fn close(&self) {
        self.watch.close().await;
        *self.status.write().expect("status poisoned") = ComponentStatus::Stopped;
    }
}

#[async_trait]
impl Component for ConfigService {
    fn name(&self) -> &str {
        "config"
    }

    fn status(&self) -> ComponentStatus {
        *self.status.read().expect("status poisoned")
    }

    async fn init(&self, _ctx: &NodeContext, _raw_config: serde_json::Value) -> Result<()> {
        *self.status.write().expect("status poisoned") = ComponentStatus::Initialized;
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        WatchHub::start(Arc::clone(&self.watch));
        debug!(prefix = %self.prefix, "config watcher started");
        *self.status.write().expect("status poisoned") = ComponentStatus::Running;
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.close().await;
        Ok(())
    }
}
